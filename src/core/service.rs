//! The data service tying reading, retrying, watching and broadcasting together.

use crate::broadcast::{Broadcaster, DATA_UPDATES, MESSAGES, Payload};
use crate::core::builder::DataServiceBuilder;
use crate::core::config::{PullFailurePolicy, ServiceConfig};
use crate::core::loader::RetryingLoader;
use crate::core::record::RecordSet;
use crate::error::{Result, SheetError};
use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

#[cfg(feature = "file-watch")]
use crate::watch::{ChangeHandler, ChangeWatcher, WatchState};
#[cfg(feature = "file-watch")]
use async_trait::async_trait;

/// Load, store, publish. Shared by the pull path and the watcher path.
pub(crate) struct Pipeline {
    loader: RetryingLoader,
    path: PathBuf,
    broadcaster: Arc<dyn Broadcaster>,
    latest: ArcSwap<RecordSet>,
    permits: Semaphore,
}

impl Pipeline {
    pub(crate) fn new(
        loader: RetryingLoader,
        path: PathBuf,
        broadcaster: Arc<dyn Broadcaster>,
        max_concurrent_reads: usize,
    ) -> Self {
        Self {
            loader,
            path,
            broadcaster,
            latest: ArcSwap::from_pointee(RecordSet::empty()),
            permits: Semaphore::new(max_concurrent_reads.max(1)),
        }
    }

    async fn refresh(&self) -> Result<RecordSet> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| SheetError::Other(format!("Read permits closed: {}", e)))?;
        let records = self.loader.load(&self.path).await?;
        drop(permit);

        self.latest.store(Arc::new(records.clone()));

        match self
            .broadcaster
            .publish(DATA_UPDATES, Payload::Records(records.clone()))
            .await
        {
            Ok(()) => info!(
                topic = DATA_UPDATES,
                path = %self.path.display(),
                rows = records.len(),
                "broadcast records"
            ),
            Err(e) => warn!(topic = DATA_UPDATES, error = %e, "failed to broadcast records"),
        }

        Ok(records)
    }
}

#[cfg(feature = "file-watch")]
#[async_trait]
impl ChangeHandler for Pipeline {
    async fn on_change(&self) {
        if let Err(e) = self.refresh().await {
            error!(path = %self.path.display(), error = %e, "failed to reload changed sheet");
        }
    }
}

/// Serves the contents of one workbook, on request and on every change.
///
/// Every successful read, whether pulled or triggered by the watcher, is
/// stored as the [`latest`](Self::latest) snapshot and published on
/// [`DATA_UPDATES`].
///
/// # Examples
///
/// ```rust,no_run
/// use sheetwatch::prelude::*;
///
/// # async fn example() -> Result<()> {
/// let registry = SubscriberRegistry::new();
/// let _updates = registry
///     .subscribe(DATA_UPDATES, |message| println!("{:?}", message.payload))
///     .await;
///
/// let service = DataService::builder()
///     .with_path("data/records.xlsx")
///     .with_broadcaster(registry.clone())
///     .build()?;
///
/// service.start()?;
/// let records = service.pull().await?;
/// println!("{} rows", records.len());
/// # Ok(())
/// # }
/// ```
pub struct DataService {
    pipeline: Arc<Pipeline>,
    config: ServiceConfig,
    #[cfg(feature = "file-watch")]
    watcher: ChangeWatcher,
}

impl DataService {
    /// Start building a service.
    pub fn builder() -> DataServiceBuilder {
        DataServiceBuilder::new()
    }

    pub(crate) fn from_parts(pipeline: Pipeline, config: ServiceConfig) -> Self {
        Self {
            #[cfg(feature = "file-watch")]
            watcher: ChangeWatcher::new(config.path.clone()).with_debounce(config.debounce()),
            pipeline: Arc::new(pipeline),
            config,
        }
    }

    /// Read the workbook now, then store and broadcast the result.
    ///
    /// A failed broadcast is logged and does not fail the pull.
    ///
    /// # Errors
    ///
    /// - `SourceExhausted` if every read attempt failed
    /// - `SourceFormatInvalid` if the workbook has no worksheet or header row
    pub async fn pull(&self) -> Result<RecordSet> {
        self.pipeline.refresh().await
    }

    /// [`pull`](Self::pull), with the configured [`PullFailurePolicy`] applied.
    ///
    /// This is what an HTTP data endpoint should call.
    ///
    /// # Errors
    ///
    /// Only under [`PullFailurePolicy::Propagate`], with the errors of `pull`.
    pub async fn serve_pull(&self) -> Result<RecordSet> {
        match self.pull().await {
            Ok(records) => Ok(records),
            Err(e) => match self.config.pull_failure {
                PullFailurePolicy::EmptyResult => {
                    error!(
                        path = %self.config.path.display(),
                        error = %e,
                        "pull failed; answering with no records"
                    );
                    Ok(RecordSet::empty())
                }
                PullFailurePolicy::Propagate => Err(e),
            },
        }
    }

    /// Publish `text` on [`MESSAGES`] and return the acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns `PublishError` if the broadcaster rejects the message.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<String> {
        let text = text.into();
        let ack = format!("Message sent: {}", text);
        self.pipeline
            .broadcaster
            .publish(MESSAGES, Payload::Text(text))
            .await?;
        Ok(ack)
    }

    /// The most recently broadcast records. Empty until the first read.
    pub fn latest(&self) -> Arc<RecordSet> {
        self.pipeline.latest.load_full()
    }

    /// The watched workbook.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// The configuration this service was built with.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Begin watching the workbook. Idempotent.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `WatchUnavailable` if the parent directory cannot be watched.
    #[cfg(feature = "file-watch")]
    pub fn start(&self) -> Result<()> {
        self.watcher
            .start(Arc::clone(&self.pipeline) as Arc<dyn ChangeHandler>)
    }

    /// Stop watching. Idempotent; a stopped service cannot be restarted.
    #[cfg(feature = "file-watch")]
    pub fn stop(&self) {
        self.watcher.stop();
    }

    /// Where the watcher is in its lifecycle.
    #[cfg(feature = "file-watch")]
    pub fn watch_state(&self) -> WatchState {
        self.watcher.state()
    }
}

impl std::fmt::Debug for DataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataService")
            .field("config", &self.config)
            .field("latest_rows", &self.latest().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{Message, SubscriberRegistry};
    use crate::core::record::CellValue;
    use crate::sources::{RawCell, Sheet, SheetSource};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScoreSource {
        available: AtomicBool,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        hold: Duration,
    }

    impl ScoreSource {
        fn new(available: bool) -> Self {
            Self {
                available: AtomicBool::new(available),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                hold: Duration::ZERO,
            }
        }
    }

    impl SheetSource for ScoreSource {
        fn read_sheet(&self, path: &Path) -> Result<Sheet> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.hold);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if !self.available.load(Ordering::SeqCst) {
                return Err(SheetError::unreadable(path, "locked"));
            }
            Ok(Sheet::default()
                .with_row(0, vec![RawCell::text("name"), RawCell::text("score")])
                .with_row(1, vec![RawCell::text("a"), RawCell::number(1.0)]))
        }

        fn name(&self) -> String {
            "score".to_string()
        }
    }

    /// Shares one `ScoreSource` with the test body.
    struct Shared(Arc<ScoreSource>);

    impl SheetSource for Shared {
        fn read_sheet(&self, path: &Path) -> Result<Sheet> {
            self.0.read_sheet(path)
        }

        fn name(&self) -> String {
            self.0.name()
        }
    }

    #[derive(Default, Clone)]
    struct Recorder {
        messages: Arc<Mutex<Vec<Message>>>,
    }

    #[async_trait]
    impl Broadcaster for Recorder {
        async fn publish(&self, topic: &str, payload: Payload) -> Result<()> {
            self.messages.lock().push(Message::new(topic, payload));
            Ok(())
        }
    }

    struct Rejecting;

    #[async_trait]
    impl Broadcaster for Rejecting {
        async fn publish(&self, topic: &str, _payload: Payload) -> Result<()> {
            Err(SheetError::PublishError {
                topic: topic.to_string(),
                reason: "transport closed".to_string(),
            })
        }
    }

    fn builder(source: Arc<ScoreSource>) -> DataServiceBuilder {
        DataService::builder()
            .with_path("book.xlsx")
            .with_retry(2, Duration::from_millis(5))
            .with_source(Shared(source))
    }

    #[tokio::test]
    async fn test_pull_stores_and_publishes_once() {
        let recorder = Recorder::default();
        let service = builder(Arc::new(ScoreSource::new(true)))
            .with_broadcaster(recorder.clone())
            .build()
            .unwrap();

        assert!(service.latest().is_empty());
        let records = service.pull().await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records.records()[0].get("score"), Some(&CellValue::Number(1.0)));
        assert_eq!(*service.latest(), records);

        let messages = recorder.messages.lock();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, DATA_UPDATES);
        assert_eq!(messages[0].payload.records(), Some(&records));
    }

    #[tokio::test]
    async fn test_failed_pull_publishes_nothing() {
        let recorder = Recorder::default();
        let service = builder(Arc::new(ScoreSource::new(false)))
            .with_broadcaster(recorder.clone())
            .build()
            .unwrap();

        let err = service.pull().await.unwrap_err();
        assert!(matches!(err, SheetError::SourceExhausted { attempts: 2, .. }));
        assert!(recorder.messages.lock().is_empty());
        assert!(service.latest().is_empty());
    }

    #[tokio::test]
    async fn test_serve_pull_policies() {
        let lenient = builder(Arc::new(ScoreSource::new(false))).build().unwrap();
        assert!(lenient.serve_pull().await.unwrap().is_empty());

        let strict = builder(Arc::new(ScoreSource::new(false)))
            .with_pull_failure(PullFailurePolicy::Propagate)
            .build()
            .unwrap();
        assert!(matches!(
            strict.serve_pull().await,
            Err(SheetError::SourceExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_broadcast_failure_does_not_fail_pull() {
        let service = builder(Arc::new(ScoreSource::new(true)))
            .with_broadcaster(Rejecting)
            .build()
            .unwrap();

        let records = service.pull().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(service.latest().len(), 1);
    }

    #[tokio::test]
    async fn test_send_message() {
        let registry = SubscriberRegistry::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let _handle = registry
            .subscribe(MESSAGES, move |message: &Message| {
                sink.lock().push(message.payload.text().map(str::to_string));
            })
            .await;

        let service = builder(Arc::new(ScoreSource::new(true)))
            .with_broadcaster(registry)
            .build()
            .unwrap();

        let ack = service.send_message("hello").await.unwrap();
        assert_eq!(ack, "Message sent: hello");
        assert_eq!(*received.lock(), vec![Some("hello".to_string())]);
    }

    #[tokio::test]
    async fn test_send_message_surfaces_publish_error() {
        let service = builder(Arc::new(ScoreSource::new(true)))
            .with_broadcaster(Rejecting)
            .build()
            .unwrap();

        assert!(matches!(
            service.send_message("hello").await,
            Err(SheetError::PublishError { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_reads_are_bounded() {
        let source = Arc::new(ScoreSource {
            hold: Duration::from_millis(30),
            ..ScoreSource::new(true)
        });
        let service = builder(Arc::clone(&source))
            .with_max_concurrent_reads(1)
            .build()
            .unwrap();

        let (a, b, c) = tokio::join!(service.pull(), service.pull(), service.pull());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(source.peak.load(Ordering::SeqCst), 1);
    }

    #[cfg(feature = "file-watch")]
    #[tokio::test]
    async fn test_change_handler_swallows_exhaustion() {
        let source = Arc::new(ScoreSource::new(false));
        let recorder = Recorder::default();
        let service = builder(Arc::clone(&source))
            .with_broadcaster(recorder.clone())
            .build()
            .unwrap();

        service.pipeline.on_change().await;
        assert!(recorder.messages.lock().is_empty());

        source.available.store(true, Ordering::SeqCst);
        service.pipeline.on_change().await;
        assert_eq!(recorder.messages.lock().len(), 1);
        assert_eq!(service.latest().len(), 1);
    }

    #[cfg(feature = "file-watch")]
    #[test]
    fn test_new_service_is_idle() {
        let service = builder(Arc::new(ScoreSource::new(true))).build().unwrap();
        assert_eq!(service.watch_state(), WatchState::Idle);
        service.stop();
        assert_eq!(service.watch_state(), WatchState::Stopped);
    }
}
