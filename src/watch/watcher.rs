//! Directory watching with one dispatch loop per watcher.

use crate::error::{Result, SheetError};
use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

/// Lifecycle of a [`ChangeWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Created but not started.
    Idle,
    /// Waiting for the next change event.
    Armed,
    /// Running the change handler.
    Dispatching,
    /// Stopped for good. A watcher cannot be restarted.
    Stopped,
}

/// Reaction to a modification of the watched file.
///
/// Handlers run one at a time on the watcher task. A handler that fails should
/// log and return, so the watcher keeps running.
#[async_trait]
pub trait ChangeHandler: Send + Sync + 'static {
    /// Called once per relevant change event.
    async fn on_change(&self);
}

/// Live OS subscription plus the signal that ends the dispatch loop.
struct Session {
    _watcher: RecommendedWatcher,
    _stop: oneshot::Sender<()>,
}

/// Watches a single file through its parent directory.
///
/// # Examples
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use sheetwatch::watch::{ChangeHandler, ChangeWatcher};
/// use std::sync::Arc;
///
/// struct Print;
///
/// #[async_trait]
/// impl ChangeHandler for Print {
///     async fn on_change(&self) {
///         println!("sheet changed");
///     }
/// }
///
/// # async fn example() -> sheetwatch::error::Result<()> {
/// let watcher = ChangeWatcher::new("data/records.xlsx");
/// watcher.start(Arc::new(Print))?;
/// // ...
/// watcher.stop();
/// # Ok(())
/// # }
/// ```
pub struct ChangeWatcher {
    target: PathBuf,
    debounce: Option<Duration>,
    state: Arc<Mutex<WatchState>>,
    session: Mutex<Option<Session>>,
}

impl ChangeWatcher {
    /// Create an idle watcher for `target`.
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            debounce: None,
            state: Arc::new(Mutex::new(WatchState::Idle)),
            session: Mutex::new(None),
        }
    }

    /// Coalesce events that arrive within `window` of the first one.
    pub fn with_debounce(mut self, window: Option<Duration>) -> Self {
        self.debounce = window;
        self
    }

    /// The watched file.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WatchState {
        *self.state.lock()
    }

    /// Register the OS watch and spawn the dispatch loop.
    ///
    /// Must be called from within a Tokio runtime. Does nothing unless the
    /// watcher is idle.
    ///
    /// # Errors
    ///
    /// Returns `WatchUnavailable` if there is no runtime, the parent directory
    /// cannot be resolved, or the OS refuses the watch.
    pub fn start(&self, handler: Arc<dyn ChangeHandler>) -> Result<()> {
        let mut state = self.state.lock();
        if *state != WatchState::Idle {
            debug!(state = ?*state, "watcher already started");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SheetError::WatchUnavailable(format!("No Tokio runtime: {}", e)))?;
        let file_name = self
            .target
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| {
                SheetError::WatchUnavailable(format!(
                    "'{}' does not name a file",
                    self.target.display()
                ))
            })?;
        let dir = watch_dir(&self.target)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                // The receiver is gone once the loop has ended
                let _ = event_tx.send(event);
            }
            Err(e) => warn!(error = %e, "file watcher error"),
        })
        .map_err(|e| SheetError::WatchUnavailable(format!("Failed to create file watcher: {}", e)))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                SheetError::WatchUnavailable(format!(
                    "Failed to watch '{}': {}",
                    dir.display(),
                    e
                ))
            })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let dispatcher = Dispatcher {
            file_name,
            debounce: self.debounce,
            state: Arc::clone(&self.state),
            handler,
        };

        *state = WatchState::Armed;
        *self.session.lock() = Some(Session {
            _watcher: watcher,
            _stop: stop_tx,
        });
        drop(state);

        runtime.spawn(dispatcher.run(event_rx, stop_rx));
        info!(path = %self.target.display(), dir = %dir.display(), "watching for changes");
        Ok(())
    }

    /// Release the OS watch and end the dispatch loop.
    ///
    /// A handler call already in progress runs to completion. Idempotent.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), WatchState::Stopped);
        // Dropping the session closes both the event channel and the stop signal
        let session = self.session.lock().take();
        if session.is_some() {
            info!(path = %self.target.display(), "stopped watching");
        } else if previous != WatchState::Stopped {
            debug!(path = %self.target.display(), "watcher stopped before start");
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("target", &self.target)
            .field("debounce", &self.debounce)
            .field("state", &self.state())
            .finish()
    }
}

/// Resolve the directory to register for `target`.
fn watch_dir(target: &Path) -> Result<PathBuf> {
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    parent.canonicalize().map_err(|e| {
        SheetError::WatchUnavailable(format!(
            "Failed to resolve '{}': {}",
            parent.display(),
            e
        ))
    })
}

/// The task body that turns raw events into handler calls.
pub(crate) struct Dispatcher {
    pub(crate) file_name: OsString,
    pub(crate) debounce: Option<Duration>,
    pub(crate) state: Arc<Mutex<WatchState>>,
    pub(crate) handler: Arc<dyn ChangeHandler>,
}

impl Dispatcher {
    fn is_relevant(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Modify(_))
            && event
                .paths
                .iter()
                .any(|path| path.file_name() == Some(self.file_name.as_os_str()))
    }

    /// Move `from` to `to`, unless the state has changed under us.
    fn transition(&self, from: WatchState, to: WatchState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    pub(crate) async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut stop: oneshot::Receiver<()>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = &mut stop => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if !self.is_relevant(&event) {
                trace!(kind = ?event.kind, paths = ?event.paths, "ignoring event");
                continue;
            }

            if let Some(window) = self.debounce {
                sleep(window).await;
                let mut coalesced = 0usize;
                while events.try_recv().is_ok() {
                    coalesced += 1;
                }
                debug!(coalesced, "debounced change events");
            }

            if !self.transition(WatchState::Armed, WatchState::Dispatching) {
                break;
            }
            debug!(kind = ?event.kind, "sheet modified");
            self.handler.on_change().await;
            if !self.transition(WatchState::Dispatching, WatchState::Armed) {
                break;
            }
        }
        trace!("dispatch loop ended");
    }
}
