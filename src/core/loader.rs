//! Bounded-retry loading of the watched file.

use crate::core::reader::TabularReader;
use crate::core::record::RecordSet;
use crate::error::{Result, SheetError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How many times to try a read, and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed pause after each failed attempt but the last.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a retry policy.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for RetryPolicy {
    /// 5 attempts, 2 seconds apart.
    fn default() -> Self {
        Self::new(5, Duration::from_secs(2))
    }
}

/// Wraps a [`TabularReader`] with a fixed-delay retry loop.
///
/// The expected failure is a short-lived writer lock, so every retry waits
/// the same amount of time. Intermediate failures are logged and dropped;
/// only the final outcome reaches the caller.
///
/// Each attempt runs on tokio's blocking pool, and the pause between attempts
/// is an async sleep, so a retrying load never stalls the runtime.
#[derive(Clone)]
pub struct RetryingLoader {
    reader: Arc<TabularReader>,
    policy: RetryPolicy,
}

impl RetryingLoader {
    /// Create a loader.
    pub fn new(reader: TabularReader, policy: RetryPolicy) -> Self {
        Self {
            reader: Arc::new(reader),
            policy,
        }
    }

    /// The retry policy in effect.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Load the file at `path`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// - `SourceExhausted` once `max_attempts` consecutive attempts fail with
    ///   a retryable error
    /// - `SourceFormatInvalid` immediately, since retrying cannot fix it
    pub async fn load(&self, path: &Path) -> Result<RecordSet> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let reader = Arc::clone(&self.reader);
            let target = path.to_path_buf();
            let outcome = tokio::task::spawn_blocking(move || reader.parse(&target))
                .await
                .map_err(|e| SheetError::Other(format!("Parse task failed: {}", e)))?;

            match outcome {
                Ok(records) => {
                    debug!(path = %path.display(), attempt, rows = records.len(), "loaded sheet");
                    return Ok(records);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        attempt,
                        max_attempts,
                        error = %err,
                        "sheet unavailable"
                    );
                    last_error = Some(err);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }

        Err(SheetError::SourceExhausted {
            path: path.to_path_buf(),
            attempts: max_attempts,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reader::HeaderPolicy;
    use crate::sources::{RawCell, Sheet, SheetSource};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with a retryable error until `fail_until` attempts have been made.
    struct FlakySource {
        calls: AtomicU32,
        fail_until: u32,
    }

    impl FlakySource {
        fn new(fail_until: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_until,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SheetSource for FlakySource {
        fn read_sheet(&self, path: &Path) -> Result<Sheet> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_until {
                return Err(SheetError::unreadable(path, "being used by another process"));
            }
            Ok(Sheet::default()
                .with_row(0, vec![RawCell::text("name")])
                .with_row(1, vec![RawCell::text("a")]))
        }

        fn name(&self) -> String {
            "flaky".to_string()
        }
    }

    struct HeaderlessSource {
        calls: AtomicU32,
    }

    impl SheetSource for HeaderlessSource {
        fn read_sheet(&self, _path: &Path) -> Result<Sheet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Sheet::default())
        }

        fn name(&self) -> String {
            "headerless".to_string()
        }
    }

    fn loader(source: Arc<dyn SheetSource>, max_attempts: u32) -> RetryingLoader {
        RetryingLoader::new(
            TabularReader::new(source, HeaderPolicy::default()),
            RetryPolicy::new(max_attempts, Duration::from_millis(10)),
        )
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let source = FlakySource::new(0);
        let records = loader(source.clone(), 5)
            .load(Path::new("book.xlsx"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_success_on_attempt_k_makes_k_attempts() {
        let source = FlakySource::new(2);
        let records = loader(source.clone(), 5)
            .load(Path::new("book.xlsx"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_success_on_last_attempt() {
        let source = FlakySource::new(4);
        assert!(loader(source.clone(), 5).load(Path::new("book.xlsx")).await.is_ok());
        assert_eq!(source.calls(), 5);
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let source = FlakySource::new(u32::MAX);
        let err = loader(source.clone(), 3)
            .load(Path::new("book.xlsx"))
            .await
            .unwrap_err();

        match err {
            SheetError::SourceExhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("another process"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let source = FlakySource::new(0);
        assert!(loader(source.clone(), 0).load(Path::new("book.xlsx")).await.is_ok());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_format_errors_are_not_retried() {
        let source = Arc::new(HeaderlessSource {
            calls: AtomicU32::new(0),
        });
        let err = loader(source.clone(), 5)
            .load(Path::new("book.xlsx"))
            .await
            .unwrap_err();
        assert!(matches!(err, SheetError::SourceFormatInvalid(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_attempts() {
        let source = FlakySource::new(2);
        let loader = RetryingLoader::new(
            TabularReader::new(source.clone(), HeaderPolicy::default()),
            RetryPolicy::new(5, Duration::from_secs(2)),
        );

        let started = tokio::time::Instant::now();
        loader.load(Path::new("book.xlsx")).await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(4), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(6), "elapsed {elapsed:?}");
    }
}
