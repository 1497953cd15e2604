//! Service configuration.

use crate::core::loader::RetryPolicy;
use crate::core::reader::HeaderPolicy;
use crate::core::validation::Validate;
use crate::error::{Result, SheetError, ValidationError};
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What the pull endpoint returns when every read attempt fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullFailurePolicy {
    /// Log the failure and answer with an empty record set.
    ///
    /// This matches long-standing endpoint behavior, but a client cannot tell
    /// "no rows" from "could not read the file". Prefer `Propagate`.
    #[default]
    EmptyResult,
    /// Return the error to the caller.
    Propagate,
}

/// Start-up configuration for a [`DataService`](crate::core::DataService).
///
/// Every field has a default, so a config file only needs the keys it changes.
///
/// # Examples
///
/// ```rust,no_run
/// use sheetwatch::core::ServiceConfig;
/// use std::path::Path;
///
/// # fn example() -> sheetwatch::error::Result<()> {
/// // config/sheetwatch.toml, then SHEETWATCH_MAX_ATTEMPTS=... style overrides
/// let config = ServiceConfig::load(Some(Path::new("config/sheetwatch.toml")), Some("SHEETWATCH"))?;
/// println!("watching {}", config.path.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// The watched workbook.
    pub path: PathBuf,
    /// Read attempts per load, including the first.
    pub max_attempts: u32,
    /// Pause between read attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Treatment of columns without a header name.
    pub headers: HeaderPolicy,
    /// Pull endpoint behavior when reads are exhausted.
    pub pull_failure: PullFailurePolicy,
    /// Coalesce change events arriving within this many milliseconds.
    /// Unset means every event triggers its own read.
    pub debounce_ms: Option<u64>,
    /// Upper bound on concurrent reads. Unset means one per available core.
    pub max_concurrent_reads: Option<usize>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/records.xlsx"),
            max_attempts: 5,
            retry_delay_ms: 2000,
            headers: HeaderPolicy::default(),
            pull_failure: PullFailurePolicy::default(),
            debounce_ms: None,
            max_concurrent_reads: None,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from an optional file plus environment overrides.
    ///
    /// The file format (YAML, TOML, or JSON) follows its extension. With an
    /// `env_prefix` of `"SHEETWATCH"`, `SHEETWATCH_MAX_ATTEMPTS=3` overrides
    /// `max_attempts`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or a value has the
    /// wrong type.
    pub fn load(file: Option<&Path>, env_prefix: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(true));
        }

        if let Some(prefix) = env_prefix {
            builder = builder.add_source(
                config::Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config = builder
            .build()
            .map_err(|e| SheetError::ConfigError(format!("Failed to load configuration: {}", e)))?;

        config.try_deserialize::<Self>().map_err(|e| {
            SheetError::ConfigError(format!("Failed to deserialize configuration: {}", e))
        })
    }

    /// Retry policy derived from `max_attempts` and `retry_delay_ms`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }

    /// Debounce window, if enabled.
    pub fn debounce(&self) -> Option<Duration> {
        self.debounce_ms.map(Duration::from_millis)
    }

    /// Number of reads allowed to run at once.
    pub fn read_concurrency(&self) -> usize {
        self.max_concurrent_reads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }
}

impl Validate for ServiceConfig {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        let mut errors = Vec::new();

        if self.path.file_name().is_none() {
            errors.push(ValidationError::invalid_field(
                "path",
                format!("'{}' does not name a file", self.path.display()),
            ));
        }
        if self.max_attempts == 0 {
            errors.push(ValidationError::invalid_field(
                "max_attempts",
                "must be at least 1",
            ));
        }
        if self.max_concurrent_reads == Some(0) {
            errors.push(ValidationError::invalid_field(
                "max_concurrent_reads",
                "must be at least 1",
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_policy().delay, Duration::from_secs(2));
        assert_eq!(config.debounce(), None);
        assert_eq!(config.pull_failure, PullFailurePolicy::EmptyResult);
        assert_eq!(config.headers, HeaderPolicy::KeepAnonymous);
        assert!(config.read_concurrency() >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_toml_file_keeps_defaults_for_missing_keys() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("sheetwatch.toml");
        fs::write(
            &config_path,
            r#"
path = "/srv/data/book.xlsx"
max_attempts = 3
headers = "drop_anonymous"
pull_failure = "propagate"
debounce_ms = 250
"#,
        )
        .unwrap();

        let config = ServiceConfig::load(Some(&config_path), None).unwrap();
        assert_eq!(config.path, PathBuf::from("/srv/data/book.xlsx"));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_delay_ms, 2000);
        assert_eq!(config.headers, HeaderPolicy::DropAnonymous);
        assert_eq!(config.pull_failure, PullFailurePolicy::Propagate);
        assert_eq!(config.debounce(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_load_without_sources_is_default() {
        let config = ServiceConfig::load(None, None).unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn test_load_missing_file() {
        let result = ServiceConfig::load(Some(Path::new("/nonexistent/sheetwatch.toml")), None);
        assert!(matches!(result, Err(SheetError::ConfigError(_))));
    }

    #[test]
    fn test_validation() {
        let config = ServiceConfig {
            max_attempts: 0,
            ..ServiceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidField { .. })
        ));

        let config = ServiceConfig {
            path: PathBuf::from("/"),
            max_attempts: 0,
            max_concurrent_reads: Some(0),
            ..ServiceConfig::default()
        };
        match config.validate() {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }
}
