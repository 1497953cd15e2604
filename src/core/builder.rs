//! Builder for constructing DataService instances.

use crate::broadcast::{Broadcaster, SubscriberRegistry};
use crate::core::config::{PullFailurePolicy, ServiceConfig};
use crate::core::loader::RetryingLoader;
use crate::core::reader::{HeaderPolicy, TabularReader};
use crate::core::service::{DataService, Pipeline};
use crate::core::validation::Validate;
use crate::error::Result;
use crate::sources::{SheetSource, XlsxSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Builder for constructing a [`DataService`].
///
/// Starts from [`ServiceConfig::default`], reads workbooks with
/// [`XlsxSource`], and broadcasts into a fresh [`SubscriberRegistry`] unless
/// told otherwise.
///
/// # Examples
///
/// ```rust,no_run
/// use sheetwatch::prelude::*;
/// use std::time::Duration;
///
/// # fn example() -> Result<()> {
/// let service = DataService::builder()
///     .with_path("data/records.xlsx")
///     .with_retry(3, Duration::from_millis(500))
///     .with_pull_failure(PullFailurePolicy::Propagate)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct DataServiceBuilder {
    config: ServiceConfig,
    source: Option<Arc<dyn SheetSource>>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
}

impl DataServiceBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServiceConfig::default(),
            source: None,
            broadcaster: None,
        }
    }

    /// Replace every setting with `config`.
    ///
    /// Later `with_*` calls still override individual fields.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use sheetwatch::prelude::*;
    /// use std::path::Path;
    ///
    /// # fn example() -> Result<()> {
    /// let config = ServiceConfig::load(Some(Path::new("config/sheetwatch.yaml")), Some("SHEETWATCH"))?;
    /// let service = DataService::builder().with_config(config).build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the watched workbook.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the attempt budget and the pause between attempts.
    pub fn with_retry(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.config.max_attempts = max_attempts;
        self.config.retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set how columns without a header name are treated.
    pub fn with_header_policy(mut self, policy: HeaderPolicy) -> Self {
        self.config.headers = policy;
        self
    }

    /// Set what [`DataService::serve_pull`] does when reads are exhausted.
    pub fn with_pull_failure(mut self, policy: PullFailurePolicy) -> Self {
        self.config.pull_failure = policy;
        self
    }

    /// Coalesce change events arriving within `window`.
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.config.debounce_ms = Some(u64::try_from(window.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Bound the number of reads running at once.
    pub fn with_max_concurrent_reads(mut self, limit: usize) -> Self {
        self.config.max_concurrent_reads = Some(limit);
        self
    }

    /// Read workbooks through a custom source instead of [`XlsxSource`].
    pub fn with_source<S: SheetSource + 'static>(mut self, source: S) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Publish through `broadcaster` instead of a private registry.
    pub fn with_broadcaster<B: Broadcaster + 'static>(mut self, broadcaster: B) -> Self {
        self.broadcaster = Some(Arc::new(broadcaster));
        self
    }

    /// Validate the configuration and assemble the service.
    ///
    /// Nothing is read or watched yet; call [`DataService::pull`] or
    /// [`DataService::start`] for that.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the configuration is invalid.
    pub fn build(self) -> Result<DataService> {
        self.config.validate()?;

        let source = self.source.unwrap_or_else(|| Arc::new(XlsxSource::new()));
        let broadcaster = self
            .broadcaster
            .unwrap_or_else(|| Arc::new(SubscriberRegistry::new()));

        debug!(
            path = %self.config.path.display(),
            source = %source.name(),
            max_attempts = self.config.max_attempts,
            "building data service"
        );

        let reader = TabularReader::new(source, self.config.headers);
        let loader = RetryingLoader::new(reader, self.config.retry_policy());
        let pipeline = Pipeline::new(
            loader,
            self.config.path.clone(),
            broadcaster,
            self.config.read_concurrency(),
        );

        Ok(DataService::from_parts(pipeline, self.config))
    }
}

impl Default for DataServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
