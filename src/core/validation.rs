//! Configuration validation support.

use crate::error::ValidationError;

/// Trait for configuration validation.
///
/// [`DataServiceBuilder::build`](crate::core::DataServiceBuilder::build) runs
/// it before anything is read or watched, so a bad setting fails construction
/// rather than the first pull.
///
/// # Examples
///
/// ```rust
/// use sheetwatch::core::{ServiceConfig, Validate};
///
/// let config = ServiceConfig {
///     max_attempts: 0,
///     ..ServiceConfig::default()
/// };
/// assert!(config.validate().is_err());
/// ```
pub trait Validate {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Should return a `ValidationError` describing what validation failed.
    fn validate(&self) -> Result<(), ValidationError>;
}
