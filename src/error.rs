//! Error types for sheetwatch.

use std::fmt;
use std::path::PathBuf;

/// Result type alias for sheetwatch operations.
pub type Result<T> = std::result::Result<T, SheetError>;

/// Errors that can occur while reading, watching, or broadcasting a sheet.
#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    /// A single attempt to open or decode the source failed.
    ///
    /// Usually transient: another process holds the file or is halfway through
    /// writing it.
    #[error("Source unreadable: {}: {reason}", path.display())]
    SourceUnreadable {
        /// The path that could not be read
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// The source opened fine but has no usable header row or worksheet.
    #[error("Invalid source format: {0}")]
    SourceFormatInvalid(String),

    /// Every attempt allowed by the retry policy failed.
    #[error("Failed to read {} after {attempts} attempts: {last_error}", path.display())]
    SourceExhausted {
        /// The path being loaded
        path: PathBuf,
        /// How many attempts were made
        attempts: u32,
        /// Rendered error from the final attempt
        last_error: String,
    },

    /// Filesystem notifications could not be set up.
    #[error("File watching unavailable: {0}")]
    WatchUnavailable(String),

    /// Failed to load or deserialize service configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Service configuration failed validation.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// The broadcaster could not deliver a payload.
    #[error("Failed to publish to '{topic}': {reason}")]
    PublishError {
        /// Topic the payload was addressed to
        topic: String,
        /// Transport-specific reason
        reason: String,
    },

    /// IO error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error for other cases.
    #[error("{0}")]
    Other(String),
}

impl SheetError {
    /// Build a [`SheetError::SourceUnreadable`] for `path`.
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a fresh attempt against the same file might succeed.
    ///
    /// Structural problems are not retryable: re-reading an unchanged
    /// header-less sheet yields the same answer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SourceUnreadable { .. } | Self::IoError(_))
    }
}

/// Validation error for service configuration.
#[derive(Debug)]
pub enum ValidationError {
    /// Custom validation error with a message.
    Custom(String),

    /// A specific field has an invalid value.
    InvalidField {
        /// The field name/path
        field: String,
        /// The reason why it's invalid
        reason: String,
    },

    /// Multiple validation errors occurred.
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Create a custom validation error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Create an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(msg) => write!(f, "{}", msg),
            Self::InvalidField { field, reason } => {
                write!(f, "Field '{}' is invalid: {}", field, reason)
            }
            Self::Multiple(errors) => {
                writeln!(f, "Multiple validation errors:")?;
                for (i, err) in errors.iter().enumerate() {
                    writeln!(f, "  {}. {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for SheetError {
    fn from(err: ValidationError) -> Self {
        SheetError::ValidationError(err.to_string())
    }
}
