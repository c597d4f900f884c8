//! Error types for harness operations.
//!
//! Only input-contract violations and unrecoverable I/O surface as errors.
//! Per-indicator fetch failures are data (`FetchStatus`) and never travel
//! through this type.

use thiserror::Error;

use crate::report::ReportValidationError;

/// Main error type for crossval operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A caller broke an input contract (zero sample target, bad platform list, ...)
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// The metadata snapshot could not be read or has an unexpected shape
    #[error("Metadata source error: {context}")]
    Metadata {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O operation failed
    #[error("I/O operation failed: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization or deserialization failed
    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The generated report did not pass schema validation
    #[error("Report validation failed: {0}")]
    Report(#[from] ReportValidationError),
}

/// Convenience type alias for Results with HarnessError
pub type Result<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an input-contract violation error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a metadata error without an underlying cause
    pub fn metadata(context: impl Into<String>) -> Self {
        Self::Metadata {
            context: context.into(),
            source: None,
        }
    }

    /// Creates a metadata error wrapping a parse or read failure
    pub fn metadata_failed<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Metadata {
            context: context.into(),
            source: Some(Box::new(error)),
        }
    }

    /// Creates an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a serialization error with context
    pub fn serialization<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Serialization {
            context: context.into(),
            source: Box::new(error),
        }
    }
}
