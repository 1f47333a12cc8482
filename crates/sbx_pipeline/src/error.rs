use sbx_core::params_hash::ParamsHashError;
use sbx_core::remap::RemapError;
use thiserror::Error;

/// Fatal pipeline failures. Per-item copy failures are not errors: they are
/// logged through the progress callback, recorded on the report, and the
/// pipeline continues with the next item.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A source listing or query could not be completed.
    #[error("failed to list {location}: {message}")]
    Listing { location: String, message: String },

    /// The source location exists but holds nothing to copy.
    #[error("cannot copy: {location} contains no entries under the requested prefix")]
    EmptySource { location: String },

    /// A required record read or write outside the per-item loop failed.
    #[error("record store failure for {location}: {message}")]
    Record { location: String, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Remap(#[from] RemapError),

    #[error("failed to recompute parameter hash: {0}")]
    Hash(#[from] ParamsHashError),
}

impl PipelineError {
    pub fn listing(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Listing {
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn record(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Record {
            location: location.into(),
            message: message.into(),
        }
    }
}
