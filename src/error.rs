//! Error types for mapping extraction, inference and rule application.

use std::path::PathBuf;

use thiserror::Error;

use crate::progress::StopReason;

/// Result type alias for lutscope operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the engine.
///
/// Numeric saturation never aborts an operation; it shows up as the
/// `saturated` flag of the affected result.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Dimension, channel or bit-depth mismatch between or within rasters,
    /// or a malformed buffer.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No samples were observed, so no mapping can be built.
    #[error("empty mapping: {0}")]
    EmptyMapping(&'static str),

    /// A processing rule was applied without a transform.
    #[error("invalid rule '{0}': no transform set")]
    InvalidRule(String),

    /// The apply region does not intersect the image.
    #[error("invalid region {x},{y} {width}x{height} for a {image_width}x{image_height} image")]
    InvalidRegion {
        /// Region left edge.
        x: u32,
        /// Region top edge.
        y: u32,
        /// Region width.
        width: u32,
        /// Region height.
        height: u32,
        /// Image width.
        image_width: usize,
        /// Image height.
        image_height: usize,
    },

    /// The caller stopped the operation. Not a failure.
    #[error("operation stopped: {0}")]
    Cancelled(StopReason),

    /// Export or configuration file IO failed.
    #[error("io error on {path}: {source}")]
    Io {
        /// File being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The background worker could not start or did not finish.
    #[error("worker thread failed: {0}")]
    Worker(String),

    /// Configuration could not be parsed or serialized.
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// Create an IO error bound to the file it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the operation was stopped by the caller rather than failing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

impl From<StopReason> for Error {
    fn from(reason: StopReason) -> Self {
        Error::Cancelled(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_converts_to_cancelled() {
        let err: Error = StopReason::Cancelled.into();
        assert!(err.is_cancelled());
        assert!(err.to_string().starts_with("operation stopped: "));
    }

    #[test]
    fn test_invalid_input_is_not_cancelled() {
        let err = Error::InvalidInput("channel count 3".to_string());
        assert!(!err.is_cancelled());
        assert!(err.to_string().contains("channel count 3"));
    }
}
