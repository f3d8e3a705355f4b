//! Error types for pipeline operations.

use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that can terminate a pipeline operation.
///
/// `Clone` so the terminal error can be both stored on the operation and
/// handed to the completion callback.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation already started")]
    AlreadyStarted,

    #[error("Failed to fetch asset {handle}: {message}")]
    Fetch { handle: String, message: String },

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Export failed: {message}")]
    Export {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Wrap a media-library failure for the given handle.
    pub fn fetch_failed(handle: impl ToString, message: impl ToString) -> Self {
        Self::Fetch {
            handle: handle.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an export failure error.
    pub fn export_failed(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::Export {
            message: message.into(),
            exit_code,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Cancellation is an expected outcome, not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Check if the caller may retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Fetch { .. }
                | PipelineError::Export { .. }
                | PipelineError::Timeout(_)
                | PipelineError::Io(_)
        )
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("JSON parse error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(PipelineError::Cancelled.is_cancelled());
        assert!(!PipelineError::Cancelled.is_retryable());
        assert!(PipelineError::fetch_failed("h1", "offline").is_retryable());
        assert!(!PipelineError::AlreadyStarted.is_retryable());
    }

    #[test]
    fn test_fetch_error_message() {
        let err = PipelineError::fetch_failed("IMG_0001", "network unreachable");
        assert_eq!(
            err.to_string(),
            "Failed to fetch asset IMG_0001: network unreachable"
        );
    }
}
