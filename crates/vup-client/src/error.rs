//! Client error types.

use thiserror::Error;

use vup_media::PipelineError;
use vup_models::{LocalId, RemoteJobId};
use vup_queue::QueueError;

/// Result type for status refresh operations.
pub type RefreshResult<T> = Result<T, RefreshError>;

/// Errors raised while querying remote job status.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RefreshError {
    #[error("Status request failed: {0}")]
    Request(String),

    #[error("Status request timed out")]
    Timeout,

    #[error("Remote returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Rate limited by remote")]
    RateLimited,

    #[error("Remote job not found: {0}")]
    JobNotFound(RemoteJobId),

    #[error("Invalid status response: {0}")]
    Decode(String),

    #[error("Remote job {job} failed: {reason}")]
    RemoteJobFailed { job: RemoteJobId, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RefreshError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn remote_job_failed(job: &RemoteJobId, reason: impl Into<String>) -> Self {
        Self::RemoteJobFailed {
            job: job.clone(),
            reason: reason.into(),
        }
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(job: &RemoteJobId, status: u16, message: impl Into<String>) -> Self {
        match status {
            404 => Self::JobNotFound(job.clone()),
            429 => Self::RateLimited,
            _ => Self::Http {
                status,
                message: message.into(),
            },
        }
    }

    /// Worth polling again next cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            RefreshError::Request(_)
            | RefreshError::Timeout
            | RefreshError::RateLimited
            | RefreshError::Decode(_) => true,
            RefreshError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_permanent_failure(&self) -> bool {
        matches!(self, RefreshError::RemoteJobFailed { .. })
    }
}

impl From<reqwest::Error> for RefreshError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Result type for upload service operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the upload service.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error("No upload for remote job: {0}")]
    UploadNotFound(RemoteJobId),

    #[error("Upload {0} is not awaiting remote processing")]
    NotTrackable(LocalId),

    #[error("Upload {local_id} already retried {attempts} times")]
    RetriesExhausted { local_id: LocalId, attempts: u32 },
}

impl ClientError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Pipeline(e) if e.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_http_status() {
        let job = RemoteJobId::from_string("J");

        assert_eq!(
            RefreshError::from_http_status(&job, 404, "missing"),
            RefreshError::JobNotFound(job.clone())
        );
        assert!(RefreshError::from_http_status(&job, 429, "").is_retryable());
        assert!(RefreshError::from_http_status(&job, 503, "down").is_retryable());
        assert!(!RefreshError::from_http_status(&job, 401, "nope").is_retryable());
    }

    #[test]
    fn test_remote_job_failed_is_permanent() {
        let err = RefreshError::remote_job_failed(&RemoteJobId::from_string("J"), "quota");
        assert!(err.is_permanent_failure());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Remote job J failed: quota");
    }
}
