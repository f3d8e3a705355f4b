//! Structured logging utilities.
//!
//! Provides consistent, structured logging for upload and status-poll jobs
//! with tracing spans and contextual information, plus subscriber setup for
//! binaries.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vup_models::{LocalId, RemoteJobId};

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
}

impl JobLogger {
    /// Logger for a local upload.
    pub fn for_upload(local_id: &LocalId, operation: &str) -> Self {
        Self::from_string(local_id.as_str(), operation)
    }

    /// Logger for a remote job.
    pub fn for_remote(job: &RemoteJobId, operation: &str) -> Self {
        Self::from_string(job.as_str(), operation)
    }

    pub fn from_string(job_id: &str, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}

/// Install the global tracing subscriber.
///
/// `LOG_FORMAT=json` selects JSON output; otherwise human-readable colored
/// output. `RUST_LOG` overrides `default_directive`.
pub fn init_tracing(default_directive: &str) {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let result = if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()
    };

    if let Err(e) = result {
        warn!("Tracing subscriber already installed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_for_upload() {
        let id = LocalId::from_string("abc123");
        let logger = JobLogger::for_upload(&id, "upload");

        assert_eq!(logger.job_id(), "abc123");
        assert_eq!(logger.operation(), "upload");
    }

    #[test]
    fn test_job_logger_for_remote() {
        let logger = JobLogger::for_remote(&RemoteJobId::from_string("J-9"), "status_poll");
        assert_eq!(logger.job_id(), "J-9");
        assert_eq!(logger.operation(), "status_poll");
    }
}
