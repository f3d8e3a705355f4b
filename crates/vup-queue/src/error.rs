//! Queue error types.

use thiserror::Error;

use vup_media::PipelineError;
use vup_models::{LocalId, RemoteJobId, SettingsError, UploadState, Writer};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueueError {
    #[error("Descriptor already registered: {0}")]
    DuplicateRegistration(LocalId),

    #[error("Descriptor not found: {0}")]
    NotFound(LocalId),

    #[error("No descriptor for remote job: {0}")]
    RemoteNotFound(RemoteJobId),

    #[error("Remote job {remote} is already mapped to {existing}")]
    RemoteConflict {
        remote: RemoteJobId,
        existing: LocalId,
    },

    #[error("{writer} may not write a descriptor in state {state}")]
    WriterConflict { writer: Writer, state: UploadState },

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: UploadState, to: UploadState },

    #[error("Invalid settings: {0}")]
    InvalidSettings(#[from] SettingsError),

    #[error("Export hand-off failed: {0}")]
    Handoff(#[from] PipelineError),
}

impl QueueError {
    pub fn invalid_transition(from: UploadState, to: UploadState) -> Self {
        Self::InvalidTransition { from, to }
    }

    /// Programmer errors that must never be retried.
    pub fn is_permanent_failure(&self) -> bool {
        matches!(
            self,
            QueueError::DuplicateRegistration(_)
                | QueueError::RemoteConflict { .. }
                | QueueError::WriterConflict { .. }
                | QueueError::InvalidTransition { .. }
                | QueueError::InvalidSettings(_)
        )
    }
}
