//! Upload lifecycle states and remote job statuses.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local lifecycle state of an upload descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// Descriptor built but not yet handed to the queue
    #[default]
    Created,
    /// Accepted by the durable queue
    Registered,
    /// Bytes are being transferred
    Uploading,
    /// The remote system has acknowledged the job and assigned its id
    RemoteAcknowledged,
    /// The remote system is transcoding the upload
    Transcoding,
    /// The remote job is complete and playable
    Ready,
    /// Upload or remote processing failed
    Failed,
    /// Cancelled by the user
    Cancelled,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Created => "created",
            UploadState::Registered => "registered",
            UploadState::Uploading => "uploading",
            UploadState::RemoteAcknowledged => "remote_acknowledged",
            UploadState::Transcoding => "transcoding",
            UploadState::Ready => "ready",
            UploadState::Failed => "failed",
            UploadState::Cancelled => "cancelled",
        }
    }

    /// Terminal states are eligible for pruning.
    ///
    /// `Failed` counts as terminal even though a retry may revive it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Ready | UploadState::Failed | UploadState::Cancelled
        )
    }

    /// States whose remote counterpart should be polled for status.
    pub fn is_trackable(&self) -> bool {
        matches!(
            self,
            UploadState::Uploading | UploadState::RemoteAcknowledged | UploadState::Transcoding
        )
    }

    /// Which party owns writes while the descriptor is in this state.
    ///
    /// Ownership moves from the queue to the refresh manager at the
    /// `Uploading -> RemoteAcknowledged` transition.
    pub fn owner(&self) -> Writer {
        match self {
            UploadState::RemoteAcknowledged | UploadState::Transcoding => Writer::Refresh,
            _ => Writer::Queue,
        }
    }

    /// Check whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: UploadState) -> bool {
        use UploadState::*;

        match (self, next) {
            (Created, Registered) => true,
            (Registered, Uploading) => true,
            (Uploading, RemoteAcknowledged) => true,
            (RemoteAcknowledged, Transcoding) | (RemoteAcknowledged, Ready) => true,
            (Transcoding, Ready) => true,
            // Retry re-enters the upload through the queue
            (Failed, Uploading) => true,
            (Registered | Uploading | RemoteAcknowledged | Transcoding, Failed) => true,
            (Created | Registered | Uploading | RemoteAcknowledged | Transcoding, Cancelled) => {
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The two parties allowed to mutate a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Writer {
    /// The durable upload queue (transfer progress, acknowledgement, cancel, retry)
    Queue,
    /// The status refresh manager (remote processing states)
    Refresh,
}

impl fmt::Display for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Writer::Queue => write!(f, "queue"),
            Writer::Refresh => write!(f, "refresh"),
        }
    }
}

/// Status of a job as reported by the remote status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    /// Upload still in progress on the remote side
    Uploading,
    /// Upload complete, remote transcode running
    #[serde(alias = "transcode_starting")]
    Transcoding,
    /// Job done and available
    #[serde(alias = "available")]
    Ready,
    /// Permanent remote failure
    #[serde(alias = "uploading_error", alias = "transcoding_error", alias = "quota_exceeded")]
    Failed,
}

impl RemoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::Uploading => "uploading",
            RemoteStatus::Transcoding => "transcoding",
            RemoteStatus::Ready => "ready",
            RemoteStatus::Failed => "failed",
        }
    }

    /// Terminal statuses stop polling.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteStatus::Ready | RemoteStatus::Failed)
    }

    /// Local descriptor state implied by this remote status.
    pub fn upload_state(&self) -> UploadState {
        match self {
            RemoteStatus::Uploading => UploadState::RemoteAcknowledged,
            RemoteStatus::Transcoding => UploadState::Transcoding,
            RemoteStatus::Ready => UploadState::Ready,
            RemoteStatus::Failed => UploadState::Failed,
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(UploadState::Ready.is_terminal());
        assert!(UploadState::Cancelled.is_terminal());
        assert!(!UploadState::Transcoding.is_terminal());
        assert!(RemoteStatus::Failed.is_terminal());
        assert!(!RemoteStatus::Uploading.is_terminal());
    }

    #[test]
    fn test_lifecycle_transitions() {
        assert!(UploadState::Created.can_transition_to(UploadState::Registered));
        assert!(UploadState::Uploading.can_transition_to(UploadState::RemoteAcknowledged));
        assert!(UploadState::Failed.can_transition_to(UploadState::Uploading));
        assert!(!UploadState::Ready.can_transition_to(UploadState::Uploading));
        assert!(!UploadState::Cancelled.can_transition_to(UploadState::Registered));
        assert!(!UploadState::Created.can_transition_to(UploadState::Ready));
    }

    #[test]
    fn test_write_ownership_hands_off_at_acknowledgement() {
        assert_eq!(UploadState::Uploading.owner(), Writer::Queue);
        assert_eq!(UploadState::RemoteAcknowledged.owner(), Writer::Refresh);
        assert_eq!(UploadState::Transcoding.owner(), Writer::Refresh);
        assert_eq!(UploadState::Failed.owner(), Writer::Queue);
    }

    #[test]
    fn test_remote_status_aliases() {
        let ready: RemoteStatus = serde_json::from_str("\"available\"").unwrap();
        assert_eq!(ready, RemoteStatus::Ready);

        let failed: RemoteStatus = serde_json::from_str("\"transcoding_error\"").unwrap();
        assert_eq!(failed, RemoteStatus::Failed);

        let uploading: RemoteStatus = serde_json::from_str("\"uploading\"").unwrap();
        assert_eq!(uploading.upload_state(), UploadState::RemoteAcknowledged);
    }
}
