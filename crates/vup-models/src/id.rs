//! Upload identifiers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Number of hex characters kept from the source digest.
const LOCAL_ID_LEN: usize = 16;

/// Locally derived identifier of an upload descriptor.
///
/// Derived deterministically from the source file reference, so exporting the
/// same file twice yields the same id and registration can detect the duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct LocalId(pub String);

impl LocalId {
    /// Derive the id from a source file location.
    pub fn from_source(path: impl AsRef<Path>) -> Self {
        let digest = Sha256::digest(path.as_ref().to_string_lossy().as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Self(hex[..LOCAL_ID_LEN].to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LocalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Canonical job identifier assigned by the remote system (e.g. `/videos/123`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RemoteJobId(pub String);

impl RemoteJobId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RemoteJobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RemoteJobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_id_is_deterministic() {
        let a = LocalId::from_source("/tmp/export/video.mp4");
        let b = LocalId::from_source("/tmp/export/video.mp4");
        let c = LocalId::from_source("/tmp/export/other.mp4");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), LOCAL_ID_LEN);
    }

    #[test]
    fn test_remote_id_serializes_transparently() {
        let id = RemoteJobId::from("/videos/42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"/videos/42\"");
    }
}
