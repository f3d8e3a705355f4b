//! Media references passed between pipeline stages.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Opaque reference to a local media item, issued by the media library.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct MediaHandle(pub String);

impl MediaHandle {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolved, playable media produced by the fetch stage.
///
/// Not `Clone`: ownership moves into the export stage.
#[derive(Debug, PartialEq)]
pub struct DecodedAsset {
    /// Handle the asset was resolved from
    pub handle: MediaHandle,
    /// Readable location of the asset's backing data
    pub path: PathBuf,
    /// Duration in seconds, when the library knows it
    pub duration_secs: Option<f64>,
}

impl DecodedAsset {
    pub fn new(handle: MediaHandle, path: impl Into<PathBuf>) -> Self {
        Self {
            handle,
            path: path.into(),
            duration_secs: None,
        }
    }

    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = Some(duration_secs);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Metadata describing an exported file.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExportMetadata {
    /// Duration in seconds
    pub duration_secs: f64,
    /// File size in bytes
    pub size_bytes: u64,
}
