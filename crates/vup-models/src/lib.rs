//! Shared data models for the upload pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Local and remote upload identifiers
//! - Upload lifecycle and remote job statuses
//! - User-supplied video settings
//! - Media handles and resolved assets passed between pipeline stages

pub mod id;
pub mod media;
pub mod settings;
pub mod status;

// Re-export common types
pub use id::{LocalId, RemoteJobId};
pub use media::{DecodedAsset, ExportMetadata, MediaHandle};
pub use settings::{Privacy, SettingsError, VideoSettings};
pub use status::{RemoteStatus, UploadState, Writer};
