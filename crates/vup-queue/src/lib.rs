//! Upload job descriptors and the queue that owns them.
//!
//! This crate provides:
//! - [`UploadDescriptor`]: shared record of one upload with progress observers
//! - [`DescriptorQueue`]: registration and lookup by local or remote id
//! - [`MemoryQueue`]: in-memory queue implementation
//! - Hand-off of exported files into the queue

pub mod descriptor;
pub mod error;
pub mod handoff;
pub mod queue;

pub use descriptor::{DescriptorSnapshot, Subscription, SubscriptionId, UploadDescriptor};
pub use error::{QueueError, QueueResult};
pub use handoff::{register_export, register_export_as};
pub use queue::{begin_upload, DescriptorQueue, MemoryQueue};
