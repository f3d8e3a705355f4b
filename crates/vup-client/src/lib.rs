//! Remote status refresh and the upload service.
//!
//! This crate provides:
//! - [`RefreshManager`]: periodic status polling with at most one outstanding
//!   poll per job and exactly-once transition notifications
//! - [`HttpStatusSource`]: [`StatusSource`] over a JSON status endpoint
//! - [`UploadService`]: export, hand-off, observation and tracking in one place
//! - Logging, metrics and retry helpers shared by the above

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod refresh;
pub mod retry;
pub mod service;
pub mod status_http;

pub use config::{RefreshConfig, StatusApiConfig, MIN_POLL_INTERVAL};
pub use error::{ClientError, ClientResult, RefreshError, RefreshResult};
pub use logging::{init_tracing, JobLogger};
pub use refresh::{RefreshManager, StatusSource, TrackedJobInfo, TransitionDelegate};
pub use retry::{FailureTracker, RetryConfig};
pub use service::UploadService;
pub use status_http::HttpStatusSource;
