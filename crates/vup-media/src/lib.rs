//! Cancellable media pipeline for uploads.
//!
//! This crate provides:
//! - [`CancellableOperation`]: Ready/Executing/Finished/Cancelled state machine
//! - Fetch and export stages with pluggable [`MediaLibrary`] and [`Exporter`]
//! - [`UploadPipeline`]: sequential fetch → export with aggregated progress
//! - FFmpeg command building, progress parsing and duration probing
//! - [`Dispatcher`]: the single context all callbacks are delivered on

pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod fetch;
pub mod operation;
pub mod pipeline;
pub mod probe;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use config::PipelineConfig;
pub use dispatch::{DispatchQueue, Dispatcher};
pub use error::{PipelineError, PipelineResult};
pub use export::{ExportStage, ExportedFile, Exporter, FfmpegExporter};
pub use fetch::{FetchStage, LocalMediaLibrary, MediaLibrary};
pub use operation::{CancellableOperation, OperationState, Work, WorkContext};
pub use pipeline::{PipelineOperation, PipelineStage, StageHandle, UploadPipeline};
pub use probe::probe_duration;
pub use progress::{FfmpegProgress, ProgressReporter};
