//! Fetch → export pipeline.
//!
//! [`UploadPipeline`] chains the two stages under a single cancellable
//! operation. Stages run strictly in order; export never starts unless fetch
//! produced an asset. Overall progress is split between the stages by
//! [`PipelineConfig::fetch_weight`].

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument};

use vup_models::MediaHandle;

use crate::config::PipelineConfig;
use crate::dispatch::Dispatcher;
use crate::error::{PipelineError, PipelineResult};
use crate::export::{ExportStage, ExportedFile, Exporter};
use crate::fetch::{FetchStage, MediaLibrary};
use crate::operation::{CancellableOperation, Work, WorkContext};
use crate::progress::ProgressReporter;

/// Where a pipeline currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    #[default]
    Idle,
    Fetching,
    Exporting,
    Finished,
    Cancelled,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Fetching => "fetching",
            PipelineStage::Exporting => "exporting",
            PipelineStage::Finished => "finished",
            PipelineStage::Cancelled => "cancelled",
            PipelineStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::Finished | PipelineStage::Cancelled | PipelineStage::Failed
        )
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only view of a pipeline's current stage.
#[derive(Debug, Clone, Default)]
pub struct StageHandle(Arc<Mutex<PipelineStage>>);

impl StageHandle {
    pub fn current(&self) -> PipelineStage {
        *self.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set(&self, stage: PipelineStage) {
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = stage;
    }
}

type StageObserver = Arc<dyn Fn(PipelineStage, f64) + Send + Sync>;

/// Cancellable operation running an [`UploadPipeline`].
pub type PipelineOperation = CancellableOperation<UploadPipeline>;

/// Fetch a media handle and export it into an upload-ready file.
pub struct UploadPipeline {
    library: Arc<dyn MediaLibrary>,
    exporter: Arc<dyn Exporter>,
    handle: MediaHandle,
    config: PipelineConfig,
    stage: StageHandle,
    stage_observer: Option<StageObserver>,
}

impl UploadPipeline {
    pub fn new(
        library: Arc<dyn MediaLibrary>,
        exporter: Arc<dyn Exporter>,
        handle: MediaHandle,
        config: PipelineConfig,
    ) -> Self {
        Self {
            library,
            exporter,
            handle,
            config,
            stage: StageHandle::default(),
            stage_observer: None,
        }
    }

    /// Receive per-stage progress, each stage reporting its own `[0, 1]`.
    pub fn with_stage_progress<F>(mut self, observer: F) -> Self
    where
        F: Fn(PipelineStage, f64) + Send + Sync + 'static,
    {
        self.stage_observer = Some(Arc::new(observer));
        self
    }

    pub fn stage(&self) -> StageHandle {
        self.stage.clone()
    }

    /// Wrap in a [`PipelineOperation`] delivering callbacks on `dispatcher`.
    pub fn into_operation(self, dispatcher: Dispatcher) -> PipelineOperation {
        CancellableOperation::new(self, dispatcher)
    }

    /// Context for one stage: its progress lands in `[offset, offset + span]`
    /// of the overall value and is mirrored to the stage observer.
    fn stage_context(
        &self,
        ctx: &WorkContext,
        stage: PipelineStage,
        offset: f64,
        span: f64,
    ) -> WorkContext {
        let overall = ctx.progress().scaled(offset, span);
        let progress = match self.stage_observer.clone() {
            Some(observer) => {
                let dispatcher = ctx.dispatcher().clone();
                ProgressReporter::new(move |value| {
                    overall.report(value);
                    let observer = Arc::clone(&observer);
                    dispatcher.dispatch(move || observer(stage, value));
                })
            }
            None => overall,
        };
        WorkContext::new(ctx.token().clone(), progress, ctx.dispatcher().clone())
    }

    async fn run_stages(&self, ctx: &WorkContext) -> PipelineResult<ExportedFile> {
        let weight = self.config.fetch_weight.clamp(0.0, 1.0);

        self.stage.set(PipelineStage::Fetching);
        let fetch = FetchStage::new(Arc::clone(&self.library), self.handle.clone());
        let asset = fetch
            .run(self.stage_context(ctx, PipelineStage::Fetching, 0.0, weight))
            .await?;

        if ctx.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        self.stage.set(PipelineStage::Exporting);
        let export = ExportStage::new(
            Arc::clone(&self.exporter),
            asset,
            self.config.work_dir.clone(),
        );
        export
            .run(self.stage_context(ctx, PipelineStage::Exporting, weight, 1.0 - weight))
            .await
    }
}

#[async_trait]
impl Work for UploadPipeline {
    type Output = ExportedFile;

    fn name(&self) -> &'static str {
        "upload_pipeline"
    }

    async fn run(self, ctx: WorkContext) -> PipelineResult<ExportedFile> {
        let span = tracing::info_span!("pipeline", handle = %self.handle);

        async move {
            let result = self.run_stages(&ctx).await;

            let stage = match &result {
                Ok(_) if ctx.is_cancelled() => PipelineStage::Cancelled,
                Ok(_) => PipelineStage::Finished,
                Err(e) if e.is_cancelled() => PipelineStage::Cancelled,
                Err(_) => PipelineStage::Failed,
            };
            self.stage.set(stage);

            match &result {
                Ok(file) => info!(path = %file.path().display(), stage = %stage, "Pipeline completed"),
                Err(e) => warn!(error = %e, stage = %stage, "Pipeline stopped"),
            }
            result
        }
        .instrument(span)
        .await
    }
}
