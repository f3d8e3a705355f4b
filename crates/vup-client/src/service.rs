//! Upload service.
//!
//! Composes the export pipeline, descriptor hand-off, progress observation
//! and remote status tracking over injected collaborators.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info};

use vup_media::{
    Dispatcher, ExportedFile, Exporter, MediaLibrary, PipelineConfig, PipelineError,
    PipelineOperation, UploadPipeline,
};
use vup_models::{LocalId, MediaHandle, RemoteJobId, RemoteStatus, UploadState, VideoSettings, Writer};
use vup_queue::{register_export, DescriptorQueue, Subscription, UploadDescriptor};

use crate::error::{ClientError, ClientResult};
use crate::logging::JobLogger;
use crate::refresh::RefreshManager;
use crate::retry::RetryConfig;

/// Entry point tying the upload flow together.
pub struct UploadService {
    library: Arc<dyn MediaLibrary>,
    exporter: Arc<dyn Exporter>,
    queue: Arc<dyn DescriptorQueue>,
    refresh: Arc<RefreshManager>,
    dispatcher: Dispatcher,
    pipeline_config: PipelineConfig,
    retry: RetryConfig,
}

impl UploadService {
    pub fn new(
        library: Arc<dyn MediaLibrary>,
        exporter: Arc<dyn Exporter>,
        queue: Arc<dyn DescriptorQueue>,
        refresh: Arc<RefreshManager>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            library,
            exporter,
            queue,
            refresh,
            dispatcher,
            pipeline_config: PipelineConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = config;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn queue(&self) -> &Arc<dyn DescriptorQueue> {
        &self.queue
    }

    pub fn refresh(&self) -> &Arc<RefreshManager> {
        &self.refresh
    }

    /// Build an unstarted pipeline whose result is registered with the queue.
    ///
    /// `on_registered` receives the new descriptor, or the first error from
    /// the pipeline or the hand-off. Progress callbacks may still be added
    /// with [`PipelineOperation::with_progress`] before calling `start`.
    ///
    /// Must be called within a tokio runtime. The hand-off runs on that
    /// runtime even when callbacks are drained from another thread.
    pub fn prepare_upload<F>(
        &self,
        handle: MediaHandle,
        settings: VideoSettings,
        on_registered: F,
    ) -> PipelineOperation
    where
        F: FnOnce(ClientResult<UploadDescriptor>) + Send + 'static,
    {
        let queue = Arc::clone(&self.queue);
        let dispatcher = self.dispatcher.clone();
        let runtime = Handle::current();
        let logger = JobLogger::from_string(handle.as_str(), "export");

        UploadPipeline::new(
            Arc::clone(&self.library),
            Arc::clone(&self.exporter),
            handle,
            self.pipeline_config.clone(),
        )
        .into_operation(self.dispatcher.clone())
        .with_completion(move |result: Result<ExportedFile, PipelineError>| match result {
            Ok(exported) => {
                logger.log_completion("export finished, handing off");
                runtime.spawn(async move {
                    let registered =
                        register_export(queue.as_ref(), exported, settings, dispatcher.clone())
                            .await
                            .map_err(ClientError::from);
                    dispatcher.dispatch(move || on_registered(registered));
                });
            }
            Err(e) => {
                if e.is_cancelled() {
                    logger.log_warning("export cancelled");
                } else {
                    logger.log_error(&e.to_string());
                }
                on_registered(Err(e.into()));
            }
        })
    }

    /// Export and register `handle`, resolving once the descriptor exists.
    ///
    /// Dropping the returned future cancels the export.
    pub async fn upload(
        &self,
        handle: MediaHandle,
        settings: VideoSettings,
    ) -> ClientResult<UploadDescriptor> {
        let (tx, rx) = oneshot::channel();
        let op = self.prepare_upload(handle, settings, move |result| {
            let _ = tx.send(result);
        });
        op.start()?;

        rx.await
            .unwrap_or(Err(ClientError::Pipeline(PipelineError::Cancelled)))
    }

    /// Attach a progress observer to a registered upload.
    pub async fn observe<F>(&self, local_id: &LocalId, on_progress: F) -> ClientResult<Subscription>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        Ok(self.queue.observe(local_id, Arc::new(on_progress)).await?)
    }

    /// Mark a registered upload as transferring.
    pub async fn begin_upload(&self, local_id: &LocalId) -> ClientResult<UploadDescriptor> {
        let descriptor = vup_queue::begin_upload(self.queue.as_ref(), local_id).await?;
        JobLogger::for_upload(local_id, "upload").log_start("transfer started");
        Ok(descriptor)
    }

    /// Record transfer progress reported by the uploader.
    pub async fn report_progress(&self, local_id: &LocalId, progress: f64) -> ClientResult<()> {
        let descriptor = self
            .queue
            .get(local_id)
            .await
            .ok_or_else(|| vup_queue::QueueError::NotFound(local_id.clone()))?;
        descriptor.set_progress(Writer::Queue, progress)?;
        Ok(())
    }

    /// Record the remote job id and start tracking its status.
    pub async fn acknowledge(
        &self,
        local_id: &LocalId,
        remote_id: RemoteJobId,
    ) -> ClientResult<UploadDescriptor> {
        let descriptor = self.queue.acknowledge(local_id, remote_id.clone()).await?;
        self.refresh.track(remote_id);
        Ok(descriptor)
    }

    /// Start tracking a registered upload that already has a remote id.
    ///
    /// Returns `false` if the job was already tracked.
    pub async fn track_upload(&self, local_id: &LocalId) -> ClientResult<bool> {
        let descriptor = self
            .queue
            .get(local_id)
            .await
            .ok_or_else(|| vup_queue::QueueError::NotFound(local_id.clone()))?;
        let (Some(remote_id), Some(status)) =
            (descriptor.remote_id(), remote_status_for(descriptor.state()))
        else {
            return Err(ClientError::NotTrackable(local_id.clone()));
        };
        Ok(self.refresh.track_from(remote_id, status))
    }

    /// Cancel an upload by its remote job id and stop tracking it.
    ///
    /// Tracking continues if the upload is unknown or cannot be cancelled.
    pub async fn cancel_upload(&self, remote_id: &RemoteJobId) -> ClientResult<UploadDescriptor> {
        let descriptor = self
            .queue
            .get_by_remote(remote_id)
            .await
            .ok_or_else(|| ClientError::UploadNotFound(remote_id.clone()))?;
        self.queue.cancel(descriptor.local_id()).await?;
        self.refresh.untrack(remote_id);

        info!(remote_id = %remote_id, local_id = %descriptor.local_id(), "Upload cancelled");
        Ok(descriptor)
    }

    /// Put a failed upload back into `Uploading`.
    ///
    /// Returns the suggested delay before the caller re-submits the transfer.
    pub async fn retry_upload(&self, local_id: &LocalId) -> ClientResult<Duration> {
        let descriptor = self
            .queue
            .get(local_id)
            .await
            .ok_or_else(|| vup_queue::QueueError::NotFound(local_id.clone()))?;
        if !self.retry.allows(descriptor.retry_count() + 1) {
            return Err(ClientError::RetriesExhausted {
                local_id: local_id.clone(),
                attempts: descriptor.retry_count(),
            });
        }

        let attempt = self.queue.retry(local_id).await?;
        let delay = self.retry.delay_for_attempt(attempt.saturating_sub(1));
        JobLogger::for_upload(local_id, "upload")
            .log_progress(&format!("retry {} scheduled in {:?}", attempt, delay));
        Ok(delay)
    }

    /// Track every acknowledged upload still awaiting remote processing.
    ///
    /// Returns how many jobs were newly tracked.
    pub async fn resume_tracking(&self) -> usize {
        let mut tracked = 0;
        for descriptor in self.queue.list().await {
            let Some(remote_id) = descriptor.remote_id() else {
                continue;
            };
            let Some(status) = remote_status_for(descriptor.state()) else {
                continue;
            };
            if self.refresh.track_from(remote_id, status) {
                tracked += 1;
            }
        }
        debug!(tracked, "Resumed status tracking");
        tracked
    }

    /// Drop finished uploads from the queue.
    pub async fn prune(&self) -> Vec<LocalId> {
        self.queue.prune_terminal().await
    }
}

/// Last known remote status for a descriptor the refresh manager owns.
fn remote_status_for(state: UploadState) -> Option<RemoteStatus> {
    match state {
        UploadState::RemoteAcknowledged => Some(RemoteStatus::Uploading),
        UploadState::Transcoding => Some(RemoteStatus::Transcoding),
        _ => None,
    }
}
