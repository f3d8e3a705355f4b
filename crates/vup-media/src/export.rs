//! Export stage: transcode a decoded asset into an upload-ready file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use vup_models::{DecodedAsset, ExportMetadata, MediaHandle};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::operation::{Work, WorkContext};
use crate::probe::probe_duration;
use crate::progress::ProgressReporter;

/// Writes an upload-ready rendition of an asset to `dest`.
///
/// `dest` already exists and may be overwritten. Implementations must stop
/// writing promptly when their future is dropped.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(
        &self,
        asset: &DecodedAsset,
        dest: &Path,
        progress: ProgressReporter,
    ) -> PipelineResult<ExportMetadata>;
}

/// A file produced by the export stage.
///
/// The file is deleted when this value is dropped, unless ownership has been
/// taken with [`ExportedFile::keep`].
#[derive(Debug)]
pub struct ExportedFile {
    handle: MediaHandle,
    path: TempPath,
    metadata: ExportMetadata,
}

impl ExportedFile {
    /// Handle of the asset this file was exported from.
    pub fn handle(&self) -> &MediaHandle {
        &self.handle
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> ExportMetadata {
        self.metadata
    }

    /// Take ownership of the file on disk; it will no longer be deleted.
    pub fn keep(self) -> PipelineResult<PathBuf> {
        self.path
            .keep()
            .map_err(|e| PipelineError::Io(e.error.to_string()))
    }

    /// Delete the file now, surfacing any error.
    pub fn discard(self) -> PipelineResult<()> {
        self.path.close().map_err(PipelineError::from)
    }
}

/// Export a [`DecodedAsset`] into the work directory.
pub struct ExportStage<E: ?Sized> {
    exporter: Arc<E>,
    asset: DecodedAsset,
    work_dir: PathBuf,
}

impl<E: Exporter + ?Sized> ExportStage<E> {
    pub fn new(exporter: Arc<E>, asset: DecodedAsset, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            exporter,
            asset,
            work_dir: work_dir.into(),
        }
    }
}

#[async_trait]
impl<E: Exporter + ?Sized + 'static> Work for ExportStage<E> {
    type Output = ExportedFile;

    fn name(&self) -> &'static str {
        "export"
    }

    async fn run(self, ctx: WorkContext) -> PipelineResult<ExportedFile> {
        if ctx.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let dest = tempfile::Builder::new()
            .prefix("export-")
            .suffix(".mp4")
            .tempfile_in(&self.work_dir)?
            .into_temp_path();

        debug!(handle = %self.asset.handle, dest = %dest.display(), "Exporting asset");

        let result = {
            let export = self
                .exporter
                .export(&self.asset, &dest, ctx.progress().clone());
            tokio::select! {
                biased;
                _ = ctx.cancelled() => Err(PipelineError::Cancelled),
                result = export => result,
            }
        };

        match result {
            Ok(metadata) if !ctx.is_cancelled() => {
                ctx.progress().report(1.0);
                info!(
                    handle = %self.asset.handle,
                    path = %dest.display(),
                    size_bytes = metadata.size_bytes,
                    "Asset exported"
                );
                Ok(ExportedFile {
                    handle: self.asset.handle.clone(),
                    path: dest,
                    metadata,
                })
            }
            Ok(_) => {
                remove_partial(dest);
                Err(PipelineError::Cancelled)
            }
            Err(e) => {
                remove_partial(dest);
                Err(e)
            }
        }
    }
}

fn remove_partial(dest: TempPath) {
    let path = dest.to_path_buf();
    if let Err(e) = dest.close() {
        warn!(path = %path.display(), error = %e, "Failed to remove partial export");
    } else {
        debug!(path = %path.display(), "Removed partial export");
    }
}

/// Exporter that transcodes with FFmpeg into H.264/AAC MP4.
#[derive(Debug, Clone)]
pub struct FfmpegExporter {
    preset: String,
    crf: u8,
    timeout: Duration,
}

impl FfmpegExporter {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            preset: config.export_preset.clone(),
            crf: config.export_crf,
            timeout: config.export_timeout,
        }
    }

    fn command(&self, input: &Path, dest: &Path) -> FfmpegCommand {
        FfmpegCommand::new(input, dest)
            .video_codec("libx264")
            .preset(self.preset.clone())
            .crf(self.crf)
            .audio_codec("aac")
            .audio_bitrate("128k")
            .faststart()
            .output_arg("-f")
            .output_arg("mp4")
    }
}

#[async_trait]
impl Exporter for FfmpegExporter {
    async fn export(
        &self,
        asset: &DecodedAsset,
        dest: &Path,
        progress: ProgressReporter,
    ) -> PipelineResult<ExportMetadata> {
        let duration_secs = match asset.duration_secs {
            Some(d) => d,
            None => probe_duration(asset.path()).await?,
        };
        let total_ms = (duration_secs * 1000.0) as i64;

        progress.report(0.0);
        let cmd = self.command(asset.path(), dest);
        FfmpegRunner::new()
            .with_timeout(self.timeout)
            .run_with_progress(&cmd, move |p| progress.report(p.fraction(total_ms)))
            .await?;

        let size_bytes = tokio::fs::metadata(dest).await?.len();
        Ok(ExportMetadata {
            duration_secs,
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    /// Copies the source and reports halfway.
    struct CopyExporter;

    #[async_trait]
    impl Exporter for CopyExporter {
        async fn export(
            &self,
            asset: &DecodedAsset,
            dest: &Path,
            progress: ProgressReporter,
        ) -> PipelineResult<ExportMetadata> {
            progress.report(0.5);
            let size_bytes = tokio::fs::copy(asset.path(), dest).await?;
            Ok(ExportMetadata {
                duration_secs: 1.0,
                size_bytes,
            })
        }
    }

    /// Writes some bytes, then hangs until dropped.
    struct HangingExporter {
        started: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Exporter for HangingExporter {
        async fn export(
            &self,
            _asset: &DecodedAsset,
            dest: &Path,
            _progress: ProgressReporter,
        ) -> PipelineResult<ExportMetadata> {
            tokio::fs::write(dest, b"partial").await?;
            self.started.store(true, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    fn asset(dir: &TempDir) -> DecodedAsset {
        let source = dir.path().join("source.mov");
        std::fs::write(&source, b"source-bytes").unwrap();
        DecodedAsset::new(MediaHandle::new("source.mov"), source)
    }

    fn exports_in(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_export_produces_file() {
        let dir = TempDir::new().unwrap();
        let work_dir = dir.path().join("exports");
        let ctx = WorkContext::new(
            CancellationToken::new(),
            ProgressReporter::noop(),
            Dispatcher::spawn(),
        );

        let stage = ExportStage::new(Arc::new(CopyExporter), asset(&dir), &work_dir);
        let exported = stage.run(ctx).await.unwrap();

        assert!(exported.path().starts_with(&work_dir));
        assert_eq!(exported.metadata().size_bytes, 12);
        assert_eq!(exports_in(&work_dir), 1);

        drop(exported);
        assert_eq!(exports_in(&work_dir), 0);
    }

    #[tokio::test]
    async fn test_keep_hands_off_file() {
        let dir = TempDir::new().unwrap();
        let work_dir = dir.path().join("exports");
        let ctx = WorkContext::new(
            CancellationToken::new(),
            ProgressReporter::noop(),
            Dispatcher::spawn(),
        );

        let stage = ExportStage::new(Arc::new(CopyExporter), asset(&dir), &work_dir);
        let path = stage.run(ctx).await.unwrap().keep().unwrap();

        assert!(path.exists());
        assert_eq!(exports_in(&work_dir), 1);
    }

    #[tokio::test]
    async fn test_cancel_mid_export_removes_partial_file() {
        let dir = TempDir::new().unwrap();
        let work_dir = dir.path().join("exports");
        let token = CancellationToken::new();
        let started = Arc::new(AtomicBool::new(false));
        let ctx = WorkContext::new(token.clone(), ProgressReporter::noop(), Dispatcher::spawn());

        let exporter = Arc::new(HangingExporter {
            started: Arc::clone(&started),
        });
        let stage = ExportStage::new(exporter, asset(&dir), &work_dir);
        let handle = tokio::spawn(stage.run(ctx));

        while !started.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        assert_eq!(exports_in(&work_dir), 1);

        token.cancel();
        let err = handle.await.unwrap().unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(exports_in(&work_dir), 0);
    }
}
