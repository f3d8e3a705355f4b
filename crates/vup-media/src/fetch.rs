//! Fetch stage: resolve a media handle into a decoded asset.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use vup_models::{DecodedAsset, MediaHandle};

use crate::error::{PipelineError, PipelineResult};
use crate::operation::{Work, WorkContext};
use crate::progress::ProgressReporter;

/// Source of local media, e.g. the device photo library.
///
/// Implementations report their own download progress through `progress`
/// and may be abandoned mid-flight when the fetch is cancelled.
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    async fn fetch(
        &self,
        handle: &MediaHandle,
        progress: ProgressReporter,
    ) -> PipelineResult<DecodedAsset>;
}

/// Resolve a media handle into a [`DecodedAsset`].
pub struct FetchStage<L: ?Sized> {
    library: std::sync::Arc<L>,
    handle: MediaHandle,
}

impl<L: MediaLibrary + ?Sized> FetchStage<L> {
    pub fn new(library: std::sync::Arc<L>, handle: MediaHandle) -> Self {
        Self { library, handle }
    }
}

#[async_trait]
impl<L: MediaLibrary + ?Sized + 'static> Work for FetchStage<L> {
    type Output = DecodedAsset;

    fn name(&self) -> &'static str {
        "fetch"
    }

    async fn run(self, ctx: WorkContext) -> PipelineResult<DecodedAsset> {
        if ctx.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        debug!(handle = %self.handle, "Fetching asset");

        let fetch = self.library.fetch(&self.handle, ctx.progress().clone());
        let asset = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(PipelineError::Cancelled),
            result = fetch => result.map_err(|e| match e {
                PipelineError::Cancelled | PipelineError::AssetNotFound(_) | PipelineError::Fetch { .. } => e,
                other => PipelineError::fetch_failed(&self.handle, other),
            })?,
        };

        ctx.progress().report(1.0);
        info!(handle = %self.handle, path = %asset.path.display(), "Asset fetched");
        Ok(asset)
    }
}

/// Media library backed by a directory on disk.
///
/// Handles are paths relative to `root`.
#[derive(Debug, Clone)]
pub struct LocalMediaLibrary {
    root: PathBuf,
}

impl LocalMediaLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, handle: &MediaHandle) -> PipelineResult<PathBuf> {
        let relative = Path::new(handle.as_str());
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if handle.as_str().is_empty() || escapes {
            return Err(PipelineError::fetch_failed(
                handle,
                "handle must be a relative path inside the library",
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl MediaLibrary for LocalMediaLibrary {
    async fn fetch(
        &self,
        handle: &MediaHandle,
        progress: ProgressReporter,
    ) -> PipelineResult<DecodedAsset> {
        progress.report(0.0);

        let path = self.resolve(handle)?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::AssetNotFound(handle.to_string()));
            }
            Err(e) => return Err(PipelineError::fetch_failed(handle, e)),
        };
        if !metadata.is_file() {
            return Err(PipelineError::AssetNotFound(handle.to_string()));
        }

        progress.report(1.0);
        Ok(DecodedAsset::new(handle.clone(), path))
    }
}
