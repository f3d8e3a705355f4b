//! Hand-off of an exported file to the descriptor queue.

use tracing::{info, warn};

use vup_media::{Dispatcher, ExportedFile};
use vup_models::{LocalId, VideoSettings};

use crate::descriptor::UploadDescriptor;
use crate::error::QueueResult;
use crate::queue::DescriptorQueue;

/// Register an exported file as a new upload.
///
/// The local id is derived from the exported file's location, which is
/// fresh for every export, so the same asset may be uploaded again while an
/// earlier upload of it is still queued. On success the queue owns the file
/// on disk. On any failure, including a duplicate
/// registration, the exported file is deleted and the existing descriptor
/// is left untouched.
pub async fn register_export(
    queue: &dyn DescriptorQueue,
    exported: ExportedFile,
    settings: VideoSettings,
    dispatcher: Dispatcher,
) -> QueueResult<UploadDescriptor> {
    let local_id = LocalId::from_source(exported.path());
    register_export_as(queue, local_id, exported, settings, dispatcher).await
}

/// Like [`register_export`] with a caller-chosen local id.
pub async fn register_export_as(
    queue: &dyn DescriptorQueue,
    local_id: LocalId,
    exported: ExportedFile,
    settings: VideoSettings,
    dispatcher: Dispatcher,
) -> QueueResult<UploadDescriptor> {
    settings.validate()?;
    let handle = exported.handle().clone();

    let descriptor = UploadDescriptor::new(
        local_id.clone(),
        exported.path(),
        settings,
        exported.metadata(),
        dispatcher,
    );

    if let Err(e) = queue.register(descriptor.clone()).await {
        warn!(local_id = %local_id, error = %e, "Hand-off rejected, removing export");
        if let Err(cleanup) = exported.discard() {
            warn!(local_id = %local_id, error = %cleanup, "Failed to remove rejected export");
        }
        return Err(e);
    }

    let path = match exported.keep() {
        Ok(path) => path,
        Err(e) => {
            // The file is gone or unreachable; the descriptor would point at nothing.
            let _ = queue.discard(&local_id).await;
            return Err(e.into());
        }
    };
    info!(
        local_id = %local_id,
        handle = %handle,
        path = %path.display(),
        "Export handed off to queue"
    );
    Ok(descriptor)
}
