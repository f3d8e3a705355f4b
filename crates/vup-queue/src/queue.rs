//! Descriptor queue.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use vup_models::{LocalId, RemoteJobId, UploadState, Writer};

use crate::descriptor::{Subscription, UploadDescriptor};
use crate::error::{QueueError, QueueResult};

/// Store of upload descriptors, addressable by local and remote id.
#[async_trait]
pub trait DescriptorQueue: Send + Sync {
    /// Register a new descriptor. Fails with
    /// [`QueueError::DuplicateRegistration`] if the local id is taken; the
    /// existing descriptor is left untouched.
    async fn register(&self, descriptor: UploadDescriptor) -> QueueResult<()>;

    async fn get(&self, local_id: &LocalId) -> Option<UploadDescriptor>;

    async fn get_by_remote(&self, remote_id: &RemoteJobId) -> Option<UploadDescriptor>;

    /// Record the remote id assigned to an upload and move it to
    /// `RemoteAcknowledged`. After this the refresh manager owns the
    /// descriptor.
    async fn acknowledge(
        &self,
        local_id: &LocalId,
        remote_id: RemoteJobId,
    ) -> QueueResult<UploadDescriptor>;

    /// Cancel an upload in any non-terminal state.
    async fn cancel(&self, local_id: &LocalId) -> QueueResult<UploadDescriptor>;

    /// Re-enter `Uploading` from `Failed`. Returns the new retry count.
    async fn retry(&self, local_id: &LocalId) -> QueueResult<u32>;

    /// Remove a descriptor regardless of state.
    async fn discard(&self, local_id: &LocalId) -> QueueResult<UploadDescriptor>;

    /// Remove every descriptor in a terminal state. Returns their ids.
    async fn prune_terminal(&self) -> Vec<LocalId>;

    async fn list(&self) -> Vec<UploadDescriptor>;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Attach a progress observer to the descriptor registered as `local_id`.
    async fn observe(
        &self,
        local_id: &LocalId,
        on_progress: Arc<dyn Fn(f64) + Send + Sync>,
    ) -> QueueResult<Subscription> {
        let descriptor = self
            .get(local_id)
            .await
            .ok_or_else(|| QueueError::NotFound(local_id.clone()))?;
        Ok(descriptor.observe_arc(on_progress))
    }
}

#[derive(Default)]
struct Index {
    by_local: HashMap<LocalId, UploadDescriptor>,
    by_remote: HashMap<RemoteJobId, LocalId>,
}

impl Index {
    fn get(&self, local_id: &LocalId) -> QueueResult<UploadDescriptor> {
        self.by_local
            .get(local_id)
            .cloned()
            .ok_or_else(|| QueueError::NotFound(local_id.clone()))
    }

    fn remove(&mut self, local_id: &LocalId) -> Option<UploadDescriptor> {
        let descriptor = self.by_local.remove(local_id)?;
        if let Some(remote_id) = descriptor.remote_id() {
            self.by_remote.remove(&remote_id);
        }
        Some(descriptor)
    }
}

/// In-memory [`DescriptorQueue`] with a bidirectional id map.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    index: Arc<RwLock<Index>>,
}

impl std::fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.read();
        f.debug_struct("MemoryQueue")
            .field("descriptors", &index.by_local.len())
            .field("remote_ids", &index.by_remote.len())
            .finish()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl DescriptorQueue for MemoryQueue {
    async fn register(&self, descriptor: UploadDescriptor) -> QueueResult<()> {
        let local_id = descriptor.local_id().clone();
        let mut index = self.write();

        if index.by_local.contains_key(&local_id) {
            warn!(local_id = %local_id, "Duplicate descriptor registration rejected");
            return Err(QueueError::DuplicateRegistration(local_id));
        }

        descriptor.register()?;
        index.by_local.insert(local_id.clone(), descriptor);
        info!(local_id = %local_id, "Descriptor registered");
        Ok(())
    }

    async fn get(&self, local_id: &LocalId) -> Option<UploadDescriptor> {
        self.read().by_local.get(local_id).cloned()
    }

    async fn get_by_remote(&self, remote_id: &RemoteJobId) -> Option<UploadDescriptor> {
        let index = self.read();
        let local_id = index.by_remote.get(remote_id)?;
        index.by_local.get(local_id).cloned()
    }

    async fn acknowledge(
        &self,
        local_id: &LocalId,
        remote_id: RemoteJobId,
    ) -> QueueResult<UploadDescriptor> {
        let mut index = self.write();
        if let Some(existing) = index.by_remote.get(&remote_id) {
            if existing != local_id {
                return Err(QueueError::RemoteConflict {
                    remote: remote_id,
                    existing: existing.clone(),
                });
            }
        }

        let descriptor = index.get(local_id)?;
        descriptor.acknowledge(remote_id.clone())?;
        index.by_remote.insert(remote_id.clone(), local_id.clone());
        info!(local_id = %local_id, remote_id = %remote_id, "Upload acknowledged by remote");
        Ok(descriptor)
    }

    async fn cancel(&self, local_id: &LocalId) -> QueueResult<UploadDescriptor> {
        let descriptor = self.read().get(local_id)?;
        descriptor.cancel()?;
        Ok(descriptor)
    }

    async fn retry(&self, local_id: &LocalId) -> QueueResult<u32> {
        let mut index = self.write();
        let descriptor = index.get(local_id)?;
        let stale_remote = descriptor.remote_id();

        let attempt = descriptor.retry()?;
        if let Some(remote_id) = stale_remote {
            index.by_remote.remove(&remote_id);
        }
        info!(local_id = %local_id, attempt, "Upload retry requested");
        Ok(attempt)
    }

    async fn discard(&self, local_id: &LocalId) -> QueueResult<UploadDescriptor> {
        let descriptor = self
            .write()
            .remove(local_id)
            .ok_or_else(|| QueueError::NotFound(local_id.clone()))?;
        debug!(local_id = %local_id, state = %descriptor.state(), "Descriptor discarded");
        Ok(descriptor)
    }

    async fn prune_terminal(&self) -> Vec<LocalId> {
        let mut index = self.write();
        let terminal: Vec<LocalId> = index
            .by_local
            .iter()
            .filter(|(_, d)| d.state().is_terminal())
            .map(|(id, _)| id.clone())
            .collect();

        for id in &terminal {
            index.remove(id);
        }
        if !terminal.is_empty() {
            debug!(count = terminal.len(), "Pruned terminal descriptors");
        }
        terminal
    }

    async fn list(&self) -> Vec<UploadDescriptor> {
        let mut all: Vec<UploadDescriptor> = self.read().by_local.values().cloned().collect();
        all.sort_by_key(|d| d.created_at());
        all
    }

    async fn len(&self) -> usize {
        self.read().by_local.len()
    }
}

/// Mark an upload as in flight on the queue side.
pub async fn begin_upload(
    queue: &dyn DescriptorQueue,
    local_id: &LocalId,
) -> QueueResult<UploadDescriptor> {
    let descriptor = queue
        .get(local_id)
        .await
        .ok_or_else(|| QueueError::NotFound(local_id.clone()))?;
    descriptor.transition(Writer::Queue, UploadState::Uploading)?;
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vup_media::Dispatcher;
    use vup_models::{ExportMetadata, VideoSettings};

    fn descriptor(id: &str) -> UploadDescriptor {
        let (dispatcher, _queue) = Dispatcher::channel();
        UploadDescriptor::new(
            LocalId::from_string(id),
            format!("/tmp/{id}.mp4"),
            VideoSettings::default(),
            ExportMetadata::default(),
            dispatcher,
        )
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let queue = MemoryQueue::new();
        queue.register(descriptor("a")).await.unwrap();

        let d = queue.get(&LocalId::from_string("a")).await.unwrap();
        assert_eq!(d.state(), UploadState::Registered);
        assert_eq!(queue.len().await, 1);
        assert!(queue.get(&LocalId::from_string("b")).await.is_none());
    }

    #[tokio::test]
    async fn test_acknowledge_maps_both_ids() {
        let queue = MemoryQueue::new();
        let local = LocalId::from_string("a");
        queue.register(descriptor("a")).await.unwrap();
        begin_upload(&queue, &local).await.unwrap();

        queue
            .acknowledge(&local, RemoteJobId::from_string("J1"))
            .await
            .unwrap();

        let by_remote = queue
            .get_by_remote(&RemoteJobId::from_string("J1"))
            .await
            .unwrap();
        assert_eq!(by_remote.local_id(), &local);
        assert_eq!(by_remote.state(), UploadState::RemoteAcknowledged);
    }

    #[tokio::test]
    async fn test_remote_id_cannot_map_twice() {
        let queue = MemoryQueue::new();
        for id in ["a", "b"] {
            queue.register(descriptor(id)).await.unwrap();
            begin_upload(&queue, &LocalId::from_string(id)).await.unwrap();
        }

        queue
            .acknowledge(&LocalId::from_string("a"), RemoteJobId::from_string("J"))
            .await
            .unwrap();
        let err = tokio_test::assert_err!(
            queue
                .acknowledge(&LocalId::from_string("b"), RemoteJobId::from_string("J"))
                .await
        );

        assert!(matches!(err, QueueError::RemoteConflict { .. }));
        assert!(err.is_permanent_failure());
    }

    #[tokio::test]
    async fn test_retry_drops_stale_remote_mapping() {
        let queue = MemoryQueue::new();
        let local = LocalId::from_string("a");
        queue.register(descriptor("a")).await.unwrap();
        let d = begin_upload(&queue, &local).await.unwrap();
        queue
            .acknowledge(&local, RemoteJobId::from_string("J"))
            .await
            .unwrap();
        d.transition(Writer::Refresh, UploadState::Failed).unwrap();

        assert_eq!(queue.retry(&local).await, Ok(1));
        assert!(queue
            .get_by_remote(&RemoteJobId::from_string("J"))
            .await
            .is_none());
        assert_eq!(d.state(), UploadState::Uploading);
    }

    #[tokio::test]
    async fn test_prune_and_discard() {
        let queue = MemoryQueue::new();
        for id in ["a", "b", "c"] {
            queue.register(descriptor(id)).await.unwrap();
        }
        queue.cancel(&LocalId::from_string("a")).await.unwrap();

        assert_eq!(queue.prune_terminal().await, vec![LocalId::from_string("a")]);
        assert_eq!(queue.len().await, 2);

        queue.discard(&LocalId::from_string("b")).await.unwrap();
        assert_eq!(
            queue.discard(&LocalId::from_string("b")).await.unwrap_err(),
            QueueError::NotFound(LocalId::from_string("b"))
        );
        assert_eq!(queue.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_observe_unknown_descriptor() {
        let queue = MemoryQueue::new();
        let err = queue
            .observe(&LocalId::from_string("x"), Arc::new(|_| {}))
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::NotFound(LocalId::from_string("x")));
    }
}
