//! Upload job descriptors.
//!
//! A descriptor is the durable record of one upload. It is shared by handle
//! between the queue and the refresh manager; which of the two may write it
//! depends on the current [`UploadState`] (see [`UploadState::owner`]).
//!
//! Progress observers are held as callbacks keyed by subscription id. A
//! [`Subscription`] only holds a weak reference, so it never keeps the
//! descriptor alive, and dropping it detaches the observer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use vup_media::Dispatcher;
use vup_models::{ExportMetadata, LocalId, RemoteJobId, UploadState, VideoSettings, Writer};

use crate::error::{QueueError, QueueResult};

type ProgressObserver = Arc<dyn Fn(f64) + Send + Sync>;

/// Identity of one observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

struct Fields {
    remote_id: Option<RemoteJobId>,
    state: UploadState,
    progress: f64,
    retry_count: u32,
    updated_at: DateTime<Utc>,
    observers: BTreeMap<SubscriptionId, ProgressObserver>,
}

struct Inner {
    local_id: LocalId,
    source: PathBuf,
    settings: VideoSettings,
    metadata: ExportMetadata,
    created_at: DateTime<Utc>,
    dispatcher: Dispatcher,
    next_subscription: AtomicU64,
    fields: Mutex<Fields>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Fields> {
        self.fields.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn unobserve(&self, id: SubscriptionId) -> bool {
        self.lock().observers.remove(&id).is_some()
    }

    /// Queue every observer with `value`. Caller holds the lock so the
    /// dispatch order matches the order of writes.
    fn notify(&self, fields: &Fields, value: f64) {
        for observer in fields.observers.values() {
            let observer = Arc::clone(observer);
            self.dispatcher.dispatch(move || observer(value));
        }
    }
}

/// Handle to an upload job descriptor. Clones share the same record.
#[derive(Clone)]
pub struct UploadDescriptor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for UploadDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields = self.inner.lock();
        f.debug_struct("UploadDescriptor")
            .field("local_id", &self.inner.local_id)
            .field("remote_id", &fields.remote_id)
            .field("state", &fields.state)
            .field("progress", &fields.progress)
            .finish()
    }
}

/// Point-in-time view of a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptorSnapshot {
    pub local_id: LocalId,
    pub remote_id: Option<RemoteJobId>,
    pub source: PathBuf,
    pub settings: VideoSettings,
    pub metadata: ExportMetadata,
    pub state: UploadState,
    pub progress: f64,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadDescriptor {
    /// Create a descriptor in state `Created`.
    pub fn new(
        local_id: LocalId,
        source: impl Into<PathBuf>,
        settings: VideoSettings,
        metadata: ExportMetadata,
        dispatcher: Dispatcher,
    ) -> Self {
        let now = Utc::now();
        Self {
            inner: Arc::new(Inner {
                local_id,
                source: source.into(),
                settings,
                metadata,
                created_at: now,
                dispatcher,
                next_subscription: AtomicU64::new(1),
                fields: Mutex::new(Fields {
                    remote_id: None,
                    state: UploadState::Created,
                    progress: 0.0,
                    retry_count: 0,
                    updated_at: now,
                    observers: BTreeMap::new(),
                }),
            }),
        }
    }

    pub fn local_id(&self) -> &LocalId {
        &self.inner.local_id
    }

    pub fn source(&self) -> &Path {
        &self.inner.source
    }

    pub fn settings(&self) -> &VideoSettings {
        &self.inner.settings
    }

    pub fn metadata(&self) -> ExportMetadata {
        self.inner.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn remote_id(&self) -> Option<RemoteJobId> {
        self.inner.lock().remote_id.clone()
    }

    pub fn state(&self) -> UploadState {
        self.inner.lock().state
    }

    pub fn progress(&self) -> f64 {
        self.inner.lock().progress
    }

    pub fn retry_count(&self) -> u32 {
        self.inner.lock().retry_count
    }

    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }

    /// Whether two handles refer to the same record.
    pub fn same_record(&self, other: &UploadDescriptor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn snapshot(&self) -> DescriptorSnapshot {
        let fields = self.inner.lock();
        DescriptorSnapshot {
            local_id: self.inner.local_id.clone(),
            remote_id: fields.remote_id.clone(),
            source: self.inner.source.clone(),
            settings: self.inner.settings.clone(),
            metadata: self.inner.metadata,
            state: fields.state,
            progress: fields.progress,
            retry_count: fields.retry_count,
            created_at: self.inner.created_at,
            updated_at: fields.updated_at,
        }
    }

    /// Attach a progress observer.
    ///
    /// The current progress is delivered immediately, then every change until
    /// the returned [`Subscription`] is dropped or passed to
    /// [`UploadDescriptor::unobserve`].
    pub fn observe<F>(&self, on_progress: F) -> Subscription
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.observe_arc(Arc::new(on_progress))
    }

    pub(crate) fn observe_arc(&self, observer: ProgressObserver) -> Subscription {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));

        let mut fields = self.inner.lock();
        let current = fields.progress;
        let initial = Arc::clone(&observer);
        self.inner.dispatcher.dispatch(move || initial(current));
        fields.observers.insert(id, observer);
        drop(fields);

        debug!(local_id = %self.inner.local_id, subscription = id.0, "Observer attached");
        Subscription {
            id,
            descriptor: Arc::downgrade(&self.inner),
        }
    }

    /// Detach an observer. Returns false if it was already detached.
    pub fn unobserve(&self, subscription: &Subscription) -> bool {
        if !Weak::ptr_eq(&subscription.descriptor, &Arc::downgrade(&self.inner)) {
            return false;
        }
        self.inner.unobserve(subscription.id)
    }

    fn check_writer(&self, fields: &Fields, writer: Writer) -> QueueResult<()> {
        let owner = fields.state.owner();
        if owner != writer {
            warn!(
                local_id = %self.inner.local_id,
                writer = %writer,
                state = %fields.state,
                "Rejected write from non-owning side"
            );
            return Err(QueueError::WriterConflict {
                writer,
                state: fields.state,
            });
        }
        Ok(())
    }

    /// Record upload progress. Values are clamped into `[0, 1]`; observers
    /// are notified only on change.
    pub fn set_progress(&self, writer: Writer, value: f64) -> QueueResult<()> {
        let mut fields = self.inner.lock();
        self.check_writer(&fields, writer)?;
        if fields.state.is_terminal() {
            return Err(QueueError::invalid_transition(fields.state, fields.state));
        }

        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        if value == fields.progress {
            return Ok(());
        }
        fields.progress = value;
        fields.updated_at = Utc::now();
        self.inner.notify(&fields, value);
        Ok(())
    }

    /// Move to `to` on behalf of `writer`. Returns the previous state.
    ///
    /// A transition to the current state is a no-op.
    pub fn transition(&self, writer: Writer, to: UploadState) -> QueueResult<UploadState> {
        let mut fields = self.inner.lock();
        let from = fields.state;
        if from == to {
            return Ok(from);
        }
        self.check_writer(&fields, writer)?;
        self.apply(&mut fields, to)?;

        if to == UploadState::Ready {
            self.complete_progress(&mut fields);
        }
        Ok(from)
    }

    /// Cancel on the user's behalf. Allowed from any non-terminal state,
    /// whichever side currently owns the descriptor.
    pub fn cancel(&self) -> QueueResult<UploadState> {
        let mut fields = self.inner.lock();
        let from = fields.state;
        self.apply(&mut fields, UploadState::Cancelled)?;
        Ok(from)
    }

    pub(crate) fn register(&self) -> QueueResult<()> {
        let mut fields = self.inner.lock();
        self.apply(&mut fields, UploadState::Registered)
    }

    pub(crate) fn acknowledge(&self, remote_id: RemoteJobId) -> QueueResult<()> {
        let mut fields = self.inner.lock();
        self.check_writer(&fields, Writer::Queue)?;
        self.apply(&mut fields, UploadState::RemoteAcknowledged)?;
        self.complete_progress(&mut fields);
        fields.remote_id = Some(remote_id);
        Ok(())
    }

    /// Failed → Uploading with progress reset. Returns the new retry count.
    pub(crate) fn retry(&self) -> QueueResult<u32> {
        let mut fields = self.inner.lock();
        if fields.state != UploadState::Failed {
            return Err(QueueError::invalid_transition(fields.state, UploadState::Uploading));
        }
        self.apply(&mut fields, UploadState::Uploading)?;
        fields.remote_id = None;
        fields.retry_count += 1;
        fields.progress = 0.0;
        self.inner.notify(&fields, 0.0);
        Ok(fields.retry_count)
    }

    fn apply(&self, fields: &mut Fields, to: UploadState) -> QueueResult<()> {
        let from = fields.state;
        if !from.can_transition_to(to) {
            return Err(QueueError::invalid_transition(from, to));
        }
        fields.state = to;
        fields.updated_at = Utc::now();
        info!(local_id = %self.inner.local_id, from = %from, to = %to, "Descriptor state changed");
        Ok(())
    }

    fn complete_progress(&self, fields: &mut Fields) {
        if fields.progress < 1.0 {
            fields.progress = 1.0;
            self.inner.notify(fields, 1.0);
        }
    }
}

/// Detaches its observer when dropped.
#[derive(Debug)]
#[must_use = "dropping a Subscription detaches the observer"]
pub struct Subscription {
    id: SubscriptionId,
    descriptor: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Whether the observed descriptor still exists.
    pub fn is_live(&self) -> bool {
        self.descriptor.strong_count() > 0
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.descriptor.upgrade() {
            inner.unobserve(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vup_media::DispatchQueue;

    fn descriptor() -> (UploadDescriptor, DispatchQueue) {
        let (dispatcher, queue) = Dispatcher::channel();
        let descriptor = UploadDescriptor::new(
            LocalId::from_string("abc"),
            "/tmp/export.mp4",
            VideoSettings::new("Holiday"),
            ExportMetadata::default(),
            dispatcher,
        );
        (descriptor, queue)
    }

    fn recorder() -> (impl Fn(f64) + Send + Sync + 'static, Arc<Mutex<Vec<f64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (move |v| sink.lock().unwrap().push(v), seen)
    }

    fn uploading() -> (UploadDescriptor, DispatchQueue) {
        let (d, q) = descriptor();
        d.register().unwrap();
        d.transition(Writer::Queue, UploadState::Uploading).unwrap();
        (d, q)
    }

    #[test]
    fn test_late_observer_receives_current_progress() {
        let (d, mut queue) = uploading();
        d.set_progress(Writer::Queue, 0.4).unwrap();

        let (observer, seen) = recorder();
        let _sub = d.observe(observer);
        queue.drain();
        assert_eq!(*seen.lock().unwrap(), vec![0.4]);

        d.set_progress(Writer::Queue, 0.6).unwrap();
        d.set_progress(Writer::Queue, 0.6).unwrap();
        queue.drain();
        assert_eq!(*seen.lock().unwrap(), vec![0.4, 0.6]);
    }

    #[test]
    fn test_dropping_subscription_detaches() {
        let (d, mut queue) = uploading();
        let (observer, seen) = recorder();

        let sub = d.observe(observer);
        assert_eq!(d.observer_count(), 1);
        drop(sub);
        assert_eq!(d.observer_count(), 0);

        d.set_progress(Writer::Queue, 0.9).unwrap();
        queue.drain();
        assert_eq!(*seen.lock().unwrap(), vec![0.0]);
    }

    #[test]
    fn test_unobserve_and_weak_subscription() {
        let (d, _queue) = uploading();
        let (observer, _) = recorder();
        let sub = d.observe(observer);

        assert!(d.unobserve(&sub));
        assert!(!d.unobserve(&sub));
        assert!(sub.is_live());

        drop(d);
        assert!(!sub.is_live());
    }

    #[test]
    fn test_writer_ownership() {
        let (d, _queue) = uploading();

        let err = d
            .transition(Writer::Refresh, UploadState::Transcoding)
            .unwrap_err();
        assert_eq!(
            err,
            QueueError::WriterConflict {
                writer: Writer::Refresh,
                state: UploadState::Uploading
            }
        );

        d.acknowledge(RemoteJobId::from_string("J")).unwrap();
        assert_eq!(d.remote_id(), Some(RemoteJobId::from_string("J")));
        assert_eq!(d.progress(), 1.0);

        assert!(matches!(
            d.set_progress(Writer::Queue, 0.5),
            Err(QueueError::WriterConflict { .. })
        ));
        assert_eq!(
            d.transition(Writer::Refresh, UploadState::Transcoding),
            Ok(UploadState::RemoteAcknowledged)
        );
    }

    #[test]
    fn test_retry_only_from_failed() {
        let (d, _queue) = uploading();
        d.set_progress(Writer::Queue, 0.7).unwrap();

        assert!(matches!(d.retry(), Err(QueueError::InvalidTransition { .. })));

        d.transition(Writer::Queue, UploadState::Failed).unwrap();
        assert_eq!(d.retry(), Ok(1));
        assert_eq!(d.state(), UploadState::Uploading);
        assert_eq!(d.progress(), 0.0);
    }

    #[test]
    fn test_cancel_from_any_owner() {
        let (d, _queue) = uploading();
        d.acknowledge(RemoteJobId::from_string("J")).unwrap();

        assert_eq!(d.cancel(), Ok(UploadState::RemoteAcknowledged));
        assert!(d.cancel().is_err());
        assert_eq!(d.state(), UploadState::Cancelled);
    }
}
