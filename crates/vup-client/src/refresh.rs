//! Status refresh manager.
//!
//! Periodically polls the remote for every tracked job and notifies a single
//! [`TransitionDelegate`] exactly once per observed status change.
//!
//! Per job there is at most one outstanding poll; a cycle that finds one
//! still running skips that job. Every dispatched poll carries a generation
//! number, and a response is applied only if the job is still tracked with
//! that same generation in flight. Responses arriving after `untrack`, or
//! after an untrack/track pair, are discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use vup_media::Dispatcher;
use vup_models::{RemoteJobId, RemoteStatus};
use vup_queue::{DescriptorQueue, QueueError, UploadDescriptor};

use crate::config::{RefreshConfig, MIN_POLL_INTERVAL};
use crate::error::{RefreshError, RefreshResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::FailureTracker;

/// Remote endpoint reporting job status.
///
/// One-shot and idempotent; an in-flight request may be abandoned by
/// dropping its future.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn poll(&self, job: &RemoteJobId) -> RefreshResult<RemoteStatus>;
}

/// Receiver of status transitions. Called on the manager's dispatcher.
pub trait TransitionDelegate: Send + Sync {
    /// `old != new` always holds.
    fn on_transition(&self, job: &RemoteJobId, old: RemoteStatus, new: RemoteStatus);

    /// The job failed permanently and is no longer tracked.
    fn on_failure(&self, job: &RemoteJobId, error: &RefreshError) {
        let _ = (job, error);
    }
}

/// Public view of one tracked job.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedJobInfo {
    pub job: RemoteJobId,
    pub status: RemoteStatus,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub poll_in_flight: bool,
    pub consecutive_failures: u32,
}

struct InFlight {
    generation: u64,
    token: CancellationToken,
}

struct TrackedJob {
    status: RemoteStatus,
    last_polled_at: Option<DateTime<Utc>>,
    in_flight: Option<InFlight>,
    failures: FailureTracker,
}

struct Inner {
    source: Arc<dyn StatusSource>,
    delegate: Arc<dyn TransitionDelegate>,
    queue: Option<Arc<dyn DescriptorQueue>>,
    dispatcher: Dispatcher,
    config: RefreshConfig,
    jobs: Mutex<HashMap<RemoteJobId, TrackedJob>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

/// What a poll cycle decided to do for one job.
struct Dispatch {
    job: RemoteJobId,
    generation: u64,
    token: CancellationToken,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<RemoteJobId, TrackedJob>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn notify_transition(&self, job: &RemoteJobId, old: RemoteStatus, new: RemoteStatus) {
        info!(job_id = %job, old = %old, new = %new, "Remote status changed");
        metrics::record_transition(new);
        let delegate = Arc::clone(&self.delegate);
        let job = job.clone();
        self.dispatcher
            .dispatch(move || delegate.on_transition(&job, old, new));
    }

    fn notify_failure(&self, job: &RemoteJobId, err: RefreshError) {
        error!(job_id = %job, error = %err, "Remote job failed");
        let delegate = Arc::clone(&self.delegate);
        let job = job.clone();
        self.dispatcher
            .dispatch(move || delegate.on_failure(&job, &err));
    }

    /// Mirror a remote status onto the local descriptor.
    fn sync_descriptor(
        &self,
        descriptor: Option<&UploadDescriptor>,
        job: &RemoteJobId,
        status: RemoteStatus,
    ) {
        let Some(descriptor) = descriptor else {
            return;
        };
        let target = status.upload_state();
        match descriptor.transition(vup_models::Writer::Refresh, target) {
            Ok(previous) if previous != target => {
                debug!(job_id = %job, local_id = %descriptor.local_id(), from = %previous, to = %target, "Descriptor updated");
            }
            Ok(_) => {}
            Err(QueueError::WriterConflict { state, .. }) => {
                warn!(job_id = %job, state = %state, "Descriptor still owned by queue, skipping update");
            }
            Err(e) => {
                warn!(job_id = %job, error = %e, "Descriptor update rejected");
            }
        }
    }

    /// Dispatch a poll for every tracked job without an outstanding one.
    fn dispatch_cycle(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        if self.shutdown.is_cancelled() {
            debug!("Refresh manager shut down, skipping poll cycle");
            return Vec::new();
        }

        let dispatches: Vec<Dispatch> = {
            let mut jobs = self.lock();
            let mut dispatches = Vec::with_capacity(jobs.len());
            for (job, tracked) in jobs.iter_mut() {
                if tracked.in_flight.is_some() {
                    debug!(job_id = %job, "Poll still outstanding, skipping");
                    metrics::record_skipped();
                    continue;
                }
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                let token = self.shutdown.child_token();
                tracked.in_flight = Some(InFlight {
                    generation,
                    token: token.clone(),
                });
                dispatches.push(Dispatch {
                    job: job.clone(),
                    generation,
                    token,
                });
            }
            dispatches
        };

        dispatches
            .into_iter()
            .map(|dispatch| self.spawn_poll(dispatch))
            .collect()
    }

    fn spawn_poll(self: &Arc<Self>, dispatch: Dispatch) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        let span = JobLogger::for_remote(&dispatch.job, "status_poll").create_span();

        tokio::spawn(
            async move {
                metrics::record_poll();
                debug!(generation = dispatch.generation, "Polling remote status");

                let result = tokio::select! {
                    biased;
                    _ = dispatch.token.cancelled() => {
                        debug!(generation = dispatch.generation, "Poll cancelled");
                        return;
                    }
                    result = tokio::time::timeout(
                        inner.config.poll_timeout,
                        inner.source.poll(&dispatch.job),
                    ) => result.unwrap_or(Err(RefreshError::Timeout)),
                };

                let descriptor = match &inner.queue {
                    Some(queue) => queue.get_by_remote(&dispatch.job).await,
                    None => None,
                };

                inner.apply(&dispatch.job, dispatch.generation, result, descriptor.as_ref());
            }
            .instrument(span),
        )
    }

    /// Apply a poll result. Runs entirely under the job table lock.
    fn apply(
        &self,
        job: &RemoteJobId,
        generation: u64,
        result: RefreshResult<RemoteStatus>,
        descriptor: Option<&UploadDescriptor>,
    ) {
        let mut jobs = self.lock();

        let Some(tracked) = jobs.get_mut(job) else {
            debug!(job_id = %job, generation, "Discarding response for untracked job");
            metrics::record_stale_response();
            return;
        };
        if tracked.in_flight.as_ref().map(|f| f.generation) != Some(generation) {
            warn!(job_id = %job, generation, "Discarding stale poll response");
            metrics::record_stale_response();
            return;
        }
        tracked.in_flight = None;
        tracked.last_polled_at = Some(Utc::now());

        match result {
            Ok(status) => {
                tracked.failures.record_success();
                if status == tracked.status {
                    debug!(job_id = %job, status = %status, "Remote status unchanged");
                    return;
                }

                let old = std::mem::replace(&mut tracked.status, status);
                self.notify_transition(job, old, status);
                self.sync_descriptor(descriptor, job, status);

                if status.is_terminal() {
                    jobs.remove(job);
                    info!(job_id = %job, status = %status, "Job reached terminal status, untracked");
                    if status == RemoteStatus::Failed {
                        self.notify_failure(
                            job,
                            RefreshError::remote_job_failed(job, "remote reported failure"),
                        );
                    }
                }
            }
            Err(e) => {
                metrics::record_poll_failure(e.is_retryable());
                let should_log = tracked.failures.record_failure();
                let failures = tracked.failures.failure_count();

                // Errors that no later poll can clear fail the job at once.
                let exhausted = failures > self.config.max_poll_failures;
                if exhausted || !e.is_retryable() {
                    let reason = if exhausted {
                        format!("{} consecutive poll failures, last: {}", failures, e)
                    } else {
                        format!("poll cannot succeed: {}", e)
                    };
                    let old = tracked.status;
                    jobs.remove(job);
                    if old != RemoteStatus::Failed {
                        self.notify_transition(job, old, RemoteStatus::Failed);
                    }
                    self.sync_descriptor(descriptor, job, RemoteStatus::Failed);
                    self.notify_failure(job, RefreshError::remote_job_failed(job, reason));
                } else if should_log {
                    warn!(job_id = %job, failures, error = %e, "Status poll failed, will retry");
                }
            }
        }
    }
}

/// Polls tracked remote jobs and reports status transitions.
///
/// Dropping the manager stops its ticker and cancels outstanding polls.
pub struct RefreshManager {
    inner: Arc<Inner>,
    started: AtomicBool,
}

impl std::fmt::Debug for RefreshManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshManager")
            .field("tracked", &self.inner.lock().len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl RefreshManager {
    pub fn new(
        source: Arc<dyn StatusSource>,
        delegate: Arc<dyn TransitionDelegate>,
        dispatcher: Dispatcher,
        config: RefreshConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                delegate,
                queue: None,
                dispatcher,
                config,
                jobs: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
            started: AtomicBool::new(false),
        }
    }

    /// Mirror observed statuses onto descriptors found in `queue`.
    ///
    /// Must be called before the manager is shared.
    pub fn with_queue(mut self, queue: Arc<dyn DescriptorQueue>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.queue = Some(queue),
            None => warn!("Refresh manager already shared, queue not attached"),
        }
        self
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.inner.config
    }

    /// Begin polling `job`, assumed to be uploading. Idempotent.
    ///
    /// Returns `true` if the job was not already tracked.
    pub fn track(&self, job: RemoteJobId) -> bool {
        self.track_from(job, RemoteStatus::Uploading)
    }

    /// Begin polling `job` with a known last status. Terminal statuses are
    /// not tracked.
    pub fn track_from(&self, job: RemoteJobId, status: RemoteStatus) -> bool {
        if status.is_terminal() {
            debug!(job_id = %job, status = %status, "Not tracking job in terminal status");
            return false;
        }

        let mut jobs = self.inner.lock();
        if jobs.contains_key(&job) {
            return false;
        }
        info!(job_id = %job, status = %status, "Tracking remote job");
        jobs.insert(
            job,
            TrackedJob {
                status,
                last_polled_at: None,
                in_flight: None,
                failures: FailureTracker::new(self.inner.config.max_logged_failures),
            },
        );
        true
    }

    /// Track several jobs at once. Returns how many were newly tracked.
    pub fn track_all<I>(&self, jobs: I) -> usize
    where
        I: IntoIterator<Item = RemoteJobId>,
    {
        jobs.into_iter().filter(|job| self.track(job.clone())).count()
    }

    /// Stop polling `job`; an outstanding poll is cancelled.
    pub fn untrack(&self, job: &RemoteJobId) -> bool {
        let removed = self.inner.lock().remove(job);
        match removed {
            Some(tracked) => {
                if let Some(in_flight) = tracked.in_flight {
                    in_flight.token.cancel();
                }
                info!(job_id = %job, "Untracked remote job");
                true
            }
            None => false,
        }
    }

    pub fn untrack_all(&self) {
        let drained: Vec<(RemoteJobId, TrackedJob)> = self.inner.lock().drain().collect();
        for (_, tracked) in &drained {
            if let Some(in_flight) = &tracked.in_flight {
                in_flight.token.cancel();
            }
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "Untracked all remote jobs");
        }
    }

    pub fn is_tracked(&self, job: &RemoteJobId) -> bool {
        self.inner.lock().contains_key(job)
    }

    /// Tracked job ids, sorted.
    pub fn tracked(&self) -> Vec<RemoteJobId> {
        let mut ids: Vec<RemoteJobId> = self.inner.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Last known status of a tracked job.
    pub fn status_of(&self, job: &RemoteJobId) -> Option<RemoteStatus> {
        self.inner.lock().get(job).map(|t| t.status)
    }

    pub fn info(&self, job: &RemoteJobId) -> Option<TrackedJobInfo> {
        self.inner.lock().get(job).map(|t| TrackedJobInfo {
            job: job.clone(),
            status: t.status,
            last_polled_at: t.last_polled_at,
            poll_in_flight: t.in_flight.is_some(),
            consecutive_failures: t.failures.failure_count(),
        })
    }

    /// Number of polls currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|t| t.in_flight.is_some())
            .count()
    }

    /// Run one poll cycle: dispatch a poll for every tracked job without an
    /// outstanding one. Returns the spawned poll tasks.
    pub fn dispatch_cycle(&self) -> Vec<JoinHandle<()>> {
        self.inner.dispatch_cycle()
    }

    /// Run one poll cycle and wait for its polls to settle.
    pub async fn refresh_once(&self) {
        let handles = self.dispatch_cycle();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Poll task panicked: {}", e);
            }
        }
    }

    /// Start the periodic ticker. Returns `false` if already started.
    pub fn start(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        let period = self.inner.config.poll_interval.max(MIN_POLL_INTERVAL);
        info!(interval_secs = period.as_secs_f64(), "Starting status refresh ticker");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = weak.upgrade() else { break };
                inner.dispatch_cycle();
            }
            debug!("Status refresh ticker stopped");
        });
        true
    }

    /// Stop the ticker and cancel outstanding polls. Tracked jobs are kept,
    /// but the manager cannot be restarted.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

impl Drop for RefreshManager {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vup_media::DispatchQueue;

    struct PendingSource;

    #[async_trait]
    impl StatusSource for PendingSource {
        async fn poll(&self, _job: &RemoteJobId) -> RefreshResult<RemoteStatus> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(RemoteJobId, RemoteStatus, RemoteStatus)>>);

    impl TransitionDelegate for Recorder {
        fn on_transition(&self, job: &RemoteJobId, old: RemoteStatus, new: RemoteStatus) {
            self.0.lock().unwrap().push((job.clone(), old, new));
        }
    }

    fn manager() -> (RefreshManager, Arc<Recorder>, DispatchQueue) {
        let (dispatcher, queue) = Dispatcher::channel();
        let recorder = Arc::new(Recorder::default());
        let manager = RefreshManager::new(
            Arc::new(PendingSource),
            recorder.clone(),
            dispatcher,
            RefreshConfig::default(),
        );
        (manager, recorder, queue)
    }

    #[tokio::test]
    async fn test_response_after_retrack_is_discarded() {
        let (manager, recorder, mut queue) = manager();
        let job = RemoteJobId::from_string("J");

        manager.track(job.clone());
        let handles = manager.dispatch_cycle();
        assert_eq!(handles.len(), 1);
        let generation = manager.inner.generation.load(Ordering::Relaxed);

        assert!(manager.untrack(&job));
        assert!(manager.track(job.clone()));
        manager
            .inner
            .apply(&job, generation, Ok(RemoteStatus::Transcoding), None);

        assert_eq!(manager.status_of(&job), Some(RemoteStatus::Uploading));
        queue.drain();
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_untrack_cancels_outstanding_poll() {
        let (manager, _recorder, _queue) = manager();
        let job = RemoteJobId::from_string("J");

        manager.track(job.clone());
        let handles = manager.dispatch_cycle();
        assert_eq!(manager.in_flight(), 1);

        manager.untrack(&job);
        for handle in handles {
            tokio::time::timeout(std::time::Duration::from_secs(1), handle)
                .await
                .expect("poll task should stop")
                .unwrap();
        }
        assert!(manager.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_no_polls_after_shutdown() {
        let (manager, _recorder, _queue) = manager();
        let job = RemoteJobId::from_string("J");
        manager.track(job.clone());

        manager.shutdown();
        assert!(manager.dispatch_cycle().is_empty());
        assert_eq!(manager.in_flight(), 0);
        assert!(manager.is_tracked(&job));
        assert!(!manager.info(&job).unwrap().poll_in_flight);
    }

    #[test]
    fn test_terminal_status_not_tracked() {
        let (dispatcher, _queue) = Dispatcher::channel();
        let manager = RefreshManager::new(
            Arc::new(PendingSource),
            Arc::new(Recorder::default()),
            dispatcher,
            RefreshConfig::default(),
        );

        assert!(!manager.track_from(RemoteJobId::from_string("J"), RemoteStatus::Ready));
        assert!(manager.track_from(RemoteJobId::from_string("K"), RemoteStatus::Transcoding));
        assert_eq!(manager.tracked(), vec![RemoteJobId::from_string("K")]);
    }
}
