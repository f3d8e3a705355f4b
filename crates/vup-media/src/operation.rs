//! Cancellable asynchronous operations.
//!
//! A [`CancellableOperation`] wraps a unit of [`Work`] with an explicit
//! lifecycle:
//!
//! ```text
//! Ready ──start──▶ Executing ──work done──▶ Finished
//!   │                  │
//!   └──cancel──▶ Cancelled ◀──cancel, then work settles──┘
//! ```
//!
//! `Finished` and `Cancelled` are terminal. Cancellation wins every race: if
//! cancel was requested before the work's result is recorded, the operation
//! settles into `Cancelled` and the result is dropped. The completion callback
//! is delivered exactly once, through the operation's [`Dispatcher`].

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::error::{PipelineError, PipelineResult};
use crate::progress::ProgressReporter;

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Ready,
    Executing,
    Finished,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Finished | OperationState::Cancelled)
    }
}

/// Everything a running piece of work may use.
#[derive(Debug, Clone)]
pub struct WorkContext {
    token: CancellationToken,
    progress: ProgressReporter,
    dispatcher: Dispatcher,
}

impl WorkContext {
    pub fn new(token: CancellationToken, progress: ProgressReporter, dispatcher: Dispatcher) -> Self {
        Self {
            token,
            progress,
            dispatcher,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub fn cancelled(&self) -> impl Future<Output = ()> + '_ {
        self.token.cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Context for a sub-step covering `[offset, offset + span]` of progress.
    pub fn scaled(&self, offset: f64, span: f64) -> Self {
        Self {
            token: self.token.clone(),
            progress: self.progress.scaled(offset, span),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

/// A unit of asynchronous work run by a [`CancellableOperation`].
///
/// Implementations should watch `ctx` for cancellation at every suspension
/// point and release anything they own before returning.
#[async_trait]
pub trait Work: Send + 'static {
    type Output: Send + 'static;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn run(self, ctx: WorkContext) -> PipelineResult<Self::Output>;
}

type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;
type CompletionCallback<T> = Box<dyn FnOnce(PipelineResult<T>) + Send>;

struct Core<T> {
    state: OperationState,
    progress: f64,
    progress_reported: bool,
    error: Option<PipelineError>,
    on_progress: Option<ProgressCallback>,
    on_complete: Option<CompletionCallback<T>>,
}

struct Shared<T> {
    id: Uuid,
    name: &'static str,
    core: Mutex<Core<T>>,
    state_tx: watch::Sender<OperationState>,
    dispatcher: Dispatcher,
}

impl<T: Send + 'static> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Core<T>> {
        // A poisoned lock only means a callback panicked elsewhere; the core
        // itself is always left consistent.
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, core: &mut Core<T>, state: OperationState) {
        core.state = state;
        self.state_tx.send_replace(state);
    }

    fn report_progress(&self, token: &CancellationToken, value: f64) {
        let mut core = self.lock();
        if core.state != OperationState::Executing || token.is_cancelled() {
            return;
        }
        if core.progress_reported && value <= core.progress {
            return;
        }
        core.progress = value;
        core.progress_reported = true;

        if let Some(callback) = core.on_progress.clone() {
            self.dispatcher.dispatch(move || callback(value));
        }
    }

    /// Record the work's result. Called exactly once by the executing task.
    fn settle(&self, token: &CancellationToken, result: PipelineResult<T>) {
        let (result, callback) = {
            let mut core = self.lock();
            if core.state != OperationState::Executing {
                warn!(operation = self.name, id = %self.id, "Settle called in state {:?}", core.state);
                return;
            }

            let result = if token.is_cancelled() {
                Err(PipelineError::Cancelled)
            } else {
                result
            };

            match &result {
                Err(e) if e.is_cancelled() => {
                    self.set_state(&mut core, OperationState::Cancelled);
                    info!(operation = self.name, id = %self.id, "Operation cancelled");
                }
                Err(e) => {
                    core.error = Some(e.clone());
                    self.set_state(&mut core, OperationState::Finished);
                    warn!(operation = self.name, id = %self.id, error = %e, "Operation failed");
                }
                Ok(_) => {
                    self.set_state(&mut core, OperationState::Finished);
                    debug!(operation = self.name, id = %self.id, "Operation finished");
                }
            }

            (result, core.on_complete.take())
        };

        // Dropping an unclaimed result (e.g. a superseded export) happens
        // outside the lock.
        if let Some(callback) = callback {
            self.dispatcher.dispatch(move || callback(result));
        }
    }
}

/// Handle owning one cancellable unit of work.
///
/// Dropping the handle cancels the work if it has not reached a terminal
/// state.
pub struct CancellableOperation<W: Work> {
    shared: Arc<Shared<W::Output>>,
    work: Mutex<Option<W>>,
    token: CancellationToken,
}

impl<W: Work> std::fmt::Debug for CancellableOperation<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellableOperation")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl<W: Work> CancellableOperation<W> {
    /// Wrap `work`; callbacks will be delivered through `dispatcher`.
    pub fn new(work: W, dispatcher: Dispatcher) -> Self {
        let (state_tx, _) = watch::channel(OperationState::Ready);
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            name: work.name(),
            core: Mutex::new(Core {
                state: OperationState::Ready,
                progress: 0.0,
                progress_reported: false,
                error: None,
                on_progress: None,
                on_complete: None,
            }),
            state_tx,
            dispatcher,
        });

        Self {
            shared,
            work: Mutex::new(Some(work)),
            token: CancellationToken::new(),
        }
    }

    /// Set the progress callback. Values are non-decreasing in `[0, 1]`.
    pub fn with_progress<F>(self, callback: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.shared.lock().on_progress = Some(Arc::new(callback));
        self
    }

    /// Set the completion callback, delivered exactly once.
    pub fn with_completion<F>(self, callback: F) -> Self
    where
        F: FnOnce(PipelineResult<W::Output>) + Send + 'static,
    {
        self.shared.lock().on_complete = Some(Box::new(callback));
        self
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> OperationState {
        self.shared.lock().state
    }

    pub fn progress(&self) -> f64 {
        self.shared.lock().progress
    }

    /// Terminal error, if the operation finished unsuccessfully.
    pub fn error(&self) -> Option<PipelineError> {
        self.shared.lock().error.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == OperationState::Cancelled
    }

    /// Begin executing the work on the tokio runtime.
    ///
    /// Starting a cancelled operation is a no-op; starting twice is reported
    /// as [`PipelineError::AlreadyStarted`].
    pub fn start(&self) -> PipelineResult<()> {
        let work = {
            let mut core = self.shared.lock();
            match core.state {
                OperationState::Ready => {}
                OperationState::Cancelled => {
                    debug!(operation = self.shared.name, id = %self.shared.id, "Start ignored, already cancelled");
                    return Ok(());
                }
                OperationState::Executing | OperationState::Finished => {
                    return Err(PipelineError::AlreadyStarted);
                }
            }

            let work = self
                .work
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take()
                .ok_or(PipelineError::AlreadyStarted)?;
            self.shared.set_state(&mut core, OperationState::Executing);
            work
        };

        info!(operation = self.shared.name, id = %self.shared.id, "Operation started");

        let shared = Arc::clone(&self.shared);
        let token = self.token.clone();
        let progress = {
            let shared = Arc::clone(&self.shared);
            let token = self.token.clone();
            ProgressReporter::new(move |value| shared.report_progress(&token, value))
        };
        let ctx = WorkContext::new(token.clone(), progress, self.shared.dispatcher.clone());

        tokio::spawn(async move {
            let result = work.run(ctx).await;
            shared.settle(&token, result);
        });

        Ok(())
    }

    /// Request cancellation. Safe from any state; repeated calls are no-ops.
    pub fn cancel(&self) {
        let mut core = self.shared.lock();
        match core.state {
            OperationState::Ready => {
                self.token.cancel();
                self.shared.set_state(&mut core, OperationState::Cancelled);
                let callback = core.on_complete.take();
                drop(core);

                // The work never runs; release it now.
                self.work
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take();

                info!(operation = self.shared.name, id = %self.shared.id, "Operation cancelled before start");
                if let Some(callback) = callback {
                    self.shared
                        .dispatcher
                        .dispatch(move || callback(Err(PipelineError::Cancelled)));
                }
            }
            OperationState::Executing => {
                // Settling happens on the executing task once the work stops.
                debug!(operation = self.shared.name, id = %self.shared.id, "Cancellation requested");
                self.token.cancel();
            }
            OperationState::Finished | OperationState::Cancelled => {}
        }
    }

    /// Wait until the operation reaches a terminal state.
    pub async fn wait(&self) -> OperationState {
        let mut rx = self.shared.state_tx.subscribe();
        // The sender lives in `self.shared`, so the channel cannot close here.
        let state = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }
}

impl<W: Work> Drop for CancellableOperation<W> {
    fn drop(&mut self) {
        if !self.state().is_terminal() {
            self.cancel();
        }
    }
}
