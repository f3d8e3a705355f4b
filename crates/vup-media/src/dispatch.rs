//! Designated execution context for externally visible callbacks.
//!
//! Every progress, completion and transition callback is funnelled through a
//! [`Dispatcher`]. Callbacks run one at a time, in submission order, on
//! whichever task drains the paired [`DispatchQueue`], so consumers never see
//! concurrent invocations.

use tokio::sync::mpsc;
use tracing::debug;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Handle used to submit callbacks to the designated context.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Callback>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher whose queue is drained by the caller.
    ///
    /// Use this to run callbacks on an existing event loop.
    pub fn channel() -> (Self, DispatchQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, DispatchQueue { rx })
    }

    /// Create a dispatcher backed by a dedicated tokio task.
    ///
    /// Must be called within a tokio runtime. The task exits once every
    /// `Dispatcher` clone has been dropped and the queue is empty.
    pub fn spawn() -> Self {
        let (dispatcher, queue) = Self::channel();
        tokio::spawn(queue.run());
        dispatcher
    }

    /// Submit a callback. Returns `false` if the context has shut down.
    pub fn dispatch<F>(&self, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(callback)).is_err() {
            debug!("Dispatch context closed, dropping callback");
            return false;
        }
        true
    }
}

/// Receiving side of a [`Dispatcher`].
pub struct DispatchQueue {
    rx: mpsc::UnboundedReceiver<Callback>,
}

impl DispatchQueue {
    /// Run callbacks until every dispatcher is dropped.
    pub async fn run(mut self) {
        while let Some(callback) = self.rx.recv().await {
            callback();
        }
    }

    /// Run every callback that is already queued. Returns how many ran.
    pub fn drain(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(callback) = self.rx.try_recv() {
            callback();
            ran += 1;
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_callbacks_run_in_submission_order() {
        let (dispatcher, mut queue) = Dispatcher::channel();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = Arc::clone(&seen);
            dispatcher.dispatch(move || seen.lock().unwrap().push(i));
        }

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(queue.drain(), 5);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_dispatch_after_queue_dropped() {
        let (dispatcher, queue) = Dispatcher::channel();
        drop(queue);
        assert!(!dispatcher.dispatch(|| {}));
    }

    #[tokio::test]
    async fn test_spawned_dispatcher_runs_callbacks() {
        let dispatcher = Dispatcher::spawn();
        let (tx, rx) = tokio::sync::oneshot::channel();

        dispatcher.dispatch(move || {
            let _ = tx.send(42);
        });

        assert_eq!(rx.await.unwrap(), 42);
    }
}
