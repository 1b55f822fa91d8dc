//! Event loop that serializes deliveries for one endpoint.
//!
//! Transport tasks never call listeners directly. They queue a job here and
//! the dispatcher task runs queued jobs one at a time, in queue order. This
//! keeps every callback of an endpoint (and of the sockets it produced) on a
//! single execution context.

use std::panic::{self, AssertUnwindSafe};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

type Job = Box<dyn FnOnce() + Send>;

/// Sender side of an endpoint's event loop. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Job>,
}

impl Dispatcher {
    /// Spawn the delivery task on `runtime`.
    ///
    /// The task exits once every `Dispatcher` clone has been dropped and the
    /// queue is drained.
    pub fn spawn(runtime: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        runtime.spawn(async move {
            while let Some(job) = rx.recv().await {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("Dispatched job panicked");
                }
            }
            tracing::trace!("Dispatcher stopped");
        });

        Self { tx }
    }

    /// Queue `job` behind everything already dispatched.
    ///
    /// Never runs `job` inline. Returns false if the event loop is gone
    /// (runtime shutting down).
    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(job)).is_ok()
    }
}
