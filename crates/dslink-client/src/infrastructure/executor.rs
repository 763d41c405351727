//! Worker execution contexts for handler invocations.
//!
//! Handlers never run on the I/O task that reads the socket.  Instead the
//! dispatcher hands each batch to an [`Executor`]:
//!
//! - [`SerialExecutor`] – a FIFO lane on a Tokio runtime.  Jobs run one at a
//!   time on the runtime's blocking pool, so a slow handler occupies a pool
//!   thread, never the reader, and batches of one kind are handled in
//!   arrival order.
//! - [`InlineExecutor`] – runs the job on the calling thread.  Only useful in
//!   tests, where it makes dispatch deterministic.
//!
//! [`Workers`] bundles one lane for request batches and one for response
//! batches, so the two kinds proceed independently of each other.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// A unit of handler work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs jobs.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs every job immediately on the caller's thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }
}

/// A FIFO lane backed by a Tokio runtime.
///
/// The lane's driver task lives until every handle to the lane is dropped.
pub struct SerialExecutor {
    name: &'static str,
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialExecutor {
    /// Starts a lane on `handle`.  `name` tags the lane's log lines.
    pub fn spawn(handle: &Handle, name: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                // Awaiting here is what keeps the lane serial.  A panic in the
                // job surfaces as a JoinError and the lane moves on.
                if let Err(e) = tokio::task::spawn_blocking(job).await {
                    error!(lane = name, "handler panicked: {e}");
                }
            }
            debug!(lane = name, "worker lane stopped");
        });
        Self { name, tx }
    }
}

impl Executor for SerialExecutor {
    fn execute(&self, job: Job) {
        if self.tx.send(job).is_err() {
            warn!(lane = self.name, "worker lane is gone; dropping job");
        }
    }
}

/// The pair of lanes a dispatcher dispatches into.
#[derive(Clone)]
pub struct Workers {
    requests: Arc<dyn Executor>,
    responses: Arc<dyn Executor>,
}

impl Workers {
    pub fn new(requests: Arc<dyn Executor>, responses: Arc<dyn Executor>) -> Self {
        Self {
            requests,
            responses,
        }
    }

    /// Two independent [`SerialExecutor`] lanes on `handle`.
    pub fn tokio(handle: &Handle) -> Self {
        Self::new(
            Arc::new(SerialExecutor::spawn(handle, "requests")),
            Arc::new(SerialExecutor::spawn(handle, "responses")),
        )
    }

    /// Both lanes run inline on the caller's thread.
    pub fn inline() -> Self {
        Self::new(Arc::new(InlineExecutor), Arc::new(InlineExecutor))
    }

    pub fn requests(&self) -> &dyn Executor {
        self.requests.as_ref()
    }

    pub fn responses(&self) -> &dyn Executor {
        self.responses.as_ref()
    }
}
