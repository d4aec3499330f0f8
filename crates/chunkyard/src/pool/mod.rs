//! Work-queue abstraction and the in-process worker pool behind it.
//!
//! The scheduler only talks to a [`WorkQueue`]: it submits a batch of chunks,
//! waits a bounded time for completions, asks which tasks are still
//! outstanding, and fetches the result of every task that finished. Any
//! transport that can answer those questions (threads, processes, a remote
//! broker) can drive a run.
//!
//! [`WorkerPool`] is the bundled implementation. It runs an [`Assigner`] on a
//! fixed set of Tokio worker tasks that pull chunks from a shared queue and
//! report back over a completion channel.
//!
//! ## Structure
//!
//! - [`manager`] - [`WorkerPool`], submission, completion tracking, shutdown.
//! - [`worker`] - the per-worker receive/assign/report loop.

pub mod manager;
pub mod worker;

pub use manager::{PoolConfig, WorkerPool};

use crate::{BoxError, Chunk, Result};
use core::fmt;
use core::future::Future;
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier handed out by a [`WorkQueue`] for each submitted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Per-frame output of one chunk, aligned with the chunk's frame order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkAssignment {
    /// Index of the closest reference point for each frame.
    pub assignments: Vec<i32>,
    /// Distance from each frame to its closest reference point.
    pub distances: Vec<f32>,
}

/// The worker capability: classifies every frame of a chunk.
///
/// An implementor carries everything a run shares across chunks (the
/// reference set, the metric and its configuration, a handle to the sequence
/// data) and is handed to the pool once, when the pool is built. Chunks are
/// independent, so `assign` may be called concurrently from several workers.
///
/// Errors are opaque to the scheduler: a chunk either produced a
/// [`ChunkAssignment`] or failed.
pub trait Assigner: Send + Sync + 'static {
    fn assign(
        &self,
        chunk: &Chunk,
    ) -> impl Future<Output = core::result::Result<ChunkAssignment, BoxError>> + Send;
}

/// Everything known about a finished task.
#[derive(Debug)]
pub struct Completion {
    pub task: TaskId,
    /// Identity of the worker that ran the chunk, if the transport knows it.
    pub worker: Option<usize>,
    /// The chunk that was submitted, echoed back for correlation.
    pub chunk: Chunk,
    /// Time the worker spent on the chunk.
    pub elapsed: Duration,
    /// The assignment, or a description of why the chunk failed.
    pub outcome: core::result::Result<ChunkAssignment, String>,
}

/// A queue of independent chunks with asynchronous completion notification.
///
/// The expected call pattern is:
///
/// 1. [`submit`](WorkQueue::submit) the whole batch once,
/// 2. [`wait`](WorkQueue::wait) with a bounded timeout,
/// 3. compare the submitted ids against [`outstanding`](WorkQueue::outstanding),
/// 4. [`take_result`](WorkQueue::take_result) for every id that left it,
///
/// repeating 2-4 until nothing is outstanding.
pub trait WorkQueue {
    /// Submits a batch of chunks and returns one id per chunk, in order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DispatchUnavailable`] if the queue cannot
    /// accept work at all.
    fn submit(&mut self, chunks: Vec<Chunk>) -> Result<Vec<TaskId>>;

    /// Waits until at least one more task has finished or `timeout` elapses.
    ///
    /// Returning without a new completion is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DispatchUnavailable`] if outstanding tasks can
    /// no longer complete (for example, every worker is gone).
    fn wait(&mut self, timeout: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Ids that were submitted and have not finished yet.
    fn outstanding(&self) -> BTreeSet<TaskId>;

    /// Removes and returns the result of a finished task.
    ///
    /// Returns `None` if the task is unknown, still running, or was already
    /// taken.
    fn take_result(&mut self, task: TaskId) -> Option<Completion>;
}
