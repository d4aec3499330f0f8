//! Resumable dispatch of chunks to a work queue.
//!
//! A run moves through [`RunState`]s:
//!
//! ```text
//! Init -> Dispatching -> Draining -> Done
//!   \__________\______________\_____> Fatal
//! ```
//!
//! - `Init`: partition the sequence set, open or create the result store and
//!   read which chunks are still pending. Nothing pending goes straight to
//!   `Done`.
//! - `Dispatching`: submit every pending chunk to the queue in one batch.
//! - `Draining`: wait (bounded) for completions, write each successful chunk
//!   into the store, flip its completion bit and emit a progress record.
//! - `Done`: close the store.
//! - `Fatal`: a dispatch-layer or store error. The store is closed in
//!   whatever state it holds; the next run resumes from its pending chunks.
//!
//! A chunk that fails on its worker is logged and left pending. It is not
//! retried within the run; re-running picks up exactly the failed chunks.

mod progress;

pub use progress::{ProgressReport, UnitStatus};

use crate::pool::{Completion, TaskId, WorkQueue};
use crate::{Error, Partition, Result, ResultStore, SequenceSet};
use core::fmt;
use core::time::Duration;
use progress::ProgressTracker;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Dispatching,
    Draining,
    Done,
    Fatal,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Dispatching => "dispatching",
            Self::Draining => "draining",
            Self::Done => "done",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Tuning knobs for the dispatch loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on a single wait for completions. Cancellation is also
    /// observed while waiting.
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// What a run accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Chunks in the whole partition.
    pub total_chunks: usize,
    /// Chunks already complete when the run started.
    pub previously_completed: usize,
    /// Chunks submitted by this run.
    pub dispatched: usize,
    /// Chunks this run wrote and marked complete.
    pub completed: usize,
    /// Chunks that failed in this run, with the reason.
    pub failed: BTreeMap<usize, String>,
}

impl RunSummary {
    /// `true` when every chunk of the partition is complete.
    pub fn is_complete(&self) -> bool {
        self.previously_completed + self.completed == self.total_chunks
    }
}

/// Drives a resumable run over a [`WorkQueue`].
///
/// The scheduler is the only owner of the [`ResultStore`]; workers only ever
/// see chunks and return values.
pub struct Scheduler<Q> {
    queue: Q,
    config: SchedulerConfig,
    progress: Option<mpsc::UnboundedSender<ProgressReport>>,
    cancel: CancellationToken,
    state: RunState,
}

impl<Q: WorkQueue> Scheduler<Q> {
    pub fn new(queue: Q, config: SchedulerConfig) -> Self {
        Self {
            queue,
            config,
            progress: None,
            cancel: CancellationToken::new(),
            state: RunState::Init,
        }
    }

    /// Publishes every [`ProgressReport`] on `tx` in addition to logging it.
    #[must_use]
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ProgressReport>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Aborts the run with [`Error::Cancelled`] once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub const fn state(&self) -> RunState {
        self.state
    }

    pub const fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn into_queue(self) -> Q {
        self.queue
    }

    /// Runs every chunk of `sequences` that `output_dir` does not already
    /// hold a result for.
    ///
    /// Returns once nothing is outstanding. Per-chunk failures do not end the
    /// run; they are listed in [`RunSummary::failed`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `chunk_size` is zero.
    /// - [`Error::ShapeMismatch`] if `output_dir` holds a store for another
    ///   sequence set or chunk size.
    /// - [`Error::DispatchUnavailable`] if the queue refuses the batch or can
    ///   no longer complete it.
    /// - [`Error::Cancelled`] if the cancellation token fires first.
    /// - [`Error::Io`] if results cannot be persisted.
    ///
    /// Whenever a store was opened, it is closed before returning.
    #[tracing::instrument(skip_all, fields(chunk_size = chunk_size, output_dir = %output_dir.display()))]
    pub async fn run(
        &mut self,
        sequences: &SequenceSet,
        chunk_size: usize,
        output_dir: &Path,
    ) -> Result<RunSummary> {
        self.transition(RunState::Init);
        let (partition, mut store) = match Self::init(sequences, chunk_size, output_dir) {
            Ok(opened) => opened,
            Err(e) => {
                self.transition(RunState::Fatal);
                tracing::error!("Run failed to start: {e}");
                return Err(e);
            }
        };

        let pending = store.pending_chunk_indices();
        let mut summary = RunSummary {
            total_chunks: partition.len(),
            previously_completed: partition.len() - pending.len(),
            dispatched: pending.len(),
            ..RunSummary::default()
        };
        tracing::info!("{}/{} chunks remaining", pending.len(), partition.len());

        if !pending.is_empty() {
            self.transition(RunState::Dispatching);
            let mut in_flight = match self.dispatch(&partition, &pending) {
                Ok(in_flight) => in_flight,
                Err(e) => return Err(self.abort(store, e)),
            };

            self.transition(RunState::Draining);
            if let Err(e) = self
                .drain(&partition, &mut store, &mut in_flight, &mut summary)
                .await
            {
                return Err(self.abort(store, e));
            }
        }

        self.transition(RunState::Done);
        if let Err(e) = store.close() {
            self.transition(RunState::Fatal);
            tracing::error!("Failed to close result store: {e}");
            return Err(e);
        }
        tracing::info!(
            "All done: {}/{} chunks complete, {} failed this run",
            summary.previously_completed + summary.completed,
            summary.total_chunks,
            summary.failed.len()
        );
        Ok(summary)
    }

    fn init(
        sequences: &SequenceSet,
        chunk_size: usize,
        output_dir: &Path,
    ) -> Result<(Partition, ResultStore)> {
        let partition = Partition::new(sequences, chunk_size)?;
        let store = ResultStore::open_or_create(output_dir, sequences, &partition)?;
        Ok((partition, store))
    }

    /// Submits the pending chunks and maps each returned task id back to its
    /// chunk index.
    fn dispatch(
        &mut self,
        partition: &Partition,
        pending: &BTreeSet<usize>,
    ) -> Result<HashMap<TaskId, usize>> {
        let chunks = pending
            .iter()
            .filter_map(|&index| partition.get(index).cloned())
            .collect();
        let ids = self.queue.submit(chunks)?;
        if ids.len() != pending.len() {
            return Err(Error::unavailable(format!(
                "queue accepted {} of {} chunks",
                ids.len(),
                pending.len()
            )));
        }
        Ok(ids.into_iter().zip(pending.iter().copied()).collect())
    }

    async fn drain(
        &mut self,
        partition: &Partition,
        store: &mut ResultStore,
        in_flight: &mut HashMap<TaskId, usize>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let mut tracker = ProgressTracker::new(in_flight.len());
        let cancel = self.cancel.clone();
        let poll_interval = self.config.poll_interval;

        while !in_flight.is_empty() {
            let waited = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(Error::Cancelled),
                waited = self.queue.wait(poll_interval) => waited,
            };
            waited?;

            let outstanding = self.queue.outstanding();
            let mut finished: Vec<TaskId> = in_flight
                .keys()
                .filter(|task| !outstanding.contains(task))
                .copied()
                .collect();
            finished.sort_unstable();

            for task in finished {
                let Some(chunk_index) = in_flight.remove(&task) else {
                    continue;
                };
                let (worker, execution, status) = match self.queue.take_result(task) {
                    Some(completion) => {
                        let worker = completion.worker;
                        let execution = completion.elapsed;
                        let status =
                            Self::persist(partition, store, chunk_index, completion, summary)?;
                        (worker, execution, status)
                    }
                    None => {
                        let reason = format!("{task} finished without a result");
                        Self::unit_failed(chunk_index, reason, summary);
                        (None, Duration::ZERO, UnitStatus::Failed)
                    }
                };

                let report = tracker.record(worker, chunk_index, execution, status);
                tracing::info!("{report}");
                if let Some(tx) = &self.progress {
                    if tx.send(report).is_err() {
                        tracing::debug!("Progress receiver dropped");
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes one completion into the store.
    ///
    /// Worker-side problems (an error, a result for the wrong chunk, a result
    /// of the wrong size) are unit failures. Store I/O errors are returned
    /// and end the run.
    fn persist(
        partition: &Partition,
        store: &mut ResultStore,
        chunk_index: usize,
        completion: Completion,
        summary: &mut RunSummary,
    ) -> Result<UnitStatus> {
        let Some(chunk) = partition.get(chunk_index) else {
            Self::unit_failed(chunk_index, "chunk is not part of the partition", summary);
            return Ok(UnitStatus::Failed);
        };
        let assignment = match completion.outcome {
            Ok(assignment) => assignment,
            Err(reason) => {
                Self::unit_failed(chunk_index, reason, summary);
                return Ok(UnitStatus::Failed);
            }
        };
        if completion.chunk != *chunk {
            let reason = format!(
                "worker answered for chunk {} instead",
                completion.chunk.index()
            );
            Self::unit_failed(chunk_index, reason, summary);
            return Ok(UnitStatus::Failed);
        }

        match store.write(
            chunk_index,
            chunk.spans(),
            &assignment.assignments,
            &assignment.distances,
        ) {
            Ok(()) => {
                summary.completed += 1;
                Ok(UnitStatus::Ok)
            }
            // Rejected before anything was written: the worker's answer is
            // malformed, not the store.
            Err(Error::InvalidArgument { reason }) => {
                Self::unit_failed(chunk_index, reason, summary);
                Ok(UnitStatus::Failed)
            }
            Err(e) => Err(e),
        }
    }

    fn unit_failed(chunk: usize, reason: impl Into<String>, summary: &mut RunSummary) {
        let reason = reason.into();
        tracing::warn!(
            "{}",
            Error::UnitFailure {
                chunk,
                reason: reason.clone()
            }
        );
        summary.failed.insert(chunk, reason);
    }

    /// Moves to `Fatal`, closes the store and hands the error back.
    fn abort(&mut self, store: ResultStore, err: Error) -> Error {
        self.transition(RunState::Fatal);
        match &err {
            Error::Cancelled => tracing::warn!("Run cancelled, closing result store"),
            _ => tracing::error!("Run aborted: {err}"),
        }
        if let Err(close_err) = store.close() {
            tracing::error!("Failed to close result store: {close_err}");
        }
        err
    }

    fn transition(&mut self, next: RunState) {
        tracing::debug!("Scheduler state {} -> {}", self.state, next);
        self.state = next;
    }
}
