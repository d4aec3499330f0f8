//! Asynchronous worker pool for chunk assignment.
//!
//! This module defines the [`WorkerPool`] struct, which runs a fixed set of
//! Tokio worker tasks over a shared [`Assigner`]. Submitted chunks go into a
//! single queue that every worker pulls from, so a slow chunk never holds up
//! the others. Finished chunks come back over a completion channel, which is
//! what [`WorkQueue::wait`] parks on.
//!
//! The pool supports coordinated shutdown via a shared [`CancellationToken`].

use super::worker::{SharedQueue, WorkRequest, worker_loop};
use super::{Assigner, Completion, TaskId, WorkQueue};
use crate::{Chunk, Error, Result};
use core::time::Duration;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Sizing and shutdown behaviour of a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker tasks.
    pub num_workers: usize,
    /// How long [`WorkerPool::shutdown`] waits for each worker before
    /// aborting it.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

/// A cooperative pool of asynchronous workers that run an [`Assigner`] over
/// submitted chunks.
///
/// The pool hands out a [`TaskId`] per chunk and tracks which ids are still
/// outstanding. Completed tasks are buffered until the caller takes them
/// with [`WorkQueue::take_result`].
pub struct WorkerPool {
    work_tx: mpsc::UnboundedSender<WorkRequest>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    outstanding: BTreeSet<TaskId>,
    finished: HashMap<TaskId, Completion>,
    next_task: u64,
    workers: Vec<JoinHandle<()>>,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawns `config.num_workers` worker tasks sharing `assigner`.
    ///
    /// The assigner is the run-wide worker state (reference set, metric,
    /// sequence data). It is handed to every worker once, here, rather than
    /// with each chunk.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<A: Assigner>(assigner: A, config: PoolConfig) -> Self {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let queue: SharedQueue = Arc::new(Mutex::new(work_rx));
        let assigner = Arc::new(assigner);
        let shutdown_token = CancellationToken::new();

        let workers = (0..config.num_workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&queue),
                    Arc::clone(&assigner),
                    completion_tx.clone(),
                    shutdown_token.clone(),
                ))
            })
            .collect();

        tracing::debug!("Spawned worker pool with {} workers", config.num_workers);

        Self {
            work_tx,
            completion_rx,
            outstanding: BTreeSet::new(),
            finished: HashMap::new(),
            next_task: 0,
            workers,
            shutdown_token,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    fn record(&mut self, completion: Completion) {
        if self.outstanding.remove(&completion.task) {
            self.finished.insert(completion.task, completion);
        } else {
            tracing::warn!("Dropping completion for unknown {}", completion.task);
        }
    }

    /// Gracefully shuts down all workers in the pool.
    ///
    /// - Cancels the shared [`CancellationToken`] so no new chunk is started
    ///   and chunks in progress are abandoned.
    /// - Closes the queue.
    /// - Waits up to `shutdown_timeout` per worker, then aborts stragglers.
    ///
    /// Chunks that were still outstanding are never reported; a resumable run
    /// picks them up again next time.
    pub async fn shutdown(self) {
        tracing::debug!(
            "Shutting down worker pool ({} tasks outstanding)",
            self.outstanding.len()
        );
        self.shutdown_token.cancel();
        drop(self.work_tx);

        let shutdown_timeout = self.shutdown_timeout;
        let joins = self
            .workers
            .into_iter()
            .enumerate()
            .map(|(i, mut handle)| async move {
                match timeout(shutdown_timeout, &mut handle).await {
                    Ok(Ok(())) => tracing::trace!("Worker {i} shutdown acknowledged"),
                    Ok(Err(e)) => tracing::error!("Worker {i} returned error: {e}"),
                    Err(_) => {
                        tracing::warn!("Worker {i} shutdown timed out, aborting");
                        handle.abort();
                    }
                }
            });
        futures::future::join_all(joins).await;

        tracing::debug!("Worker pool shutdown complete");
    }
}

impl WorkQueue for WorkerPool {
    fn submit(&mut self, chunks: Vec<Chunk>) -> Result<Vec<TaskId>> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::unavailable("worker pool is shutting down"));
        }
        if self.workers.is_empty() {
            return Err(Error::unavailable(
                "worker pool has no workers (is the pool configured with num_workers > 0?)",
            ));
        }

        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let task = TaskId(self.next_task);
            self.next_task += 1;
            if self.work_tx.send(WorkRequest { task, chunk }).is_err() {
                return Err(Error::unavailable("worker queue closed, all workers exited"));
            }
            self.outstanding.insert(task);
            ids.push(task);
        }
        Ok(ids)
    }

    async fn wait(&mut self, wait_for: Duration) -> Result<()> {
        if self.outstanding.is_empty() {
            return Ok(());
        }
        match timeout(wait_for, self.completion_rx.recv()).await {
            Ok(Some(completion)) => {
                self.record(completion);
                // Pick up anything else that landed in the meantime.
                while let Ok(completion) = self.completion_rx.try_recv() {
                    self.record(completion);
                }
                Ok(())
            }
            Ok(None) => Err(Error::unavailable(format!(
                "all workers exited with {} tasks outstanding",
                self.outstanding.len()
            ))),
            Err(_) => Ok(()),
        }
    }

    fn outstanding(&self) -> BTreeSet<TaskId> {
        self.outstanding.clone()
    }

    fn take_result(&mut self, task: TaskId) -> Option<Completion> {
        self.finished.remove(&task)
    }
}
