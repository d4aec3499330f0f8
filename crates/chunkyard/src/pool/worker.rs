use super::{Assigner, Completion, TaskId};
use crate::Chunk;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// A chunk queued for the next free worker.
#[derive(Debug)]
pub struct WorkRequest {
    pub task: TaskId,
    pub chunk: Chunk,
}

/// Receiving side of the pool's queue, shared by every worker so that an idle
/// worker always takes the next chunk.
pub type SharedQueue = Arc<Mutex<mpsc::UnboundedReceiver<WorkRequest>>>;

/// Worker task responsible for running [`WorkRequest`]s through an
/// [`Assigner`].
///
/// The worker takes one request at a time from the shared queue, runs the
/// assigner on it and reports a [`Completion`] whether the chunk succeeded or
/// failed. A panic inside the assigner is reported as a failed chunk; the
/// worker itself keeps going.
///
/// The loop ends when the queue is closed and drained, when the completion
/// channel is gone, or when `shutdown_token` is cancelled. Cancellation also
/// aborts the chunk in progress without reporting it.
///
/// # Arguments
///
/// - `worker_id`: Identifier reported with every completion and in logs.
/// - `queue`: Shared receiver of pending work.
/// - `assigner`: The run-wide worker capability.
/// - `completions`: Channel back to the pool.
/// - `shutdown_token`: Cancelled when the pool shuts down.
pub async fn worker_loop<A: Assigner>(
    worker_id: usize,
    queue: SharedQueue,
    assigner: Arc<A>,
    completions: mpsc::UnboundedSender<Completion>,
    shutdown_token: CancellationToken,
) {
    tracing::trace!("Worker {worker_id} started");

    loop {
        let request = tokio::select! {
            () = shutdown_token.cancelled() => break,
            request = async { queue.lock().await.recv().await } => request,
        };
        let Some(WorkRequest { task, chunk }) = request else {
            break;
        };

        let started = Instant::now();
        let job = {
            let assigner = Arc::clone(&assigner);
            let chunk = chunk.clone();
            tokio::spawn(async move { assigner.assign(&chunk).await })
        };
        let abort = job.abort_handle();

        let outcome = tokio::select! {
            () = shutdown_token.cancelled() => {
                tracing::debug!("Worker {worker_id} abandoning chunk {} on shutdown", chunk.index());
                abort.abort();
                break;
            }
            joined = job => match joined {
                Ok(Ok(assignment)) => Ok(assignment),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("assigner task failed: {e}")),
            },
        };

        if let Err(reason) = &outcome {
            tracing::debug!("Worker {worker_id} failed chunk {}: {reason}", chunk.index());
        }

        let completion = Completion {
            task,
            worker: Some(worker_id),
            chunk,
            elapsed: started.elapsed(),
            outcome,
        };
        if completions.send(completion).is_err() {
            tracing::debug!("Worker {worker_id} exiting, completion channel closed");
            break;
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}
