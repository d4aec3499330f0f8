use super::command::CommandAssigner;
use super::config::{PartitionConfig, RunConfig, load_lengths};
use super::telemetry;
use anyhow::{Context, bail};
use chunkyard::{
    Chunk, Partition, ProgressReport, ResultStore, RunSummary, Scheduler, UnitStatus, WorkerPool,
};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Writes the partition of a lengths file as JSON.
pub fn plan(config: &PartitionConfig, mut out: impl Write) -> anyhow::Result<Partition> {
    let sequences = load_lengths(&config.lengths)?;
    let partition = Partition::new(&sequences, config.chunk_size)?;
    tracing::info!(
        "{} frames in {} sequences -> {} chunks of up to {} frames",
        sequences.total_frames(),
        sequences.len(),
        partition.len(),
        partition.chunk_size()
    );
    serde_json::to_writer_pretty(&mut out, &partition)?;
    writeln!(out)?;
    Ok(partition)
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub output_dir: PathBuf,
    pub sequences: usize,
    pub total_frames: usize,
    pub chunk_size: usize,
    pub chunk_count: usize,
    pub completed: usize,
    pub pending: Vec<usize>,
}

/// Writes the completion state of the store in `output_dir` as JSON.
pub fn status(output_dir: &Path, mut out: impl Write) -> anyhow::Result<StatusReport> {
    let Some(store) = ResultStore::open(output_dir)
        .with_context(|| format!("failed to open result store in {}", output_dir.display()))?
    else {
        bail!("no result store in {}", output_dir.display());
    };

    let report = StatusReport {
        output_dir: output_dir.to_path_buf(),
        sequences: store.sequences().len(),
        total_frames: store.sequences().total_frames(),
        chunk_size: store.chunk_size(),
        chunk_count: store.chunk_count(),
        completed: store.completed_count(),
        pending: store.pending_chunk_indices().into_iter().collect(),
    };
    store.close()?;

    serde_json::to_writer_pretty(&mut out, &report)?;
    writeln!(out)?;
    Ok(report)
}

/// Runs every pending chunk through the configured worker program.
///
/// The pool is shut down before returning, whether the run finished, failed
/// or was cancelled.
pub async fn run(config: RunConfig, cancel: CancellationToken) -> anyhow::Result<RunSummary> {
    let sequences = load_lengths(&config.partition.lengths)?;
    let chunk_size = config.partition.chunk_size;
    let frames_per_chunk: Vec<usize> = Partition::new(&sequences, chunk_size)?
        .chunks()
        .iter()
        .map(Chunk::len)
        .collect();

    log_startup_info(&config);

    let assigner = CommandAssigner::new(config.worker_cmd, config.worker_args, config.context);
    let pool = WorkerPool::spawn(assigner, config.pool);
    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let recorder = tokio::spawn(record_progress(progress_rx, frames_per_chunk));

    let mut scheduler = Scheduler::new(pool, config.scheduler)
        .with_progress(progress_tx)
        .with_cancellation(cancel);
    let outcome = scheduler
        .run(&sequences, chunk_size, &config.output_dir)
        .await;

    scheduler.into_queue().shutdown().await;
    if let Err(e) = recorder.await {
        tracing::warn!("Progress recorder failed: {e}");
    }

    Ok(outcome?)
}

/// Fails when the run left chunks pending, so the process exits non-zero.
pub fn ensure_complete(summary: &RunSummary) -> anyhow::Result<()> {
    if summary.failed.is_empty() {
        return Ok(());
    }
    let chunks: Vec<String> = summary.failed.keys().map(ToString::to_string).collect();
    bail!(
        "{} chunk(s) failed ({}); re-run to retry them",
        summary.failed.len(),
        chunks.join(", ")
    );
}

async fn record_progress(
    mut rx: mpsc::UnboundedReceiver<ProgressReport>,
    frames_per_chunk: Vec<usize>,
) {
    while let Some(report) = rx.recv().await {
        telemetry::record_chunk_duration(report.execution.as_secs_f64() * 1000.0);
        match report.status {
            UnitStatus::Ok => {
                telemetry::increment_chunks_completed();
                let frames = frames_per_chunk.get(report.chunk).copied().unwrap_or(0);
                telemetry::increment_frames_assigned(frames as u64);
            }
            UnitStatus::Failed => telemetry::increment_unit_failures(),
        }
    }
}

fn log_startup_info(config: &RunConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting run with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting run into {} with {} workers running {}",
            config.output_dir.display(),
            config.pool.num_workers,
            config.worker_cmd.display()
        );
    }
}
