use anyhow::{Context, bail};
use chunkyard::{PoolConfig, SchedulerConfig, SequenceSet};
use clap::{Args, Parser, Subcommand};
use core::time::Duration;
use std::path::{Path, PathBuf};

/// Command-line surface of the `chunkyard` binary.
///
/// Every flag can also be supplied through the environment (or a `.env`
/// file), which is how batch systems usually configure long runs.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "chunkyard",
    version,
    about = "Chunked, resumable nearest-reference assignment runs"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the chunks a run would dispatch, as JSON.
    Plan(PartitionArgs),
    /// Report completed and pending chunks of an output directory.
    Status(StatusArgs),
    /// Assign every pending chunk through an external worker program.
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PartitionArgs {
    /// JSON array with the frame count of every sequence, in sequence order.
    ///
    /// Example: `[1000, 250, 0, 4096]`
    ///
    /// Environment variable: `LENGTHS_FILE`
    #[arg(short, long, env = "LENGTHS_FILE")]
    pub lengths: PathBuf,

    /// Number of frames per chunk.
    ///
    /// Every chunk carries fixed dispatch overhead, so prefer large chunks.
    ///
    /// Environment variable: `CHUNK_SIZE`
    #[arg(short, long, env = "CHUNK_SIZE", default_value_t = 1000)]
    pub chunk_size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Directory holding the results and checkpoint of a run.
    ///
    /// Environment variable: `OUTPUT_DIR`
    #[arg(short, long, env = "OUTPUT_DIR", default_value = "Data")]
    pub output_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub partition: PartitionArgs,

    /// Directory for results and checkpoint. Re-running with the same
    /// directory resumes where the last run stopped.
    ///
    /// Environment variable: `OUTPUT_DIR`
    #[arg(short, long, env = "OUTPUT_DIR", default_value = "Data")]
    pub output_dir: PathBuf,

    /// Reference set handed to every worker invocation.
    ///
    /// Environment variable: `REFERENCE_PATH`
    #[arg(short, long, env = "REFERENCE_PATH")]
    pub reference: PathBuf,

    /// Distance metric name, passed through to the worker.
    ///
    /// Environment variable: `METRIC`
    #[arg(short, long, env = "METRIC", default_value = "rmsd")]
    pub metric: String,

    /// Metric options as a JSON object, passed through to the worker.
    ///
    /// Environment variable: `METRIC_OPTIONS`
    #[arg(long, env = "METRIC_OPTIONS", default_value = "{}")]
    pub metric_options: String,

    /// Worker program. It reads one JSON request on stdin and writes
    /// `{"assignments": [...], "distances": [...]}` on stdout.
    ///
    /// Environment variable: `WORKER_CMD`
    #[arg(short, long, env = "WORKER_CMD")]
    pub worker_cmd: PathBuf,

    /// Extra argument for the worker program. Repeat for several.
    #[arg(long = "worker-arg", allow_hyphen_values = true)]
    pub worker_args: Vec<String>,

    /// Number of chunks processed concurrently.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(short, long, env = "NUM_WORKERS", default_value_t = 4)]
    pub num_workers: usize,

    /// Upper bound on a single wait for completions, in milliseconds.
    ///
    /// Environment variable: `POLL_INTERVAL_MS`
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// How long shutdown waits for each worker before aborting it, in
    /// milliseconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_MS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_MS", default_value_t = 3000)]
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PartitionConfig {
    pub lengths: PathBuf,
    pub chunk_size: usize,
}

impl TryFrom<PartitionArgs> for PartitionConfig {
    type Error = anyhow::Error;

    fn try_from(args: PartitionArgs) -> Result<Self, Self::Error> {
        if args.chunk_size == 0 {
            bail!("CHUNK_SIZE must be greater than 0");
        }
        Ok(Self {
            lengths: args.lengths,
            chunk_size: args.chunk_size,
        })
    }
}

/// Run-wide worker configuration, sent with every chunk.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerContext {
    pub reference: PathBuf,
    pub metric: String,
    pub metric_options: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub partition: PartitionConfig,
    pub output_dir: PathBuf,
    pub context: WorkerContext,
    pub worker_cmd: PathBuf,
    pub worker_args: Vec<String>,
    pub pool: PoolConfig,
    pub scheduler: SchedulerConfig,
}

impl TryFrom<RunArgs> for RunConfig {
    type Error = anyhow::Error;

    fn try_from(args: RunArgs) -> Result<Self, Self::Error> {
        let partition = PartitionConfig::try_from(args.partition)?;

        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }
        if args.poll_interval_ms == 0 {
            bail!("POLL_INTERVAL_MS must be greater than 0");
        }
        if args.metric.trim().is_empty() {
            bail!("METRIC must not be empty");
        }

        let metric_options: serde_json::Value = serde_json::from_str(&args.metric_options)
            .context("METRIC_OPTIONS is not valid JSON")?;
        if !metric_options.is_object() {
            bail!("METRIC_OPTIONS must be a JSON object");
        }

        Ok(Self {
            partition,
            output_dir: args.output_dir,
            context: WorkerContext {
                reference: args.reference,
                metric: args.metric,
                metric_options,
            },
            worker_cmd: args.worker_cmd,
            worker_args: args.worker_args,
            pool: PoolConfig {
                num_workers: args.num_workers,
                shutdown_timeout: Duration::from_millis(args.shutdown_timeout_ms),
            },
            scheduler: SchedulerConfig {
                poll_interval: Duration::from_millis(args.poll_interval_ms),
            },
        })
    }
}

/// Reads a JSON array of sequence lengths.
pub fn load_lengths(path: &Path) -> anyhow::Result<SequenceSet> {
    let raw = std::fs::read(path)
        .with_context(|| format!("failed to read lengths file {}", path.display()))?;
    let lengths: Vec<i64> = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not a JSON array of integers", path.display()))?;
    SequenceSet::try_from(lengths).with_context(|| format!("invalid lengths in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec![
            "chunkyard",
            "run",
            "--lengths",
            "lengths.json",
            "--reference",
            "gens.h5",
            "--worker-cmd",
            "assign-worker",
        ];
        argv.extend_from_slice(extra);
        match CliArgs::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn run_defaults_are_valid() {
        let config = RunConfig::try_from(run_args(&[])).unwrap();
        assert_eq!(config.partition.chunk_size, 1000);
        assert_eq!(config.pool.num_workers, 4);
        assert_eq!(config.scheduler.poll_interval, Duration::from_millis(500));
        assert_eq!(config.context.metric, "rmsd");
        assert!(config.context.metric_options.as_object().unwrap().is_empty());
        assert!(config.worker_args.is_empty());
    }

    #[test]
    fn worker_args_and_metric_options_pass_through() {
        let config = RunConfig::try_from(run_args(&[
            "--worker-arg",
            "--fast",
            "--worker-arg",
            "x",
            "--metric",
            "dihedral",
            "--metric-options",
            r#"{"p": 2}"#,
        ]))
        .unwrap();
        assert_eq!(config.worker_args, vec!["--fast", "x"]);
        assert_eq!(config.context.metric, "dihedral");
        assert_eq!(config.context.metric_options["p"], 2);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for extra in [
            &["--chunk-size", "0"][..],
            &["--num-workers", "0"],
            &["--poll-interval-ms", "0"],
            &["--metric-options", "[1, 2]"],
            &["--metric-options", "{nope"],
        ] {
            assert!(RunConfig::try_from(run_args(extra)).is_err(), "{extra:?}");
        }
    }

    #[test]
    fn lengths_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lengths.json");

        std::fs::write(&path, "[3, 0, 12]").unwrap();
        assert_eq!(load_lengths(&path).unwrap().lengths(), &[3, 0, 12]);

        std::fs::write(&path, "[3, -1]").unwrap();
        assert!(load_lengths(&path).is_err());

        std::fs::write(&path, r#"{"lengths": [3]}"#).unwrap();
        assert!(load_lengths(&path).is_err());

        assert!(load_lengths(&dir.path().join("missing.json")).is_err());
    }
}
