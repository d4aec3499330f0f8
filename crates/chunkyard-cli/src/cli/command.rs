//! Worker that shells out to an external assignment program.
//!
//! For every chunk the program is started once, receives a [`WorkerRequest`]
//! as JSON on stdin and must print a [`ChunkAssignment`] as JSON on stdout.
//! A non-zero exit status or unparsable output fails the chunk.

use super::config::WorkerContext;
use chunkyard::{Assigner, BoxError, Chunk, ChunkAssignment};
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

// Longest stderr excerpt carried into a failure message.
const STDERR_EXCERPT: usize = 512;

/// What the worker program reads on stdin.
#[derive(Debug, Serialize)]
pub struct WorkerRequest<'a> {
    pub chunk: &'a Chunk,
    #[serde(flatten)]
    pub context: &'a WorkerContext,
}

#[derive(Debug, Clone)]
pub struct CommandAssigner {
    program: PathBuf,
    args: Arc<[String]>,
    context: Arc<WorkerContext>,
}

impl CommandAssigner {
    pub fn new(program: PathBuf, args: Vec<String>, context: WorkerContext) -> Self {
        Self {
            program,
            args: args.into(),
            context: Arc::new(context),
        }
    }
}

impl Assigner for CommandAssigner {
    async fn assign(&self, chunk: &Chunk) -> Result<ChunkAssignment, BoxError> {
        let request = serde_json::to_vec(&WorkerRequest {
            chunk,
            context: &self.context,
        })?;

        let mut child = Command::new(&self.program)
            .args(self.args.iter())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to start {}: {e}", self.program.display()))?;

        // Stdout is collected while the request is still being written, so a
        // worker may answer before it has read all of its input.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&request).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output = output?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();
            return Err(format!("worker exited with {}: {excerpt}", output.status).into());
        }
        match fed {
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                return Err(format!("failed to send the request to the worker: {e}").into());
            }
            _ => {}
        }

        let assignment: ChunkAssignment = serde_json::from_slice(&output.stdout)
            .map_err(|e| format!("worker wrote an invalid result: {e}"))?;
        Ok(assignment)
    }
}
