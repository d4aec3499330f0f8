#![doc = include_str!("../README.md")]

mod cli;

use clap::Parser;
use cli::config::{CliArgs, Command, PartitionConfig, RunConfig};
use cli::handler;
use cli::telemetry::init_telemetry;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    let providers = init_telemetry()?;
    // Returned errors are printed by `main` itself; do not log them here.
    let result = execute(args.command).await;
    providers.shutdown();
    result
}

async fn execute(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Plan(args) => {
            let config = PartitionConfig::try_from(args)?;
            handler::plan(&config, std::io::stdout().lock())?;
        }
        Command::Status(args) => {
            handler::status(&args.output_dir, std::io::stdout().lock())?;
        }
        Command::Run(args) => {
            let config = RunConfig::try_from(args)?;
            let cancel = CancellationToken::new();
            let watcher = tokio::spawn(cancel_on_signal(cancel.clone()));

            let outcome = handler::run(config, cancel).await;
            watcher.abort();

            let summary = outcome?;
            handler::ensure_complete(&summary)?;
            tracing::info!("All done, exiting.");
        }
    }
    Ok(())
}

/// Cancels `token` on Ctrl+C or SIGTERM. The scheduler then closes the store
/// after the current completion, so the run can be resumed.
async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, stopping after the current completion...");
    token.cancel();
}
