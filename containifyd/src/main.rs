//! ContainifyCI Daemon
//!
//! Drives containerized build pipelines:
//! - Sources build groups from the user's configuration plugin
//! - Runs the step pipeline per job on docker or podman
//! - Hosts the key-value sidecar build containers talk to

mod cli;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use containify_core::cri::{self, ContainerRuntime, RecordingRuntime};
use containify_core::steps::container::default_steps;
use containify_core::{Engine, RuntimeOptions};

#[derive(Parser, Debug)]
#[command(name = "containifyd")]
#[command(about = "ContainifyCI - containerized build pipelines")]
#[command(version)]
struct Args {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the pipeline (default)
    Run {
        /// Step target to run ("all" runs the full plan)
        #[arg(default_value = "all")]
        target: String,

        /// Record runtime calls instead of executing them
        #[arg(long)]
        dry_run: bool,
    },
    /// List callable step targets
    List,
    /// Pre-pull every image the registered steps may use
    Cache,
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("containify={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match args.command {
        Some(Command::Version) => {
            println!("containifyd {}", containify_core::VERSION);
            Ok(())
        }
        Some(Command::List) => {
            let engine = build_engine(RuntimeOptions::default(), false).await?;
            cli::list_targets(&engine);
            Ok(())
        }
        Some(Command::Cache) => {
            let engine = build_engine(RuntimeOptions::default(), false).await?;
            cli::prewarm_images(&engine).await
        }
        Some(Command::Run { target, dry_run }) => {
            let options = RuntimeOptions {
                target,
                verbose: args.verbose,
                ..RuntimeOptions::default()
            }
            .with_env_overrides();
            run_pipeline(options, dry_run).await
        }
        None => {
            let options = RuntimeOptions {
                verbose: args.verbose,
                ..RuntimeOptions::default()
            }
            .with_env_overrides();
            run_pipeline(options, false).await
        }
    }
}

async fn build_engine(options: RuntimeOptions, dry_run: bool) -> Result<Engine> {
    let runtime: Arc<dyn ContainerRuntime> = if dry_run {
        tracing::info!("dry run: recording runtime calls without executing them");
        Arc::new(RecordingRuntime::default())
    } else {
        cri::detect().await?
    };
    let steps = default_steps(Arc::clone(&runtime), &options)?;
    Ok(Engine::new(runtime, steps, options))
}

async fn run_pipeline(options: RuntimeOptions, dry_run: bool) -> Result<()> {
    let engine = Arc::new(build_engine(options, dry_run).await?);

    // SIGINT/SIGTERM cancel in-flight steps; their containers are stopped.
    let signal_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_engine.shutdown();
    });

    engine.run().await?;
    tracing::info!("all build groups finished");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
