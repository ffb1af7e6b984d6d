//! Worker CLI: a deliberately narrow `clap`-derived
//! surface — this engine has no flow file to load or validate, no run
//! history to list, just a queue to drain.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::Config;
use crate::controller::Controller;
use crate::flow::scheduler::CancelSignal;
use crate::store::tasks::{HttpTaskStore, InMemoryTaskStore, TaskStore};

#[derive(Parser)]
#[command(name = "mediaflow-worker", version, about = "Media-task orchestration worker")]
pub struct Cli {
    /// Path to a .env file to load (default: auto-detect .env in cwd)
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// Path to mediaflow.yaml (default: auto-detect in cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the poll loop and run until interrupted (Ctrl-C)
    Run,

    /// Drain a single bounded batch of queued tasks and exit
    Once,
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    load_dotenv(cli.dotenv.as_deref());

    let config = Config::load(cli.config.as_deref()).with_context(|| "failed to load configuration")?;
    let tasks = task_store(&config)?;
    let deps = crate::deps::from_config(config.clone()).await.with_context(|| "failed to wire up dependencies")?;
    let controller = Controller::new(config, tasks, deps);

    match cli.command {
        Commands::Run => cmd_run(controller).await,
        Commands::Once => cmd_once(controller).await,
    }
}

/// A `metadata_store_url`-backed task queue in production, or an
/// unseeded in-memory queue when none is configured — the latter makes
/// `once` a harmless no-op rather than a startup failure, useful for
/// smoke-testing the rest of the wiring with no backing services at all.
fn task_store(config: &Config) -> Result<Arc<dyn TaskStore>> {
    match &config.metadata_store_url {
        Some(url) => Ok(Arc::new(HttpTaskStore::new(url.clone())?)),
        None => Ok(Arc::new(InMemoryTaskStore::new())),
    }
}

async fn cmd_run(controller: Controller) -> Result<()> {
    let cancel = CancelSignal::new();
    let shutdown_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, shutting down");
            shutdown_signal.cancel();
        }
    });

    controller.run(cancel).await;
    Ok(())
}

async fn cmd_once(controller: Controller) -> Result<()> {
    let processed = controller.run_once(&CancelSignal::new()).await;
    println!("processed {processed} task(s)");
    Ok(())
}

/// Load environment variables from a .env file.
/// If an explicit path is given, load from that path (error if missing).
/// Otherwise, auto-detect .env in the current working directory (silently skip if absent).
fn load_dotenv(explicit_path: Option<&std::path::Path>) {
    match explicit_path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => info!("loaded env from {}", path.display()),
            Err(e) => eprintln!("warning: failed to load dotenv file '{}': {e}", path.display()),
        },
        None => match dotenvy::dotenv() {
            Ok(path) => info!("loaded env from {}", path.display()),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => eprintln!("warning: failed to parse .env file: {e}"),
        },
    }
}
