//! pushbridge - pull queue to HTTP push worker

mod cli;
mod config;
mod duration;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pushbridge_core::app::Poller;
use pushbridge_core::impls::InMemoryQueueService;
use pushbridge_core::observability;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cli::{Cli, Command, RunArgs};
use crate::config::{FileConfig, load_tasks, resolve};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    observability::init(args.log_format);

    let file = match &args.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    let config = resolve(&args, file)?;

    // local mode: the in-memory queue is the only QueueService shipped
    let queue = InMemoryQueueService::new(config.queue_id());
    match &args.tasks {
        Some(path) => {
            let seeded = seed(&queue, path).await?;
            info!(tasks = seeded, file = %path.display(), "seeded in-memory queue");
        }
        None => warn!("no --tasks file given, the in-memory queue starts empty"),
    }

    let poller = Poller::with_http(config, Arc::new(queue)).context("building poller")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    let stats = poller.run(shutdown_rx).await?;
    info!(
        leased = stats.leased,
        completed = stats.completed(),
        acknowledged = stats.acknowledged,
        renewed = stats.renewed,
        "worker exited"
    );
    Ok(())
}

async fn seed(queue: &InMemoryQueueService, path: &Path) -> Result<usize> {
    let tasks = load_tasks(path)?;
    for task in &tasks {
        queue.push(task.encode()).await;
    }
    Ok(tasks.len())
}

async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(e) = signal::ctrl_c().await {
        // keep the sender alive: dropping it would stop the poller
        error!("failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("received Ctrl+C, shutting down");
    let _ = shutdown_tx.send(true);
}
