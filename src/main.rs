//! remindir: a daemon that watches directories of .ics files (as kept by
//! vdir-style sync tools) and raises desktop reminders for upcoming events.

mod config;
mod notifier;
mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{info, LevelFilter};
use remindir_core::{AckStore, Dispatcher, Scheduler, StoreHandle};
use tokio::sync::watch as tokio_watch;

use notifier::DesktopSink;

#[derive(Parser)]
#[command(name = "remindir")]
#[command(about = "Desktop reminders for calendar events kept in watched .ics directories")]
struct Cli {
    /// Config file (default: ~/.config/remindir/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Acknowledgment file recording already-delivered notifications
    /// (default: ~/.local/share/remindir/acks.jsonl)
    #[arg(long)]
    ack_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    let settings = config::load(&config_path)?;

    let ack_path = match cli.ack_file {
        Some(path) => path,
        None => config::default_ack_path()?,
    };
    let acks = AckStore::open(ack_path.clone())
        .with_context(|| format!("Failed to open ack file at {}", ack_path.display()))?;

    let dispatcher = Arc::new(Dispatcher::new(acks, Box::new(DesktopSink)));
    if let Some(retention) = settings.ack_retention {
        let dropped = dispatcher
            .prune_acks(Utc::now() - retention)
            .context("Failed to prune ack file")?;
        if dropped > 0 {
            info!("Pruned {} old ack record(s)", dropped);
        }
    }

    let store = StoreHandle::new();
    watch::initial_scan(&settings.directories, &store)?;
    info!("Indexed {} event(s) at startup", store.read().len());

    let (shutdown_tx, shutdown_rx) = tokio_watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    let scheduler = Scheduler::new(store.clone(), dispatcher, settings.options);
    let (_, watch_result) = tokio::join!(
        scheduler.run(shutdown_rx.clone()),
        watch::run(settings.directories, store, shutdown_rx),
    );
    watch_result?;

    Ok(())
}
