//! # CVFS Daemon
//!
//! Run with: `cargo run --bin cvfs-daemon -- --data-dir ./cvfs_data --sleep-interval 60`

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};

use cvfs_core::config::{LogFormat, LogLevel};
use cvfs_core::Config;
use cvfs_daemon::{shutdown_on, CvfsDaemon};

#[derive(Parser, Debug)]
#[command(name = "cvfs-daemon", version, about = "CVFS vector store daemon")]
struct Args {
    /// Data directory holding vectors.txt, index files and programs/
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seconds to sleep between cycles
    #[arg(long)]
    sleep_interval: Option<u64>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,
}

fn tracing_level(level: LogLevel) -> Level {
    match level {
        LogLevel::Trace => Level::TRACE,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = dir;
    }
    if let Some(secs) = args.sleep_interval {
        config.daemon.sleep_interval = Duration::from_secs(secs);
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.parse()?;
    }

    let subscriber = tracing_subscriber::fmt().with_max_level(tracing_level(config.logging.level));
    match config.logging.format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Compact => subscriber.compact().init(),
    }

    info!("Starting CVFS daemon");
    info!("Data directory: {:?}", config.storage.data_dir);

    let mut daemon = CvfsDaemon::open(config)?;
    let state = daemon
        .run(shutdown_on(tokio::signal::ctrl_c()))
        .await?;

    info!(
        "CVFS daemon stopped: {} queries processed, {} vectors",
        state.queries_processed, state.vectors_count
    );
    Ok(())
}
