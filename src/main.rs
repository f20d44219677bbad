//! recplay CLI

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use recplay::config::Config;
use recplay::network::NetworkHandler;
use recplay::storage::scan;

#[derive(Parser)]
#[command(name = "recplay", version, about = "Record-replay proxy for HTTP and WebSocket-RPC")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve snapshots, recording unknown calls from the live upstream
    Serve {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Listen host
        #[arg(long)]
        host: Option<String>,
        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,
        /// Snapshot root directory
        #[arg(short, long)]
        snapshot_dir: Option<PathBuf>,
        /// Debug logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Summarize a snapshot directory
    Stats {
        /// Snapshot root directory
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        Command::Serve {
            config,
            host,
            port,
            snapshot_dir,
            verbose,
        } => {
            let mut config = match config {
                Some(path) => Config::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => Config::default(),
            };
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = snapshot_dir {
                config.snapshot_dir = dir;
            }
            config.verbose |= verbose;
            config.validate()?;

            init_tracing(config.verbose);

            let stats = NetworkHandler::new(config).run().await?;
            tracing::debug!("Final engine stats: {stats:?}");
        }
        Command::Stats { dir } => {
            init_tracing(false);
            show_stats(&dir)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn show_stats(dir: &std::path::Path) -> anyhow::Result<()> {
    if !dir.is_dir() {
        bail!("Directory not found: {}", dir.display());
    }

    let summary = scan(dir).with_context(|| format!("scanning {}", dir.display()))?;

    println!("Snapshot directory: {}", dir.display());
    println!("Snapshots:          {}", summary.snapshots);
    println!("Payload bytes:      {}", summary.payload_bytes);

    if !summary.per_host.is_empty() {
        println!();
        println!("Per host:");
        for (host, count) in &summary.per_host {
            println!("  {host:<40} {count}");
        }
    }

    if !summary.orphans.is_empty() {
        println!();
        println!("Orphaned artifacts:");
        for path in &summary.orphans {
            println!("  {}", path.display());
        }
    }

    Ok(())
}
