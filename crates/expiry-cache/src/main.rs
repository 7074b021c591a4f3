//! Expiry Cache - Age and count based expiration for named response caches

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod maintenance;

use config::Config;
use maintenance::{Maintenance, spawn_maintenance_task};

/// Expiry Cache - Expiration maintenance for named response caches
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Timestamp index database path
    #[arg(long, env = "EXPIRY_CACHE_DB")]
    database: Option<String>,

    /// Cache storage directory
    #[arg(long, env = "EXPIRY_CACHE_DATA_DIR")]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one expiration sweep
    Sweep {
        /// Only sweep this cache
        #[arg(long)]
        cache: Option<String>,
    },
    /// Delete managed caches and their metadata
    Purge {
        /// Only purge caches that opted into quota-error purging
        #[arg(long)]
        quota_error: bool,
    },
    /// Show the stored timestamp of a URL
    Inspect { cache: String, url: String },
    /// List known caches with entry counts
    Status,
    /// Sweep periodically until interrupted
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)?;
    if let Some(database) = args.database {
        config.database.path = database;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.path = data_dir;
    }

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format);

    info!("Starting Expiry Cache v{}", env!("CARGO_PKG_VERSION"));

    let interval_secs = config.maintenance.interval_secs;
    let metrics = config.metrics.clone();
    let maintenance = Arc::new(Maintenance::open(config).await?);

    match args.command {
        Command::Sweep { cache } => {
            let swept = maintenance.sweep(cache.as_deref()).await?;
            info!("Swept {} caches", swept);
        }
        Command::Purge { quota_error } => {
            if quota_error {
                maintenance.handle_quota_error().await?;
            } else {
                maintenance.purge().await?;
            }
        }
        Command::Inspect { cache, url } => {
            let report = maintenance.inspect(&cache, &url).await?;
            match report.timestamp {
                Some(timestamp) => println!("{} {} timestamp={}", cache, url, timestamp),
                None => println!("{} {} timestamp=none", cache, url),
            }
            println!("expired={}", report.expired);
        }
        Command::Status => {
            println!("{:<32} {:>10} {:>10}", "CACHE", "INDEXED", "STORED");
            for (name, indexed, stored) in maintenance.status().await? {
                println!("{:<32} {:>10} {:>10}", name, indexed, stored);
            }
        }
        Command::Run => {
            if metrics.enabled {
                let addr: SocketAddr = metrics
                    .bind
                    .parse()
                    .with_context(|| format!("Invalid metrics bind address: {}", metrics.bind))?;
                PrometheusBuilder::new()
                    .with_http_listener(addr)
                    .install()
                    .context("Failed to install Prometheus exporter")?;
                info!("Metrics listening on {}", addr);
            }

            let task = spawn_maintenance_task(maintenance, interval_secs);
            shutdown_signal().await;
            task.abort();
            info!("Maintenance stopped");
        }
    }

    Ok(())
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
