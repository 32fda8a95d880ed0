//! Tether CLI - operational commands for the offline-sync core.
//!
//! This tool inspects and drives a local Tether database against a
//! configured backend: queue status, manual drains, incremental pulls,
//! and device registration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use tether_common::EntityType;
use tether_remote::RestRemote;
use tether_store::SqliteStore;
use tether_sync::{SyncConfig, SyncEngine};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Tether - offline-sync engine operations")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the local database (defaults to the platform data dir).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Backend base URL.
    #[arg(long, env = "TETHER_BASE_URL")]
    base_url: String,

    /// Backend API key.
    #[arg(long, env = "TETHER_API_KEY", hide_env_values = true)]
    api_key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pending count, last sync time and connectivity.
    Status,

    /// Drain the pending mutation queue against the backend.
    Drain,

    /// Pull backend changes since the local checkpoint.
    Pull {
        /// Entity type (messages, tasks, files, approvals); all if omitted.
        #[arg(short, long)]
        entity: Option<String>,
    },

    /// List queued mutations in FIFO order.
    Queue,

    /// Register this device with the backend.
    Register {
        /// Device display name.
        #[arg(short, long, default_value = "tether-cli")]
        name: String,
    },
}

fn default_db_path() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .context("No platform data directory available")?
        .join("tether");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir.join("tether.db"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let db_path = match cli.db {
        Some(path) => path,
        None => default_db_path()?,
    };

    let store = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open local store at {}", db_path.display()))?,
    );
    let remote = Arc::new(RestRemote::new(&cli.base_url, cli.api_key)?);

    let device_name = match &cli.command {
        Commands::Register { name } => name.clone(),
        _ => "tether-cli".to_string(),
    };
    let config = SyncConfig {
        device_name,
        platform: std::env::consts::OS.to_string(),
        assume_online: true,
    };

    let engine = SyncEngine::new(store, remote, config).await?;

    match cli.command {
        Commands::Status => {
            let status = engine.sync_status();
            println!("Pending operations: {}", status.pending);
            match status.last_sync {
                Some(at) => println!("Last sync:          {}", at.to_rfc3339()),
                None => println!("Last sync:          never"),
            }
            println!("Online:             {}", status.is_online);
        }

        Commands::Drain => {
            let report = engine.process_sync_queue().await;
            println!(
                "Drained {} operations: {} acknowledged, {} failed",
                report.attempted, report.acked, report.failed
            );
            if report.failed > 0 {
                println!("Failed items remain queued; re-run to retry.");
            }
        }

        Commands::Pull { entity } => {
            let targets: Vec<EntityType> = match entity {
                Some(name) => vec![name.parse()?],
                None => EntityType::ALL.to_vec(),
            };
            for entity_type in targets {
                let report = engine.sync_from_server(entity_type).await;
                println!(
                    "{}: {} fetched, {} invalid rows skipped",
                    entity_type, report.fetched, report.invalid
                );
            }
        }

        Commands::Queue => {
            let items = engine.pending_operations();
            if items.is_empty() {
                println!("Queue is empty.");
            }
            for item in items {
                println!(
                    "{}  {:<6} {:<10} retries={} enqueued={}",
                    item.id,
                    item.operation,
                    item.entity_type,
                    item.retry_count,
                    item.enqueued_at.to_rfc3339()
                );
                if let Some(error) = item.last_error {
                    println!("    last error: {}", error);
                }
            }
        }

        Commands::Register { .. } => {
            engine.register_device().await;
            println!("Device id: {}", engine.device_id().await);
        }
    }

    Ok(())
}
