use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use docspace::api::{self, AppState};
use docspace::config::{load_config, Config};
use docspace::content::NullContentStore;
use docspace::snapshot::{persist_blocking, snapshot_task};
use docspace_core::snapshot::SnapshotManager;
use docspace_core::Workspace;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docspace")]
#[command(about = "Folder and file hierarchy service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Listen address, overriding DOCSPACE_ADDR
        #[arg(short, long)]
        addr: Option<String>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Check the latest snapshot against the tree invariants
    Verify,

    /// Manage snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// List snapshots, newest first
    List,

    /// Delete all but the newest snapshots
    Prune {
        #[arg(short, long)]
        keep: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = load_config()?;

    match cli.command {
        Commands::Serve { addr } => {
            if let Some(addr) = addr {
                config.addr = addr.parse()?;
            }
            serve(config).await?;
        }
        Commands::Config { action: ConfigAction::Show } => {
            for line in config.describe() {
                println!("{}", line);
            }
        }
        Commands::Verify => verify(&config)?,
        Commands::Snapshot { action } => {
            let manager = SnapshotManager::new(&config.snapshot_dir)?;
            match action {
                SnapshotAction::List => {
                    for snap in manager.list()? {
                        println!(
                            "{}\t{}\t{} entries",
                            snap.name,
                            snap.taken_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                            snap.entries
                        );
                    }
                }
                SnapshotAction::Prune { keep } => {
                    if keep == 0 {
                        bail!("refusing to delete every snapshot");
                    }
                    let removed = manager.prune(keep)?;
                    println!("removed {} snapshot(s)", removed);
                }
            }
        }
    }

    Ok(())
}

fn verify(config: &Config) -> Result<()> {
    let manager = SnapshotManager::new(&config.snapshot_dir)?;
    match manager.restore_latest()? {
        Some((info, store)) => {
            let workspace = Workspace::from_store(store);
            let stats = workspace.stats();
            println!(
                "{}: ok, {} folders, {} files, {} bytes",
                info.name, stats.folders, stats.files, stats.total_bytes
            );
        }
        None => println!("no snapshots in {}", config.snapshot_dir.display()),
    }
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let snapshots = Arc::new(SnapshotManager::new(&config.snapshot_dir)?);
    let workspace = match snapshots.restore_latest()? {
        Some((info, store)) => {
            info!(snapshot = %info.name, entries = store.len(), "restored workspace");
            Arc::new(Workspace::from_store(store))
        }
        None => {
            info!("starting with an empty workspace");
            Arc::new(Workspace::new())
        }
    };

    let ticker = tokio::spawn(snapshot_task(
        workspace.clone(),
        snapshots.clone(),
        config.snapshot_retention,
        config.snapshot_interval,
    ));

    let config = Arc::new(config);
    let state = AppState {
        workspace: workspace.clone(),
        content: Arc::new(NullContentStore),
        snapshots: snapshots.clone(),
        config: config.clone(),
    };
    let app = api::router(state);

    let listener = TcpListener::bind(config.addr).await?;
    info!("Listening on {}", config.addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ticker.abort();
    match persist_blocking(workspace, snapshots, config.snapshot_retention, false).await {
        Ok(Some(info)) => info!(snapshot = %info.name, "final snapshot written"),
        Ok(None) => {}
        Err(err) => warn!(error = %err, "final snapshot failed"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
