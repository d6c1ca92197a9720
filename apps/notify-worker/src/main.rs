//! Notify Worker
//!
//! A service that drives the email notification queue. Can run a one-shot
//! queue pass or retention sweep, or stay up as a scheduled cron service.

use clap::{Parser, Subcommand};
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::{Environment, FromEnv};
use domain_notifications::{
    AdapterRegistry, MemoryRecordStore, NotificationConfig, NotificationQueue, RetentionSweeper,
};
use eyre::Result;
use std::sync::Arc;
use tracing::info;

mod scheduler;

#[derive(Parser)]
#[command(name = "notify-worker")]
#[command(about = "Process queued email notifications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one queue pass over all due notifications
    Process,

    /// Run a retention sweep
    Sweep {
        /// Keep sweeping until the backlog is drained
        #[arg(short, long)]
        drain: bool,
    },

    /// Run as a scheduled service
    Schedule {
        /// Cron expression for queue passes (default: every 5 minutes)
        #[arg(short, long, default_value = "0 */5 * * * *")]
        cron: String,

        /// Cron expression for retention sweeps (default: daily at 03:00)
        #[arg(short, long, default_value = "0 0 3 * * *")]
        retention_cron: String,
    },

    /// Show configured delivery adapters
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();

    let environment = Environment::from_env();
    init_tracing(&environment);

    let config = NotificationConfig::from_env()?;
    let cli = Cli::parse();

    let store = Arc::new(MemoryRecordStore::new());
    let registry = Arc::new(AdapterRegistry::with_builtin());
    let queue = Arc::new(NotificationQueue::new(
        store.clone(),
        registry.clone(),
        config.clone(),
    ));
    let sweeper = Arc::new(RetentionSweeper::new(store, config.retention.clone()));

    match cli.command {
        Commands::Process => {
            info!("Starting one-time queue pass");
            let summary = queue.process_queue().await?;
            info!(
                "Queue pass complete: {} processed, {} delivered, {} failed",
                summary.processed, summary.succeeded, summary.failed
            );
        }

        Commands::Sweep { drain } => {
            if drain {
                let deleted = scheduler::drain_sweep(&sweeper).await?;
                info!("Retention sweep drained: {} records deleted", deleted);
            } else {
                let outcome = sweeper.run().await?;
                info!(
                    "Retention sweep complete: {} deleted, backlog remaining: {}",
                    outcome.deleted, outcome.backlog
                );
            }
        }

        Commands::Schedule {
            cron,
            retention_cron,
        } => {
            info!("Starting scheduled worker with cron: {}", cron);
            scheduler::run(queue, sweeper, &config, &cron, &retention_cron).await?;
        }

        Commands::Status => {
            let status = serde_json::json!({
                "default_adapter": config.default_adapter,
                "configured_adapters": registry.configured_names(&config),
                "override_mail": config.override_mail,
                "use_queue": config.use_queue,
                "retention_active": config.retention.is_active(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
