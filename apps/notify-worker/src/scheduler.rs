//! Cron triggers for queue passes and retention sweeps.

use domain_notifications::{
    NotificationConfig, NotificationQueue, NotificationResult, RetentionSweeper,
};
use eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Pause between sweep batches while draining a backlog, so a large
/// cleanup never monopolizes the store.
const DRAIN_PAUSE: Duration = Duration::from_secs(10);

/// Run the worker as a long-lived scheduled service.
///
/// Queue passes fire on `queue_cron`. Retention sweeps fire on
/// `retention_cron`, but only when a delete policy is configured; under
/// the keep policy no sweep job is registered at all.
pub async fn run(
    queue: Arc<NotificationQueue>,
    sweeper: Arc<RetentionSweeper>,
    config: &NotificationConfig,
    queue_cron: &str,
    retention_cron: &str,
) -> Result<()> {
    let sched = JobScheduler::new().await?;

    let job_queue = queue.clone();
    let queue_job = Job::new_async(queue_cron, move |_uuid, _l| {
        let queue = job_queue.clone();

        Box::pin(async move {
            match queue.process_queue().await {
                Ok(summary) if summary.skipped => {
                    info!("Scheduled queue pass skipped, previous pass still running");
                }
                Ok(summary) => {
                    info!(
                        processed = summary.processed,
                        succeeded = summary.succeeded,
                        failed = summary.failed,
                        "Scheduled queue pass complete"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Scheduled queue pass failed");
                }
            }
        })
    })?;
    sched.add(queue_job).await?;

    if config.retention.is_active() {
        info!(cron = retention_cron, "Retention sweeps enabled");

        let job_sweeper = sweeper.clone();
        let sweep_job = Job::new_async(retention_cron, move |_uuid, _l| {
            let sweeper = job_sweeper.clone();

            Box::pin(async move {
                match drain_sweep(&sweeper).await {
                    Ok(deleted) => info!(deleted, "Scheduled retention sweep complete"),
                    Err(e) => error!(error = %e, "Scheduled retention sweep failed"),
                }
            })
        })?;
        sched.add(sweep_job).await?;
    } else {
        info!("Retention policy is keep, sweeps disabled");
    }

    sched.start().await?;

    // Keep running until interrupted
    info!("Scheduler started, waiting for jobs...");
    loop {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}

/// Sweep repeatedly, pausing between batches, until the backlog is gone.
pub async fn drain_sweep(sweeper: &RetentionSweeper) -> NotificationResult<usize> {
    let mut deleted = 0;

    loop {
        let outcome = sweeper.run().await?;
        deleted += outcome.deleted;

        if !outcome.backlog {
            return Ok(deleted);
        }
        tokio::time::sleep(DRAIN_PAUSE).await;
    }
}
