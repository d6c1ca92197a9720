//! Retention policy for queued notifications.
//!
//! Records are kept indefinitely by default. When a delete policy is
//! configured, the sweeper removes records older than the retention
//! period in bounded batches, whatever state they are in.

use crate::error::NotificationResult;
use crate::store::{RecordFilter, RecordStore};
use chrono::{DateTime, Duration, Utc};
use core_config::{ConfigError, env_parsed};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Whether processed notifications are ever deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep records forever. The sweeper is a no-op.
    Keep,
    /// Delete terminal records older than the retention period.
    Delete,
}

/// Unit for the retention period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RetentionUnit {
    Days,
    Weeks,
    Months,
}

/// How long terminal records are retained before deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub policy: RetentionPolicy,
    pub period: u32,
    pub unit: RetentionUnit,
    /// Maximum deletions per sweep pass.
    pub batch_size: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            policy: RetentionPolicy::Keep,
            period: 30,
            unit: RetentionUnit::Days,
            batch_size: 100,
        }
    }
}

impl RetentionConfig {
    /// Load from `NOTIFY_RETENTION_*` environment variables, falling back
    /// to the keep-forever defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            policy: env_parsed("NOTIFY_RETENTION_POLICY", defaults.policy)?,
            period: env_parsed("NOTIFY_RETENTION_PERIOD", defaults.period)?,
            unit: env_parsed("NOTIFY_RETENTION_UNIT", defaults.unit)?,
            batch_size: env_parsed("NOTIFY_RETENTION_BATCH_SIZE", defaults.batch_size)?,
        })
    }

    /// Sweeps run only under the delete policy with a non-zero period.
    pub fn is_active(&self) -> bool {
        self.policy == RetentionPolicy::Delete && self.period > 0
    }

    /// The retention period as a concrete duration. Months are calendar
    /// approximations at 30 days.
    pub fn retention_duration(&self) -> Duration {
        let days = match self.unit {
            RetentionUnit::Days => i64::from(self.period),
            RetentionUnit::Weeks => i64::from(self.period) * 7,
            RetentionUnit::Months => i64::from(self.period) * 30,
        };
        Duration::days(days)
    }

    /// Records created strictly before this instant are eligible for
    /// deletion.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.retention_duration()
    }
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Records deleted in this pass.
    pub deleted: usize,
    /// True when the batch filled up, so more eligible records remain.
    pub backlog: bool,
}

/// Deletes expired terminal records in bounded batches.
///
/// Holds a pass lease: overlapping runs are skipped rather than queued,
/// so a slow sweep never stacks up behind a scheduler trigger.
pub struct RetentionSweeper {
    store: Arc<dyn RecordStore>,
    config: RetentionConfig,
    pass_lock: Mutex<()>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn RecordStore>, config: RetentionConfig) -> Self {
        Self {
            store,
            config,
            pass_lock: Mutex::new(()),
        }
    }

    /// Run one sweep pass.
    ///
    /// No-op under the keep policy or when another pass holds the lease.
    /// Eligibility is by creation time alone: any record past the cutoff
    /// is deleted regardless of state.
    #[instrument(skip(self))]
    pub async fn run(&self) -> NotificationResult<SweepOutcome> {
        if !self.config.is_active() {
            return Ok(SweepOutcome::default());
        }

        let Ok(_lease) = self.pass_lock.try_lock() else {
            info!("sweep pass already running, skipping");
            return Ok(SweepOutcome::default());
        };

        let cutoff = self.config.cutoff(Utc::now());
        let filter = RecordFilter::older_than(cutoff, self.config.batch_size);

        let expired = self.store.query(filter).await?;
        let batch_full = expired.len() >= self.config.batch_size;

        let mut deleted = 0;
        for record in &expired {
            let Some(id) = record.id else { continue };
            match self.store.delete(id).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => warn!(%id, error = %e, "failed to delete expired notification"),
            }
        }

        info!(deleted, backlog = batch_full, "sweep pass finished");
        Ok(SweepOutcome {
            deleted,
            backlog: batch_full,
        })
    }
}
