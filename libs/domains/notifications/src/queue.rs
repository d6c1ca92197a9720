//! The notification queue service.
//!
//! Owns the record lifecycle: validated saves, single-record processing and
//! the scheduled queue pass. Constructed with its store, adapter registry
//! and configuration injected; holds no global state.

use crate::adapters::{AdapterRegistry, DeliveryAdapter};
use crate::config::NotificationConfig;
use crate::error::{NotificationError, NotificationResult};
use crate::models::{NotificationRecord, NotificationState};
use crate::store::{RecordFilter, RecordStore};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Counters from one queue pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueuePassSummary {
    /// Due records attempted in this pass.
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// True when the pass was skipped because another pass held the lease.
    pub skipped: bool,
}

pub struct NotificationQueue {
    store: Arc<dyn RecordStore>,
    registry: Arc<AdapterRegistry>,
    config: NotificationConfig,
    /// Pass lease: overlapping scheduler triggers skip instead of stacking.
    pass_lock: Mutex<()>,
}

impl NotificationQueue {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<AdapterRegistry>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            pass_lock: Mutex::new(()),
        }
    }

    /// Instantiate the adapter bound to `record`.
    async fn adapter_for(
        &self,
        record: &NotificationRecord,
    ) -> NotificationResult<Box<dyn DeliveryAdapter>> {
        let name = record.adapter_name.as_deref().ok_or_else(|| {
            NotificationError::Validation("no delivery adapter bound".to_string())
        })?;

        self.registry.create(name, &self.config).await
    }

    /// Validate and persist a notification.
    ///
    /// A record without subject, body and at least one recipient is
    /// rejected before any mutation, leaving both the record and the store
    /// untouched. Valid records get their lifecycle defaults filled (state
    /// NEW, schedule "now", configured sender) and are persisted: the
    /// first save assigns the id, later saves update in place.
    #[instrument(skip_all, fields(adapter = record.adapter_name.as_deref()))]
    pub async fn save(&self, record: &mut NotificationRecord) -> NotificationResult<Uuid> {
        let adapter = self.adapter_for(record).await?;

        if !adapter.check_data(record) {
            return Err(NotificationError::Validation(
                "subject, body and at least one recipient are required".to_string(),
            ));
        }
        adapter.set_defaults(record);

        match record.id {
            Some(id) => {
                self.store.update(id, record).await?;
                Ok(id)
            }
            None => {
                let id = self.store.create(record).await?;
                record.id = Some(id);
                info!(%id, "notification queued");
                Ok(id)
            }
        }
    }

    /// Attempt delivery of one notification.
    ///
    /// Unsaved records are saved first. Records in any state other than
    /// NEW are left untouched and report `false`; processing never retries
    /// a terminal record on its own. The outcome (state, error message,
    /// provider response, execution time) is persisted before returning.
    #[instrument(skip_all, fields(id = ?record.id, adapter = record.adapter_name.as_deref()))]
    pub async fn process(&self, record: &mut NotificationRecord) -> NotificationResult<bool> {
        if record.id.is_none() {
            self.save(record).await?;
        }

        if record.state != Some(NotificationState::New) {
            return Ok(false);
        }

        let mut adapter = self.adapter_for(record).await?;
        let delivered = self.attempt(adapter.as_mut(), record).await;

        if let Some(id) = record.id {
            self.store.update(id, record).await?;
        }

        if delivered {
            info!("notification delivered");
        } else {
            warn!(error = record.error_message.as_deref(), "delivery failed");
        }

        Ok(delivered)
    }

    /// One delivery attempt, bounded by the configured send timeout.
    async fn attempt(
        &self,
        adapter: &mut dyn DeliveryAdapter,
        record: &mut NotificationRecord,
    ) -> bool {
        record.last_execution_time = Some(Utc::now());

        let limit = self.config.send_timeout();
        match timeout(limit, adapter.execute(record)).await {
            Ok(delivered) => delivered,
            Err(_) => {
                record.state = Some(NotificationState::Error);
                record.error_message =
                    Some(format!("Send timed out after {}s", limit.as_secs()));
                false
            }
        }
    }

    /// Run one queue pass over all due notifications.
    ///
    /// Each due record is attempted exactly once; a failure in one record
    /// never aborts the pass. When another pass already holds the lease
    /// this one is skipped rather than queued behind it.
    #[instrument(skip(self))]
    pub async fn process_queue(&self) -> NotificationResult<QueuePassSummary> {
        let Ok(_lease) = self.pass_lock.try_lock() else {
            info!("queue pass already running, skipping");
            return Ok(QueuePassSummary {
                skipped: true,
                ..Default::default()
            });
        };

        let due = self.store.query(RecordFilter::due(Utc::now())).await?;
        let mut summary = QueuePassSummary::default();

        for mut record in due {
            summary.processed += 1;
            match self.process(&mut record).await {
                Ok(true) => summary.succeeded += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    warn!(id = ?record.id, error = %e, "queue pass record failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "queue pass finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::stub::StubFactory;
    use crate::store::{MemoryRecordStore, MockRecordStore};
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn stub_registry() -> Arc<AdapterRegistry> {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(StubFactory::succeeding()));
        Arc::new(registry)
    }

    fn queue_with(
        store: Arc<dyn RecordStore>,
        registry: Arc<AdapterRegistry>,
    ) -> NotificationQueue {
        let config = NotificationConfig {
            sender_email: "noreply@example.com".to_string(),
            sender_name: "Example".to_string(),
            ..Default::default()
        };
        NotificationQueue::new(store, registry, config)
    }

    fn draft(registry: &AdapterRegistry) -> NotificationRecord {
        draft_for(registry, "stub")
    }

    fn draft_for(registry: &AdapterRegistry, adapter: &str) -> NotificationRecord {
        let mut record = NotificationRecord::new();
        record
            .set_adapter(adapter, registry)
            .unwrap()
            .set_subject("Hi")
            .set_body("Test")
            .add_recipient("a@example.com", None);
        record
    }

    #[tokio::test]
    async fn test_save_fills_defaults_and_assigns_id() {
        let registry = stub_registry();
        let store = Arc::new(MemoryRecordStore::new());
        let queue = queue_with(store.clone(), registry.clone());

        let mut record = draft(&registry);
        let id = queue.save(&mut record).await.unwrap();

        assert_eq!(record.id, Some(id));
        assert_eq!(record.state, Some(NotificationState::New));
        assert!(record.scheduled_at.is_some());
        assert_eq!(record.sender_email.as_deref(), Some("noreply@example.com"));

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.subject, "Hi");
    }

    #[tokio::test]
    async fn test_save_invalid_record_leaves_store_untouched() {
        let registry = stub_registry();
        let mut mock = MockRecordStore::new();
        mock.expect_create().times(0);
        mock.expect_update().times(0);
        let queue = queue_with(Arc::new(mock), registry.clone());

        let mut record = draft(&registry);
        record.recipients.clear();

        let err = queue.save(&mut record).await.unwrap_err();
        assert!(matches!(err, NotificationError::Validation(_)));

        // A rejected save mutates nothing: no id, no lifecycle defaults.
        assert_eq!(record.id, None);
        assert_eq!(record.state, None);
        assert_eq!(record.scheduled_at, None);
        assert_eq!(record.sender_email, None);
    }

    #[tokio::test]
    async fn test_save_twice_updates_in_place() {
        let registry = stub_registry();
        let store = Arc::new(MemoryRecordStore::new());
        let queue = queue_with(store.clone(), registry.clone());

        let mut record = draft(&registry);
        let id = queue.save(&mut record).await.unwrap();

        record.set_subject("Updated");
        let second_id = queue.save(&mut record).await.unwrap();

        assert_eq!(id, second_id);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(id).await.unwrap().unwrap().subject, "Updated");
    }

    #[tokio::test]
    async fn test_save_without_adapter_fails() {
        let registry = stub_registry();
        let queue = queue_with(Arc::new(MemoryRecordStore::new()), registry);

        let mut record = NotificationRecord::new();
        record
            .set_subject("Hi")
            .set_body("Test")
            .add_recipient("a@example.com", None);

        let err = queue.save(&mut record).await.unwrap_err();
        assert!(matches!(err, NotificationError::Validation(_)));
    }

    #[tokio::test]
    async fn test_process_success_completes_and_persists() {
        let registry = stub_registry();
        let store = Arc::new(MemoryRecordStore::new());
        let queue = queue_with(store.clone(), registry.clone());

        let mut record = draft(&registry);
        let delivered = queue.process(&mut record).await.unwrap();
        assert!(delivered);

        let stored = store.get(record.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.state, Some(NotificationState::Complete));
        assert_eq!(stored.error_message, None);
        assert!(stored.provider_response.is_some());
        assert!(stored.last_execution_time.is_some());
    }

    #[tokio::test]
    async fn test_process_failure_records_error() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(StubFactory::rejecting("mailbox full")));
        let registry = Arc::new(registry);
        let store = Arc::new(MemoryRecordStore::new());
        let queue = queue_with(store.clone(), registry.clone());

        let mut record = draft(&registry);
        let delivered = queue.process(&mut record).await.unwrap();
        assert!(!delivered);

        // Failure details survive a reload.
        let stored = store.get(record.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.state, Some(NotificationState::Error));
        assert_eq!(stored.error_message.as_deref(), Some("mailbox full"));
    }

    #[tokio::test]
    async fn test_process_is_noop_unless_new() {
        let registry = stub_registry();
        let store = Arc::new(MemoryRecordStore::new());
        let queue = queue_with(store.clone(), registry.clone());

        let mut record = draft(&registry);
        queue.save(&mut record).await.unwrap();
        record.state = Some(NotificationState::Complete);
        queue.save(&mut record).await.unwrap();

        let before = store.get(record.id.unwrap()).await.unwrap().unwrap();
        assert!(!queue.process(&mut record).await.unwrap());
        let after = store.get(record.id.unwrap()).await.unwrap().unwrap();

        assert_eq!(after.state, before.state);
        assert_eq!(after.last_execution_time, before.last_execution_time);
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_times_out() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(
            StubFactory::succeeding().with_delay(StdDuration::from_secs(3600)),
        ));
        let registry = Arc::new(registry);
        let store = Arc::new(MemoryRecordStore::new());
        let queue = queue_with(store.clone(), registry.clone());

        let mut record = draft(&registry);
        let delivered = queue.process(&mut record).await.unwrap();
        assert!(!delivered);

        let stored = store.get(record.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.state, Some(NotificationState::Error));
        assert!(
            stored
                .error_message
                .as_deref()
                .is_some_and(|m| m.contains("timed out"))
        );
    }

    #[tokio::test]
    async fn test_process_queue_attempts_each_due_record_once() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(StubFactory::succeeding()));
        registry.register(Arc::new(
            StubFactory::rejecting("rejected").with_name("broken"),
        ));
        let registry = Arc::new(registry);
        let store = Arc::new(MemoryRecordStore::new());
        let queue = queue_with(store.clone(), registry.clone());

        let mut ok_record = draft(&registry);
        queue.save(&mut ok_record).await.unwrap();

        // One failing record does not abort the pass.
        let mut failing = draft_for(&registry, "broken");
        queue.save(&mut failing).await.unwrap();

        let mut future = draft(&registry);
        future.set_schedule(Utc::now() + Duration::hours(1));
        queue.save(&mut future).await.unwrap();

        let summary = queue.process_queue().await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.skipped);

        let ok_stored = store.get(ok_record.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(ok_stored.state, Some(NotificationState::Complete));
        let failing_stored = store.get(failing.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(failing_stored.state, Some(NotificationState::Error));
        let future_stored = store.get(future.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(future_stored.state, Some(NotificationState::New));

        // A second pass finds nothing left to do: terminal records are not
        // retried and the future record is still not due.
        let summary = queue.process_queue().await.unwrap();
        assert_eq!(summary.processed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_queue_skips_when_pass_in_flight() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(
            StubFactory::succeeding().with_delay(StdDuration::from_secs(60)),
        ));
        let registry = Arc::new(registry);
        let store = Arc::new(MemoryRecordStore::new());
        let queue = Arc::new(queue_with(store, registry.clone()));

        let mut record = draft(&registry);
        queue.save(&mut record).await.unwrap();

        let first = tokio::spawn({
            let queue = queue.clone();
            async move { queue.process_queue().await }
        });

        // Let the first pass take the lease and park on the slow send.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let overlapping = queue.process_queue().await.unwrap();
        assert!(overlapping.skipped);
        assert_eq!(overlapping.processed, 0);

        let first = first.await.unwrap().unwrap();
        assert!(!first.skipped);
        assert_eq!(first.processed, 1);
    }
}
