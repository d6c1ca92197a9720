//! Record store abstraction for notification persistence.
//!
//! The host application's storage engine is an external collaborator; it
//! plugs in by implementing [`RecordStore`]. [`MemoryRecordStore`] is the
//! in-process reference implementation used by tests and by the worker
//! binary when no host store is wired in.

use crate::error::{NotificationError, NotificationResult};
use crate::models::{NotificationRecord, NotificationState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Typed query filter for notification records.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Match records in any of these states. Empty = all states.
    pub states: Vec<NotificationState>,
    /// Match records scheduled at or before this instant.
    pub scheduled_before: Option<DateTime<Utc>>,
    /// Match records created strictly before this instant.
    pub created_before: Option<DateTime<Utc>>,
    /// Cap the number of returned records.
    pub limit: Option<usize>,
}

impl RecordFilter {
    /// Records eligible for a queue pass: state NEW, scheduled at or
    /// before `now`.
    pub fn due(now: DateTime<Utc>) -> Self {
        Self {
            states: vec![NotificationState::New],
            scheduled_before: Some(now),
            ..Default::default()
        }
    }

    /// Records eligible for a retention sweep: created before `cutoff`,
    /// any state, capped at `limit`.
    pub fn older_than(cutoff: DateTime<Utc>, limit: usize) -> Self {
        Self {
            created_before: Some(cutoff),
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// Whether `record` matches this filter.
    pub fn matches(&self, record: &NotificationRecord) -> bool {
        if !self.states.is_empty() {
            match record.state {
                Some(state) if self.states.contains(&state) => {}
                _ => return false,
            }
        }

        if let Some(before) = self.scheduled_before {
            match record.scheduled_at {
                Some(at) if at <= before => {}
                _ => return false,
            }
        }

        if let Some(before) = self.created_before {
            if record.created_at >= before {
                return false;
            }
        }

        true
    }
}

/// Persistence interface for notification records.
///
/// Implementations map to whatever the host application stores records in.
/// All deletes are hard deletes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new record and assign its immutable id.
    async fn create(&self, record: &NotificationRecord) -> NotificationResult<Uuid>;

    /// Persist all mutable fields of an existing record.
    async fn update(&self, id: Uuid, record: &NotificationRecord) -> NotificationResult<()>;

    /// Fetch a record by id.
    async fn get(&self, id: Uuid) -> NotificationResult<Option<NotificationRecord>>;

    /// Fetch records matching the filter, ordered by creation time.
    async fn query(&self, filter: RecordFilter) -> NotificationResult<Vec<NotificationRecord>>;

    /// Hard-delete a record. Returns false if the id was unknown.
    async fn delete(&self, id: Uuid) -> NotificationResult<bool>;
}

/// In-memory record store.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<Uuid, NotificationRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, record: &NotificationRecord) -> NotificationResult<Uuid> {
        let id = Uuid::new_v4();
        let mut stored = record.clone();
        stored.id = Some(id);
        self.records.write().await.insert(id, stored);
        Ok(id)
    }

    async fn update(&self, id: Uuid, record: &NotificationRecord) -> NotificationResult<()> {
        let mut records = self.records.write().await;
        if !records.contains_key(&id) {
            return Err(NotificationError::Persistence(format!(
                "No record with id {} to update",
                id
            )));
        }

        let mut stored = record.clone();
        stored.id = Some(id);
        records.insert(id, stored);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> NotificationResult<Option<NotificationRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn query(&self, filter: RecordFilter) -> NotificationResult<Vec<NotificationRecord>> {
        let records = self.records.read().await;

        let mut matched: Vec<NotificationRecord> = records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.created_at);

        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }

        Ok(matched)
    }

    async fn delete(&self, id: Uuid) -> NotificationResult<bool> {
        Ok(self.records.write().await.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(state: NotificationState, age_minutes: i64) -> NotificationRecord {
        let mut record = NotificationRecord::new();
        record.set_subject("Hi").set_body("Test");
        record.add_recipient("a@example.com", None);
        record.state = Some(state);
        record.scheduled_at = Some(Utc::now() - Duration::minutes(age_minutes));
        record.created_at = Utc::now() - Duration::minutes(age_minutes);
        record
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_get_roundtrips() {
        let store = MemoryRecordStore::new();
        let record = record(NotificationState::New, 1);

        let id = store.create(&record).await.unwrap();
        let loaded = store.get(id).await.unwrap().unwrap();

        assert_eq!(loaded.id, Some(id));
        assert_eq!(loaded.subject, "Hi");
    }

    #[tokio::test]
    async fn test_update_unknown_id_fails() {
        let store = MemoryRecordStore::new();
        let record = record(NotificationState::New, 1);

        let err = store.update(Uuid::new_v4(), &record).await.unwrap_err();
        assert!(matches!(err, NotificationError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_query_due_filters_state_and_schedule() {
        let store = MemoryRecordStore::new();

        store.create(&record(NotificationState::New, 5)).await.unwrap();
        store
            .create(&record(NotificationState::Complete, 5))
            .await
            .unwrap();

        let mut future = record(NotificationState::New, 0);
        future.scheduled_at = Some(Utc::now() + Duration::hours(1));
        store.create(&future).await.unwrap();

        let due = store.query(RecordFilter::due(Utc::now())).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].state, Some(NotificationState::New));
    }

    #[tokio::test]
    async fn test_query_older_than_respects_limit_and_order() {
        let store = MemoryRecordStore::new();
        for age in [30, 10, 20] {
            store
                .create(&record(NotificationState::Complete, age))
                .await
                .unwrap();
        }

        let cutoff = Utc::now() - Duration::minutes(5);
        let matched = store.query(RecordFilter::older_than(cutoff, 2)).await.unwrap();

        assert_eq!(matched.len(), 2);
        // Oldest first.
        assert!(matched[0].created_at < matched[1].created_at);
    }

    #[tokio::test]
    async fn test_delete_is_hard() {
        let store = MemoryRecordStore::new();
        let id = store.create(&record(NotificationState::Error, 1)).await.unwrap();

        assert!(store.delete(id).await.unwrap());
        assert!(store.get(id).await.unwrap().is_none());
        assert!(!store.delete(id).await.unwrap());
    }
}
