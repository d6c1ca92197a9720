//! In-process delivery adapter with scripted outcomes.
//!
//! Performs no I/O. Used by tests and by local development to exercise the
//! full queue lifecycle without provider credentials.

use super::{AdapterFactory, DeliveryAdapter, apply_lifecycle_defaults};
use crate::config::NotificationConfig;
use crate::models::{NotificationRecord, NotificationState};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;

/// What a stub delivery attempt should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubOutcome {
    /// Report success with a canned provider response.
    Succeed,
    /// Report a delivery failure with the given message.
    RejectDelivery(String),
}

/// Factory for [`StubAdapter`], registered under the name `stub` by default.
#[derive(Debug, Clone)]
pub struct StubFactory {
    name: &'static str,
    outcome: StubOutcome,
    delay: Option<Duration>,
    auth_failure: bool,
}

impl StubFactory {
    /// Adapters that deliver successfully.
    pub fn succeeding() -> Self {
        Self {
            name: "stub",
            outcome: StubOutcome::Succeed,
            delay: None,
            auth_failure: false,
        }
    }

    /// Adapters whose delivery attempts fail with `message`.
    pub fn rejecting(message: impl Into<String>) -> Self {
        Self {
            outcome: StubOutcome::RejectDelivery(message.into()),
            ..Self::succeeding()
        }
    }

    /// Adapters that refuse credentials at construction time.
    pub fn with_auth_failure() -> Self {
        Self {
            auth_failure: true,
            ..Self::succeeding()
        }
    }

    /// Register under a different name, so several stubs can coexist.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Sleep for `delay` before resolving each attempt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl AdapterFactory for StubFactory {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_configured(&self, _config: &NotificationConfig) -> bool {
        true
    }

    async fn create(&self, config: &NotificationConfig) -> Box<dyn DeliveryAdapter> {
        let error_message = self
            .auth_failure
            .then(|| "stub: credentials rejected".to_string());

        Box::new(StubAdapter {
            name: self.name,
            outcome: self.outcome.clone(),
            delay: self.delay,
            config: config.clone(),
            error_message,
            auth_failed: self.auth_failure,
        })
    }
}

pub struct StubAdapter {
    name: &'static str,
    outcome: StubOutcome,
    delay: Option<Duration>,
    config: NotificationConfig,
    error_message: Option<String>,
    auth_failed: bool,
}

#[async_trait]
impl DeliveryAdapter for StubAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(&mut self, record: &mut NotificationRecord) -> bool {
        if self.auth_failed {
            record.state = Some(NotificationState::Error);
            record.error_message = self.error_message.clone();
            return false;
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.outcome {
            StubOutcome::Succeed => {
                record.state = Some(NotificationState::Complete);
                record.error_message = None;
                record.provider_response = Some(json!({
                    "adapter": "stub",
                    "status": "sent",
                    "sent_at": Utc::now().to_rfc3339(),
                }));
                true
            }
            StubOutcome::RejectDelivery(message) => {
                self.error_message = Some(message.clone());
                record.state = Some(NotificationState::Error);
                record.error_message = Some(message.clone());
                false
            }
        }
    }

    fn set_defaults(&self, record: &mut NotificationRecord) {
        apply_lifecycle_defaults(record, &self.config);
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}
