//! Delivery adapter implementations.
//!
//! Each transactional email provider plugs in as a [`DeliveryAdapter`] plus
//! an [`AdapterFactory`] registered by name in the [`AdapterRegistry`].
//! Adding a provider touches nothing outside this module.

pub mod mandrill;
pub mod sendgrid;
pub mod stub;

pub use mandrill::{MandrillAdapter, MandrillFactory};
pub use sendgrid::{SendGridAdapter, SendGridFactory};
pub use stub::{StubAdapter, StubFactory};

use crate::config::NotificationConfig;
use crate::error::{NotificationError, NotificationResult};
use crate::models::{NotificationRecord, NotificationState, mime_type_for};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// Capability set every delivery adapter must satisfy.
///
/// `execute` owns the `New -> Complete | Error` transition and never fails
/// for ordinary provider rejections; those are recorded on the notification
/// and reported through `error_message`.
#[async_trait]
pub trait DeliveryAdapter: Send + Sync {
    /// Adapter name, matching its factory registration.
    fn name(&self) -> &'static str;

    /// Send one notification. Returns true on delivery success.
    ///
    /// On success: stores the provider response and sets `Complete`.
    /// On transport failure or provider rejection: sets `Error` and records
    /// a descriptive message. Adapters constructed with invalid credentials
    /// short-circuit to failure without a network attempt.
    async fn execute(&mut self, record: &mut NotificationRecord) -> bool;

    /// Validate mandatory fields before a save.
    fn check_data(&self, record: &NotificationRecord) -> bool {
        !record.subject.is_empty() && !record.body.is_empty() && !record.recipients.is_empty()
    }

    /// Fill lifecycle defaults (state, schedule, sender) when unset.
    fn set_defaults(&self, record: &mut NotificationRecord);

    /// Last captured error, including construction-time auth failures.
    fn error_message(&self) -> Option<&str>;
}

/// Factory for a named delivery adapter.
///
/// Construction is async because adapters validate credentials eagerly
/// (e.g. a provider ping). Construction never fails: invalid credentials
/// leave the adapter in a short-circuit state instead.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    /// Registered adapter name (e.g. "mandrill").
    fn name(&self) -> &'static str;

    /// Whether credentials and a sender address are configured. Used by the
    /// host to decide whether to offer this adapter at all.
    fn is_configured(&self, config: &NotificationConfig) -> bool;

    /// Build an adapter instance for one processing attempt.
    async fn create(&self, config: &NotificationConfig) -> Box<dyn DeliveryAdapter>;
}

/// Explicit name -> factory registry, populated at startup.
///
/// Replaces dynamic implementation lookup: unknown names fail closed.
#[derive(Default)]
pub struct AdapterRegistry {
    factories: HashMap<&'static str, Arc<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in provider adapters.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MandrillFactory));
        registry.register(Arc::new(SendGridFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn AdapterFactory>) {
        self.factories.insert(factory.name(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate the named adapter, failing closed on unknown names.
    pub async fn create(
        &self,
        name: &str,
        config: &NotificationConfig,
    ) -> NotificationResult<Box<dyn DeliveryAdapter>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| NotificationError::UnknownAdapter(name.to_string()))?;

        Ok(factory.create(config).await)
    }

    /// Names of adapters with usable configuration, sorted.
    pub fn configured_names(&self, config: &NotificationConfig) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .factories
            .values()
            .filter(|f| f.is_configured(config))
            .map(|f| f.name())
            .collect();
        names.sort_unstable();
        names
    }
}

/// Shared `set_defaults` behavior: state NEW, schedule "now", configured
/// sender when the record carries no override.
pub(crate) fn apply_lifecycle_defaults(record: &mut NotificationRecord, config: &NotificationConfig) {
    if record.state.is_none() {
        record.state = Some(NotificationState::New);
    }
    if record.scheduled_at.is_none() {
        record.scheduled_at = Some(Utc::now());
    }
    if record.sender_email.is_none() && !config.sender_email.is_empty() {
        record.sender_email = Some(config.sender_email.clone());
    }
    if record.sender_name.is_none() && !config.sender_name.is_empty() {
        record.sender_name = Some(config.sender_name.clone());
    }
}

/// An attachment read and encoded for a provider payload.
#[derive(Debug, Clone)]
pub(crate) struct EncodedAttachment {
    pub name: String,
    pub mime_type: &'static str,
    /// Base64-encoded file content.
    pub content: String,
}

/// Read and encode all attachments at send time.
///
/// Paths are stable references for the lifetime of the queue entry; a file
/// that disappeared since enqueue is a delivery failure, reported as a
/// plain message for the adapter to record.
pub(crate) fn encode_attachments(
    record: &NotificationRecord,
) -> Result<Vec<EncodedAttachment>, String> {
    let mut encoded = Vec::with_capacity(record.attachments.len());

    for (name, path) in &record.attachments {
        let content = std::fs::read(path)
            .map_err(|e| format!("Could not read attachment '{}' ({}): {}", name, path.display(), e))?;

        encoded.push(EncodedAttachment {
            name: name.clone(),
            mime_type: mime_type_for(path),
            content: BASE64.encode(content),
        });
    }

    Ok(encoded)
}
