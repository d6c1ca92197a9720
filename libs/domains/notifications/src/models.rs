//! Data models for the notifications domain.

use crate::adapters::AdapterRegistry;
use crate::error::{NotificationError, NotificationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle state of a queued notification.
///
/// Only the `New -> Complete` and `New -> Error` transitions are driven by
/// processing. `InProgress` and `Aborted` are reserved values for future
/// escalation/update flows and have no implemented transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationState {
    /// Queued, waiting to be processed.
    New,
    /// Reserved: processing started, waiting for a provider response.
    InProgress,
    /// Delivery failed; error message holds the reason.
    Error,
    /// Delivered successfully.
    Complete,
    /// Reserved: processing was abandoned.
    Aborted,
}

/// Body content type of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    TextPlain,
    #[default]
    TextHtml,
}

impl ContentType {
    /// The MIME string used in provider payloads.
    pub fn as_mime(&self) -> &'static str {
        match self {
            ContentType::TextPlain => "text/plain",
            ContentType::TextHtml => "text/html",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_mime())
    }
}

/// An email address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    pub name: Option<String>,
}

impl Recipient {
    pub fn new(email: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            email: email.into(),
            name: name.map(|n| n.to_string()),
        }
    }
}

/// One queued notification and its lifecycle state.
///
/// Built in memory with chaining mutators, made durable by
/// [`NotificationQueue::save`](crate::queue::NotificationQueue::save) (the
/// store assigns the immutable `id` on first save), mutated by processing,
/// and deleted only by the retention sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Store-assigned identifier; `None` until the first save.
    pub id: Option<Uuid>,
    /// Name of the delivery adapter bound to this record for its lifetime.
    pub adapter_name: Option<String>,
    pub subject: String,
    pub body: String,
    pub content_type: ContentType,
    /// TO recipients, insertion order preserved.
    pub recipients: Vec<Recipient>,
    pub cc: Vec<Recipient>,
    pub bcc: Vec<Recipient>,
    /// Reply-To addresses; the first entry wins where a provider accepts one.
    pub reply_to: Vec<Recipient>,
    /// Sender overrides; filled from configuration at save time when unset.
    pub sender_email: Option<String>,
    pub sender_name: Option<String>,
    /// Display filename -> source path. Content is read at send time.
    pub attachments: BTreeMap<String, PathBuf>,
    /// When the notification becomes eligible for sending; defaults to "now"
    /// at save time.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub state: Option<NotificationState>,
    /// Last adapter-reported failure; cleared only by successful completion.
    pub error_message: Option<String>,
    pub last_execution_time: Option<DateTime<Utc>>,
    /// Opaque provider success payload, stored for audit.
    pub provider_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Default for NotificationRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationRecord {
    /// Create a blank in-memory notification.
    pub fn new() -> Self {
        Self {
            id: None,
            adapter_name: None,
            subject: String::new(),
            body: String::new(),
            content_type: ContentType::default(),
            recipients: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: Vec::new(),
            sender_email: None,
            sender_name: None,
            attachments: BTreeMap::new(),
            scheduled_at: None,
            state: None,
            error_message: None,
            last_execution_time: None,
            provider_response: None,
            created_at: Utc::now(),
        }
    }

    /// Bind a delivery adapter by name.
    ///
    /// Pure validation against the registry; the adapter is not instantiated.
    /// Fails closed with `UnknownAdapter` for unregistered names.
    pub fn set_adapter(
        &mut self,
        name: &str,
        registry: &AdapterRegistry,
    ) -> NotificationResult<&mut Self> {
        if !registry.contains(name) {
            return Err(NotificationError::UnknownAdapter(name.to_string()));
        }

        self.adapter_name = Some(name.to_string());
        Ok(self)
    }

    pub fn set_subject(&mut self, subject: impl Into<String>) -> &mut Self {
        self.subject = subject.into();
        self
    }

    pub fn set_body(&mut self, body: impl Into<String>) -> &mut Self {
        self.body = body.into();
        self
    }

    pub fn set_content_type(&mut self, content_type: ContentType) -> &mut Self {
        self.content_type = content_type;
        self
    }

    /// Override the configured sender for this notification.
    pub fn set_sender(&mut self, email: impl Into<String>, name: Option<&str>) -> &mut Self {
        self.sender_email = Some(email.into());
        if let Some(name) = name {
            self.sender_name = Some(name.to_string());
        }
        self
    }

    /// Set the earliest send time. Unset means "immediately eligible".
    pub fn set_schedule(&mut self, at: DateTime<Utc>) -> &mut Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Append a TO recipient. No de-duplication; order is preserved.
    pub fn add_recipient(&mut self, email: impl Into<String>, name: Option<&str>) -> &mut Self {
        self.recipients.push(Recipient::new(email, name));
        self
    }

    pub fn add_cc_recipient(&mut self, email: impl Into<String>, name: Option<&str>) -> &mut Self {
        self.cc.push(Recipient::new(email, name));
        self
    }

    pub fn add_bcc_recipient(&mut self, email: impl Into<String>, name: Option<&str>) -> &mut Self {
        self.bcc.push(Recipient::new(email, name));
        self
    }

    pub fn add_reply_to(&mut self, email: impl Into<String>, name: Option<&str>) -> &mut Self {
        self.reply_to.push(Recipient::new(email, name));
        self
    }

    /// Attach a file by path.
    ///
    /// The path must be a readable regular file at call time; content is read
    /// lazily at send time. `name` defaults to the file name. Adding the same
    /// name twice overwrites the earlier path (mapping semantics).
    pub fn add_attachment(
        &mut self,
        path: impl Into<PathBuf>,
        name: Option<&str>,
    ) -> NotificationResult<&mut Self> {
        let path = path.into();

        if !path.is_file() {
            return Err(NotificationError::AttachmentNotFound(path));
        }
        if std::fs::File::open(&path).is_err() {
            return Err(NotificationError::AttachmentNotFound(path));
        }

        let name = match name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => match path.file_name() {
                Some(base) => base.to_string_lossy().into_owned(),
                None => return Err(NotificationError::AttachmentNotFound(path)),
            },
        };

        self.attachments.insert(name, path);
        Ok(self)
    }

    /// Whether this record is eligible for processing at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == Some(NotificationState::New)
            && self.scheduled_at.is_some_and(|at| at <= now)
    }
}

/// Best-effort MIME type from the file extension, for attachment payloads.
pub(crate) fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ics" => "text/calendar",
        _ => "application/octet-stream",
    }
}
