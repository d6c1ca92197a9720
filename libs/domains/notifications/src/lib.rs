//! Notifications Domain
//!
//! Queued email delivery with pluggable provider adapters.
//!
//! Notifications are persisted records with a small lifecycle: built in
//! memory, validated and saved as `NEW`, picked up by a queue pass and
//! driven to `COMPLETE` or `ERROR` by the bound delivery adapter. Failed
//! and delivered records stay stored for audit until the retention
//! sweeper removes them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Host application │  ← Builds records / hands over outbound mail
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐
//! │ NotificationQueue│  ← Validates, saves, runs queue passes
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐
//! │   RecordStore    │  ← Persistence behind a trait
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐
//! │ DeliveryAdapter  │  ← Mandrill, SendGrid, stub
//! └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{
//!     AdapterRegistry, NotificationConfig, NotificationQueue, NotificationRecord,
//! };
//!
//! let registry = Arc::new(AdapterRegistry::with_builtin());
//! let queue = NotificationQueue::new(store, registry.clone(), config);
//!
//! let mut record = NotificationRecord::new();
//! record
//!     .set_adapter("mandrill", &registry)?
//!     .set_subject("Welcome")
//!     .set_body("<p>Hello!</p>")
//!     .add_recipient("user@example.com", Some("User"));
//!
//! queue.save(&mut record).await?;
//! queue.process_queue().await?;
//! ```

pub mod adapters;
pub mod config;
pub mod error;
pub mod intercept;
pub mod models;
pub mod queue;
pub mod retention;
pub mod store;

// Re-export commonly used types
pub use adapters::{AdapterFactory, AdapterRegistry, DeliveryAdapter};
pub use config::NotificationConfig;
pub use error::{NotificationError, NotificationResult};
pub use intercept::{MailInterceptor, NativeMailer, OutboundMail};
pub use models::{ContentType, NotificationRecord, NotificationState, Recipient};
pub use queue::{NotificationQueue, QueuePassSummary};
pub use retention::{RetentionConfig, RetentionPolicy, RetentionSweeper, RetentionUnit, SweepOutcome};
pub use store::{MemoryRecordStore, RecordFilter, RecordStore};
