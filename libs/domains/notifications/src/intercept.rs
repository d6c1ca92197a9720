//! Interception point for the host application's outbound mail.
//!
//! When interception is enabled, ordinary outbound mail is routed through
//! the notification queue instead of the host's native mailer. The native
//! mailer stays behind a trait so it remains the fallback: any queue-side
//! failure re-sends the mail natively with the original arguments.

use crate::config::NotificationConfig;
use crate::error::NotificationResult;
use crate::models::{ContentType, NotificationRecord};
use crate::queue::NotificationQueue;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// One outbound mail as handed over by the host application.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMail {
    /// Comma-separated recipient addresses.
    pub to: String,
    pub subject: String,
    pub body: String,
    pub content_type: ContentType,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub reply_to: Option<String>,
    pub attachments: Vec<PathBuf>,
}

impl OutboundMail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            content_type: ContentType::default(),
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: None,
            attachments: Vec::new(),
        }
    }
}

/// The host's own mail transport, kept as the fallback path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NativeMailer: Send + Sync {
    async fn send(&self, mail: &OutboundMail) -> NotificationResult<()>;
}

/// Routes outbound mail into the queue, falling back to the native mailer.
pub struct MailInterceptor {
    queue: Arc<NotificationQueue>,
    native: Arc<dyn NativeMailer>,
    config: NotificationConfig,
}

impl MailInterceptor {
    pub fn new(
        queue: Arc<NotificationQueue>,
        native: Arc<dyn NativeMailer>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            queue,
            native,
            config,
        }
    }

    /// Send one outbound mail.
    ///
    /// With interception disabled this is a pure pass-through. Otherwise the
    /// mail becomes a notification on the default adapter: queued for the
    /// next pass when deferred delivery is configured, sent immediately
    /// otherwise. Any interception failure falls back to the native mailer
    /// with the unmodified original mail.
    #[instrument(skip_all, fields(subject = %mail.subject))]
    pub async fn send_mail(&self, mail: &OutboundMail) -> NotificationResult<()> {
        if !self.config.override_mail {
            return self.native.send(mail).await;
        }

        let mut record = match self.record_from(mail) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "could not intercept outbound mail, sending natively");
                return self.native.send(mail).await;
            }
        };

        if self.config.use_queue {
            return match self.queue.save(&mut record).await {
                Ok(id) => {
                    debug!(%id, "outbound mail deferred to queue");
                    Ok(())
                }
                Err(e) => {
                    warn!(error = %e, "could not queue outbound mail, sending natively");
                    self.native.send(mail).await
                }
            };
        }

        match self.queue.process(&mut record).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(
                    error = record.error_message.as_deref(),
                    "adapter delivery failed, sending natively"
                );
                self.native.send(mail).await
            }
            Err(e) => {
                warn!(error = %e, "could not process outbound mail, sending natively");
                self.native.send(mail).await
            }
        }
    }

    /// Translate an outbound mail into a notification on the default adapter.
    ///
    /// Fails when any attachment is unreadable; the mail must reach the
    /// fallback path whole, never with parts silently dropped.
    fn record_from(&self, mail: &OutboundMail) -> NotificationResult<NotificationRecord> {
        let mut record = NotificationRecord::new();
        record
            .set_subject(&mail.subject)
            .set_body(&mail.body)
            .set_content_type(mail.content_type);
        // Validated against the registry when the queue saves it.
        record.adapter_name = Some(self.config.default_adapter.clone());

        for address in mail.to.split(',') {
            let address = address.trim();
            if !address.is_empty() {
                record.add_recipient(address, None);
            }
        }
        for address in &mail.cc {
            record.add_cc_recipient(address, None);
        }
        for address in &mail.bcc {
            record.add_bcc_recipient(address, None);
        }
        if let Some(reply_to) = &mail.reply_to {
            record.add_reply_to(reply_to, None);
        }

        for path in &mail.attachments {
            record.add_attachment(path, None)?;
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterRegistry;
    use crate::adapters::stub::StubFactory;
    use crate::models::NotificationState;
    use crate::store::{MemoryRecordStore, RecordFilter, RecordStore};
    use mockall::predicate::eq;

    fn config(override_mail: bool, use_queue: bool) -> NotificationConfig {
        NotificationConfig {
            sender_email: "noreply@example.com".to_string(),
            override_mail,
            use_queue,
            default_adapter: "stub".to_string(),
            ..Default::default()
        }
    }

    fn interceptor(
        factory: StubFactory,
        native: MockNativeMailer,
        config: NotificationConfig,
    ) -> (MailInterceptor, Arc<MemoryRecordStore>) {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(factory));
        let store = Arc::new(MemoryRecordStore::new());
        let queue = Arc::new(NotificationQueue::new(
            store.clone(),
            Arc::new(registry),
            config.clone(),
        ));
        (
            MailInterceptor::new(queue, Arc::new(native), config),
            store,
        )
    }

    fn mail() -> OutboundMail {
        OutboundMail::new("a@example.com, b@example.com", "Hi", "Test")
    }

    #[tokio::test]
    async fn test_disabled_interception_passes_through() {
        let mut native = MockNativeMailer::new();
        native
            .expect_send()
            .with(eq(mail()))
            .times(1)
            .returning(|_| Ok(()));

        let (interceptor, store) =
            interceptor(StubFactory::succeeding(), native, config(false, false));

        interceptor.send_mail(&mail()).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_deferred_delivery_queues_without_sending() {
        let mut native = MockNativeMailer::new();
        native.expect_send().times(0);

        let (interceptor, store) =
            interceptor(StubFactory::succeeding(), native, config(true, true));

        interceptor.send_mail(&mail()).await.unwrap();

        let records = store.query(RecordFilter::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].state, Some(NotificationState::New));
        // Comma-separated TO splits into individual recipients.
        assert_eq!(records[0].recipients.len(), 2);
        assert_eq!(records[0].recipients[1].email, "b@example.com");
    }

    #[tokio::test]
    async fn test_immediate_delivery_bypasses_native() {
        let mut native = MockNativeMailer::new();
        native.expect_send().times(0);

        let (interceptor, store) =
            interceptor(StubFactory::succeeding(), native, config(true, false));

        interceptor.send_mail(&mail()).await.unwrap();

        let records = store.query(RecordFilter::default()).await.unwrap();
        assert_eq!(records[0].state, Some(NotificationState::Complete));
    }

    #[tokio::test]
    async fn test_delivery_failure_falls_back_with_original_mail() {
        let original = mail();
        let mut native = MockNativeMailer::new();
        native
            .expect_send()
            .with(eq(original.clone()))
            .times(1)
            .returning(|_| Ok(()));

        let (interceptor, store) = interceptor(
            StubFactory::rejecting("mailbox full"),
            native,
            config(true, false),
        );

        interceptor.send_mail(&original).await.unwrap();

        // The failed attempt stays on record even though the fallback sent.
        let records = store.query(RecordFilter::default()).await.unwrap();
        assert_eq!(records[0].state, Some(NotificationState::Error));
    }

    #[tokio::test]
    async fn test_unreadable_attachment_falls_back_with_original_mail() {
        let mut with_attachment = mail();
        with_attachment
            .attachments
            .push("/nonexistent/report.pdf".into());

        let mut native = MockNativeMailer::new();
        native
            .expect_send()
            .with(eq(with_attachment.clone()))
            .times(1)
            .returning(|_| Ok(()));

        let (interceptor, store) =
            interceptor(StubFactory::succeeding(), native, config(true, false));

        interceptor.send_mail(&with_attachment).await.unwrap();
        // Nothing was queued or delivered through an adapter.
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_mail_falls_back() {
        let empty_body = OutboundMail::new("a@example.com", "Hi", "");
        let mut native = MockNativeMailer::new();
        native
            .expect_send()
            .with(eq(empty_body.clone()))
            .times(1)
            .returning(|_| Ok(()));

        let (interceptor, store) =
            interceptor(StubFactory::succeeding(), native, config(true, false));

        interceptor.send_mail(&empty_body).await.unwrap();
        assert!(store.is_empty().await);
    }
}
