//! SendGrid delivery adapter.
//!
//! API reference: <https://docs.sendgrid.com/api-reference/mail-send/mail-send>

use super::{AdapterFactory, DeliveryAdapter, apply_lifecycle_defaults, encode_attachments};
use crate::config::NotificationConfig;
use crate::models::{NotificationRecord, NotificationState, Recipient};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

const API_BASE: &str = "https://api.sendgrid.com/v3";

/// Factory for [`SendGridAdapter`], registered under the name `sendgrid`.
pub struct SendGridFactory;

#[async_trait]
impl AdapterFactory for SendGridFactory {
    fn name(&self) -> &'static str {
        "sendgrid"
    }

    fn is_configured(&self, config: &NotificationConfig) -> bool {
        config.sendgrid_api_key.is_some() && !config.sender_email.is_empty()
    }

    async fn create(&self, config: &NotificationConfig) -> Box<dyn DeliveryAdapter> {
        // SendGrid has no dedicated ping endpoint; validate the key format
        // instead and short-circuit later sends on failure.
        let error_message = match &config.sendgrid_api_key {
            Some(key) if key.starts_with("SG.") => None,
            Some(_) => Some("SendGrid: invalid API key format".to_string()),
            None => Some("SendGrid: no API key configured".to_string()),
        };

        Box::new(SendGridAdapter {
            client: Client::new(),
            config: config.clone(),
            valid_api_key: error_message.is_none(),
            error_message,
        })
    }
}

pub struct SendGridAdapter {
    client: Client,
    config: NotificationConfig,
    valid_api_key: bool,
    error_message: Option<String>,
}

impl SendGridAdapter {
    fn fail(&mut self, record: &mut NotificationRecord, message: String) -> bool {
        record.state = Some(NotificationState::Error);
        record.error_message = Some(message.clone());
        self.error_message = Some(message);
        false
    }
}

#[async_trait]
impl DeliveryAdapter for SendGridAdapter {
    fn name(&self) -> &'static str {
        "sendgrid"
    }

    async fn execute(&mut self, record: &mut NotificationRecord) -> bool {
        if !self.valid_api_key {
            let message = self
                .error_message
                .clone()
                .unwrap_or_else(|| "SendGrid: API key not validated".to_string());
            return self.fail(record, message);
        }

        let request = match build_request(record) {
            Ok(request) => request,
            Err(e) => return self.fail(record, format!("SendGrid: {e}")),
        };

        let Some(key) = self.config.sendgrid_api_key.clone() else {
            return self.fail(record, "SendGrid: no API key configured".to_string());
        };

        debug!(
            subject = %record.subject,
            to_count = record.recipients.len(),
            "sending via sendgrid"
        );

        let response = self
            .client
            .post(format!("{API_BASE}/mail/send"))
            .header("Authorization", format!("Bearer {key}"))
            .json(&request)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => return self.fail(record, format!("SendGrid: send failed: {e}")),
        };

        let status = response.status();
        if status.is_success() {
            let message_id = response
                .headers()
                .get("x-message-id")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            record.state = Some(NotificationState::Complete);
            record.error_message = None;
            record.provider_response = Some(json!({
                "message_id": message_id,
                "status": status.as_u16(),
            }));
            return true;
        }

        let body = response.text().await.unwrap_or_default();
        warn!(%status, "sendgrid send rejected");

        let detail = match serde_json::from_str::<SendGridError>(&body) {
            Ok(sg_error) => sg_error
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join(", "),
            Err(_) => body,
        };

        self.fail(record, format!("SendGrid: send rejected ({status}): {detail}"))
    }

    fn set_defaults(&self, record: &mut NotificationRecord) {
        apply_lifecycle_defaults(record, &self.config);
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

#[derive(Debug, Serialize)]
struct SendGridRequest {
    personalizations: Vec<Personalization>,
    from: EmailAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<EmailAddress>,
    subject: String,
    content: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<EmailAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc: Vec<EmailAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc: Vec<EmailAddress>,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl From<&Recipient> for EmailAddress {
    fn from(recipient: &Recipient) -> Self {
        Self {
            email: recipient.email.clone(),
            name: recipient.name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: String,
}

#[derive(Debug, Serialize)]
struct Attachment {
    /// Base64-encoded content.
    content: String,
    #[serde(rename = "type")]
    mime_type: &'static str,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct SendGridError {
    errors: Vec<SendGridErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct SendGridErrorDetail {
    message: String,
}

fn build_request(record: &NotificationRecord) -> Result<SendGridRequest, String> {
    let attachments = encode_attachments(record)?
        .into_iter()
        .map(|a| Attachment {
            content: a.content,
            mime_type: a.mime_type,
            filename: a.name,
        })
        .collect();

    Ok(SendGridRequest {
        personalizations: vec![Personalization {
            to: record.recipients.iter().map(EmailAddress::from).collect(),
            cc: record.cc.iter().map(EmailAddress::from).collect(),
            bcc: record.bcc.iter().map(EmailAddress::from).collect(),
        }],
        from: EmailAddress {
            email: record.sender_email.clone().unwrap_or_default(),
            name: record.sender_name.clone(),
        },
        reply_to: record.reply_to.first().map(EmailAddress::from),
        subject: record.subject.clone(),
        content: vec![Content {
            content_type: record.content_type.as_mime(),
            value: record.body.clone(),
        }],
        attachments,
    })
}
