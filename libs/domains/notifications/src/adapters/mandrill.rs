//! Mandrill (Mailchimp Transactional) delivery adapter.
//!
//! API reference: <https://mailchimp.com/developer/transactional/api/>

use super::{AdapterFactory, DeliveryAdapter, apply_lifecycle_defaults, encode_attachments};
use crate::config::NotificationConfig;
use crate::models::{ContentType, NotificationRecord, NotificationState, Recipient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const API_BASE: &str = "https://mandrillapp.com/api/1.0";

/// Factory for [`MandrillAdapter`], registered under the name `mandrill`.
pub struct MandrillFactory;

#[async_trait]
impl AdapterFactory for MandrillFactory {
    fn name(&self) -> &'static str {
        "mandrill"
    }

    fn is_configured(&self, config: &NotificationConfig) -> bool {
        config.mandrill_api_key.is_some() && !config.sender_email.is_empty()
    }

    async fn create(&self, config: &NotificationConfig) -> Box<dyn DeliveryAdapter> {
        let mut adapter = MandrillAdapter::new(config);
        adapter.ping().await;
        Box::new(adapter)
    }
}

pub struct MandrillAdapter {
    client: reqwest::Client,
    config: NotificationConfig,
    /// Credentials verified by the construction-time ping.
    valid_api_key: bool,
    error_message: Option<String>,
}

impl MandrillAdapter {
    fn new(config: &NotificationConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: config.clone(),
            valid_api_key: false,
            error_message: None,
        }
    }

    /// Verify credentials against the `users/ping` endpoint.
    ///
    /// A failed ping leaves the adapter in a short-circuit state; every
    /// later delivery attempt fails immediately with the captured message.
    async fn ping(&mut self) {
        let Some(key) = self.config.mandrill_api_key.clone() else {
            self.error_message = Some("Mandrill: no API key configured".to_string());
            return;
        };

        let request = self
            .client
            .post(format!("{API_BASE}/users/ping"))
            .json(&PingRequest { key: &key })
            .send();

        // Construction happens inside a queue pass, so the ping gets the
        // same time bound as a send.
        let response = match tokio::time::timeout(self.config.send_timeout(), request).await {
            Ok(response) => response,
            Err(_) => {
                warn!("mandrill ping timed out");
                self.error_message = Some(format!(
                    "Mandrill: ping timed out after {}s",
                    self.config.send_timeout_secs
                ));
                return;
            }
        };

        match response {
            Ok(response) if response.status().is_success() => {
                self.valid_api_key = true;
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!(%status, "mandrill ping rejected");
                self.error_message =
                    Some(format!("Mandrill: API key rejected ({status}): {body}"));
            }
            Err(e) => {
                warn!(error = %e, "mandrill ping failed");
                self.error_message = Some(format!("Mandrill: ping failed: {e}"));
            }
        }
    }

    fn fail(&mut self, record: &mut NotificationRecord, message: String) -> bool {
        record.state = Some(NotificationState::Error);
        record.error_message = Some(message.clone());
        self.error_message = Some(message);
        false
    }
}

#[async_trait]
impl DeliveryAdapter for MandrillAdapter {
    fn name(&self) -> &'static str {
        "mandrill"
    }

    async fn execute(&mut self, record: &mut NotificationRecord) -> bool {
        if !self.valid_api_key {
            let message = self
                .error_message
                .clone()
                .unwrap_or_else(|| "Mandrill: API key not validated".to_string());
            return self.fail(record, message);
        }

        let message = match build_message(record) {
            Ok(message) => message,
            Err(e) => return self.fail(record, format!("Mandrill: {e}")),
        };

        // ping() verified the key exists.
        let Some(key) = self.config.mandrill_api_key.clone() else {
            return self.fail(record, "Mandrill: no API key configured".to_string());
        };

        let response = self
            .client
            .post(format!("{API_BASE}/messages/send"))
            .json(&SendRequest { key: &key, message })
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => return self.fail(record, format!("Mandrill: send failed: {e}")),
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return self.fail(record, format!("Mandrill: send rejected ({status}): {body}"));
        }

        let results: Vec<SendResult> = match response.json().await {
            Ok(results) => results,
            Err(e) => return self.fail(record, format!("Mandrill: unreadable response: {e}")),
        };

        let failures = delivery_failures(&results);
        if !failures.is_empty() {
            return self.fail(
                record,
                format!("Mandrill: delivery rejected: {}", failures.join("; ")),
            );
        }

        debug!(recipients = results.len(), "mandrill delivery accepted");
        record.state = Some(NotificationState::Complete);
        record.error_message = None;
        record.provider_response = serde_json::to_value(&results).ok();
        true
    }

    fn set_defaults(&self, record: &mut NotificationRecord) {
        apply_lifecycle_defaults(record, &self.config);
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

#[derive(Serialize)]
struct PingRequest<'a> {
    key: &'a str,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    key: &'a str,
    message: Message,
}

#[derive(Debug, Serialize)]
struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    subject: String,
    from_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_name: Option<String>,
    to: Vec<ToEntry>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
struct ToEntry {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    /// "to", "cc" or "bcc".
    #[serde(rename = "type")]
    kind: &'static str,
}

impl ToEntry {
    fn from_recipient(recipient: &Recipient, kind: &'static str) -> Self {
        Self {
            email: recipient.email.clone(),
            name: recipient.name.clone(),
            kind,
        }
    }
}

#[derive(Debug, Serialize)]
struct Attachment {
    #[serde(rename = "type")]
    mime_type: &'static str,
    name: String,
    /// Base64-encoded content.
    content: String,
}

/// Per-recipient outcome from `messages/send`.
#[derive(Debug, Serialize, Deserialize)]
struct SendResult {
    email: String,
    /// "sent", "queued", "scheduled", "rejected" or "invalid".
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reject_reason: Option<String>,
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

fn build_message(record: &NotificationRecord) -> Result<Message, String> {
    let (html, text) = match record.content_type {
        ContentType::TextHtml => (Some(record.body.clone()), None),
        ContentType::TextPlain => (None, Some(record.body.clone())),
    };

    let mut to: Vec<ToEntry> = record
        .recipients
        .iter()
        .map(|r| ToEntry::from_recipient(r, "to"))
        .collect();
    to.extend(record.cc.iter().map(|r| ToEntry::from_recipient(r, "cc")));
    to.extend(record.bcc.iter().map(|r| ToEntry::from_recipient(r, "bcc")));

    let mut headers = BTreeMap::new();
    if let Some(reply_to) = record.reply_to.first() {
        headers.insert("Reply-To".to_string(), reply_to.email.clone());
    }

    let attachments = encode_attachments(record)?
        .into_iter()
        .map(|a| Attachment {
            mime_type: a.mime_type,
            name: a.name,
            content: a.content,
        })
        .collect();

    Ok(Message {
        html,
        text,
        subject: record.subject.clone(),
        from_email: record.sender_email.clone().unwrap_or_default(),
        from_name: record.sender_name.clone(),
        to,
        headers,
        attachments,
    })
}

/// Human-readable failure descriptions for recipients Mandrill did not accept.
///
/// "sent", "queued" and "scheduled" all count as success.
fn delivery_failures(results: &[SendResult]) -> Vec<String> {
    results
        .iter()
        .filter(|r| !matches!(r.status.as_str(), "sent" | "queued" | "scheduled"))
        .map(|r| {
            let reason = r.reject_reason.as_deref().unwrap_or("unknown reason");
            format!("{} ({}: {})", r.email, r.status, reason)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> NotificationRecord {
        let mut record = NotificationRecord::new();
        record
            .set_subject("Invoice")
            .set_body("<p>Attached</p>")
            .set_sender("billing@example.com", Some("Billing"))
            .add_recipient("a@example.com", Some("Alice"))
            .add_cc_recipient("b@example.com", None)
            .add_bcc_recipient("c@example.com", None)
            .add_reply_to("support@example.com", None)
            .add_reply_to("ignored@example.com", None);
        record
    }

    #[test]
    fn test_build_message_html() {
        let message = build_message(&record()).unwrap();
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["html"], "<p>Attached</p>");
        assert!(json.get("text").is_none());
        assert_eq!(json["from_email"], "billing@example.com");
        assert_eq!(json["from_name"], "Billing");

        // TO, CC and BCC flatten into one typed list.
        assert_eq!(json["to"].as_array().unwrap().len(), 3);
        assert_eq!(json["to"][0]["type"], "to");
        assert_eq!(json["to"][0]["name"], "Alice");
        assert_eq!(json["to"][1]["type"], "cc");
        assert_eq!(json["to"][2]["type"], "bcc");

        // Only the first reply-to makes it into the header.
        assert_eq!(json["headers"]["Reply-To"], "support@example.com");
    }

    #[test]
    fn test_build_message_plain_text() {
        let mut record = record();
        record.set_content_type(ContentType::TextPlain);

        let json = serde_json::to_value(build_message(&record).unwrap()).unwrap();
        assert_eq!(json["text"], "<p>Attached</p>");
        assert!(json.get("html").is_none());
    }

    #[test]
    fn test_build_message_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoice.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let mut record = record();
        record.add_attachment(&path, None).unwrap();

        let json = serde_json::to_value(build_message(&record).unwrap()).unwrap();
        let attachments = json["attachments"].as_array().unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0]["name"], "invoice.pdf");
        assert_eq!(attachments[0]["type"], "application/pdf");
        assert!(!attachments[0]["content"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_delivery_failures_classification() {
        let results: Vec<SendResult> = serde_json::from_value(serde_json::json!([
            { "email": "a@example.com", "status": "sent", "_id": "abc" },
            { "email": "b@example.com", "status": "queued" },
            { "email": "c@example.com", "status": "scheduled" },
        ]))
        .unwrap();
        assert!(delivery_failures(&results).is_empty());

        let results: Vec<SendResult> = serde_json::from_value(serde_json::json!([
            { "email": "a@example.com", "status": "sent" },
            { "email": "bad@example.com", "status": "rejected", "reject_reason": "hard-bounce" },
        ]))
        .unwrap();
        let failures = delivery_failures(&results);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("bad@example.com"));
        assert!(failures[0].contains("hard-bounce"));
    }
}
