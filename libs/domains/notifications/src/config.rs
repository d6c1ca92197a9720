//! Configuration for the notifications domain.
//!
//! One explicit value object, loaded from the environment at process start
//! and passed into adapter construction, the queue, the sweeper and the
//! interception point. No ambient option reads.

use crate::retention::RetentionConfig;
use core_config::{ConfigError, FromEnv, env_optional, env_or_default, env_parsed};
use std::time::Duration;

/// Default bounded timeout for one provider send.
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 30;

/// Configuration for notification delivery.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Site-wide sender address, applied to records without an override.
    pub sender_email: String,
    /// Site-wide sender display name.
    pub sender_name: String,
    /// Mandrill API key; the mandrill adapter is unconfigured without it.
    pub mandrill_api_key: Option<String>,
    /// SendGrid API key; the sendgrid adapter is unconfigured without it.
    pub sendgrid_api_key: Option<String>,
    /// Redirect the host's outbound mail through the queue.
    pub override_mail: bool,
    /// When intercepting: queue for the next pass instead of sending inline.
    pub use_queue: bool,
    /// Adapter used for intercepted host mail.
    pub default_adapter: String,
    /// Bounded timeout per provider send, in seconds.
    pub send_timeout_secs: u64,
    pub retention: RetentionConfig,
}

impl NotificationConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            sender_email: String::new(),
            sender_name: String::new(),
            mandrill_api_key: None,
            sendgrid_api_key: None,
            override_mail: false,
            use_queue: false,
            default_adapter: "mandrill".to_string(),
            send_timeout_secs: DEFAULT_SEND_TIMEOUT_SECS,
            retention: RetentionConfig::default(),
        }
    }
}

impl FromEnv for NotificationConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            sender_email: env_or_default("NOTIFY_SENDER_EMAIL", ""),
            sender_name: env_or_default("NOTIFY_SENDER_NAME", ""),
            mandrill_api_key: env_optional("NOTIFY_MANDRILL_API_KEY"),
            sendgrid_api_key: env_optional("NOTIFY_SENDGRID_API_KEY"),
            override_mail: env_parsed("NOTIFY_OVERRIDE_MAIL", false)?,
            use_queue: env_parsed("NOTIFY_USE_QUEUE", false)?,
            default_adapter: env_or_default("NOTIFY_DEFAULT_ADAPTER", "mandrill"),
            send_timeout_secs: env_parsed("NOTIFY_SEND_TIMEOUT_SECS", DEFAULT_SEND_TIMEOUT_SECS)?,
            retention: RetentionConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::RetentionPolicy;

    #[test]
    fn test_default_config() {
        let config = NotificationConfig::default();
        assert_eq!(config.default_adapter, "mandrill");
        assert_eq!(config.send_timeout_secs, DEFAULT_SEND_TIMEOUT_SECS);
        assert!(!config.override_mail);
        assert!(!config.use_queue);
        assert_eq!(config.retention.policy, RetentionPolicy::Keep);
    }

    #[test]
    fn test_from_env() {
        temp_env::with_vars(
            [
                ("NOTIFY_SENDER_EMAIL", Some("noreply@example.com")),
                ("NOTIFY_SENDER_NAME", Some("Example")),
                ("NOTIFY_MANDRILL_API_KEY", Some("md-key")),
                ("NOTIFY_OVERRIDE_MAIL", Some("true")),
                ("NOTIFY_SEND_TIMEOUT_SECS", Some("10")),
            ],
            || {
                let config = NotificationConfig::from_env().unwrap();
                assert_eq!(config.sender_email, "noreply@example.com");
                assert_eq!(config.mandrill_api_key.as_deref(), Some("md-key"));
                assert_eq!(config.sendgrid_api_key, None);
                assert!(config.override_mail);
                assert_eq!(config.send_timeout(), Duration::from_secs(10));
            },
        );
    }
}
