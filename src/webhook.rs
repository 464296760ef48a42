//! Chat notification delivery
//!
//! The run summary is posted to a traQ webhook: a plain-text body, signed
//! with HMAC-SHA1 over the body using the webhook secret and sent as a hex
//! string in `X-TRAQ-Signature`. Delivery is attempted once; any transport
//! error or non-2xx status is returned to the caller.

use crate::config::WebhookConfig;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha1::Sha1;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

type HmacSha1 = Hmac<Sha1>;

const SIGNATURE_HEADER: &str = "X-TRAQ-Signature";
const CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Error type for notification delivery
#[derive(Debug)]
pub enum NotifyError {
    /// Body could not be signed
    Signing(String),
    /// Request never got a response
    Transport(String),
    /// Endpoint answered with a non-success status
    Rejected { status: u16, body: String },
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Signing(msg) => write!(f, "Failed to sign webhook body: {}", msg),
            NotifyError::Transport(msg) => write!(f, "Webhook request failed: {}", msg),
            NotifyError::Rejected { status, body } => {
                write!(f, "Webhook rejected with status {}: {}", status, body)
            }
        }
    }
}

impl std::error::Error for NotifyError {}

/// Delivers a single opaque text payload
pub trait Notifier: Send + Sync {
    fn send<'a>(
        &'a self,
        message: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;
}

/// traQ webhook client
#[derive(Clone)]
pub struct TraqWebhook {
    http: reqwest::Client,
    endpoint: String,
    secret: String,
}

impl std::fmt::Debug for TraqWebhook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraqWebhook")
            .field("endpoint", &self.endpoint)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl TraqWebhook {
    pub fn new(config: &WebhookConfig) -> Self {
        TraqWebhook {
            http: reqwest::Client::new(),
            endpoint: config.endpoint(),
            secret: config.secret.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Hex HMAC-SHA1 of `body` keyed with `secret`
    pub fn signature(secret: &str, body: &[u8]) -> Result<String, NotifyError> {
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
            .map_err(|e| NotifyError::Signing(e.to_string()))?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl Notifier for TraqWebhook {
    fn send<'a>(
        &'a self,
        message: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>> {
        Box::pin(async move {
            let signature = Self::signature(&self.secret, message.as_bytes())?;

            let response = self
                .http
                .post(&self.endpoint)
                .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
                .header(SIGNATURE_HEADER, signature)
                .body(message.to_string())
                .send()
                .await
                .map_err(|e| NotifyError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(NotifyError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }

            info!(status = status.as_u16(), "Webhook delivered");
            Ok(())
        })
    }
}

/// Notifier that keeps messages in memory, for tests
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    fail_with_status: Option<u16>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delivery is rejected with `status`
    pub fn failing(status: u16) -> Self {
        RecordingNotifier {
            sent: Arc::default(),
            fail_with_status: Some(status),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send<'a>(
        &'a self,
        message: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(status) = self.fail_with_status {
                return Err(NotifyError::Rejected {
                    status,
                    body: "rejected by test notifier".to_string(),
                });
            }
            self.sent.lock().push(message.to_string());
            Ok(())
        })
    }
}

// hex encoding helper (avoid adding another dependency)
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes
            .as_ref()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_known_vector() {
        let sig = TraqWebhook::signature("key", b"The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(sig, "de7c9b85b8b78aa6bc8a7a36f70a90701c9db4d9");
    }

    #[test]
    fn test_signature_depends_on_secret() {
        let a = TraqWebhook::signature("secret-a", "本文".as_bytes()).unwrap();
        let b = TraqWebhook::signature("secret-b", "本文".as_bytes()).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn test_endpoint_from_config() {
        let config = WebhookConfig {
            origin: "https://q.trap.jp".to_string(),
            webhook_id: "abc-123".to_string(),
            secret: "s".to_string(),
        };
        let webhook = TraqWebhook::new(&config);
        assert_eq!(webhook.endpoint(), "https://q.trap.jp/api/v3/webhooks/abc-123");
    }

    #[test]
    fn test_secret_redacted_in_debug() {
        let config = WebhookConfig {
            origin: "https://q.trap.jp".to_string(),
            webhook_id: "abc-123".to_string(),
            secret: "hook-secret".to_string(),
        };
        let debug = format!("{:?}", TraqWebhook::new(&config));
        assert!(!debug.contains("hook-secret"));
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains("abc-123"));
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier.send("hello").await.unwrap();
        assert_eq!(notifier.messages(), vec!["hello".to_string()]);

        let failing = RecordingNotifier::failing(500);
        let err = failing.send("hello").await.unwrap_err();
        assert!(matches!(err, NotifyError::Rejected { status: 500, .. }));
        assert!(failing.messages().is_empty());
    }
}
