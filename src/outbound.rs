//! Outbound delivery through the WhatsApp Cloud API.
//!
//! Sending never panics and never bubbles an `Err`: every attempt resolves to
//! a `SendOutcome`. Transient failures (network, timeout, 429, 5xx) are
//! retried with exponential backoff; 4xx rejections are terminal because the
//! same payload will be rejected again.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(500);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One reply ready to go out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Recipient wa_id.
    pub to: String,
    pub text: String,
    /// Correlates retries and logs; the Graph API has no idempotency header.
    pub idempotency_key: String,
}

impl OutboundMessage {
    pub fn new(to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            text: text.into(),
            idempotency_key: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendErrorKind {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("rate limited")]
    RateLimited,
    #[error("server error (HTTP {0})")]
    Server(u16),
    #[error("rejected (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("unparseable response: {0}")]
    InvalidResponse(String),
}

impl SendErrorKind {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::RateLimited | Self::Server(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted by the platform; carries the assigned wamid.
    Sent { message_id: String },
    Failed(SendErrorKind),
}

#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> SendOutcome;
}

pub struct WhatsAppSender {
    client: reqwest::Client,
    messages_url: String,
    access_token: String,
}

/// The Cloud API text-message payload.
fn build_payload(message: &OutboundMessage) -> Value {
    serde_json::json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": message.to,
        "type": "text",
        "text": {
            "preview_url": false,
            "body": message.text
        }
    })
}

fn backoff_delay(attempt: u32) -> Duration {
    BASE_BACKOFF * 2u32.saturating_pow(attempt)
}

impl WhatsAppSender {
    pub fn new(api_base_url: &str, phone_number_id: &str, access_token: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            messages_url: format!(
                "{}/{}/messages",
                api_base_url.trim_end_matches('/'),
                phone_number_id
            ),
            access_token: access_token.to_string(),
        }
    }

    async fn try_send(&self, message: &OutboundMessage) -> Result<String, SendErrorKind> {
        let response = self
            .client
            .post(&self.messages_url)
            .bearer_auth(&self.access_token)
            .json(&build_payload(message))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SendErrorKind::Timeout
                } else {
                    SendErrorKind::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(SendErrorKind::RateLimited);
        }
        if status.is_server_error() {
            return Err(SendErrorKind::Server(status.as_u16()));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SendErrorKind::Rejected {
                status: status.as_u16(),
                detail: crate::util::truncate_with_ellipsis(&detail, 200),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SendErrorKind::InvalidResponse(e.to_string()))?;
        body.get("messages")
            .and_then(Value::as_array)
            .and_then(|m| m.first())
            .and_then(|m| m.get("id"))
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| {
                SendErrorKind::InvalidResponse("response carried no message id".into())
            })
    }
}

#[async_trait]
impl ReplySender for WhatsAppSender {
    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        let mut last_error = SendErrorKind::Network("not attempted".into());
        for attempt in 0..MAX_ATTEMPTS {
            match self.try_send(message).await {
                Ok(message_id) => {
                    tracing::info!(
                        to = %message.to,
                        key = %message.idempotency_key,
                        attempt,
                        %message_id,
                        "message sent"
                    );
                    return SendOutcome::Sent { message_id };
                }
                Err(kind) => {
                    let retrying = kind.is_transient() && attempt + 1 < MAX_ATTEMPTS;
                    tracing::warn!(
                        to = %message.to,
                        key = %message.idempotency_key,
                        attempt,
                        retrying,
                        "send failed: {kind}"
                    );
                    if !retrying {
                        return SendOutcome::Failed(kind);
                    }
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    last_error = kind;
                }
            }
        }
        SendOutcome::Failed(last_error)
    }
}
