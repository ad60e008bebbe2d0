//! WhatsApp Cloud API webhook payload parsing and classification.
//!
//! Every delivery is classified into one of four outcomes: an inbound text
//! message, a delivery status receipt, a structurally valid but unsupported
//! message type, or a validation error. Validation errors are logged and
//! dropped after acknowledgment; the platform would only re-deliver the same
//! broken payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("payload is not a WhatsApp Business Account event")]
    NotAWhatsAppEvent,
    #[error("missing or malformed field: {0}")]
    MissingField(&'static str),
    #[error("unknown delivery status: {0}")]
    UnknownStatus(String),
}

/// One inbound text message, normalized from the Cloud API envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    /// Sender wa_id (international phone number without `+`).
    pub sender: String,
    pub sender_name: Option<String>,
    /// Unix timestamp as reported by the platform.
    pub timestamp: i64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Progression rank, used to break ties between receipts that share an
    /// `observed_at`. A failure outranks everything.
    pub fn rank(self) -> u8 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Read => 2,
            Self::Failed => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }
}

/// A delivery receipt for a message we previously sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub message_id: String,
    pub state: DeliveryState,
    pub recipient_id: String,
    /// Unix timestamp at which the platform observed the transition.
    pub observed_at: i64,
}

/// Classification outcome for a single event inside a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    Message(InboundMessage),
    Status(DeliveryStatus),
    /// Well-formed message of a type we do not handle (image, audio, ...).
    Unsupported { message_type: String, sender: String },
    Invalid(ValidationError),
}

/// Walk `entry[].changes[].value` and classify every message and status.
///
/// Returns `Err` only when the envelope itself is not a WhatsApp Business
/// Account event; individual malformed items become `WebhookEvent::Invalid`
/// so the rest of the batch still processes.
pub fn classify_payload(payload: &Value) -> Result<Vec<WebhookEvent>, ValidationError> {
    if payload.get("object").and_then(Value::as_str) != Some("whatsapp_business_account") {
        return Err(ValidationError::NotAWhatsAppEvent);
    }

    let Some(entries) = payload.get("entry").and_then(Value::as_array) else {
        return Err(ValidationError::MissingField("entry"));
    };

    let mut events = Vec::new();

    for entry in entries {
        let Some(changes) = entry.get("changes").and_then(Value::as_array) else {
            events.push(WebhookEvent::Invalid(ValidationError::MissingField("changes")));
            continue;
        };

        for change in changes {
            let Some(value) = change.get("value") else {
                events.push(WebhookEvent::Invalid(ValidationError::MissingField("value")));
                continue;
            };

            let contact_name = value
                .get("contacts")
                .and_then(Value::as_array)
                .and_then(|c| c.first())
                .and_then(|c| c.get("profile"))
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str)
                .map(String::from);

            if let Some(messages) = value.get("messages").and_then(Value::as_array) {
                for message in messages {
                    events.push(classify_message(message, contact_name.clone()));
                }
            }

            if let Some(statuses) = value.get("statuses").and_then(Value::as_array) {
                for status in statuses {
                    events.push(classify_status(status));
                }
            }
        }
    }

    Ok(events)
}

fn classify_message(message: &Value, contact_name: Option<String>) -> WebhookEvent {
    let Some(sender) = message.get("from").and_then(Value::as_str) else {
        return WebhookEvent::Invalid(ValidationError::MissingField("messages[].from"));
    };
    let Some(message_id) = message.get("id").and_then(Value::as_str) else {
        return WebhookEvent::Invalid(ValidationError::MissingField("messages[].id"));
    };

    let message_type = message
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    if message_type != "text" {
        return WebhookEvent::Unsupported {
            message_type: message_type.to_string(),
            sender: sender.to_string(),
        };
    }

    let Some(text) = message
        .get("text")
        .and_then(|t| t.get("body"))
        .and_then(Value::as_str)
    else {
        return WebhookEvent::Invalid(ValidationError::MissingField("messages[].text.body"));
    };

    let timestamp = message
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|t| t.parse::<i64>().ok())
        .unwrap_or(0);

    WebhookEvent::Message(InboundMessage {
        message_id: message_id.to_string(),
        sender: sender.to_string(),
        sender_name: contact_name,
        timestamp,
        text: text.to_string(),
    })
}

fn classify_status(status: &Value) -> WebhookEvent {
    let Some(message_id) = status.get("id").and_then(Value::as_str) else {
        return WebhookEvent::Invalid(ValidationError::MissingField("statuses[].id"));
    };
    let Some(raw_state) = status.get("status").and_then(Value::as_str) else {
        return WebhookEvent::Invalid(ValidationError::MissingField("statuses[].status"));
    };
    let Some(state) = DeliveryState::parse(raw_state) else {
        return WebhookEvent::Invalid(ValidationError::UnknownStatus(raw_state.to_string()));
    };
    let recipient_id = status
        .get("recipient_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let observed_at = status
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|t| t.parse::<i64>().ok())
        .unwrap_or(0);

    WebhookEvent::Status(DeliveryStatus {
        message_id: message_id.to_string(),
        state,
        recipient_id,
        observed_at,
    })
}
