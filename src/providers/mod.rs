//! AI provider abstraction.

pub mod gemini;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// A chat completion backend.
///
/// The first message may be a system prompt; providers that use a dedicated
/// system slot lift it out of the history themselves.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat_with_history(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> Result<String>;
}
