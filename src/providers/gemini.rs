//! Gemini `generateContent` provider.
//!
//! Auth is an API key passed as a query parameter. The system prompt rides in
//! `systemInstruction`; assistant turns map to Gemini's `model` role.

use super::{ChatMessage, Provider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct GenerateContentRequest {
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

impl GeminiProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str, max_output_tokens: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_output_tokens,
        }
    }

    fn build_request(&self, messages: &[ChatMessage], temperature: f64) -> GenerateContentRequest {
        let mut system_instruction = None;
        let mut contents = Vec::new();

        for message in messages {
            match message.role.as_str() {
                "system" => {
                    system_instruction = Some(Content {
                        role: None,
                        parts: vec![Part {
                            text: message.content.clone(),
                        }],
                    });
                }
                role => {
                    let gemini_role = if role == "assistant" { "model" } else { "user" };
                    contents.push(Content {
                        role: Some(gemini_role.to_string()),
                        parts: vec![Part {
                            text: message.content.clone(),
                        }],
                    });
                }
            }
        }

        GenerateContentRequest {
            system_instruction,
            contents,
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn chat_with_history(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let request = self.build_request(messages, temperature);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = response.status();
        let body: GenerateContentResponse = response
            .json()
            .await
            .with_context(|| format!("Gemini returned an unreadable body (HTTP {status})"))?;

        if let Some(error) = body.error {
            anyhow::bail!("Gemini API error (HTTP {status}): {}", error.message);
        }

        body.candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("No response from Gemini"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GeminiProvider {
        GeminiProvider::new(
            "https://generativelanguage.googleapis.com/v1beta/",
            "test-key",
            "gemini-1.5-flash",
            2048,
        )
    }

    #[test]
    fn trims_trailing_slash_from_base_url() {
        assert_eq!(
            provider().base_url,
            "https://generativelanguage.googleapis.com/v1beta"
        );
    }

    #[test]
    fn system_message_becomes_system_instruction() {
        let request = provider().build_request(
            &[
                ChatMessage::system("You are helpful."),
                ChatMessage::user("hi"),
            ],
            0.7,
        );
        assert!(request.system_instruction.is_some());
        assert_eq!(request.contents.len(), 1);
        assert_eq!(request.contents[0].role.as_deref(), Some("user"));
    }

    #[test]
    fn assistant_maps_to_model_role() {
        let request = provider().build_request(
            &[
                ChatMessage::user("hi"),
                ChatMessage::assistant("hello"),
                ChatMessage::user("more"),
            ],
            0.7,
        );
        let roles: Vec<_> = request
            .contents
            .iter()
            .map(|c| c.role.as_deref().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
    }

    #[test]
    fn generation_config_carries_settings() {
        let request = provider().build_request(&[ChatMessage::user("hi")], 0.3);
        assert!((request.generation_config.temperature - 0.3).abs() < f64::EPSILON);
        assert_eq!(request.generation_config.max_output_tokens, 2048);
    }

    #[test]
    fn request_serializes_with_camel_case_keys() {
        let request = provider().build_request(
            &[ChatMessage::system("sys"), ChatMessage::user("hi")],
            0.7,
        );
        let rendered = serde_json::to_string(&request).unwrap();
        assert!(rendered.contains("systemInstruction"));
        assert!(rendered.contains("generationConfig"));
        assert!(rendered.contains("maxOutputTokens"));
    }
}
