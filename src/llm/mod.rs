//! Chat-completion capability and the Groq-backed client.
//!
//! Prompt construction stays with the caller; this module only moves
//! messages to the completion endpoint and back.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::UpstreamError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait CompletionApi: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, UpstreamError>;
}

/// OpenAI-compatible chat completions client (Groq in production).
pub struct GroqClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl GroqClient {
    pub fn new(config: LlmConfig, timeout: Duration) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("mail-gateway/0.1")
            .build()
            .map_err(UpstreamError::from)?;

        Ok(Self { http, config })
    }
}

#[async_trait]
impl CompletionApi for GroqClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, UpstreamError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let payload = CompletionRequest {
            model: &self.config.model,
            messages,
        };

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let parsed: CompletionResponse = serde_json::from_slice(&bytes)?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| UpstreamError::Decode("completion response had no choices".into()))
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_response_decodes() {
        let parsed: CompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.choices[0].message.content, "hello");
    }

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(ChatMessage::user("q").role, "user");
        assert_eq!(ChatMessage::system("s").role, "system");
    }
}
