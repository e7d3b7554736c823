//! Chat-completion client shared by query expansion and reranking.
//!
//! The client is constructed explicitly and handed to the components that need
//! it, so tests can substitute a scripted model.

use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-4.1-mini";

#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: DEFAULT_COMPLETION_MODEL.to_string(),
            temperature: 0.3,
            max_tokens: 300,
        }
    }
}

/// Completion model for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChatModel {
    config: CompletionConfig,
    client: Client,
}

impl OpenAiChatModel {
    pub fn new(config: CompletionConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    pub fn with_client(mut config: CompletionConfig, client: Client) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self { config, client }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl CompletionModel for OpenAiChatModel {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        if self.config.api_key.is_empty() {
            return Err(LlmError::ApiKeyMissing);
        }

        let body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let parsed: Value = response.json().await?;
        parse_completion(&parsed)
    }
}

fn parse_completion(body: &Value) -> Result<String, LlmError> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LlmError::Malformed("missing choices[0].message.content".to_string()))
}
