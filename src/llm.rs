//! LLM collaborator for answer synthesis.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::LlmConfig;
use crate::error::PipelineError;
use crate::models::ConversationTurn;

/// `(prompt, history) → text`. History turns precede the prompt as chat
/// messages; the prompt itself is sent as the final user message.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        history: &[ConversationTurn],
    ) -> Result<String, PipelineError>;
}

/// Chat-completions client (OpenAI-compatible API). Requires the
/// `OPENAI_API_KEY` environment variable.
pub struct OpenAiChatClient {
    client: reqwest::Client,
    model: String,
    temperature: f32,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self, PipelineError> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(PipelineError::Configuration(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn complete(
        &self,
        prompt: &str,
        history: &[ConversationTurn],
    ) -> Result<String, PipelineError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PipelineError::Configuration("OPENAI_API_KEY not set".to_string()))?;

        let mut messages: Vec<Value> = history
            .iter()
            .map(|turn| json!({ "role": turn.role.as_str(), "content": turn.content }))
            .collect();
        messages.push(json!({ "role": "user", "content": prompt }));

        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Llm(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Llm(format!(
                "chat API error {status}: {body_text}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Llm(e.to_string()))?;

        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PipelineError::Llm("chat response carries no content".to_string()))
    }
}
