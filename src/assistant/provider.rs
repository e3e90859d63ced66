//! Text-generation providers
//!
//! Thin HTTP clients for the external completion APIs. Provider wire
//! formats stay inside this file; the bridge only sees prompt-in,
//! text-out.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::AssistantError;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_MODEL: &str = "gpt-4o-mini";

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";

const MAX_COMPLETION_TOKENS: u32 = 1024;

/// A completion provider: one prompt exchange, text back.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, AssistantError>;
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, AssistantError> {
        let body = json!({
            "model": OPENAI_MODEL,
            "max_tokens": MAX_COMPLETION_TOKENS,
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssistantError::Provider(format!(
                "openai returned {}",
                status
            )));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::Malformed(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AssistantError::Malformed("empty completion".into()))?;

        debug!("openai completion received ({} chars)", content.len());
        Ok(content)
    }
}

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, AssistantError> {
        let body = json!({
            "model": ANTHROPIC_MODEL,
            "max_tokens": MAX_COMPLETION_TOKENS,
            "system": system_prompt,
            "messages": [
                {"role": "user", "content": user_prompt},
            ],
        });

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssistantError::Provider(format!(
                "anthropic returned {}",
                status
            )));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::Malformed(e.to_string()))?;

        let content = parsed
            .content
            .into_iter()
            .find_map(|c| c.text)
            .ok_or_else(|| AssistantError::Malformed("empty completion".into()))?;

        debug!("anthropic completion received ({} chars)", content.len());
        Ok(content)
    }
}
