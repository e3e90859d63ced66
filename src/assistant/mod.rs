//! Assistant bridge: natural language → shell command suggestions
//!
//! Delegates to an external text-generation provider and normalizes
//! whatever comes back into `{commands, explanation, warnings, confidence}`.
//! Providers are asked for a structured JSON object; free-text answers fall
//! back to fenced-code-block extraction at reduced confidence. Every
//! suggested command passes the dangerous-command classifier, which can
//! only ever add warnings and lower confidence.

pub mod classifier;
pub mod provider;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use provider::{AnthropicProvider, CompletionProvider, OpenAiProvider};

pub use classifier::is_dangerous;

/// Confidence ceiling applied to fallback parses and flagged commands
const REDUCED_CONFIDENCE: f32 = 0.6;

/// Confidence reported when structure had to be scraped out of free text
const FALLBACK_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("No assistant provider configured")]
    NotConfigured,

    #[error("Provider request failed: {0}")]
    Provider(String),

    #[error("Provider response malformed: {0}")]
    Malformed(String),
}

/// Normalized assistant answer.
#[derive(Debug, Clone)]
pub struct AssistantReply {
    pub commands: Vec<String>,
    pub explanation: String,
    pub warnings: Vec<String>,
    pub confidence: f32,
    /// Verbatim provider output, kept for the audit record
    pub raw_response: String,
}

/// What the provider is asked to return for translate/explain.
#[derive(Debug, Deserialize)]
struct StructuredResponse {
    #[serde(default)]
    commands: Vec<String>,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    confidence: Option<f32>,
}

pub struct AssistantBridge {
    provider: Option<Box<dyn CompletionProvider>>,
}

impl AssistantBridge {
    /// Pick a provider by configured credential. OpenAI wins when both keys
    /// are present; with neither, assistant calls fail with
    /// `NotConfigured`.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let provider: Option<Box<dyn CompletionProvider>> =
            if let Some(key) = config.openai_api_key.clone() {
                Some(Box::new(OpenAiProvider::new(key)))
            } else if let Some(key) = config.anthropic_api_key.clone() {
                Some(Box::new(AnthropicProvider::new(key)))
            } else {
                None
            };

        match &provider {
            Some(p) => info!("Assistant provider: {}", p.name()),
            None => warn!("No assistant API key configured, assistant features disabled"),
        }

        Self { provider }
    }

    #[cfg(test)]
    pub fn with_provider(provider: Box<dyn CompletionProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    /// Translate a natural-language request into shell commands.
    pub async fn translate(
        &self,
        prompt: &str,
        context: Option<&str>,
    ) -> Result<AssistantReply, AssistantError> {
        let provider = self.provider.as_ref().ok_or(AssistantError::NotConfigured)?;

        let system = "You translate natural-language requests into POSIX shell commands. \
                      Respond with only a JSON object: \
                      {\"commands\": [\"...\"], \"explanation\": \"...\", \"confidence\": 0.0-1.0}. \
                      Prefer a single command; use several only when a pipeline cannot do it.";

        let user = match context {
            Some(ctx) => format!("Request: {}\n\nTerminal context:\n{}", prompt, ctx),
            None => format!("Request: {}", prompt),
        };

        let raw = provider.complete(system, &user).await?;
        Ok(normalize_reply(raw))
    }

    /// Explain an existing shell command.
    pub async fn explain(&self, command: &str) -> Result<AssistantReply, AssistantError> {
        let provider = self.provider.as_ref().ok_or(AssistantError::NotConfigured)?;

        let system = "You explain shell commands to operators. Respond with only a JSON \
                      object: {\"explanation\": \"...\", \"confidence\": 0.0-1.0}. Mention \
                      every destructive effect explicitly.";

        let raw = provider
            .complete(system, &format!("Explain this command: {}", command))
            .await?;

        let mut reply = normalize_reply(raw);
        // The commands field is not part of an explanation; the warnings
        // apply to the command being explained.
        reply.commands.clear();
        if is_dangerous(command) {
            push_danger_warning(&mut reply, command);
        }
        Ok(reply)
    }

    /// Freeform question; the answer is prose, with any suggested commands
    /// still extracted and classified.
    pub async fn query(&self, prompt: &str) -> Result<AssistantReply, AssistantError> {
        let provider = self.provider.as_ref().ok_or(AssistantError::NotConfigured)?;

        let system = "You are a concise terminal assistant. Answer operator questions about \
                      shells, servers, and command-line tools. Put any suggested commands in \
                      fenced code blocks.";

        let raw = provider.complete(system, prompt).await?;

        let commands = extract_fenced_commands(&raw);
        let mut reply = AssistantReply {
            commands,
            explanation: raw.clone(),
            warnings: Vec::new(),
            confidence: 0.8,
            raw_response: raw,
        };
        classify_commands(&mut reply);
        Ok(reply)
    }
}

/// Parse a provider answer: structured JSON first, fenced extraction as the
/// reduced-confidence fallback.
fn normalize_reply(raw: String) -> AssistantReply {
    let mut reply = match parse_structured(&raw) {
        Some(parsed) => AssistantReply {
            commands: parsed.commands,
            explanation: parsed.explanation,
            confidence: parsed.confidence.unwrap_or(0.8).clamp(0.0, 1.0),
            warnings: Vec::new(),
            raw_response: raw,
        },
        None => AssistantReply {
            commands: extract_fenced_commands(&raw),
            explanation: raw.clone(),
            confidence: FALLBACK_CONFIDENCE,
            warnings: vec!["Provider response was not structured; commands were extracted heuristically".into()],
            raw_response: raw,
        },
    };

    classify_commands(&mut reply);
    reply
}

/// Try the whole answer as JSON, then any fenced JSON block.
fn parse_structured(raw: &str) -> Option<StructuredResponse> {
    let trimmed = raw.trim();
    if let Ok(parsed) = serde_json::from_str(trimmed) {
        return Some(parsed);
    }

    for block in fenced_blocks(raw) {
        if let Ok(parsed) = serde_json::from_str(block.trim()) {
            return Some(parsed);
        }
    }
    None
}

/// Contents of every ``` fence, language tag stripped.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let Some(end) = after.find("```") else { break };
        let block = &after[..end];
        // Drop a language tag on the opening fence line
        let body = match block.find('\n') {
            Some(nl) if !block[..nl].trim().contains(' ') => &block[nl + 1..],
            _ => block,
        };
        blocks.push(body);
        rest = &after[end + 3..];
    }
    blocks
}

/// Non-empty, non-comment lines of every fenced block.
fn extract_fenced_commands(text: &str) -> Vec<String> {
    fenced_blocks(text)
        .iter()
        .flat_map(|block| block.lines())
        .map(|line| line.trim().trim_start_matches("$ ").trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn classify_commands(reply: &mut AssistantReply) {
    let flagged: Vec<String> = reply
        .commands
        .iter()
        .filter(|c| is_dangerous(c))
        .cloned()
        .collect();
    for command in flagged {
        push_danger_warning(reply, &command);
    }
}

fn push_danger_warning(reply: &mut AssistantReply, command: &str) {
    reply
        .warnings
        .push(format!("High-risk command: `{}`. Review before running", command));
    reply.confidence = reply.confidence.min(REDUCED_CONFIDENCE);
}
