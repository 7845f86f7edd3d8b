use async_trait::async_trait;
use clinical_core::AgentKind;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::stream::Chunk;

/// Role of a message in a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: ModelRole,
    pub content: String,
}

impl ModelMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ModelRole::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: ModelRole::Model,
            content: content.into(),
        }
    }
}

/// A tool/function declaration surfaced to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool call the model asked the caller to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Coarse safety category knob, independent of any single provider's exact
/// taxonomy; the reference provider maps these onto its own wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyCategory {
    SelfHarm,
    Harassment,
    HateSpeech,
    DangerousContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: SafetyCategory,
    pub threshold: clinical_core::config::SafetyThreshold,
}

/// A request to generate content.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system_instruction: String,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDeclaration>,
    pub safety_settings: Vec<SafetySetting>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Raw provider-shaped message blocks, used when a caller (e.g. the
    /// tool loop) needs structured content the `ModelMessage` shape can't
    /// represent. Overrides `messages` when set.
    pub raw_messages: Option<Vec<serde_json::Value>>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, system_instruction: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_instruction: system_instruction.into(),
            messages: Vec::new(),
            tools: Vec::new(),
            safety_settings: Vec::new(),
            temperature: 0.7,
            max_output_tokens: 4096,
            raw_messages: None,
        }
    }
}

/// Response from a one-shot (non-streaming) generation call.
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
    pub tool_calls: Vec<ToolCall>,
    pub grounding_urls: Vec<String>,
    /// Set when the caller cancelled the call before the model finished;
    /// `content` holds whatever was produced up to that point.
    pub incomplete: bool,
}

/// Errors signaled by a model client.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("context too large: {0} tokens over the model's window")]
    ContextTooLarge(usize),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Transient(_)
        )
    }
}

/// An in-memory handle for a multi-turn conversation. The client itself is stateless HTTP; the handle is what
/// carries continuation state between turns.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    pub agent: AgentKind,
    pub history: Vec<ModelMessage>,
}

/// Common interface implemented by every LLM backend.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;

    /// One-shot call — used for routing, entity extraction, confirmations.
    async fn generate(
        &self,
        req: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationResponse, ProviderError>;

    /// Stream response chunks through `tx`. Default implementation falls
    /// back to `generate` and emits the whole response as one `TextDelta`
    /// followed by `End`.
    async fn stream_generate(
        &self,
        req: &GenerationRequest,
        tx: mpsc::Sender<Chunk>,
        cancel: CancellationToken,
    ) -> Result<(), ProviderError> {
        let resp = self.generate(req, cancel).await?;
        let _ = tx
            .send(Chunk::TextDelta {
                text: resp.content,
            })
            .await;
        for url in resp.grounding_urls {
            let _ = tx.send(Chunk::GroundingRef { url }).await;
        }
        let _ = tx
            .send(Chunk::Usage {
                tokens_in: resp.tokens_in,
                tokens_out: resp.tokens_out,
            })
            .await;
        let _ = tx
            .send(Chunk::End {
                model: resp.model,
                stop_reason: resp.stop_reason,
                incomplete: resp.incomplete,
            })
            .await;
        Ok(())
    }

    /// Open a new chat handle seeded with existing history.
    fn create_chat(&self, agent: AgentKind, history: Vec<ModelMessage>) -> ChatHandle {
        ChatHandle { agent, history }
    }
}
