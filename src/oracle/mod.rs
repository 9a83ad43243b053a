//! External text-understanding services: chat models used for segmentation and sentence
//! marking, and embedding models.
//!
//! Everything an oracle returns is treated as untrusted and verified by the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{api_key_from_env, EmbeddingsConfig, OracleConfig, ProviderKind};
use crate::error::{Result, SifterError};

pub mod anthropic;
pub mod llm;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicChat;
pub use llm::LlmOracle;
pub use ollama::{OllamaChat, OllamaEmbedder};
pub use openai::{OpenAIChat, OpenAIEmbedder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for a JSON object reply when it supports that mode.
    pub json: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 4096,
            json: true,
        }
    }
}

/// A chat-completion backend
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String>;

    fn model(&self) -> &str;
}

/// An embedding backend
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn model(&self) -> &str;
}

/// A verbatim anchor around a suggested break: the last words before it and the first
/// words after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakSuggestion {
    #[serde(alias = "endPhrase", default)]
    pub end_phrase: String,
    #[serde(alias = "startPhrase", default)]
    pub start_phrase: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakPlan {
    #[serde(default)]
    pub breaks: Vec<BreakSuggestion>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
}

/// Suggests meaning-based paragraph breaks
#[async_trait]
pub trait SegmentationOracle: Send + Sync {
    async fn suggest_breaks(
        &self,
        text: &str,
        language: Option<&str>,
        target_chunks: usize,
    ) -> Result<BreakPlan>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerRequest {
    pub id: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkedParagraph {
    pub id: usize,
    pub marked_text: String,
    pub sentence_count: usize,
}

/// Adds sentence markers to paragraphs
#[async_trait]
pub trait MarkerOracle: Send + Sync {
    async fn add_sentence_markers(
        &self,
        paragraphs: &[MarkerRequest],
        language: Option<&str>,
    ) -> Result<Vec<MarkedParagraph>>;
}

/// Build the configured chat provider
pub fn chat_provider(config: &OracleConfig) -> Result<Arc<dyn ChatProvider>> {
    let api_key = api_key_from_env(config.api_key_env.as_deref())
        .map_err(|e| SifterError::Config(e.to_string()))?;
    let base_url = config.base_url.clone();
    let model = config.model.clone();

    let provider: Arc<dyn ChatProvider> = match config.provider {
        ProviderKind::OpenAi => Arc::new(OpenAIChat::new(require_key(api_key, "openai")?, model, base_url)?),
        ProviderKind::Anthropic => {
            Arc::new(AnthropicChat::new(require_key(api_key, "anthropic")?, model, base_url)?)
        }
        ProviderKind::Ollama => Arc::new(OllamaChat::new(model, base_url)?),
    };
    Ok(provider)
}

/// Build the configured embedder
pub fn embedder(config: &EmbeddingsConfig) -> Result<Arc<dyn Embedder>> {
    let api_key = api_key_from_env(config.api_key_env.as_deref())
        .map_err(|e| SifterError::Config(e.to_string()))?;
    let base_url = config.base_url.clone();
    let model = config.model.clone();

    let embedder: Arc<dyn Embedder> = match config.provider {
        ProviderKind::OpenAi => Arc::new(OpenAIEmbedder::new(
            require_key(api_key, "openai")?,
            model,
            config.batch_size,
            base_url,
        )?),
        ProviderKind::Ollama => Arc::new(OllamaEmbedder::new(model, config.batch_size, base_url)?),
        ProviderKind::Anthropic => {
            return Err(SifterError::Config(
                "anthropic does not provide an embeddings API".to_string(),
            ))
        }
    };
    Ok(embedder)
}

/// Segmentation and marker oracles backed by the configured chat model
pub fn llm_oracle(config: &OracleConfig) -> Result<Arc<LlmOracle>> {
    let provider = chat_provider(config)?;
    let options = ChatOptions {
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        json: true,
    };
    Ok(Arc::new(LlmOracle::new(provider, options)))
}

fn require_key(key: Option<String>, provider: &str) -> Result<String> {
    key.ok_or_else(|| SifterError::Config(format!("{} requires api_key_env", provider)))
}
