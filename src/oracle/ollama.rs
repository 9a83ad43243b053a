use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::openai::post_with_retry;
use super::{ChatMessage, ChatOptions, ChatProvider, Embedder};
use crate::error::{Result, SifterError};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .map_err(|e| SifterError::Config(format!("Failed to build HTTP client: {}", e)))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: ModelOptions,
}

#[derive(Serialize)]
struct ModelOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// Local Ollama chat client
pub struct OllamaChat {
    client: Client,
    model: String,
    base_url: String,
}

impl OllamaChat {
    pub fn new(model: String, base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl ChatProvider for OllamaChat {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            format: options.json.then_some("json"),
            options: ModelOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let response: ChatResponse =
            post_with_retry(&self.client, &url, &[], &request, SifterError::Oracle).await?;
        Ok(response.message.content)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Local Ollama embeddings client
pub struct OllamaEmbedder {
    client: Client,
    model: String,
    batch_size: usize,
    base_url: String,
}

impl OllamaEmbedder {
    pub fn new(model: String, batch_size: usize, base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            model,
            batch_size: batch_size.max(1),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let request = EmbedRequest {
                model: &self.model,
                input: chunk,
            };
            let response: EmbedResponse =
                post_with_retry(&self.client, &url, &[], &request, SifterError::Embedding).await?;
            if response.embeddings.len() != chunk.len() {
                return Err(SifterError::Embedding(format!(
                    "Expected {} embeddings, got {}",
                    chunk.len(),
                    response.embeddings.len()
                )));
            }
            all.extend(response.embeddings);
        }
        Ok(all)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_shape() {
        let messages = [ChatMessage::user("hello")];
        let request = ChatRequest {
            model: "llama3",
            messages: &messages,
            stream: false,
            format: Some("json"),
            options: ModelOptions { temperature: 0.2, num_predict: 64 },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["stream"], false);
        assert_eq!(value["format"], "json");
        assert_eq!(value["options"]["num_predict"], 64);
    }

    #[test]
    fn test_default_base_url() {
        let embedder = OllamaEmbedder::new("nomic-embed-text".into(), 0, None).unwrap();
        assert_eq!(embedder.base_url, DEFAULT_BASE_URL);
        assert_eq!(embedder.batch_size, 1);
    }
}
