use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ChatMessage, ChatOptions, ChatProvider, Embedder};
use crate::error::{Result, SifterError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_RETRIES: usize = 3;
/// Largest input list the embeddings endpoint accepts
const MAX_EMBEDDING_BATCH: usize = 2048;

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SifterError::Config(format!("Failed to build HTTP client: {}", e)))
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// POST a JSON body, retrying 429 and 5xx responses with exponential backoff.
///
/// `wrap` turns a message into the caller's error variant so chat and embedding
/// failures stay distinguishable.
pub(crate) async fn post_with_retry<B, R>(
    client: &Client,
    url: &str,
    headers: &[(&str, String)],
    body: &B,
    wrap: fn(String) -> SifterError,
) -> Result<R>
where
    B: Serialize + ?Sized,
    R: for<'de> Deserialize<'de>,
{
    let start = std::time::Instant::now();
    let mut attempt = 0;
    let mut delay = Duration::from_secs(1);

    loop {
        let mut request = client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| wrap(format!("Network error: {}", e)))?;
        let status = response.status();

        if status.is_success() {
            log::debug!("POST {} took {:?} (attempt {})", url, start.elapsed(), attempt + 1);
            return response
                .json::<R>()
                .await
                .map_err(|e| wrap(format!("Failed to parse response: {}", e)));
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());

        if is_retryable(status) && attempt < MAX_RETRIES {
            log::warn!("Retry {}/{} after {} from {}", attempt + 1, MAX_RETRIES, status, url);
            tokio::time::sleep(delay).await;
            delay *= 2;
            attempt += 1;
            continue;
        }

        return Err(wrap(format!("API error {}: {}", status, body)));
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI chat completions client
pub struct OpenAIChat {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIChat {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(120))?,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAIChat {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: options.json.then_some(ResponseFormat { kind: "json_object" }),
        };
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];

        let response: ChatResponse =
            post_with_retry(&self.client, &url, &headers, &request, SifterError::Oracle).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SifterError::Oracle("Empty response from OpenAI".to_string()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI embeddings client
///
/// Splits large inputs into batches of at most `batch_size` texts.
pub struct OpenAIEmbedder {
    client: Client,
    api_key: String,
    model: String,
    batch_size: usize,
    base_url: String,
}

impl OpenAIEmbedder {
    pub fn new(
        api_key: String,
        model: String,
        batch_size: usize,
        base_url: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(30))?,
            api_key,
            model,
            batch_size: batch_size.clamp(1, MAX_EMBEDDING_BATCH),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];

        let mut response: EmbeddingResponse =
            post_with_retry(&self.client, &url, &headers, &request, SifterError::Embedding).await?;

        if response.data.len() != texts.len() {
            return Err(SifterError::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }
        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            all.extend(self.embed_chunk(chunk).await?);

            // pace full batches to stay under rate limits
            if chunk.len() == self.batch_size {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
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
    fn test_embedder_batch_size_limit() {
        let embedder =
            OpenAIEmbedder::new("test-key".into(), "text-embedding-3-small".into(), 5000, None).unwrap();
        assert_eq!(embedder.batch_size, 2048);
        assert_eq!(embedder.base_url, DEFAULT_BASE_URL);

        let embedder = OpenAIEmbedder::new("k".into(), "m".into(), 0, None).unwrap();
        assert_eq!(embedder.batch_size, 1);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_chat_request_json_mode() {
        let messages = [ChatMessage::user("hi")];
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            temperature: 0.0,
            max_tokens: 10,
            response_format: Some(ResponseFormat { kind: "json_object" }),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_embed_empty_input_makes_no_request() {
        let embedder = OpenAIEmbedder::new("k".into(), "m".into(), 10, Some("http://127.0.0.1:9".into())).unwrap();
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }
}
