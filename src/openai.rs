use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{PipelineError, Result};

/// Prompt text in, generated text out.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    /// One vector per input, in input order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible API. Requests are sent once; failures are
/// returned to the caller as-is.
#[derive(Clone)]
pub struct OpenAiClient {
    config: ModelConfig,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_endpoint.trim_end_matches('/'), path)
    }

    async fn post<T: Serialize + Sync, R: DeserializeOwned>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<R> {
        let api_key = self.config.api_key()?;
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(api_key)
            .json(payload)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        decode_response(status, &body)
    }
}

/// Non-success statuses become `HttpStatus` carrying the body text.
fn decode_response<R: DeserializeOwned>(status: reqwest::StatusCode, body: &[u8]) -> Result<R> {
    if !status.is_success() {
        return Err(PipelineError::HttpStatus {
            status,
            body: String::from_utf8_lossy(body).into_owned(),
        });
    }
    Ok(serde_json::from_slice(body)?)
}

/// Content of the first choice; a missing, null or blank reply is an error.
fn completion_text(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(PipelineError::EmptyResponse)
}

fn ordered_embeddings(expected: usize, mut response: EmbeddingResponse) -> Result<Vec<Vec<f32>>> {
    if response.data.len() != expected {
        return Err(PipelineError::EmbeddingCountMismatch {
            expected,
            actual: response.data.len(),
        });
    }

    response.data.sort_by_key(|item| item.index);
    Ok(response.data.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl CompletionModel for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.chat_model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
        };
        debug!(model = %self.config.chat_model, prompt_chars = prompt.len(), "sending completion");

        let response: ChatResponse = self.post("chat/completions", &request).await?;
        completion_text(response)
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.config.embedding_model
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            input: inputs,
        };
        let response: EmbeddingResponse = self.post("embeddings", &request).await?;
        ordered_embeddings(inputs.len(), response)
    }
}
