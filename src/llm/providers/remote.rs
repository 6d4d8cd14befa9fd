use crate::config::LlmConfig;
use crate::llm::{ChatCompletion, ChatMessage, Embedder, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// OpenAI-compatible chat completion and embedding endpoints
pub struct RemoteLlmProvider {
    client: reqwest::Client,
    api_url: String,
    embedding_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct PromptRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: usize,
}

#[derive(Deserialize)]
struct PromptResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl RemoteLlmProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config.api_url.clone().ok_or_else(|| {
            LlmError::ConfigError("API URL is required for remote LLM provider".to_string())
        })?;

        let api_key = config.api_key.clone().ok_or_else(|| {
            LlmError::ConfigError("API key is required for remote LLM provider".to_string())
        })?;

        let embedding_url = config
            .embedding_url
            .clone()
            .unwrap_or_else(|| derive_embedding_url(&api_url));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            embedding_url,
            api_key,
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone().unwrap_or_default(),
            temperature: config.temperature,
        })
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<String, LlmError> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            error!("API responded with status code: {} - {}", status, error_body);
            return Err(LlmError::ResponseError(format!(
                "API responded with status code: {}",
                status
            )));
        }

        response
            .text()
            .await
            .map_err(|e| LlmError::ResponseError(format!("Failed to read response body: {}", e)))
    }
}

// https://api.openai.com/v1/chat/completions -> https://api.openai.com/v1/embeddings
fn derive_embedding_url(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    match trimmed.strip_suffix("/chat/completions") {
        Some(base) => format!("{}/embeddings", base),
        None => format!("{}/embeddings", trimmed),
    }
}

fn parse_chat_response(body: &str) -> Result<String, LlmError> {
    let prompt_response: PromptResponse =
        serde_json::from_str(body).map_err(|e| LlmError::ResponseError(e.to_string()))?;

    let choice = prompt_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::ResponseError("No choices in response".to_string()))?;

    choice
        .message
        .content
        .ok_or_else(|| LlmError::ResponseError("Choice has no message content".to_string()))
}

fn parse_embedding_response(body: &str) -> Result<Vec<f32>, LlmError> {
    let embedding_response: EmbeddingResponse =
        serde_json::from_str(body).map_err(|e| LlmError::ResponseError(e.to_string()))?;

    embedding_response
        .data
        .into_iter()
        .next()
        .map(|data| data.embedding)
        .ok_or_else(|| LlmError::ResponseError("No embedding in response".to_string()))
}

#[async_trait]
impl ChatCompletion for RemoteLlmProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let request = PromptRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: 2000,
        };

        debug!("Sending {} messages to {}", messages.len(), self.api_url);
        let body = self.post(&self.api_url, &request).await?;
        parse_chat_response(&body)
    }
}

#[async_trait]
impl Embedder for RemoteLlmProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: text,
        };

        let body = self.post(&self.embedding_url, &request).await?;
        parse_embedding_response(&body)
    }

    fn model(&self) -> &str {
        &self.embedding_model
    }
}
