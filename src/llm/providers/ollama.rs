use crate::config::LlmConfig;
use crate::llm::{ChatCompletion, ChatMessage, Embedder, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

pub struct OllamaProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
    embedding_model: String,
    temperature: f32,
}

#[derive(Serialize, Debug)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize, Debug)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize, Debug)]
struct OllamaMessage {
    content: String,
}

#[derive(Serialize, Debug)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize, Debug)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string())
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone().unwrap_or_default(),
            temperature: config.temperature,
        })
    }

    async fn post<T: Serialize + std::fmt::Debug>(
        &self,
        path: &str,
        request: &T,
    ) -> Result<String, LlmError> {
        let url = format!("{}{}", self.api_url, path);
        debug!("Sending request to Ollama at {}: {:?}", url, request);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            // Try to get the error message from the response body
            let error_body = match response.text().await {
                Ok(body) => format!(" - Response body: {}", body),
                Err(_) => String::new(),
            };

            error!("Ollama API responded with status code: {}{}", status, error_body);
            return Err(LlmError::ResponseError(format!(
                "Ollama API responded with status code: {}{}",
                status, error_body
            )));
        }

        response
            .text()
            .await
            .map_err(|e| LlmError::ResponseError(format!("Failed to read response body: {}", e)))
    }
}

fn parse_chat_response(response_text: &str) -> Result<String, LlmError> {
    match serde_json::from_str::<OllamaChatResponse>(response_text) {
        Ok(resp) => Ok(resp.message.content),
        Err(e) => {
            error!("Failed to parse Ollama response: {} - Response was: {}", e, response_text);
            Err(LlmError::ResponseError(format!(
                "Failed to parse Ollama response: {} - Response was: {}",
                e, response_text
            )))
        }
    }
}

fn parse_embed_response(response_text: &str) -> Result<Vec<f32>, LlmError> {
    let parsed: OllamaEmbedResponse = serde_json::from_str(response_text)
        .map_err(|e| LlmError::ResponseError(format!("Failed to parse Ollama embedding: {}", e)))?;

    parsed
        .embeddings
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::ResponseError("Ollama returned no embeddings".to_string()))
}

#[async_trait]
impl ChatCompletion for OllamaProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        info!("Sending chat request to Ollama with model: {}", self.model);

        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false, // Explicitly disable streaming
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response_text = self.post("/api/chat", &request).await?;
        debug!("Raw response from Ollama: {}", response_text);

        parse_chat_response(&response_text)
    }
}

#[async_trait]
impl Embedder for OllamaProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = OllamaEmbedRequest {
            model: &self.embedding_model,
            input: text,
        };

        let response_text = self.post("/api/embed", &request).await?;
        parse_embed_response(&response_text)
    }

    fn model(&self) -> &str {
        &self.embedding_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_response_ignores_extra_fields() {
        let body = r#"{"model":"llama3","created_at":"2024-01-01T00:00:00Z","message":{"role":"assistant","content":"CONVERSATIONAL"},"done":true}"#;
        assert_eq!(parse_chat_response(body).unwrap(), "CONVERSATIONAL");
    }

    #[test]
    fn test_parse_chat_response_reports_body_on_failure() {
        let err = parse_chat_response(r#"{"error":"model not found"}"#).unwrap_err();
        assert!(err.to_string().contains("model not found"));
    }

    #[test]
    fn test_parse_embed_response_takes_first_vector() {
        let body = r#"{"model":"nomic-embed-text","embeddings":[[0.1,0.2],[0.3,0.4]]}"#;
        assert_eq!(parse_embed_response(body).unwrap(), vec![0.1, 0.2]);
        assert!(parse_embed_response(r#"{"embeddings":[]}"#).is_err());
    }

    #[test]
    fn test_default_url_has_no_trailing_slash() {
        let config = LlmConfig {
            backend: "ollama".to_string(),
            model: "llama3".to_string(),
            embedding_model: None,
            api_key: None,
            api_url: Some("http://ollama:11434/".to_string()),
            embedding_url: None,
            temperature: 0.1,
            timeout_secs: 60,
        };
        let provider = OllamaProvider::new(&config).unwrap();
        assert_eq!(provider.api_url, "http://ollama:11434");
    }
}
