pub mod models;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use models::{ChatMessage, ChatRole};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    ConnectionError(String),
    #[error("LLM response error: {0}")]
    ResponseError(String),
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
}

/// Chat completion capability: ordered messages in, assistant text out.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

/// Text embedding capability
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    /// Model identifier, part of every embedding cache key
    fn model(&self) -> &str;
}

pub struct LlmManager {
    chat: Arc<dyn ChatCompletion>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let manager = match config.backend.as_str() {
            "remote" => {
                let provider = Arc::new(providers::remote::RemoteLlmProvider::new(config)?);
                Self::from_provider(provider, config.embedding_model.is_some())
            }
            "ollama" => {
                let provider = Arc::new(providers::ollama::OllamaProvider::new(config)?);
                Self::from_provider(provider, config.embedding_model.is_some())
            }
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        Ok(manager)
    }

    fn from_provider<P>(provider: Arc<P>, embeddings: bool) -> Self
    where
        P: ChatCompletion + Embedder + 'static,
    {
        let embedder: Option<Arc<dyn Embedder>> = if embeddings {
            Some(provider.clone())
        } else {
            None
        };

        Self {
            chat: provider,
            embedder,
        }
    }

    pub fn chat(&self) -> Arc<dyn ChatCompletion> {
        Arc::clone(&self.chat)
    }

    pub fn embedder(&self) -> Option<Arc<dyn Embedder>> {
        self.embedder.clone()
    }
}
