pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use tracker_core::{CoreError, LlmConfig};

pub use openai::OpenAiProvider;

/// One chat-completion call: a system and a user prompt with the sampling
/// budget for that call type.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.2,
            max_tokens: 1000,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the raw text of the first completion choice.
    async fn complete(&self, request: &ChatRequest) -> Result<String, CoreError>;
}

/// Builds the configured provider, or `None` when no API key is set.
pub fn provider_from_config(config: &LlmConfig) -> Result<Option<Arc<dyn LlmProvider>>, CoreError> {
    match config.api_key() {
        Some(api_key) => {
            let provider = OpenAiProvider::new(
                api_key.to_string(),
                config.model.clone(),
                config.base_url.clone(),
                std::time::Duration::from_secs(config.timeout_secs),
            )?;
            Ok(Some(Arc::new(provider)))
        }
        None => {
            tracing::info!("No LLM API key configured; analysis will use the heuristic fallback");
            Ok(None)
        }
    }
}
