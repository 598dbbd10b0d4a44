use crate::{ChatRequest, LlmProvider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use tracker_core::{CoreError, LlmError};

const PROVIDER: &str = "openai";

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
#[derive(Debug)]
pub struct OpenAiProvider {
    http_client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, CoreError> {
        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn map_status(&self, status: StatusCode, retry_after: Option<u64>) -> CoreError {
        let error = match status.as_u16() {
            401 | 403 => LlmError::InvalidApiKey {
                provider: PROVIDER.to_string(),
            },
            404 => LlmError::ModelNotAvailable {
                model: self.model.clone(),
            },
            429 => LlmError::RateLimitExceeded {
                provider: PROVIDER.to_string(),
                retry_after: retry_after.unwrap_or(60),
            },
            code => LlmError::ServiceUnavailable {
                provider: PROVIDER.to_string(),
                status_code: code,
            },
        };
        error.into()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, CoreError> {
        let body = CompletionBody {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let start_time = Instant::now();
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::Llm(LlmError::RequestTimeout {
                        provider: PROVIDER.to_string(),
                    })
                } else {
                    CoreError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok());
            warn!("LLM request failed with status {} for {}", status, self.model);
            return Err(self.map_status(status, retry_after));
        }

        let completion: CompletionResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse completion response: {}", e);
            CoreError::Llm(LlmError::InvalidResponseFormat {
                provider: PROVIDER.to_string(),
            })
        })?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponseFormat {
                provider: PROVIDER.to_string(),
            })?;

        debug!(
            "LLM completion from {} in {:?} ({} chars)",
            self.model,
            start_time.elapsed(),
            text.len()
        );
        Ok(text)
    }
}
