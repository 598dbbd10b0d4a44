use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Content mirror error: {0}")]
    Mirror(#[from] MirrorError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

#[derive(Error, Debug, Clone)]
pub enum MirrorError {
    #[error("{endpoint} request failed (HTTP {status_code}){}", format_detail(.detail))]
    RequestFailed {
        endpoint: String,
        status_code: u16,
        detail: String,
    },

    #[error("Invalid JSON response from {endpoint}")]
    InvalidJson { endpoint: String },

    #[error("Unexpected {endpoint} response format")]
    UnexpectedFormat { endpoint: String },

    #[error("Request timeout for {endpoint}")]
    RequestTimeout { endpoint: String },

    #[error("All time windows failed for r/{subreddit}: {last_error}")]
    AllWindowsFailed {
        subreddit: String,
        last_error: String,
    },
}

fn format_detail(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {detail}")
    }
}

#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("API key invalid or missing for {provider}")]
    InvalidApiKey { provider: String },

    #[error("Rate limit exceeded for {provider}. Retry after {retry_after} seconds")]
    RateLimitExceeded { provider: String, retry_after: u64 },

    #[error("Model not available: {model}")]
    ModelNotAvailable { model: String },

    #[error("Provider service unavailable: {provider} (HTTP {status_code})")]
    ServiceUnavailable { provider: String, status_code: u16 },

    #[error("Request timeout for {provider}")]
    RequestTimeout { provider: String },

    #[error("Invalid response format from {provider}")]
    InvalidResponseFormat { provider: String },

    #[error("Model output is not valid JSON for {context}")]
    UnparsableOutput { context: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}
