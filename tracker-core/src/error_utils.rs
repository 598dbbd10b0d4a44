use crate::error::*;
use tracing::{error, warn};

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        match self {
            CoreError::Mirror(e) => {
                error!("Content mirror error details: {:?}", e);
            }
            CoreError::Llm(e) => {
                error!("LLM error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::Mirror(e) => e.is_retryable(),
            CoreError::Llm(e) => e.is_retryable(),
            CoreError::Network(_) => true,
            _ => false,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::Mirror(e) => e.user_friendly_message(),
            CoreError::Llm(e) => e.user_friendly_message(),
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            CoreError::InvalidInput { message } => message.clone(),
            _ => "An unexpected error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::Mirror(_) => "MIRROR".to_string(),
            CoreError::Llm(_) => "LLM".to_string(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
        }
    }
}

impl ErrorExt for MirrorError {
    fn log_error(&self) -> &Self {
        error!("MirrorError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("MirrorError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            MirrorError::RequestFailed { status_code, .. } => {
                *status_code == 429 || *status_code >= 500
            }
            MirrorError::RequestTimeout { .. } => true,
            MirrorError::AllWindowsFailed { .. } => true,
            _ => false,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            MirrorError::RequestFailed { status_code, .. } if *status_code == 429 => {
                "The Reddit mirror is rate limiting requests. Please wait and try again."
                    .to_string()
            }
            MirrorError::RequestFailed { .. } => {
                "The Reddit mirror rejected the request. Please try again later.".to_string()
            }
            MirrorError::RequestTimeout { .. } => {
                "Request to the Reddit mirror timed out. Please try again.".to_string()
            }
            MirrorError::AllWindowsFailed { subreddit, .. } => format!(
                "Could not fetch any posts for r/{}. Check the subreddit name or try again later.",
                subreddit
            ),
            _ => "The Reddit mirror returned an unexpected response.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            MirrorError::RequestFailed { .. } => "MIRROR_REQUEST_FAILED".to_string(),
            MirrorError::InvalidJson { .. } => "MIRROR_INVALID_JSON".to_string(),
            MirrorError::UnexpectedFormat { .. } => "MIRROR_UNEXPECTED_FORMAT".to_string(),
            MirrorError::RequestTimeout { .. } => "MIRROR_TIMEOUT".to_string(),
            MirrorError::AllWindowsFailed { .. } => "MIRROR_ALL_WINDOWS_FAILED".to_string(),
        }
    }
}

impl ErrorExt for LlmError {
    fn log_error(&self) -> &Self {
        error!("LlmError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("LlmError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimitExceeded { .. }
                | LlmError::ServiceUnavailable { .. }
                | LlmError::RequestTimeout { .. }
        )
    }

    fn user_friendly_message(&self) -> String {
        match self {
            LlmError::InvalidApiKey { provider } => format!(
                "Invalid API key for {}. Please update your credentials.",
                provider
            ),
            LlmError::RateLimitExceeded {
                provider,
                retry_after,
            } => format!(
                "Rate limit exceeded for {}. Please wait {} seconds.",
                provider, retry_after
            ),
            LlmError::ModelNotAvailable { model } => format!(
                "Model '{}' is not available. Please try a different model.",
                model
            ),
            LlmError::ServiceUnavailable { provider, .. } => format!(
                "{} service is temporarily unavailable. Please try again later.",
                provider
            ),
            _ => "AI service error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            LlmError::InvalidApiKey { .. } => "LLM_INVALID_API_KEY".to_string(),
            LlmError::RateLimitExceeded { .. } => "LLM_RATE_LIMIT".to_string(),
            LlmError::ModelNotAvailable { .. } => "LLM_MODEL_NOT_AVAILABLE".to_string(),
            LlmError::ServiceUnavailable { .. } => "LLM_SERVICE_UNAVAILABLE".to_string(),
            LlmError::RequestTimeout { .. } => "LLM_TIMEOUT".to_string(),
            LlmError::InvalidResponseFormat { .. } => "LLM_INVALID_RESPONSE".to_string(),
            LlmError::UnparsableOutput { .. } => "LLM_UNPARSABLE_OUTPUT".to_string(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn log_error(&self) -> &Self {
        error!("ConfigError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("ConfigError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::FileNotFound { path } => {
                format!("Configuration file '{}' not found.", path)
            }
            ConfigError::InvalidValue { field, .. } => {
                format!("Invalid value for configuration field '{}'.", field)
            }
            ConfigError::ValidationFailed { reason } => {
                format!("Configuration is invalid: {}", reason)
            }
            ConfigError::Parse(_) => {
                "Configuration file format is invalid. Please check the settings.".to_string()
            }
        }
    }

    fn error_code(&self) -> String {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND".to_string(),
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE".to_string(),
            ConfigError::ValidationFailed { .. } => "CONFIG_VALIDATION_FAILED".to_string(),
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR".to_string(),
        }
    }
}

/// Resolves a fallible sub-operation whose failure must not abort the caller.
///
/// The error is logged as a warning together with `context` and the
/// default value of `T` is returned in its place.
pub fn best_effort<T: Default>(result: Result<T, CoreError>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(error) => {
            warn!(
                "{} failed, continuing without it ({}): {}",
                context,
                error.error_code(),
                error
            );
            T::default()
        }
    }
}
