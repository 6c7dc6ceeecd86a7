//! Error types for steward.

use thiserror::Error;

/// Primary error type for all steward operations.
#[derive(Error, Debug)]
pub enum StewardError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Tool \"{0}\" not found in registry.")]
    ToolNotFound(String),

    #[error("Invalid parameters for tool {tool_name}: {message}")]
    InvalidToolParams { tool_name: String, message: String },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    EmptyResponse(String),

    #[error("Failed to parse API response as JSON: {0}")]
    UnparsableResponse(String),

    #[error("Token count unavailable for model {0}")]
    TokenLimitUnknown(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    RateLimit,
    Network,
    Timeout,
    Server,
    Api,
    Configuration,
    Serialization,
    Tool,
    Cancelled,
    Response,
    Unknown,
}

impl StewardError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// HTTP-ish status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Authentication(_) => Some(401),
            Self::Network(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::ToolNotFound(_) | Self::InvalidToolParams { .. } | Self::ToolExecution { .. } => {
                ErrorCategory::Tool
            }
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::EmptyResponse(_) | Self::UnparsableResponse(_) => ErrorCategory::Response,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable (rate limits and server faults).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Server
        )
    }

    /// Whether this error is a 429.
    pub fn is_rate_limit(&self) -> bool {
        self.category() == ErrorCategory::RateLimit
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, StewardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_and_rate_limit_errors_are_retryable() {
        assert!(StewardError::api(503, "unavailable").is_retryable());
        assert!(StewardError::RateLimited {
            retry_after_ms: None
        }
        .is_retryable());
        assert!(StewardError::api(429, "slow down").is_rate_limit());
    }

    #[test]
    fn client_and_tool_errors_are_not_retryable() {
        assert!(!StewardError::api(400, "bad request").is_retryable());
        assert!(!StewardError::ToolNotFound("x".into()).is_retryable());
        assert!(!StewardError::Cancelled.is_retryable());
    }

    #[test]
    fn tool_not_found_message_names_the_tool() {
        let err = StewardError::ToolNotFound("grep".into());
        assert_eq!(err.to_string(), "Tool \"grep\" not found in registry.");
    }
}
