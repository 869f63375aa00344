//! Error types for UGLI Gemini operations

use thiserror::Error;

/// Main error type
#[derive(Debug, Error)]
pub enum UgliError {
    /// Configuration error (bad config file, invalid header value, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The key manager was built with an empty pool
    #[error(
        "Configuration error: no credentials configured. Set GEMINI_API_KEYS (comma-separated) or GEMINI_API_KEY"
    )]
    NoCredentials,

    /// Upstream rejected the key for rate limit or quota reasons
    #[error("Key {key} rate limited by Gemini: {message}")]
    RateLimited { key: String, message: String },

    /// Authentication failed (revoked or invalid key)
    #[error("Authentication failed for key {key}: {message}")]
    Auth { key: String, message: String },

    /// HTTP request could not be sent
    #[error("Request failed: {0}")]
    Request(String),

    /// Timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Non-success status from the upstream API
    #[error("Gemini API returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Response was received but is unusable
    #[error("Response error: {0}")]
    Response(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl UgliError {
    /// Whether the upstream call that produced this error should rotate to another key
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, UgliError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for UgliError {
    fn from(err: reqwest::Error) -> Self {
        // URLs end in ":generateContent", which would trip the rate-limit heuristic.
        let err = err.without_url();
        if err.is_timeout() {
            UgliError::Timeout(err.to_string())
        } else if err.is_connect() {
            UgliError::Request(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            UgliError::Response(format!("Failed to decode response: {}", err))
        } else {
            UgliError::Request(err.to_string())
        }
    }
}

impl From<serde_json::Error> for UgliError {
    fn from(err: serde_json::Error) -> Self {
        UgliError::Response(format!("JSON parsing error: {}", err))
    }
}

impl From<std::io::Error> for UgliError {
    fn from(err: std::io::Error) -> Self {
        UgliError::Config(format!("IO error: {}", err))
    }
}

/// Result type alias for UGLI operations
pub type Result<T> = std::result::Result<T, UgliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::looks_like_rate_limit_error;

    #[test]
    fn test_no_credentials_message() {
        let msg = UgliError::NoCredentials.to_string();
        assert!(msg.contains("no credentials configured"));
    }

    #[test]
    fn test_rate_limited_feeds_heuristic() {
        let err = UgliError::RateLimited {
            key: "AIzaSyAB***".to_string(),
            message: "Resource has been exhausted".to_string(),
        };
        assert!(err.is_rate_limited());
        assert!(looks_like_rate_limit_error(&err.to_string()));
    }

    #[test]
    fn test_upstream_error_is_not_rate_limit() {
        let err = UgliError::Upstream {
            status: 500,
            message: "internal".to_string(),
        };
        assert!(!err.is_rate_limited());
        assert!(!looks_like_rate_limit_error(&err.to_string()));
    }
}
