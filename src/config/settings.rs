//! Gemini Configuration
//!
//! Defines the configuration schema for the Gemini client and its key manager.

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// Base URL for the Generative Language API
    pub base_url: String,

    /// Optional environment variable that overrides `base_url`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_env: Option<String>,

    /// Model used for text generation
    pub text_model: String,

    /// Model used for image generation and editing
    pub image_model: String,

    /// Whole-request timeout; image generation can be slow
    pub request_timeout_secs: u64,

    pub connect_timeout_secs: u64,

    /// Retries on the same key for connection failures
    pub max_retries: u32,

    /// Key health policy
    pub key_manager: KeyManagerConfig,

    /// Where credentials are read from
    pub credentials: CredentialSources,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_base_env: Some("GEMINI_API_BASE".to_string()),
            text_model: "gemini-2.0-flash".to_string(),
            image_model: "gemini-2.0-flash-preview-image-generation".to_string(),
            request_timeout_secs: 300,
            connect_timeout_secs: 10,
            max_retries: 2,
            key_manager: KeyManagerConfig::default(),
            credentials: CredentialSources::default(),
        }
    }
}

impl GeminiConfig {
    /// Get the effective base URL (from env var if configured, otherwise default)
    pub fn get_base_url(&self) -> String {
        if let Some(env_var) = &self.api_base_env {
            if let Ok(url) = std::env::var(env_var) {
                if !url.trim().is_empty() {
                    return url;
                }
            }
        }
        self.base_url.clone()
    }
}

/// Health policy for the key manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeyManagerConfig {
    /// Consecutive errors after which a key is skipped
    pub max_consecutive_errors: u32,

    /// How long after its last error a skipped key gets another chance
    pub error_cooldown_secs: u64,

    /// How long a rate-limited key stays out of rotation
    pub rate_limit_backoff_secs: u64,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 5,
            error_cooldown_secs: 60,
            rate_limit_backoff_secs: 60,
        }
    }
}

impl KeyManagerConfig {
    pub fn error_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(secs_to_i64(self.error_cooldown_secs))
    }

    pub fn rate_limit_backoff(&self) -> chrono::Duration {
        chrono::Duration::seconds(secs_to_i64(self.rate_limit_backoff_secs))
    }
}

/// chrono durations are capped well below `i64::MAX` seconds
fn secs_to_i64(secs: u64) -> i64 {
    const MAX_SECS: i64 = i64::MAX / 1000;
    i64::try_from(secs).unwrap_or(MAX_SECS).min(MAX_SECS)
}

/// Environment variable names holding Gemini credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CredentialSources {
    /// Comma-separated list of keys; takes priority
    pub keys_env: String,

    /// Single key, used only when the list is empty
    pub key_env: String,

    /// Checked when `key_env` is unset or empty
    pub fallback_key_env: String,
}

impl Default for CredentialSources {
    fn default() -> Self {
        Self {
            keys_env: "GEMINI_API_KEYS".to_string(),
            key_env: "GEMINI_API_KEY".to_string(),
            fallback_key_env: "GOOGLE_API_KEY".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_partial_config() {
        let json = r#"{
            "image_model": "gemini-2.5-flash-image",
            "key_manager": {
                "max_consecutive_errors": 3
            }
        }"#;

        let config: GeminiConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.image_model, "gemini-2.5-flash-image");
        assert_eq!(config.text_model, "gemini-2.0-flash");
        assert_eq!(config.key_manager.max_consecutive_errors, 3);
        assert_eq!(config.key_manager.error_cooldown_secs, 60);
        assert_eq!(config.credentials.keys_env, "GEMINI_API_KEYS");
    }

    #[test]
    fn test_key_manager_durations() {
        let config = KeyManagerConfig::default();
        assert_eq!(config.error_cooldown(), chrono::Duration::seconds(60));
        assert_eq!(config.rate_limit_backoff(), chrono::Duration::seconds(60));

        let huge = KeyManagerConfig {
            rate_limit_backoff_secs: u64::MAX,
            ..Default::default()
        };
        assert!(huge.rate_limit_backoff() > chrono::Duration::days(365));
    }

    #[test]
    fn test_base_url_without_override() {
        let config = GeminiConfig {
            api_base_env: None,
            ..Default::default()
        };
        assert_eq!(
            config.get_base_url(),
            "https://generativelanguage.googleapis.com/v1beta"
        );
    }
}
