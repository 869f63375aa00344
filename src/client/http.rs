//! Gemini HTTP Client
//!
//! A client bound to a single API key. The key manager owns one per configured key.

use crate::api::{ApiErrorEnvelope, GenerateContentRequest, GenerateContentResponse};
use crate::config::{credentials_from_env, GeminiConfig};
use crate::error::{Result, UgliError};
use crate::router::{is_rate_limit_response, mask_credential, KeyManager, SystemClock};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Header carrying the API key
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Longest upstream body excerpt kept in error messages
const MAX_ERROR_BODY_CHARS: usize = 500;

/// HTTP client bound to one Gemini API key
pub struct GeminiClient {
    /// Shared reqwest client (one connection pool for all keys)
    http: Client,

    api_key: HeaderValue,

    masked_key: String,

    base_url: String,

    max_retries: u32,
}

impl GeminiClient {
    /// Create a client for `api_key`
    pub fn new(
        http: Client,
        api_key: &str,
        base_url: impl Into<String>,
        max_retries: u32,
    ) -> Result<Self> {
        let mut header = HeaderValue::from_str(api_key).map_err(|_| {
            UgliError::Config(format!(
                "Invalid API key format for {}",
                mask_credential(api_key)
            ))
        })?;
        header.set_sensitive(true);

        Ok(Self {
            http,
            api_key: header,
            masked_key: mask_credential(api_key),
            base_url: base_url.into(),
            max_retries,
        })
    }

    /// Build the shared reqwest client from config
    pub fn build_http(config: &GeminiConfig) -> Result<Client> {
        Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| UgliError::Internal(format!("Failed to create HTTP client: {}", e)))
    }

    /// Masked form of the bound key
    pub fn masked_key(&self) -> &str {
        &self.masked_key
    }

    /// Call `models/{model}:generateContent`.
    ///
    /// Connection failures and timeouts are retried on this same key with exponential
    /// backoff. Rate limiting is returned as [`UgliError::RateLimited`] without retrying,
    /// so the caller can rotate to another key.
    pub async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        );

        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(10))
            .with_max_elapsed_time(Some(Duration::from_secs(60)))
            .build();
        let mut retries = 0;

        loop {
            let response = self
                .http
                .post(&url)
                .header(API_KEY_HEADER, self.api_key.clone())
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .json(request)
                .send()
                .await;

            match response {
                Ok(resp) => return self.handle_response(resp).await,
                Err(e) if (e.is_connect() || e.is_timeout()) && retries < self.max_retries => {
                    let Some(wait) = backoff.next_backoff() else {
                        return Err(e.into());
                    };
                    retries += 1;
                    debug!(
                        key = %self.masked_key,
                        retries,
                        wait_ms = wait.as_millis() as u64,
                        "Gemini request failed to connect, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn handle_response(&self, resp: Response) -> Result<GenerateContentResponse> {
        let status = resp.status();
        let body = resp.text().await?;

        if status.is_success() {
            let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
                UgliError::Response(format!(
                    "Failed to parse response: {}. Body: {}",
                    e,
                    excerpt(&body)
                ))
            })?;
            if let Some(reason) = parsed.block_reason() {
                return Err(UgliError::Response(format!("Prompt blocked: {}", reason)));
            }
            return Ok(parsed);
        }

        let message = error_message(&body);

        if is_rate_limit_response(status.as_u16(), &body) {
            return Err(UgliError::RateLimited {
                key: self.masked_key.clone(),
                message,
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(UgliError::Auth {
                key: self.masked_key.clone(),
                message,
            });
        }

        Err(UgliError::Upstream {
            status: status.as_u16(),
            message,
        })
    }
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("key", &self.masked_key)
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl KeyManager<GeminiClient> {
    /// Build the process-wide key manager from environment credentials.
    ///
    /// All clients share one reqwest connection pool.
    pub fn from_env(config: &GeminiConfig) -> Result<Self> {
        let credentials = credentials_from_env(&config.credentials);
        Self::from_credentials(credentials, config)
    }

    /// Build a key manager over explicit credentials
    pub fn from_credentials(credentials: Vec<String>, config: &GeminiConfig) -> Result<Self> {
        let http = GeminiClient::build_http(config)?;
        let base_url = config.get_base_url();

        KeyManager::try_new(
            credentials,
            config.key_manager.clone(),
            Arc::new(SystemClock),
            |key| GeminiClient::new(http.clone(), key, base_url.clone(), config.max_retries),
        )
    }
}

/// Prefer the API's own error message over the raw body
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => envelope.error.message,
        _ => excerpt(body),
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
