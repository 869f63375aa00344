//! UGLI Gemini - Gemini API access for UGLI's generation features
//!
//! Spreads outbound generation requests across several Gemini API keys with
//! health-aware round-robin, so per-key rate limits and failing keys are routed around.

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod router;

pub use api::{GenerateContentRequest, GenerateContentResponse, InlineData, Part};
pub use client::GeminiClient;
pub use config::{ConfigLoader, GeminiConfig, KeyManagerConfig};
pub use error::{Result, UgliError};
pub use router::{KeyHandle, KeyManager, KeySnapshot, KeyStats, Lease};

/// Generation service: every upstream call goes through the key manager
pub struct GeminiService {
    config: GeminiConfig,

    /// Shared, process-wide key pool
    keys: Arc<KeyManager<GeminiClient>>,
}

impl GeminiService {
    /// Build the service from `.env`, config files and environment credentials
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let config = ConfigLoader::new()?.into_config()?;
        let keys = KeyManager::from_env(&config)?;
        Ok(Self::new(config, Arc::new(keys)))
    }

    /// Create a service around an existing key manager
    pub fn new(config: GeminiConfig, keys: Arc<KeyManager<GeminiClient>>) -> Self {
        Self { config, keys }
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    /// The key manager shared by this service
    pub fn keys(&self) -> &Arc<KeyManager<GeminiClient>> {
        &self.keys
    }

    /// Send a generateContent request, rotating keys on rate limits.
    ///
    /// Each attempt reports its outcome to the key manager exactly once. Errors other than
    /// rate limits are returned immediately.
    pub async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let max_attempts = self.keys.len().max(1);
        let mut last_error = None;

        for _ in 0..max_attempts {
            let lease = self.keys.next_client()?;
            let handle = lease.handle();

            match lease.client().generate_content(model, request).await {
                Ok(response) => {
                    self.keys.report_success(&handle);
                    return Ok(response);
                }
                Err(err) if err.is_rate_limited() => {
                    self.keys.report_rate_limit(&handle);
                    last_error = Some(err);
                }
                Err(err) => {
                    self.keys.report_error(&handle, &err);
                    return Err(err);
                }
            }
        }

        Err(last_error.unwrap_or(UgliError::NoCredentials))
    }

    /// Generate text with the configured text model
    pub async fn generate_text(&self, prompt: &str) -> Result<String> {
        let request = GenerateContentRequest::from_parts(vec![Part::text(prompt)]);
        let response = self
            .generate_content(&self.config.text_model, &request)
            .await?;

        let text = response.text();
        if text.is_empty() {
            return Err(UgliError::Response("Gemini returned no text".to_string()));
        }
        Ok(text)
    }

    /// Generate or edit an image with the configured image model.
    ///
    /// `images` are sent after the prompt as inline data; the first image in the
    /// response is returned.
    pub async fn generate_image(
        &self,
        prompt: &str,
        images: Vec<InlineData>,
    ) -> Result<InlineData> {
        let mut parts = vec![Part::text(prompt)];
        parts.extend(images.into_iter().map(|image| Part {
            text: None,
            inline_data: Some(image),
        }));
        let request = GenerateContentRequest::from_parts(parts).with_image_output();

        let response = self
            .generate_content(&self.config.image_model, &request)
            .await?;

        response
            .images()
            .first()
            .map(|image| (*image).clone())
            .ok_or_else(|| UgliError::Response("Gemini returned no image".to_string()))
    }

    /// Pool statistics
    pub fn key_stats(&self) -> KeyStats {
        self.keys.stats()
    }

    /// Per-key diagnostics
    pub fn key_snapshot(&self) -> Vec<KeySnapshot> {
        self.keys.snapshot()
    }
}

/// Install a fmt subscriber filtered by `UGLI_LOG`, then `RUST_LOG`, defaulting to `info`.
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("UGLI_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_ONE: &str = "AIzaKeyNumberOne00";
    const KEY_TWO: &str = "AIzaKeyNumberTwo00";

    fn service(base_url: &str, keys: &[&str]) -> GeminiService {
        let config = GeminiConfig {
            base_url: base_url.to_string(),
            api_base_env: None,
            text_model: "text-model".to_string(),
            image_model: "image-model".to_string(),
            max_retries: 0,
            ..Default::default()
        };
        let manager = KeyManager::from_credentials(
            keys.iter().map(|k| k.to_string()).collect(),
            &config,
        )
        .unwrap();
        GeminiService::new(config, Arc::new(manager))
    }

    fn text_body(text: &str) -> String {
        serde_json::json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_rotates_to_next_key_on_rate_limit() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("POST", "/models/text-model:generateContent")
            .match_header("x-goog-api-key", KEY_ONE)
            .with_status(429)
            .with_body(r#"{"error":{"code":429,"message":"Resource has been exhausted"}}"#)
            .expect(1)
            .create_async()
            .await;
        let healthy = server
            .mock("POST", "/models/text-model:generateContent")
            .match_header("x-goog-api-key", KEY_TWO)
            .with_status(200)
            .with_body(text_body("hello"))
            .expect(1)
            .create_async()
            .await;

        let service = service(&server.url(), &[KEY_ONE, KEY_TWO]);
        let text = service.generate_text("hi").await.unwrap();
        assert_eq!(text, "hello");

        let snapshot = service.key_snapshot();
        assert!(snapshot[0].rate_limited_until.is_some());
        assert_eq!(snapshot[0].error_count, 0);
        assert!(snapshot[1].rate_limited_until.is_none());

        let stats = service.key_stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.available_keys, 1);

        limited.assert_async().await;
        healthy.assert_async().await;
    }

    #[tokio::test]
    async fn test_generic_error_reported_once_and_returned() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/text-model:generateContent")
            .with_status(500)
            .with_body("boom")
            .expect(1)
            .create_async()
            .await;

        let service = service(&server.url(), &[KEY_ONE, KEY_TWO]);
        let err = service.generate_text("hi").await.unwrap_err();
        assert!(matches!(err, UgliError::Upstream { status: 500, .. }));

        let snapshot = service.key_snapshot();
        assert_eq!(snapshot[0].error_count, 1);
        assert!(snapshot[0].last_error_at.is_some());
        assert!(snapshot[0].rate_limited_until.is_none());
        assert_eq!(snapshot[1].request_count, 0);
    }

    #[tokio::test]
    async fn test_all_keys_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/text-model:generateContent")
            .with_status(429)
            .expect(2)
            .create_async()
            .await;

        let service = service(&server.url(), &[KEY_ONE, KEY_TWO]);
        let err = service.generate_text("hi").await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(service.key_stats().available_keys, 0);
        assert_eq!(service.key_stats().rate_limited_keys, 2);
    }

    #[tokio::test]
    async fn test_successive_requests_spread_across_keys() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/text-model:generateContent")
            .with_status(200)
            .with_body(text_body("ok"))
            .expect(4)
            .create_async()
            .await;

        let service = service(&server.url(), &[KEY_ONE, KEY_TWO]);
        for _ in 0..4 {
            service.generate_text("hi").await.unwrap();
        }

        assert!(service.key_snapshot().iter().all(|s| s.request_count == 2));
    }

    #[tokio::test]
    async fn test_no_credentials_fails_cleanly() {
        let service = service("http://127.0.0.1:1", &[]);

        let err = service.generate_text("hi").await.unwrap_err();
        assert!(matches!(err, UgliError::NoCredentials));
        assert_eq!(service.key_stats().total_keys, 0);
    }

    #[tokio::test]
    async fn test_generate_image() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/image-model:generateContent")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "generationConfig": {"responseModalities": ["TEXT", "IMAGE"]}
            })))
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "candidates": [{"content": {"parts": [
                        {"text": "done"},
                        {"inlineData": {"mimeType": "image/png", "data": "cG5n"}}
                    ]}}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let service = service(&server.url(), &[KEY_ONE]);
        let source = InlineData {
            mime_type: "image/jpeg".to_string(),
            data: "anBn".to_string(),
        };
        let image = service
            .generate_image("remove the background", vec![source])
            .await
            .unwrap();

        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, "cG5n");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_image_without_image_in_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/image-model:generateContent")
            .with_status(200)
            .with_body(text_body("I can't draw that"))
            .create_async()
            .await;

        let service = service(&server.url(), &[KEY_ONE]);
        let err = service.generate_image("draw", Vec::new()).await.unwrap_err();
        assert!(matches!(err, UgliError::Response(_)));
        // The upstream call itself succeeded
        assert_eq!(service.key_snapshot()[0].error_count, 0);
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
