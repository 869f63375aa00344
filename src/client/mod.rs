//! Client Module
//!
//! HTTP client bound to a single Gemini API key.

pub mod http;

pub use http::GeminiClient;
