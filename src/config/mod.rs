//! Configuration Module
//!
//! Handles Gemini configuration loading and credential discovery.

pub mod loader;
pub mod settings;

pub use loader::{credentials_from_env, load_credentials, ConfigLoader};
pub use settings::{CredentialSources, GeminiConfig, KeyManagerConfig};
