//! Configuration Loader
//!
//! Loads the Gemini configuration from defaults and JSON files, and discovers
//! credentials from the environment.

use crate::config::settings::{CredentialSources, GeminiConfig};
use crate::error::{Result, UgliError};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    /// Merged JSON document; deserialized into `GeminiConfig` at the end
    merged: Value,
}

impl ConfigLoader {
    /// Create a new config loader and load from default locations
    pub fn new() -> Result<Self> {
        let mut loader = Self::with_defaults()?;
        loader.load_from_default_paths()?;
        Ok(loader)
    }

    /// Create a loader with a specific config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut loader = Self::with_defaults()?;
        loader.load_from_file(path)?;
        Ok(loader)
    }

    fn with_defaults() -> Result<Self> {
        let merged = serde_json::to_value(GeminiConfig::default()).map_err(|e| {
            UgliError::Config(format!("Failed to serialize default configuration: {}", e))
        })?;
        Ok(Self { merged })
    }

    /// Load configuration from default paths
    fn load_from_default_paths(&mut self) -> Result<()> {
        for path in Self::get_config_paths() {
            if path.exists() {
                self.load_from_file(&path)?;
            }
        }

        Ok(())
    }

    /// Get list of config paths to check, lowest priority first
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".ugli").join("gemini.json"));
        }

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("ugli").join("gemini.json"));
        }

        paths.push(PathBuf::from("ugli.json"));

        if let Ok(custom_path) = std::env::var("UGLI_CONFIG_PATH") {
            paths.push(PathBuf::from(custom_path));
        }

        paths
    }

    /// Load configuration from a specific file
    fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            UgliError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let overlay: Value = serde_json::from_str(&content).map_err(|e| {
            UgliError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        if !overlay.is_object() {
            return Err(UgliError::Config(format!(
                "{} must contain a JSON object",
                path.display()
            )));
        }

        merge_json(&mut self.merged, overlay);
        Ok(())
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> Result<GeminiConfig> {
        serde_json::from_value(self.merged)
            .map_err(|e| UgliError::Config(format!("Invalid configuration: {}", e)))
    }
}

/// Recursively merge `overlay` into `base`; objects merge key by key, anything else replaces
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Resolve the ordered credential list.
///
/// The comma-separated list wins when it yields at least one entry. Otherwise the single
/// key variable is used, then its fallback. Blank values count as unset.
pub fn load_credentials<F>(sources: &CredentialSources, lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let listed: Vec<String> = lookup(sources.keys_env.as_str())
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if !listed.is_empty() {
        return listed;
    }

    [&sources.key_env, &sources.fallback_key_env]
        .into_iter()
        .filter_map(|name| lookup(name.as_str()))
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
        .into_iter()
        .collect()
}

/// Resolve credentials from the process environment
pub fn credentials_from_env(sources: &CredentialSources) -> Vec<String> {
    load_credentials(sources, |name| std::env::var(name).ok())
}
