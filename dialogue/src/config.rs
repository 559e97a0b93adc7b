//! Startup configuration for the dialogue session.

use llm::BackendConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Full application configuration. Every section has working defaults, so a
/// missing config file means "run with defaults".
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub index: IndexConfig,
    pub world: WorldConfig,
    pub trace: TraceConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Base URL of the external similarity index service.
    pub base_url: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8900".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub entities: PathBuf,
    pub edges: PathBuf,
    pub facts: PathBuf,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            entities: PathBuf::from("data/entities.json"),
            edges: PathBuf::from("data/edges.json"),
            facts: PathBuf::from("data/world_facts.json"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub output_dir: PathBuf,
    pub viewer_port: u16,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("trace"),
            viewer_port: 8765,
        }
    }
}

impl AppConfig {
    /// Load from a TOML file, or fall back to defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Ok(toml::from_str(&text)?)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.backend.provider, "gemini");
        assert_eq!(config.trace.viewer_port, 8765);
        assert_eq!(config.world.entities, PathBuf::from("data/entities.json"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [backend]
            provider = "lmstudio"

            [backend.lmstudio]
            port = 4321
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.provider, "lmstudio");
        assert_eq!(config.backend.lmstudio.port, 4321);
        assert_eq!(config.backend.lmstudio.host, "localhost");
        assert_eq!(config.index.base_url, "http://127.0.0.1:8900");
    }
}
