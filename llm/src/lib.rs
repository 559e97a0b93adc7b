//! Generative text backend clients.
//!
//! This crate provides the single-method backend contract the dialogue
//! pipeline depends on, with two interchangeable implementations:
//! - `GeminiBackend` for the hosted Google Generative Language API
//! - `LmStudioBackend` for a local OpenAI-compatible chat completion server

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
const GEMINI_API_KEY_VAR: &str = "GEMINI_API_KEY";

const DEFAULT_LMSTUDIO_HOST: &str = "localhost";
const DEFAULT_LMSTUDIO_PORT: u16 = 1234;
const DEFAULT_LMSTUDIO_MODEL: &str = "default";

/// Errors that can occur when talking to a generative backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Single-method contract for generative text backends.
///
/// The dialogue core depends only on this trait; which concrete backend
/// answers is decided once at startup from configuration.
#[async_trait]
pub trait TextBackend: Send + Sync {
    /// Generate a completion for the given prompt.
    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;

    /// Get the backend name, for logging.
    fn name(&self) -> &str;
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .connect_timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client")
}

// ============================================================================
// Gemini (hosted)
// ============================================================================

/// Hosted Google Generative Language backend.
#[derive(Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiBackend {
    /// Create a new backend with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.into(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
        }
    }

    /// Create a backend from the GEMINI_API_KEY environment variable.
    pub fn from_env() -> Result<Self, BackendError> {
        let api_key = std::env::var(GEMINI_API_KEY_VAR).map_err(|_| BackendError::NoApiKey)?;
        Ok(Self::new(api_key))
    }

    /// Set the model for this backend.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl TextBackend for GeminiBackend {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let url = format!(
            "{GEMINI_API_BASE}/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status,
                message: body,
            });
        }

        let api_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        let text = api_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| BackendError::Parse("response contained no candidates".to_string()))?;

        Ok(text)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

// ============================================================================
// LM Studio (local)
// ============================================================================

/// Local LM Studio backend speaking the OpenAI chat-completion protocol.
#[derive(Clone)]
pub struct LmStudioBackend {
    client: reqwest::Client,
    api_url: String,
    model: String,
}

impl LmStudioBackend {
    /// Create a backend pointed at a local LM Studio server.
    pub fn new(host: &str, port: u16, model: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_url: format!("http://{host}:{port}/v1/chat/completions"),
            model: model.into(),
        }
    }
}

impl Default for LmStudioBackend {
    fn default() -> Self {
        Self::new(
            DEFAULT_LMSTUDIO_HOST,
            DEFAULT_LMSTUDIO_PORT,
            DEFAULT_LMSTUDIO_MODEL,
        )
    }
}

#[async_trait]
impl TextBackend for LmStudioBackend {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: 0.7,
            max_tokens: 2048,
            stream: false,
        };

        let response = self
            .client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Network(format!("{} ({e})", self.api_url)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status,
                message: body,
            });
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        let text = api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| BackendError::Parse("response contained no choices".to_string()))?;

        Ok(text)
    }

    fn name(&self) -> &str {
        "lmstudio"
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

// ============================================================================
// Configuration
// ============================================================================

/// Backend selection and per-backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Which backend to use: "gemini" or "lmstudio".
    pub provider: String,
    pub gemini: GeminiConfig,
    pub lmstudio: LmStudioConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            gemini: GeminiConfig::default(),
            lmstudio: LmStudioConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub model: String,
    /// API key; falls back to the GEMINI_API_KEY environment variable.
    pub api_key: Option<String>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LmStudioConfig {
    pub host: String,
    pub port: u16,
    pub model: String,
}

impl Default for LmStudioConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_LMSTUDIO_HOST.to_string(),
            port: DEFAULT_LMSTUDIO_PORT,
            model: DEFAULT_LMSTUDIO_MODEL.to_string(),
        }
    }
}

/// Build the configured backend.
///
/// An unrecognized provider name is a configuration error and should be
/// treated as fatal at startup.
pub fn backend_from_config(config: &BackendConfig) -> Result<Arc<dyn TextBackend>, BackendError> {
    match config.provider.as_str() {
        "gemini" => {
            let backend = match &config.gemini.api_key {
                Some(key) => GeminiBackend::new(key),
                None => GeminiBackend::from_env()?,
            };
            Ok(Arc::new(backend.with_model(&config.gemini.model)))
        }
        "lmstudio" => Ok(Arc::new(LmStudioBackend::new(
            &config.lmstudio.host,
            config.lmstudio.port,
            &config.lmstudio.model,
        ))),
        other => Err(BackendError::Config(format!(
            "Unknown provider: {other}. Must be 'gemini' or 'lmstudio'."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_backend_creation() {
        let backend = GeminiBackend::new("test-key");
        assert_eq!(backend.model, DEFAULT_GEMINI_MODEL);
        assert_eq!(backend.name(), "gemini");
    }

    #[test]
    fn test_gemini_with_model() {
        let backend = GeminiBackend::new("test-key").with_model("gemini-1.5-pro");
        assert_eq!(backend.model, "gemini-1.5-pro");
    }

    #[test]
    fn test_lmstudio_url() {
        let backend = LmStudioBackend::new("localhost", 1234, "default");
        assert_eq!(backend.api_url, "http://localhost:1234/v1/chat/completions");
        assert_eq!(backend.name(), "lmstudio");
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let config = BackendConfig {
            provider: "mystery".to_string(),
            ..Default::default()
        };
        let result = backend_from_config(&config);
        assert!(matches!(result, Err(BackendError::Config(_))));
    }

    #[test]
    fn test_lmstudio_from_config() {
        let config = BackendConfig {
            provider: "lmstudio".to_string(),
            ..Default::default()
        };
        let backend = backend_from_config(&config).unwrap();
        assert_eq!(backend.name(), "lmstudio");
    }
}
