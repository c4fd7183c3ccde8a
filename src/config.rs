//! Environment-driven configuration.
//!
//! Everything is read once at startup from the process environment (with
//! `.env` support via dotenvy in `main`). Per-battle knobs come in through
//! the create-battle request, not from here; this file only holds process
//! level defaults and credentials.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default model used when an agent config names the hosted provider
/// without a model id.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

/// Default model for the self-hosted provider.
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";

/// Default delay between turns when a battle does not specify one.
pub const DEFAULT_TURN_DELAY: Duration = Duration::from_secs(3);

/// Hosted (Anthropic messages API) provider settings.
#[derive(Clone)]
pub struct AnthropicConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            model: DEFAULT_ANTHROPIC_MODEL.to_string(),
        }
    }
}

/// Self-hosted (Ollama chat API) provider settings.
#[derive(Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: DEFAULT_OLLAMA_MODEL.to_string(),
        }
    }
}

/// Postgres settings. Absent `DATABASE_URL` means the process runs on the
/// in-memory store: battles still work, they just don't survive a restart.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: usize,
}

/// Top-level process configuration.
#[derive(Clone)]
pub struct Config {
    pub anthropic: AnthropicConfig,
    pub ollama: OllamaConfig,
    pub database: Option<DatabaseConfig>,
    /// Directory where per-agent brain documents live.
    pub brains_dir: PathBuf,
}

impl Config {
    /// Read configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut anthropic = AnthropicConfig::default();
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                anthropic.api_key = Some(SecretString::from(key));
            }
        }
        if let Ok(url) = std::env::var("ANTHROPIC_BASE_URL") {
            anthropic.base_url = url;
        }
        if let Ok(model) = std::env::var("ANTHROPIC_MODEL") {
            anthropic.model = model;
        }

        let mut ollama = OllamaConfig::default();
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            ollama.base_url = url;
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            ollama.model = model;
        }

        let database = match std::env::var("DATABASE_URL") {
            Ok(url) if !url.is_empty() => {
                let pool_size = match std::env::var("DATABASE_POOL_SIZE") {
                    Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                        key: "DATABASE_POOL_SIZE".to_string(),
                        reason: format!("not a number: {raw}"),
                    })?,
                    Err(_) => 8,
                };
                Some(DatabaseConfig { url, pool_size })
            }
            _ => None,
        };

        let brains_dir = match std::env::var("AGON_BRAINS_DIR") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("agon")
                .join("brains"),
        };

        Ok(Self {
            anthropic,
            ollama,
            database,
            brains_dir,
        })
    }
}
