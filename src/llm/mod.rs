//! Chat completion backends.
//!
//! Two variants behind one trait:
//! - **Anthropic** (hosted): messages API, system directive as a separate field
//! - **Ollama** (self-hosted): chat API, system directive folded into the
//!   message list

mod anthropic;
mod ollama;
mod provider;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use provider::{ChatMessage, ChatProvider, ProviderKind, Role};

use std::sync::Arc;

use crate::config::Config;
use crate::error::ProviderError;

/// Build a provider for one agent.
///
/// `model` and `endpoint` override the configured per-provider defaults when
/// an agent config carries them.
pub fn create_provider(
    kind: ProviderKind,
    config: &Config,
    model: Option<&str>,
    endpoint: Option<&str>,
) -> Result<Arc<dyn ChatProvider>, ProviderError> {
    match kind {
        ProviderKind::Anthropic => {
            let mut cfg = config.anthropic.clone();
            if let Some(model) = model {
                cfg.model = model.to_string();
            }
            if let Some(endpoint) = endpoint {
                cfg.base_url = endpoint.to_string();
            }
            tracing::info!(model = %cfg.model, "binding agent to hosted messages API");
            Ok(Arc::new(AnthropicProvider::new(cfg)?))
        }
        ProviderKind::Ollama => {
            let mut cfg = config.ollama.clone();
            if let Some(model) = model {
                cfg.model = model.to_string();
            }
            if let Some(endpoint) = endpoint {
                cfg.base_url = endpoint.to_string();
            }
            tracing::info!(model = %cfg.model, url = %cfg.base_url, "binding agent to self-hosted chat API");
            Ok(Arc::new(OllamaProvider::new(cfg)))
        }
    }
}
