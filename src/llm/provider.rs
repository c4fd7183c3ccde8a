//! The provider contract: message history + system directive -> reply text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Who a message belongs to, from the addressed agent's point of view.
///
/// The scheduler re-derives each agent's view of the shared transcript every
/// turn, so roles are relative to the agent being asked to reply, not global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Spoken by the addressed agent itself.
    Own,
    /// Spoken by any other participant.
    Other,
}

/// One entry in an agent's view of the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn own(content: impl Into<String>) -> Self {
        Self {
            role: Role::Own,
            content: content.into(),
        }
    }

    pub fn other(content: impl Into<String>) -> Self {
        Self {
            role: Role::Other,
            content: content.into(),
        }
    }
}

/// Which backend variant an agent is bound to.
///
/// Adding a backend means adding a variant here and an arm in
/// [`create_provider`](crate::llm::create_provider), nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Hosted messages API with the system directive as a separate field.
    #[default]
    Anthropic,
    /// Self-hosted chat API with the system directive folded into the
    /// message list.
    Ollama,
}

/// A chat completion backend.
///
/// Implementations surface every failure (network, non-2xx, unparsable
/// body) as a [`ProviderError`] and never retry internally; the battle loop
/// owns the failure policy.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Produce the next reply for the given per-agent history.
    ///
    /// `system` is `None` when the agent has no identity sections at all;
    /// implementations must not send an empty system directive in that case.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        system: Option<&str>,
    ) -> Result<String, ProviderError>;

    /// Model identifier recorded on every turn this provider produces.
    fn model_name(&self) -> &str;
}
