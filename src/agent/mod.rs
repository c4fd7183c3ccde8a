//! An arena participant: identity, persona, memory, and a bound provider.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::brain::{Brain, BrainStore};
use crate::error::ProviderError;
use crate::events::AgentSummary;
use crate::llm::{ChatMessage, ChatProvider, ProviderKind};

/// At most this many knowledge entries are surfaced into a prompt.
const KNOWLEDGE_LIMIT: usize = 30;

/// At most this many (most recent) episodic memories are surfaced.
const MEMORY_LIMIT: usize = 10;

/// Input surface for building one agent, as accepted by battle creation.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    /// Shown to spectators and other participants; defaults to `name`.
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    /// Static persona text.
    #[serde(default)]
    pub soul: Option<String>,
    /// Individual directive, used only on this agent's first turn.
    #[serde(default)]
    pub directive: Option<String>,
    /// Inline memory document; takes precedence over `brain_path`.
    #[serde(default)]
    pub brain: Option<Brain>,
    /// On-disk memory document; relative paths resolve under the configured
    /// brains directory.
    #[serde(default)]
    pub brain_path: Option<PathBuf>,
    /// Base URL override for the chosen provider.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Suppresses the self-identification line in the system prompt.
    #[serde(default)]
    pub anonymous: bool,
}

/// A conversational agent bound to one provider.
///
/// The brain is owned exclusively by the agent: it is loaded once at battle
/// initialization, mutated only through [`Agent::add_memory`], and written
/// back once when the battle completes.
pub struct Agent {
    pub name: String,
    pub display_name: String,
    pub anonymous: bool,
    pub soul: Option<String>,
    pub directive: Option<String>,
    provider: Arc<dyn ChatProvider>,
    brain: Option<Brain>,
    brain_path: Option<PathBuf>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        provider: Arc<dyn ChatProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            anonymous: false,
            soul: None,
            directive: None,
            provider,
            brain: None,
            brain_path: None,
        }
    }

    pub fn with_soul(mut self, soul: Option<String>) -> Self {
        self.soul = soul;
        self
    }

    pub fn with_directive(mut self, directive: Option<String>) -> Self {
        self.directive = directive;
        self
    }

    pub fn with_anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    /// Attach an in-memory brain document.
    pub fn with_brain(mut self, brain: Brain) -> Self {
        self.brain = Some(brain);
        self
    }

    /// Attach an on-disk memory source.
    pub fn with_brain_path(mut self, path: PathBuf) -> Self {
        self.brain_path = Some(path);
        self
    }

    pub fn model(&self) -> &str {
        self.provider.model_name()
    }

    /// The bound provider handle, for callers that snapshot it rather than
    /// hold the agent locked across a call.
    pub fn provider(&self) -> &Arc<dyn ChatProvider> {
        &self.provider
    }

    pub fn brain(&self) -> Option<&Brain> {
        self.brain.as_ref()
    }

    pub fn brain_mut(&mut self) -> Option<&mut Brain> {
        self.brain.as_mut()
    }

    pub fn has_memory(&self) -> bool {
        self.brain.is_some()
    }

    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            name: self.display_name.clone(),
            model: self.model().to_string(),
            has_memory: self.has_memory(),
        }
    }

    /// Load the brain from storage unless one is already in memory.
    ///
    /// Missing or malformed documents degrade to an empty brain; this never
    /// fails the battle.
    pub fn load_brain(&mut self) {
        if self.brain.is_none() {
            if let Some(path) = &self.brain_path {
                self.brain = Some(BrainStore::load_path(path));
            }
        }
    }

    /// Write the brain back to its storage path, best-effort.
    pub fn save_brain(&self) {
        let (Some(brain), Some(path)) = (&self.brain, &self.brain_path) else {
            return;
        };
        if let Err(e) = BrainStore::save_path(path, brain) {
            tracing::warn!(agent = %self.name, error = %e, "failed to persist brain");
        }
    }

    /// Append a timestamped episodic memory, creating the brain if absent.
    pub fn add_memory(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.brain.get_or_insert_default().add_memory(key, value);
    }

    /// Compose the layered system directive.
    ///
    /// Sections, in order, each omitted when its source is absent:
    /// self-identification (unless anonymous), soul, brain fallback soul
    /// (only without a soul), knowledge (first 30), recent memories (last
    /// 10), counter summary. `None` when every section is absent, so callers
    /// never send an empty system directive.
    pub fn compose_system_prompt(&self) -> Option<String> {
        let mut sections: Vec<String> = Vec::new();

        if !self.anonymous {
            sections.push(format!("You are {}.", self.display_name));
        }

        if let Some(soul) = &self.soul {
            sections.push(soul.clone());
        } else if let Some(soul) = self.brain.as_ref().and_then(|b| b.soul.as_ref()) {
            sections.push(soul.clone());
        }

        if let Some(brain) = &self.brain {
            if !brain.knowledge.is_empty() {
                let mut lines = vec!["What you know:".to_string()];
                for (key, entry) in brain.knowledge.iter().take(KNOWLEDGE_LIMIT) {
                    let label = entry.name.as_deref().unwrap_or(key);
                    lines.push(format!("{label}: {}", entry.definition));
                }
                sections.push(lines.join("\n"));
            }

            if !brain.memories.is_empty() {
                let mut lines = vec!["Your recent memories:".to_string()];
                for entry in brain.recent_memories(MEMORY_LIMIT) {
                    lines.push(format!("{}: {}", entry.key, entry.value));
                }
                sections.push(lines.join("\n"));
            }

            if !brain.stats.is_empty() {
                let rendered: Vec<String> = brain
                    .stats
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                sections.push(format!("Running totals: {}.", rendered.join(", ")));
            }
        }

        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }

    /// Ask the bound provider for this agent's next message.
    ///
    /// Provider failures propagate unchanged: no retry, no fallback content.
    pub async fn respond(&self, history: &[ChatMessage]) -> Result<String, ProviderError> {
        let system = self.compose_system_prompt();
        self.provider.chat(history, system.as_deref()).await
    }
}
