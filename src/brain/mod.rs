//! Per-agent durable memory documents.
//!
//! A brain carries everything an agent remembers across battles: a fallback
//! persona, a knowledge base, episodic memories, and aggregate counters.
//! It is loaded once when a battle initializes, mutated in memory while the
//! battle runs, and written back once at completion, never partially
//! flushed mid-battle.

mod store;

pub use store::BrainStore;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One entry in the knowledge base, keyed externally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeEntry {
    /// Display name; the key is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub definition: String,
}

/// One episodic memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

/// An agent's memory document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Brain {
    /// Fallback persona, used only when the agent has no soul of its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soul: Option<String>,
    /// Insertion-ordered knowledge base.
    #[serde(default)]
    pub knowledge: IndexMap<String, KnowledgeEntry>,
    /// Episodic memories, insertion-ordered, unbounded.
    #[serde(default)]
    pub memories: Vec<MemoryEntry>,
    /// Aggregate counters, e.g. total conversations.
    #[serde(default)]
    pub stats: IndexMap<String, u64>,
}

impl Brain {
    /// Append a timestamped episodic memory.
    pub fn add_memory(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.memories.push(MemoryEntry {
            key: key.into(),
            value: value.into(),
            timestamp: Utc::now(),
        });
    }

    /// The most recent `n` memories, in original insertion order.
    pub fn recent_memories(&self, n: usize) -> &[MemoryEntry] {
        let start = self.memories.len().saturating_sub(n);
        &self.memories[start..]
    }

    /// Increment an aggregate counter, creating it at 1 if absent.
    pub fn bump_stat(&mut self, key: impl Into<String>) {
        *self.stats.entry(key.into()).or_insert(0) += 1;
    }

    /// True when no section of this brain would contribute to a prompt.
    pub fn is_empty(&self) -> bool {
        self.soul.is_none()
            && self.knowledge.is_empty()
            && self.memories.is_empty()
            && self.stats.is_empty()
    }
}
