//! Event envelope broadcast to every connected spectator.
//!
//! Serialized once per emission (a JSON object with a `type` discriminator)
//! and fanned out over the arena's broadcast channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::battle::BattleView;

/// One participant as spectators see it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSummary {
    pub name: String,
    pub model: String,
    pub has_memory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArenaEvent {
    /// Full snapshot of all live battles. Sent only when a spectator joins,
    /// so a late joiner is not missing prior turns of an in-progress battle.
    State { battles: Vec<BattleView> },
    BattleStart {
        battle_id: Uuid,
        agents: Vec<AgentSummary>,
        prompt: Option<String>,
    },
    Turn {
        battle_id: Uuid,
        turn: u32,
        speaker_index: usize,
        speaker: String,
        model: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    Paused { battle_id: Uuid },
    Resumed { battle_id: Uuid },
    Complete {
        battle_id: Uuid,
        turns: u32,
        /// Wall-clock duration in milliseconds.
        duration: i64,
    },
    Error { battle_id: Uuid, error: String },
}
