//! Persistence sink for battles and turns.
//!
//! The scheduler consumes this as a contract: one row per battle with its
//! status updated in place on every transition, one append-only row per
//! accepted turn. Write failures are logged by the caller and never affect
//! scheduling.

mod mem;
mod postgres;

pub use mem::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Durable battle row.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BattleRecord {
    pub id: Uuid,
    pub prompt: Option<String>,
    pub max_turns: u32,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Serialized agent summaries (name, model, has-memory flag).
    pub agents: serde_json::Value,
}

/// Durable turn row, never updated after insert.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TurnRecord {
    pub battle_id: Uuid,
    pub turn_number: u32,
    pub speaker: String,
    pub model: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Relational store abstraction.
#[async_trait]
pub trait Database: Send + Sync {
    /// Record a battle row (called once at initialization, status `pending`).
    async fn insert_battle(&self, record: &BattleRecord) -> Result<(), DatabaseError>;

    /// Update a battle's status in place, stamping start/end when given.
    async fn update_battle_status(
        &self,
        id: Uuid,
        status: &str,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError>;

    /// Append one accepted turn.
    async fn insert_turn(&self, record: &TurnRecord) -> Result<(), DatabaseError>;

    /// All battles with status `complete`, most recently ended first.
    async fn completed_battles(&self) -> Result<Vec<BattleRecord>, DatabaseError>;

    /// One battle row by id.
    async fn battle(&self, id: Uuid) -> Result<BattleRecord, DatabaseError>;

    /// Full transcript of a battle in turn order.
    async fn battle_turns(&self, id: Uuid) -> Result<Vec<TurnRecord>, DatabaseError>;
}
