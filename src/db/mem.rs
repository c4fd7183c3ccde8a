//! In-memory store.
//!
//! Used when no `DATABASE_URL` is configured (battles run fine, they just
//! don't survive a restart) and by the scheduler tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::{BattleRecord, Database, TurnRecord};
use crate::error::DatabaseError;

#[derive(Default)]
pub struct MemoryStore {
    battles: Mutex<HashMap<Uuid, BattleRecord>>,
    turns: Mutex<Vec<TurnRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Database for MemoryStore {
    async fn insert_battle(&self, record: &BattleRecord) -> Result<(), DatabaseError> {
        self.battles
            .lock()
            .await
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn update_battle_status(
        &self,
        id: Uuid,
        status: &str,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        let mut battles = self.battles.lock().await;
        let record = battles.get_mut(&id).ok_or(DatabaseError::BattleNotFound(id))?;
        record.status = status.to_string();
        if started_at.is_some() {
            record.started_at = started_at;
        }
        if ended_at.is_some() {
            record.ended_at = ended_at;
        }
        Ok(())
    }

    async fn insert_turn(&self, record: &TurnRecord) -> Result<(), DatabaseError> {
        self.turns.lock().await.push(record.clone());
        Ok(())
    }

    async fn completed_battles(&self) -> Result<Vec<BattleRecord>, DatabaseError> {
        let mut found: Vec<BattleRecord> = self
            .battles
            .lock()
            .await
            .values()
            .filter(|r| r.status == "complete")
            .cloned()
            .collect();
        found.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
        Ok(found)
    }

    async fn battle(&self, id: Uuid) -> Result<BattleRecord, DatabaseError> {
        self.battles
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(DatabaseError::BattleNotFound(id))
    }

    async fn battle_turns(&self, id: Uuid) -> Result<Vec<TurnRecord>, DatabaseError> {
        let mut turns: Vec<TurnRecord> = self
            .turns
            .lock()
            .await
            .iter()
            .filter(|t| t.battle_id == id)
            .cloned()
            .collect();
        turns.sort_by_key(|t| t.turn_number);
        Ok(turns)
    }
}
