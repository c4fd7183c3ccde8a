//! PostgreSQL-backed store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::NoTls;
use tokio_postgres::row::Row;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::{BattleRecord, Database, TurnRecord};
use crate::error::DatabaseError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS battles (
    id          UUID PRIMARY KEY,
    prompt      TEXT,
    max_turns   INTEGER NOT NULL,
    status      TEXT NOT NULL,
    started_at  TIMESTAMPTZ,
    ended_at    TIMESTAMPTZ,
    agents      JSONB NOT NULL DEFAULT '[]'::jsonb
);

CREATE TABLE IF NOT EXISTS turns (
    id          BIGSERIAL PRIMARY KEY,
    battle_id   UUID NOT NULL REFERENCES battles(id),
    turn_number INTEGER NOT NULL,
    speaker     TEXT NOT NULL,
    model       TEXT NOT NULL,
    content     TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS turns_battle_idx ON turns (battle_id, turn_number);
"#;

pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Connect to the database and make sure the schema exists.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let mut cfg = Config::new();
        cfg.url = Some(config.url.clone());
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: config.pool_size,
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.pool.get().await?;
        conn.batch_execute(SCHEMA).await?;
        Ok(())
    }

    fn battle_from_row(row: &Row) -> BattleRecord {
        BattleRecord {
            id: row.get("id"),
            prompt: row.get("prompt"),
            max_turns: row.get::<_, i32>("max_turns") as u32,
            status: row.get("status"),
            started_at: row.get("started_at"),
            ended_at: row.get("ended_at"),
            agents: row.get("agents"),
        }
    }

    fn turn_from_row(row: &Row) -> TurnRecord {
        TurnRecord {
            battle_id: row.get("battle_id"),
            turn_number: row.get::<_, i32>("turn_number") as u32,
            speaker: row.get("speaker"),
            model: row.get("model"),
            content: row.get("content"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl Database for PgStore {
    async fn insert_battle(&self, record: &BattleRecord) -> Result<(), DatabaseError> {
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO battles (id, prompt, max_turns, status, started_at, ended_at, agents)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &record.id,
                &record.prompt,
                &(record.max_turns as i32),
                &record.status,
                &record.started_at,
                &record.ended_at,
                &record.agents,
            ],
        )
        .await?;
        Ok(())
    }

    async fn update_battle_status(
        &self,
        id: Uuid,
        status: &str,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        let conn = self.pool.get().await?;
        conn.execute(
            "UPDATE battles
             SET status = $2,
                 started_at = COALESCE($3, started_at),
                 ended_at = COALESCE($4, ended_at)
             WHERE id = $1",
            &[&id, &status, &started_at, &ended_at],
        )
        .await?;
        Ok(())
    }

    async fn insert_turn(&self, record: &TurnRecord) -> Result<(), DatabaseError> {
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO turns (battle_id, turn_number, speaker, model, content, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &record.battle_id,
                &(record.turn_number as i32),
                &record.speaker,
                &record.model,
                &record.content,
                &record.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn completed_battles(&self) -> Result<Vec<BattleRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT id, prompt, max_turns, status, started_at, ended_at, agents
                 FROM battles WHERE status = 'complete'
                 ORDER BY ended_at DESC NULLS LAST",
                &[],
            )
            .await?;
        Ok(rows.iter().map(Self::battle_from_row).collect())
    }

    async fn battle(&self, id: Uuid) -> Result<BattleRecord, DatabaseError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                "SELECT id, prompt, max_turns, status, started_at, ended_at, agents
                 FROM battles WHERE id = $1",
                &[&id],
            )
            .await?;
        row.map(|r| Self::battle_from_row(&r))
            .ok_or(DatabaseError::BattleNotFound(id))
    }

    async fn battle_turns(&self, id: Uuid) -> Result<Vec<TurnRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT battle_id, turn_number, speaker, model, content, created_at
                 FROM turns WHERE battle_id = $1
                 ORDER BY turn_number",
                &[&id],
            )
            .await?;
        Ok(rows.iter().map(Self::turn_from_row).collect())
    }
}
