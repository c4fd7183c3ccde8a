//! Registry of running battles plus spectator fan-out.
//!
//! The arena is constructed once per process and passed around by `Arc`;
//! battles are never evicted from the live map by the scheduler (archival
//! is a query over the durable store, not eviction).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::Stream;
use serde::Deserialize;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::agent::{Agent, AgentConfig};
use crate::battle::{Battle, BattleConfig, BattleView};
use crate::config::Config;
use crate::db::{BattleRecord, Database, TurnRecord};
use crate::error::{DatabaseError, ProviderError};
use crate::events::ArenaEvent;
use crate::llm::create_provider;

/// Spectator connections are capped to keep a misbehaving client farm from
/// exhausting the process.
const MAX_SPECTATORS: u64 = 100;

/// Events buffered per spectator; slow clients miss events rather than
/// applying backpressure to the schedulers.
const EVENT_BUFFER: usize = 256;

/// Battle creation surface consumed by `create_battle`.
#[derive(Debug, Clone, Deserialize)]
pub struct BattleRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub turn_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_words: Option<u32>,
    #[serde(default)]
    pub anonymous: bool,
    pub agents: Vec<AgentConfig>,
}

pub struct Arena {
    config: Config,
    store: Arc<dyn Database>,
    battles: RwLock<HashMap<Uuid, Arc<Battle>>>,
    events: broadcast::Sender<ArenaEvent>,
    spectator_count: Arc<AtomicU64>,
    max_spectators: u64,
}

impl Arena {
    pub fn new(config: Config, store: Arc<dyn Database>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            config,
            store,
            battles: RwLock::new(HashMap::new()),
            events,
            spectator_count: Arc::new(AtomicU64::new(0)),
            max_spectators: MAX_SPECTATORS,
        }
    }

    /// Build agents from the request, wire a battle to this arena's
    /// broadcast sender and store, initialize it, and register it.
    ///
    /// The caller is responsible for calling `start()`.
    pub async fn create_battle(&self, request: BattleRequest) -> Result<Arc<Battle>, ProviderError> {
        let mut agents = Vec::with_capacity(request.agents.len());
        for entry in request.agents {
            let provider = create_provider(
                entry.provider,
                &self.config,
                entry.model.as_deref(),
                entry.endpoint.as_deref(),
            )?;
            let display_name = entry.display_name.unwrap_or_else(|| entry.name.clone());
            let mut agent = Agent::new(entry.name, display_name, provider)
                .with_soul(entry.soul)
                .with_directive(entry.directive)
                .with_anonymous(entry.anonymous);
            if let Some(brain) = entry.brain {
                agent = agent.with_brain(brain);
            } else if let Some(path) = entry.brain_path {
                let path = if path.is_absolute() {
                    path
                } else {
                    self.config.brains_dir.join(path)
                };
                agent = agent.with_brain_path(path);
            }
            agents.push(agent);
        }

        let config = BattleConfig {
            prompt: request.prompt,
            max_turns: request.max_turns.unwrap_or(20),
            turn_delay: request
                .turn_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(crate::config::DEFAULT_TURN_DELAY),
            max_words: request.max_words.filter(|&w| w > 0),
            anonymous: request.anonymous,
        };

        let battle = Battle::new(agents, config, Arc::clone(&self.store), self.events.clone());
        battle.initialize().await;
        self.battles
            .write()
            .await
            .insert(battle.id, Arc::clone(&battle));
        tracing::info!(battle = %battle.id, "battle registered");
        Ok(battle)
    }

    pub async fn battle(&self, id: Uuid) -> Option<Arc<Battle>> {
        self.battles.read().await.get(&id).cloned()
    }

    /// Current JSON views of every live battle.
    pub async fn snapshot(&self) -> Vec<BattleView> {
        let battles: Vec<Arc<Battle>> = self.battles.read().await.values().cloned().collect();
        let mut views = Vec::with_capacity(battles.len());
        for battle in battles {
            views.push(battle.view().await);
        }
        views
    }

    pub fn spectator_count(&self) -> u64 {
        self.spectator_count.load(Ordering::Relaxed)
    }

    /// Attach a spectator.
    ///
    /// Returns the `state` snapshot (so a late joiner is not missing prior
    /// turns of an in-progress battle) and the live event stream, or `None`
    /// when the spectator cap is reached. The count decrements when the
    /// stream drops.
    pub async fn add_spectator(
        &self,
    ) -> Option<(ArenaEvent, impl Stream<Item = ArenaEvent> + Send + Unpin + 'static + use<>)> {
        let counter = Arc::clone(&self.spectator_count);
        let max = self.max_spectators;
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                if current < max { Some(current + 1) } else { None }
            })
            .ok()?;

        let snapshot = ArenaEvent::State {
            battles: self.snapshot().await,
        };
        let rx = self.events.subscribe();
        let stream = BroadcastStream::new(rx).filter_map(|result| result.ok());
        Some((snapshot, SpectatorStream { inner: stream, counter }))
    }

    /// Completed battles from durable storage.
    pub async fn archive(&self) -> Result<Vec<BattleRecord>, DatabaseError> {
        self.store.completed_battles().await
    }

    /// Full recorded transcript of one completed battle.
    pub async fn battle_history(
        &self,
        id: Uuid,
    ) -> Result<(BattleRecord, Vec<TurnRecord>), DatabaseError> {
        let record = self.store.battle(id).await?;
        let turns = self.store.battle_turns(id).await?;
        Ok((record, turns))
    }
}

/// Stream wrapper that releases the spectator slot on drop.
struct SpectatorStream<S> {
    inner: S,
    counter: Arc<AtomicU64>,
}

impl<S: Stream + Unpin> Stream for SpectatorStream<S> {
    type Item = S::Item;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for SpectatorStream<S> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
