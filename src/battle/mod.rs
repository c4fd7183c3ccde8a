//! The turn scheduler: a state machine that drives a round-robin
//! conversation between agents.
//!
//! States: `pending -> running <-> paused`, `running -> complete`. Each
//! battle owns its transcript and drives itself with a timer-scheduled
//! continuation per turn; at most one provider call is ever in flight for a
//! battle. Pausing aborts the queued continuation, and every turn re-checks
//! status on entry, so a continuation that was already queued when the pause
//! landed becomes a no-op. A provider result that resolves after a pause is
//! discarded, not appended.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::agent::Agent;
use crate::db::{BattleRecord, Database, TurnRecord};
use crate::events::{AgentSummary, ArenaEvent};
use crate::llm::ChatMessage;

/// Opening line when neither a shared prompt nor a directive exists.
const DEFAULT_OPENING: &str = "Begin.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BattleStatus {
    Pending,
    Running,
    Paused,
    Complete,
}

impl BattleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BattleStatus::Pending => "pending",
            BattleStatus::Running => "running",
            BattleStatus::Paused => "paused",
            BattleStatus::Complete => "complete",
        }
    }
}

/// One produced message, immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub index: u32,
    pub speaker_index: usize,
    pub speaker: String,
    pub model: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Scheduling and prompt-assembly policy for one battle.
#[derive(Debug, Clone)]
pub struct BattleConfig {
    /// Shared prompt; becomes the opening message and every agent's
    /// first-turn context.
    pub prompt: Option<String>,
    pub max_turns: u32,
    pub turn_delay: Duration,
    /// When set, every outgoing message carries a word-limit instruction.
    pub max_words: Option<u32>,
    /// Battle-level anonymity: suppresses the participant disclosure in the
    /// opening message and the context/directive labels.
    pub anonymous: bool,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            prompt: None,
            max_turns: 20,
            turn_delay: crate::config::DEFAULT_TURN_DELAY,
            max_words: None,
            anonymous: false,
        }
    }
}

/// External JSON view of a battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleView {
    pub id: Uuid,
    pub agents: Vec<AgentSummary>,
    pub prompt: Option<String>,
    pub status: BattleStatus,
    pub turn_count: u32,
    pub max_turns: u32,
    pub transcript: Vec<Turn>,
}

/// Everything the scheduler mutates, behind one lock.
///
/// The lock is never held across a provider call: the loop snapshots what
/// it needs, drops the lock, awaits, then re-acquires and re-checks status
/// before committing anything.
struct SchedulerState {
    status: BattleStatus,
    transcript: Vec<Turn>,
    turn_count: u32,
    speaker_index: usize,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    /// The opening message, kept so a resume before any turn landed can
    /// re-issue it.
    opening: Option<String>,
    /// Abort handle for the queued inter-turn continuation; aborting it is
    /// how `pause` cancels the loop.
    pending: Option<AbortHandle>,
    /// True from the moment a turn commits to calling its provider until
    /// the result commits, errors, or is discarded. `resume` refuses to
    /// start a second chain while set.
    busy: bool,
}

pub struct Battle {
    pub id: Uuid,
    config: BattleConfig,
    /// Participants in speaking order. The agent lock is held only long
    /// enough to snapshot what a provider call needs, never across the
    /// call itself.
    agents: Vec<Arc<Mutex<Agent>>>,
    state: Mutex<SchedulerState>,
    store: Arc<dyn Database>,
    events: broadcast::Sender<ArenaEvent>,
}

impl Battle {
    /// Construct a battle in `pending` state. Callers are expected to have
    /// validated the agent count (the web layer allows 2 to 4).
    pub fn new(
        agents: Vec<Agent>,
        config: BattleConfig,
        store: Arc<dyn Database>,
        events: broadcast::Sender<ArenaEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            config,
            agents: agents
                .into_iter()
                .map(|a| Arc::new(Mutex::new(a)))
                .collect(),
            state: Mutex::new(SchedulerState {
                status: BattleStatus::Pending,
                transcript: Vec::new(),
                turn_count: 0,
                speaker_index: 0,
                started_at: None,
                ended_at: None,
                opening: None,
                pending: None,
                busy: false,
            }),
            store,
            events,
        })
    }

    pub async fn status(&self) -> BattleStatus {
        self.state.lock().await.status
    }

    pub async fn turn_count(&self) -> u32 {
        self.state.lock().await.turn_count
    }

    async fn agent_summaries(&self) -> Vec<AgentSummary> {
        let mut summaries = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            summaries.push(agent.lock().await.summary());
        }
        summaries
    }

    /// Snapshot for spectators and the HTTP surface.
    pub async fn view(&self) -> BattleView {
        let (status, turn_count, transcript) = {
            let state = self.state.lock().await;
            (state.status, state.turn_count, state.transcript.clone())
        };
        BattleView {
            id: self.id,
            agents: self.agent_summaries().await,
            prompt: self.config.prompt.clone(),
            status,
            turn_count,
            max_turns: self.config.max_turns,
            transcript,
        }
    }

    /// Load every agent's brain and record the pending battle row.
    /// Does not change status.
    pub async fn initialize(&self) {
        for agent in &self.agents {
            agent.lock().await.load_brain();
        }

        let agents = self.agent_summaries().await;
        let record = BattleRecord {
            id: self.id,
            prompt: self.config.prompt.clone(),
            max_turns: self.config.max_turns,
            status: BattleStatus::Pending.as_str().to_string(),
            started_at: None,
            ended_at: None,
            agents: serde_json::to_value(agents).unwrap_or_default(),
        };
        if let Err(e) = self.store.insert_battle(&record).await {
            tracing::warn!(battle = %self.id, error = %e, "failed to record battle");
        }
    }

    /// Transition to `running` and kick off the turn loop with the opening
    /// message for speaker 0.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            if state.status != BattleStatus::Pending {
                return;
            }
            state.status = BattleStatus::Running;
            state.started_at = Some(Utc::now());
        }

        self.persist_status(BattleStatus::Running, Some(Utc::now()), None)
            .await;
        self.emit(ArenaEvent::BattleStart {
            battle_id: self.id,
            agents: self.agent_summaries().await,
            prompt: self.config.prompt.clone(),
        });

        let opening = self.opening_message().await;
        self.state.lock().await.opening = Some(opening.clone());
        tracing::info!(battle = %self.id, "battle started");
        self.schedule_turn(opening, Duration::ZERO).await;
    }

    /// Shared prompt, else speaker 0's directive, else the default
    /// continuation token; plus, unless the battle is anonymous, a
    /// disclosure of the other participants' names.
    async fn opening_message(&self) -> String {
        let first = self.agents[0].lock().await;
        let mut opening = self
            .config
            .prompt
            .clone()
            .or_else(|| first.directive.clone())
            .unwrap_or_else(|| DEFAULT_OPENING.to_string());
        drop(first);

        if !self.config.anonymous {
            let mut others = Vec::new();
            for agent in &self.agents[1..] {
                others.push(agent.lock().await.display_name.clone());
            }
            opening.push_str(&format!(
                "\n\n(You are in conversation with: {}.)",
                others.join(", ")
            ));
        }
        opening
    }

    /// Only meaningful while running: freezes the loop by aborting the
    /// queued continuation.
    pub async fn pause(&self) {
        {
            let mut state = self.state.lock().await;
            if state.status != BattleStatus::Running {
                return;
            }
            state.status = BattleStatus::Paused;
            if let Some(handle) = state.pending.take() {
                handle.abort();
            }
        }
        self.persist_status(BattleStatus::Paused, None, None).await;
        self.emit(ArenaEvent::Paused { battle_id: self.id });
        tracing::info!(battle = %self.id, "battle paused");
    }

    /// Re-enter the turn loop, re-issuing the most recent transcript
    /// entry's content as the next agent's input.
    ///
    /// Meaningful while paused, and also while `running` with no queued
    /// continuation, which is the recovery path after a provider failure.
    /// Refused outright while a provider call is in flight: the turn
    /// already underway owns the loop, and a second chain would double up
    /// provider calls and corrupt the rotation.
    pub async fn resume(self: &Arc<Self>) {
        let input = {
            let mut state = self.state.lock().await;
            let recoverable = (state.status == BattleStatus::Paused
                || (state.status == BattleStatus::Running && state.pending.is_none()))
                && !state.busy;
            if !recoverable {
                return;
            }
            state.status = BattleStatus::Running;
            state
                .transcript
                .last()
                .map(|t| t.content.clone())
                .or_else(|| state.opening.clone())
                .unwrap_or_else(|| DEFAULT_OPENING.to_string())
        };

        self.persist_status(BattleStatus::Running, None, None).await;
        self.emit(ArenaEvent::Resumed { battle_id: self.id });
        tracing::info!(battle = %self.id, "battle resumed");
        self.schedule_turn(input, Duration::ZERO).await;
    }

    /// Queue the next turn after `delay`, remembering the abort handle so a
    /// pause can cancel it.
    async fn schedule_turn(self: &Arc<Self>, input: String, delay: Duration) {
        let mut state = self.state.lock().await;
        if state.status != BattleStatus::Running {
            return;
        }
        let battle = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            battle.run_turn(input).await;
        });
        state.pending = Some(handle.abort_handle());
    }

    /// One iteration of the turn loop, boxed because the loop is cyclic:
    /// a turn schedules the task that runs the next turn.
    fn run_turn(self: &Arc<Self>, input: String) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let battle = Arc::clone(self);
        Box::pin(async move { battle.take_turn(input).await })
    }

    async fn take_turn(self: &Arc<Self>, input: String) {
        // Decide whether this turn still applies, and snapshot what the
        // provider call needs, without holding the lock over the call.
        let (speaker_index, agent, history) = {
            let mut state = self.state.lock().await;
            state.pending = None;
            if state.status != BattleStatus::Running {
                return;
            }
            if state.turn_count >= self.config.max_turns {
                drop(state);
                self.complete().await;
                return;
            }
            state.busy = true;
            let idx = state.speaker_index;
            let agent = Arc::clone(&self.agents[idx]);
            (idx, agent, state.transcript.clone())
        };

        let (provider, system, directive, speaker, model) = {
            let agent = agent.lock().await;
            (
                Arc::clone(agent.provider()),
                agent.compose_system_prompt(),
                agent.directive.clone(),
                agent.display_name.clone(),
                agent.model().to_string(),
            )
        };
        let messages =
            self.build_messages(&history, speaker_index, directive.as_deref(), &input);
        let result = provider.chat(&messages, system.as_deref()).await;

        let content = match result {
            Ok(content) => content,
            Err(e) => {
                self.state.lock().await.busy = false;
                tracing::error!(battle = %self.id, speaker_index, error = %e, "provider call failed");
                self.emit(ArenaEvent::Error {
                    battle_id: self.id,
                    error: e.to_string(),
                });
                // No auto-retry: recovery comes from an explicit resume().
                return;
            }
        };

        let (turn, reached_max) = {
            let mut state = self.state.lock().await;
            state.busy = false;
            if state.status != BattleStatus::Running {
                // A pause landed while the call was in flight: discard the
                // result rather than appending a turn nobody scheduled.
                tracing::debug!(battle = %self.id, "discarding in-flight result after pause");
                return;
            }
            let turn = Turn {
                index: state.turn_count,
                speaker_index,
                speaker,
                model,
                content,
                created_at: Utc::now(),
            };
            state.transcript.push(turn.clone());
            state.turn_count += 1;
            state.speaker_index = (speaker_index + 1) % self.agents.len();
            (turn, state.turn_count >= self.config.max_turns)
        };

        if let Err(e) = self
            .store
            .insert_turn(&TurnRecord {
                battle_id: self.id,
                turn_number: turn.index,
                speaker: turn.speaker.clone(),
                model: turn.model.clone(),
                content: turn.content.clone(),
                created_at: turn.created_at,
            })
            .await
        {
            tracing::warn!(battle = %self.id, turn = turn.index, error = %e, "failed to persist turn");
        }

        self.emit(ArenaEvent::Turn {
            battle_id: self.id,
            turn: turn.index,
            speaker_index: turn.speaker_index,
            speaker: turn.speaker,
            model: turn.model,
            content: turn.content.clone(),
            timestamp: turn.created_at,
        });

        if reached_max {
            self.complete().await;
        } else {
            self.schedule_turn(turn.content, self.config.turn_delay).await;
        }
    }

    /// Render the transcript from one agent's point of view and append the
    /// incoming message.
    ///
    /// The agent's own turns become `own`-role entries, everyone else's
    /// become `other`. On the agent's first turn the outgoing message is
    /// prefixed with the shared prompt and the agent's directive (labeled,
    /// or plain when the battle is anonymous). A word limit, when
    /// configured, prefixes every outgoing message.
    fn build_messages(
        &self,
        transcript: &[Turn],
        speaker_index: usize,
        directive: Option<&str>,
        input: &str,
    ) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = transcript
            .iter()
            .map(|turn| {
                if turn.speaker_index == speaker_index {
                    ChatMessage::own(turn.content.clone())
                } else {
                    ChatMessage::other(turn.content.clone())
                }
            })
            .collect();

        let first_turn = !transcript.iter().any(|t| t.speaker_index == speaker_index);

        let mut outgoing = String::new();
        if let Some(limit) = self.config.max_words {
            outgoing.push_str(&format!("[Reply in {limit} words or fewer.]\n"));
        }
        if first_turn {
            if self.config.anonymous {
                if let Some(prompt) = &self.config.prompt {
                    outgoing.push_str(prompt);
                    outgoing.push('\n');
                }
                if let Some(directive) = directive {
                    outgoing.push_str(directive);
                    outgoing.push('\n');
                }
            } else {
                if let Some(prompt) = &self.config.prompt {
                    outgoing.push_str(&format!("[Context: {prompt}]\n"));
                }
                if let Some(directive) = directive {
                    outgoing.push_str(&format!("[Directive: {directive}]\n"));
                }
            }
        }
        outgoing.push_str(input);
        messages.push(ChatMessage::other(outgoing));
        messages
    }

    /// Terminal transition: stamp the end, hand every agent one summary
    /// memory, persist brains and final status, announce the result.
    pub async fn complete(self: &Arc<Self>) {
        let (turns, started_at, ended_at) = {
            let mut state = self.state.lock().await;
            if state.status == BattleStatus::Complete {
                return;
            }
            state.status = BattleStatus::Complete;
            let ended = Utc::now();
            state.ended_at = Some(ended);
            if let Some(handle) = state.pending.take() {
                handle.abort();
            }
            (state.turn_count, state.started_at, ended)
        };

        let mut names = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            names.push(agent.lock().await.display_name.clone());
        }
        let topic = self
            .config
            .prompt
            .clone()
            .unwrap_or_else(|| "an open conversation".to_string());
        let note = format!(
            "Spoke about \"{topic}\" with {} over {turns} turns, ending {}.",
            names.join(", "),
            ended_at.to_rfc3339(),
        );

        for agent in &self.agents {
            let mut agent = agent.lock().await;
            agent.add_memory(format!("battle-{}", self.id), note.clone());
            if let Some(brain) = agent.brain_mut() {
                brain.bump_stat("conversations");
            }
            agent.save_brain();
        }

        self.persist_status(BattleStatus::Complete, None, Some(ended_at))
            .await;

        let duration = started_at
            .map(|s| (ended_at - s).num_milliseconds().max(0))
            .unwrap_or(0);
        self.emit(ArenaEvent::Complete {
            battle_id: self.id,
            turns,
            duration,
        });
        tracing::info!(battle = %self.id, turns, duration_ms = duration, "battle complete");
    }

    fn emit(&self, event: ArenaEvent) {
        // No receivers is fine; spectators are optional.
        let _ = self.events.send(event);
    }

    async fn persist_status(
        &self,
        status: BattleStatus,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    ) {
        if let Err(e) = self
            .store
            .update_battle_status(self.id, status.as_str(), started_at, ended_at)
            .await
        {
            tracing::warn!(battle = %self.id, error = %e, "failed to persist battle status");
        }
    }
}
