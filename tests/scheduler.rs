//! End-to-end scheduler scenarios: scripted providers, in-memory store,
//! real battle state machine.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};

use agon::agent::Agent;
use agon::battle::{Battle, BattleConfig, BattleStatus};
use agon::brain::BrainStore;
use agon::db::{Database, MemoryStore};
use agon::error::ProviderError;
use agon::events::ArenaEvent;
use agon::llm::{ChatMessage, ChatProvider};

/// One recorded provider call.
#[derive(Clone)]
struct Call {
    messages: Vec<ChatMessage>,
    #[allow(dead_code)]
    system: Option<String>,
}

/// Deterministic provider: replies with a numbered line, records every call,
/// optionally fails on one call or takes a while to answer.
struct ScriptedProvider {
    name: String,
    calls: Mutex<Vec<Call>>,
    counter: AtomicUsize,
    fail_on_call: Option<usize>,
    delay: Duration,
}

impl ScriptedProvider {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
            fail_on_call: None,
            delay: Duration::ZERO,
        })
    }

    fn failing_on(name: &str, call: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
            fail_on_call: Some(call),
            delay: Duration::ZERO,
        })
    }

    fn slow(name: &str, delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
            fail_on_call: None,
            delay: Duration::from_millis(delay_ms),
        })
    }

    async fn call(&self, index: usize) -> Call {
        self.calls.lock().await[index].clone()
    }

    async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait::async_trait]
impl ChatProvider for ScriptedProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        system: Option<&str>,
    ) -> Result<String, ProviderError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().await.push(Call {
            messages: messages.to_vec(),
            system: system.map(String::from),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_on_call == Some(n) {
            return Err(ProviderError::RequestFailed {
                provider: self.name.clone(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(format!("{} reply {n}", self.name))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

struct Fixture {
    battle: Arc<Battle>,
    store: Arc<MemoryStore>,
    events: broadcast::Receiver<ArenaEvent>,
    providers: Vec<Arc<ScriptedProvider>>,
}

fn fixture_with(agents: Vec<Agent>, providers: Vec<Arc<ScriptedProvider>>, config: BattleConfig) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let (tx, events) = broadcast::channel(256);
    let db: Arc<dyn Database> = store.clone();
    let battle = Battle::new(agents, config, db, tx);
    Fixture {
        battle,
        store,
        events,
        providers,
    }
}

fn fixture(config: BattleConfig) -> Fixture {
    let p0 = ScriptedProvider::new("ada");
    let p1 = ScriptedProvider::new("basil");
    let agents = vec![
        Agent::new("ada", "Ada", p0.clone()),
        Agent::new("basil", "Basil", p1.clone()),
    ];
    fixture_with(agents, vec![p0, p1], config)
}

fn slow_fixture(delay_ms: u64, config: BattleConfig) -> Fixture {
    let p0 = ScriptedProvider::slow("ada", delay_ms);
    let p1 = ScriptedProvider::slow("basil", delay_ms);
    let agents = vec![
        Agent::new("ada", "Ada", p0.clone()),
        Agent::new("basil", "Basil", p1.clone()),
    ];
    fixture_with(agents, vec![p0, p1], config)
}

async fn next_event(rx: &mut broadcast::Receiver<ArenaEvent>) -> ArenaEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn wait_for_complete(rx: &mut broadcast::Receiver<ArenaEvent>) -> (u32, i64) {
    loop {
        if let ArenaEvent::Complete { turns, duration, .. } = next_event(rx).await {
            return (turns, duration);
        }
    }
}

#[tokio::test]
async fn four_turns_alternate_speakers() {
    let mut fx = fixture(BattleConfig {
        prompt: Some("Discuss X.".to_string()),
        max_turns: 4,
        turn_delay: Duration::ZERO,
        max_words: None,
        anonymous: false,
    });

    fx.battle.initialize().await;
    fx.battle.start().await;
    let (turns, duration) = wait_for_complete(&mut fx.events).await;
    assert_eq!(turns, 4);
    assert!(duration >= 0);

    let view = fx.battle.view().await;
    assert_eq!(view.status, BattleStatus::Complete);
    assert_eq!(view.turn_count, 4);
    assert_eq!(view.transcript.len(), 4);

    // Speaker at turn k is k mod N; indexes strictly increase by one.
    for (k, turn) in view.transcript.iter().enumerate() {
        assert_eq!(turn.index as usize, k);
        assert_eq!(turn.speaker_index, k % 2);
    }
    assert_eq!(view.transcript[0].speaker, "Ada");
    assert_eq!(view.transcript[1].speaker, "Basil");

    // Each agent's first-turn message is prefixed with the shared prompt as
    // context.
    for provider in &fx.providers {
        let first = provider.call(0).await;
        let outgoing = &first.messages.last().unwrap().content;
        assert!(
            outgoing.starts_with("[Context: Discuss X.]"),
            "unexpected first-turn message: {outgoing}"
        );
    }

    // Every accepted turn was persisted, in order.
    let rows = fx.store.battle_turns(fx.battle.id).await.unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[3].turn_number, 3);
}

#[tokio::test]
async fn zero_max_turns_completes_without_a_turn() {
    let mut fx = fixture(BattleConfig {
        prompt: None,
        max_turns: 0,
        turn_delay: Duration::ZERO,
        max_words: None,
        anonymous: false,
    });

    fx.battle.initialize().await;
    fx.battle.start().await;
    let (turns, _) = wait_for_complete(&mut fx.events).await;
    assert_eq!(turns, 0);

    let view = fx.battle.view().await;
    assert_eq!(view.status, BattleStatus::Complete);
    assert!(view.transcript.is_empty());
    assert_eq!(fx.providers[0].call_count().await, 0);

    let record = fx.store.battle(fx.battle.id).await.unwrap();
    assert_eq!(record.status, "complete");
}

#[tokio::test]
async fn provider_failure_freezes_until_resumed() {
    let p0 = ScriptedProvider::new("ada");
    let p1 = ScriptedProvider::failing_on("basil", 0);
    let agents = vec![
        Agent::new("ada", "Ada", p0.clone()),
        Agent::new("basil", "Basil", p1.clone()),
    ];
    let mut fx = fixture_with(
        agents,
        vec![p0, p1],
        BattleConfig {
            prompt: Some("Discuss X.".to_string()),
            max_turns: 2,
            turn_delay: Duration::ZERO,
            max_words: None,
            anonymous: false,
        },
    );

    fx.battle.initialize().await;
    fx.battle.start().await;

    // battle_start, turn 0, then the error.
    loop {
        match next_event(&mut fx.events).await {
            ArenaEvent::Error { battle_id, error } => {
                assert_eq!(battle_id, fx.battle.id);
                assert!(error.contains("scripted failure"));
                break;
            }
            ArenaEvent::Complete { .. } => panic!("battle completed past a failed turn"),
            _ => {}
        }
    }

    // Frozen, but still running: no failed terminal state.
    assert_eq!(fx.battle.status().await, BattleStatus::Running);
    assert_eq!(fx.battle.turn_count().await, 1);

    // Explicit resume re-issues turn 0's content as basil's input.
    fx.battle.resume().await;
    let (turns, _) = wait_for_complete(&mut fx.events).await;
    assert_eq!(turns, 2);

    let view = fx.battle.view().await;
    assert_eq!(view.transcript.len(), 2);
    let retry = fx.providers[1].call(1).await;
    assert_eq!(
        retry.messages.last().unwrap().content,
        format!("[Context: Discuss X.]\n{}", view.transcript[0].content),
    );
}

#[tokio::test]
async fn pause_freezes_and_resume_does_not_duplicate() {
    let mut fx = fixture(BattleConfig {
        prompt: Some("Discuss X.".to_string()),
        max_turns: 4,
        turn_delay: Duration::from_millis(300),
        max_words: None,
        anonymous: false,
    });

    fx.battle.initialize().await;
    fx.battle.start().await;

    // Wait for the first accepted turn, then pause inside the inter-turn
    // delay window.
    loop {
        if let ArenaEvent::Turn { turn, .. } = next_event(&mut fx.events).await {
            assert_eq!(turn, 0);
            break;
        }
    }
    fx.battle.pause().await;
    assert_eq!(fx.battle.status().await, BattleStatus::Paused);

    // The counter stays frozen for as long as we care to watch.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(fx.battle.turn_count().await, 1);

    fx.battle.resume().await;
    let (turns, _) = wait_for_complete(&mut fx.events).await;
    assert_eq!(turns, 4);

    // No duplicate for the paused position: indexes and speakers line up.
    let view = fx.battle.view().await;
    for (k, turn) in view.transcript.iter().enumerate() {
        assert_eq!(turn.index as usize, k);
        assert_eq!(turn.speaker_index, k % 2);
    }

    // Basil's input after resume is turn 0's content, re-issued.
    let basil_first = fx.providers[1].call(0).await;
    assert!(
        basil_first
            .messages
            .last()
            .unwrap()
            .content
            .ends_with(&view.transcript[0].content)
    );
}

#[tokio::test]
async fn completion_hands_each_agent_one_memory() {
    let dir = tempfile::tempdir().unwrap();
    let p0 = ScriptedProvider::new("ada");
    let p1 = ScriptedProvider::new("basil");
    let agents = vec![
        Agent::new("ada", "Ada", p0.clone()).with_brain_path(dir.path().join("ada.json")),
        Agent::new("basil", "Basil", p1.clone()).with_brain_path(dir.path().join("basil.json")),
    ];
    let mut fx = fixture_with(
        agents,
        vec![p0, p1],
        BattleConfig {
            prompt: Some("Discuss X.".to_string()),
            max_turns: 6,
            turn_delay: Duration::ZERO,
            max_words: None,
            anonymous: false,
        },
    );

    fx.battle.initialize().await;
    fx.battle.start().await;
    let (turns, duration) = wait_for_complete(&mut fx.events).await;
    assert_eq!(turns, 6);
    assert!(duration >= 0);

    // Both brains were persisted with exactly one new battle memory and a
    // bumped conversation counter.
    for name in ["ada", "basil"] {
        let brain = BrainStore::new(dir.path()).load(name);
        assert_eq!(brain.memories.len(), 1, "{name} should have one memory");
        let memory = &brain.memories[0];
        assert_eq!(memory.key, format!("battle-{}", fx.battle.id));
        assert!(memory.value.contains("Discuss X."));
        assert!(memory.value.contains("Ada, Basil"));
        assert!(memory.value.contains("6 turns"));
        assert_eq!(brain.stats["conversations"], 1);
    }

    // The battle shows up in the archive with its full transcript.
    let archive = fx.store.completed_battles().await.unwrap();
    assert_eq!(archive.len(), 1);
    assert_eq!(archive[0].id, fx.battle.id);
    assert_eq!(fx.store.battle_turns(fx.battle.id).await.unwrap().len(), 6);
}

#[tokio::test]
async fn anonymous_battle_hides_participants_and_labels() {
    let mut fx = fixture(BattleConfig {
        prompt: Some("Discuss X.".to_string()),
        max_turns: 2,
        turn_delay: Duration::ZERO,
        max_words: None,
        anonymous: true,
    });

    fx.battle.initialize().await;
    fx.battle.start().await;
    wait_for_complete(&mut fx.events).await;

    let first = fx.providers[0].call(0).await;
    let outgoing = &first.messages.last().unwrap().content;
    assert!(!outgoing.contains("You are in conversation with"));
    assert!(!outgoing.contains("[Context:"));
    assert!(outgoing.contains("Discuss X."));
}

#[tokio::test]
async fn word_limit_prefixes_every_message() {
    let mut fx = fixture(BattleConfig {
        prompt: Some("Discuss X.".to_string()),
        max_turns: 4,
        turn_delay: Duration::ZERO,
        max_words: Some(25),
        anonymous: false,
    });

    fx.battle.initialize().await;
    fx.battle.start().await;
    wait_for_complete(&mut fx.events).await;

    for provider in &fx.providers {
        for i in 0..provider.call_count().await {
            let call = provider.call(i).await;
            assert!(
                call.messages
                    .last()
                    .unwrap()
                    .content
                    .starts_with("[Reply in 25 words or fewer.]"),
                "call {i} missing word limit prefix"
            );
        }
    }
}

#[tokio::test]
async fn turn_events_carry_the_full_turn() {
    let mut fx = fixture(BattleConfig {
        prompt: Some("Discuss X.".to_string()),
        max_turns: 1,
        turn_delay: Duration::ZERO,
        max_words: None,
        anonymous: false,
    });

    fx.battle.initialize().await;
    fx.battle.start().await;

    let mut saw_start = false;
    loop {
        match next_event(&mut fx.events).await {
            ArenaEvent::BattleStart { battle_id, agents, prompt } => {
                assert_eq!(battle_id, fx.battle.id);
                assert_eq!(agents.len(), 2);
                assert_eq!(prompt.as_deref(), Some("Discuss X."));
                saw_start = true;
            }
            ArenaEvent::Turn { battle_id, turn, speaker_index, speaker, model, content, .. } => {
                assert!(saw_start, "turn before battle_start");
                assert_eq!(battle_id, fx.battle.id);
                assert_eq!(turn, 0);
                assert_eq!(speaker_index, 0);
                assert_eq!(speaker, "Ada");
                assert_eq!(model, "scripted");
                assert_eq!(content, "ada reply 0");
            }
            ArenaEvent::Complete { turns, .. } => {
                assert_eq!(turns, 1);
                break;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn resume_during_inflight_call_does_not_fork_the_loop() {
    let mut fx = slow_fixture(
        300,
        BattleConfig {
            prompt: Some("Discuss X.".to_string()),
            max_turns: 4,
            turn_delay: Duration::ZERO,
            max_words: None,
            anonymous: false,
        },
    );

    fx.battle.initialize().await;
    fx.battle.start().await;

    // Turn 0's provider call is in flight; a resume now must be refused,
    // not start a second concurrent turn chain.
    tokio::time::sleep(Duration::from_millis(100)).await;
    fx.battle.resume().await;

    let (turns, _) = wait_for_complete(&mut fx.events).await;
    assert_eq!(turns, 4);

    // Rotation is intact and nothing was processed twice.
    let view = fx.battle.view().await;
    assert_eq!(view.transcript.len(), 4);
    for (k, turn) in view.transcript.iter().enumerate() {
        assert_eq!(turn.index as usize, k);
        assert_eq!(turn.speaker_index, k % 2, "speaker rotation broken at turn {k}");
    }
    assert_eq!(fx.providers[0].call_count().await, 2);
    assert_eq!(fx.providers[1].call_count().await, 2);
}

#[tokio::test]
async fn pause_during_inflight_call_discards_the_result() {
    let mut fx = slow_fixture(
        300,
        BattleConfig {
            prompt: Some("Discuss X.".to_string()),
            max_turns: 2,
            turn_delay: Duration::ZERO,
            max_words: None,
            anonymous: false,
        },
    );

    fx.battle.initialize().await;
    fx.battle.start().await;

    // Pause while turn 0's call is still in flight.
    tokio::time::sleep(Duration::from_millis(100)).await;
    fx.battle.pause().await;
    assert_eq!(fx.battle.status().await, BattleStatus::Paused);

    // The call resolves while paused; its result must be dropped, not
    // appended.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(fx.battle.turn_count().await, 0);
    assert!(fx.battle.view().await.transcript.is_empty());
    assert_eq!(fx.providers[0].call_count().await, 1);

    // Resume re-issues the opening; the battle still runs to the cap with
    // a clean rotation.
    fx.battle.resume().await;
    let (turns, _) = wait_for_complete(&mut fx.events).await;
    assert_eq!(turns, 2);

    let view = fx.battle.view().await;
    assert_eq!(view.transcript.len(), 2);
    assert_eq!(view.transcript[0].speaker_index, 0);
    assert_eq!(view.transcript[1].speaker_index, 1);
    assert_eq!(fx.providers[0].call_count().await, 2);
    assert_eq!(fx.providers[1].call_count().await, 1);
}

#[tokio::test]
async fn view_is_not_blocked_by_an_inflight_call() {
    let mut fx = slow_fixture(
        500,
        BattleConfig {
            prompt: Some("Discuss X.".to_string()),
            max_turns: 1,
            turn_delay: Duration::ZERO,
            max_words: None,
            anonymous: false,
        },
    );

    fx.battle.initialize().await;
    fx.battle.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A snapshot during the call returns immediately instead of waiting
    // out the provider.
    let asked = std::time::Instant::now();
    let view = fx.battle.view().await;
    assert!(
        asked.elapsed() < Duration::from_millis(200),
        "view() stalled behind the in-flight call"
    );
    assert_eq!(view.status, BattleStatus::Running);
    assert!(view.transcript.is_empty());

    wait_for_complete(&mut fx.events).await;
}
