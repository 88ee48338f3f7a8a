//! Test fixtures shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use trivia_quorum::admission::AdmissionQueue;
use trivia_quorum::coordinator::{ChannelCoordinator, CoordinatorSettings};
use trivia_quorum::engine::{
    Game, GameContext, GameEngine, GameFinished, GameFinishedNotifier, GameInput, GameState,
};
use trivia_quorum::error::Result;
use trivia_quorum::messaging::MockMessagePublisher;
use trivia_quorum::metrics::MetricsCollector;
use trivia_quorum::store::{ChannelStore, QUEUED_KEY};
use trivia_quorum::types::{ChannelId, GameId, InboundMessage, JoinRequest, Player, RankEntry};

/// Game that only records that it was started
pub struct RecordedGame {
    id: GameId,
    state: GameState,
    starts: Arc<AtomicUsize>,
    _inputs: mpsc::Receiver<GameInput>,
}

impl Game for RecordedGame {
    fn id(&self) -> GameId {
        self.id
    }

    fn state(&self) -> GameState {
        self.state
    }

    fn set_state(&mut self, state: GameState) {
        self.state = state;
    }

    fn start(&mut self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Engine that keeps the finish notifier of every game it creates
#[derive(Default)]
pub struct RecordingEngine {
    pub starts: Arc<AtomicUsize>,
    pub created: AtomicUsize,
    pub fail_create: AtomicBool,
    notifiers: Mutex<HashMap<ChannelId, GameFinishedNotifier>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Report the latest game of `channel_id` as finished
    pub fn finish(&self, channel_id: &str) -> bool {
        let notifiers = self.notifiers.lock().unwrap();
        match notifiers.get(channel_id) {
            Some(notifier) => {
                notifier.notify();
                true
            }
            None => false,
        }
    }
}

impl GameEngine for RecordingEngine {
    fn create_game(&self, context: GameContext) -> Result<Box<dyn Game>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("question bank unavailable"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.notifiers
            .lock()
            .unwrap()
            .insert(context.channel_id.clone(), context.finished);
        Ok(Box::new(RecordedGame {
            id: context.game_id,
            state: GameState::Created,
            starts: self.starts.clone(),
            _inputs: context.inputs,
        }))
    }
}

/// Store with per-channel switches and an optional failure mode
#[derive(Default)]
pub struct ScriptedStore {
    disabled: Mutex<HashMap<ChannelId, String>>,
    unqueued: Mutex<Vec<ChannelId>>,
    ranking: Mutex<HashMap<ChannelId, Vec<RankEntry>>>,
    pub failing: AtomicBool,
    pub config_lookups: AtomicUsize,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable(&self, channel_id: &str, message: &str) {
        self.disabled
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), message.to_string());
    }

    pub fn disable_queuing(&self, channel_id: &str) {
        self.unqueued.lock().unwrap().push(channel_id.to_string());
    }

    pub fn set_ranking(&self, channel_id: &str, ranking: Vec<RankEntry>) {
        self.ranking
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), ranking);
    }

    fn check_failing(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelStore for ScriptedStore {
    async fn channel_ranking(&self, channel_id: &str, limit: usize) -> Result<Vec<RankEntry>> {
        self.check_failing()?;
        let ranking = self.ranking.lock().unwrap();
        Ok(ranking
            .get(channel_id)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn channel_config(&self, channel_id: &str, key: &str, default: &str) -> Result<String> {
        self.config_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        if key == QUEUED_KEY {
            let unqueued = self.unqueued.lock().unwrap();
            if unqueued.iter().any(|id| id == channel_id) {
                return Ok("no".to_string());
            }
            return Ok(default.to_string());
        }
        let disabled = self.disabled.lock().unwrap();
        Ok(disabled
            .get(channel_id)
            .cloned()
            .unwrap_or_else(|| default.to_string()))
    }

    async fn channels(&self) -> Result<HashMap<ChannelId, String>> {
        self.check_failing()?;
        Ok(self
            .ranking
            .lock()
            .unwrap()
            .keys()
            .map(|id| (id.clone(), id.to_uppercase()))
            .collect())
    }
}

/// A coordinator wired to recording collaborators
pub struct TestSystem {
    pub coordinator: ChannelCoordinator,
    pub engine: Arc<RecordingEngine>,
    pub store: Arc<ScriptedStore>,
    pub publisher: Arc<MockMessagePublisher>,
    pub admission: Arc<AdmissionQueue>,
    pub metrics: Arc<MetricsCollector>,
    pub finished: Option<mpsc::UnboundedReceiver<GameFinished>>,
}

impl TestSystem {
    /// Spawn the lifecycle listener so finished games are torn down
    pub fn run_lifecycle(&mut self) {
        if let Some(receiver) = self.finished.take() {
            let coordinator = self.coordinator.clone();
            tokio::spawn(async move {
                coordinator.run_lifecycle(receiver).await;
            });
        }
    }
}

pub fn settings(min_quorum: usize) -> CoordinatorSettings {
    CoordinatorSettings {
        min_quorum,
        quorum_wait: Duration::from_secs(120),
        quorum_notify: Duration::from_secs(5),
        notice_lifetime: Duration::from_secs(5),
        game_input_buffer: 16,
        bot_name: "triviabot".to_string(),
    }
}

pub fn create_test_system(min_quorum: usize, capacity: usize) -> TestSystem {
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let engine = Arc::new(RecordingEngine::new());
    let store = Arc::new(ScriptedStore::new());
    let publisher = Arc::new(MockMessagePublisher::new());
    let admission = Arc::new(AdmissionQueue::new(capacity, metrics.clone()));

    let (coordinator, finished) = ChannelCoordinator::new(
        settings(min_quorum),
        admission.clone(),
        engine.clone(),
        store.clone(),
        publisher.clone(),
        metrics.clone(),
    );

    TestSystem {
        coordinator,
        engine,
        store,
        publisher,
        admission,
        metrics,
        finished: Some(finished),
    }
}

pub fn join_request(channel_id: &str, player_id: &str) -> JoinRequest {
    JoinRequest {
        channel_id: channel_id.to_string(),
        channel_name: format!("Room {}", channel_id),
        player_id: player_id.to_string(),
        player_name: format!("Player {}", player_id),
    }
}

pub fn chat_message(channel_id: &str, player_id: &str, text: &str) -> InboundMessage {
    InboundMessage {
        channel_id: channel_id.to_string(),
        channel_name: format!("Room {}", channel_id),
        sender: Player {
            id: player_id.to_string(),
            display_name: format!("Player {}", player_id),
        },
        text: text.to_string(),
        timestamp: Utc::now(),
    }
}
