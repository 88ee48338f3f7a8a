//! Channel coordinator
//!
//! Tracks every channel that requested a game, runs the join protocol,
//! admits channels through the `AdmissionQueue` and starts games once a
//! quorum of distinct players joined. Each channel entry sits behind its own
//! mutex inside a sharded map, so channels never wait on each other.

use crate::admission::AdmissionQueue;
use crate::config::AppConfig;
use crate::coordinator::channel::{ChannelEntry, ChannelPhase, ChannelSnapshot};
use crate::coordinator::timer::TimerTicket;
use crate::engine::{GameContext, GameEngine, GameFinished, GameFinishedNotifier, GameInput, GameState};
use crate::error::{CoordinatorError, Result};
use crate::messaging::MessagePublisher;
use crate::metrics::MetricsCollector;
use crate::store::{ChannelStore, DISABLED_KEY, QUEUED_KEY};
use crate::types::{ChannelId, GameId, JoinOutcome, JoinRequest, MessageFormat, OutboundMessage};
use crate::utils::generate_game_id;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

type SharedEntry = Arc<Mutex<ChannelEntry>>;

/// Tunables of the join protocol
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Distinct players needed to start
    pub min_quorum: usize,
    /// Time an admitted channel may wait for quorum
    pub quorum_wait: Duration,
    /// Delay before the one reminder of a waiting episode
    pub quorum_notify: Duration,
    /// Lifetime of transient notices
    pub notice_lifetime: Duration,
    pub game_input_buffer: usize,
    pub bot_name: String,
}

impl CoordinatorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            min_quorum: config.game.min_quorum,
            quorum_wait: config.quorum_wait(),
            quorum_notify: config.quorum_notify(),
            notice_lifetime: config.notice_lifetime(),
            game_input_buffer: config.game.game_input_buffer,
            bot_name: config.service.bot_name.clone(),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Aggregate view over all channels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub active_channels: usize,
    pub waiting_for_slot: usize,
    pub waiting_for_quorum: usize,
    pub running: usize,
    pub slot_capacity: usize,
    pub slots_in_use: usize,
    pub queue_waiting: usize,
    pub mean_queue_wait_seconds: f64,
    pub games_started: u64,
    pub games_disbanded: u64,
    pub games_finished: u64,
}

#[derive(Debug, Default)]
struct LifetimeCounters {
    games_started: AtomicU64,
    games_disbanded: AtomicU64,
    games_finished: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TeardownReason {
    /// Quorum was not reached in time
    Disbanded,
    /// The engine reported the game over
    Finished,
    StartFailed,
    Shutdown,
}

/// The channel coordinator
#[derive(Clone)]
pub struct ChannelCoordinator {
    /// Active channels by id
    channels: Arc<DashMap<ChannelId, SharedEntry>>,
    /// Global cap on running games
    admission: Arc<AdmissionQueue>,
    engine: Arc<dyn GameEngine>,
    store: Arc<dyn ChannelStore>,
    publisher: Arc<dyn MessagePublisher>,
    metrics: Arc<MetricsCollector>,
    settings: Arc<CoordinatorSettings>,
    /// Handed to every game so it can report completion
    finished_tx: mpsc::UnboundedSender<GameFinished>,
    counters: Arc<LifetimeCounters>,
}

impl ChannelCoordinator {
    /// Create a coordinator and the receiver of game completion events.
    ///
    /// The receiver should be passed to `run_lifecycle`.
    pub fn new(
        settings: CoordinatorSettings,
        admission: Arc<AdmissionQueue>,
        engine: Arc<dyn GameEngine>,
        store: Arc<dyn ChannelStore>,
        publisher: Arc<dyn MessagePublisher>,
        metrics: Arc<MetricsCollector>,
    ) -> (Self, mpsc::UnboundedReceiver<GameFinished>) {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            channels: Arc::new(DashMap::new()),
            admission,
            engine,
            store,
            publisher,
            metrics,
            settings: Arc::new(settings),
            finished_tx,
            counters: Arc::new(LifetimeCounters::default()),
        };
        (coordinator, finished_rx)
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn admission(&self) -> Arc<AdmissionQueue> {
        self.admission.clone()
    }

    /// Handle a join event
    pub async fn join(&self, request: JoinRequest) -> JoinOutcome {
        if self.check_disabled(&request.channel_id).await {
            return JoinOutcome::ChannelDisabled;
        }

        loop {
            let (shared, fresh_guard) = match self.channels.entry(request.channel_id.clone()) {
                Entry::Occupied(occupied) => (occupied.get().clone(), None),
                Entry::Vacant(vacant) => {
                    let entry = match self.create_entry(&request) {
                        Ok(entry) => entry,
                        Err(e) => {
                            error!(
                                "Failed to create game for channel {}: {}",
                                request.channel_id, e
                            );
                            self.metrics.channel().game_creation_failures_total.inc();
                            return JoinOutcome::Rejected;
                        }
                    };
                    let shared = Arc::new(Mutex::new(entry));
                    // nobody else can see the entry yet, so this cannot fail
                    let Ok(guard) = shared.clone().try_lock_owned() else {
                        continue;
                    };
                    vacant.insert(shared.clone());
                    (shared, Some(guard))
                }
            };

            let created = fresh_guard.is_some();
            let mut entry = match fresh_guard {
                Some(guard) => guard,
                None => shared.clone().lock_owned().await,
            };

            if entry.is_torn_down() {
                debug!(
                    "Channel {} was torn down while we waited, retrying join",
                    request.channel_id
                );
                continue;
            }

            return if created {
                self.first_join(&shared, &mut entry, &request).await
            } else {
                self.next_join(&shared, &mut entry, &request).await
            };
        }
    }

    /// Send the disabled message if the channel is disabled.
    ///
    /// Returns whether the channel is disabled. Lookup failures count as
    /// enabled.
    pub async fn check_disabled(&self, channel_id: &str) -> bool {
        let message = match self.store.channel_config(channel_id, DISABLED_KEY, "").await {
            Ok(message) => message,
            Err(e) => {
                warn!("Disabled lookup failed for channel {}: {}", channel_id, e);
                return false;
            }
        };
        if message.is_empty() {
            return false;
        }

        debug!("Channel {} is disabled", channel_id);
        self.send(
            OutboundMessage::new(channel_id, message, MessageFormat::Markdown)
                .discard_after(self.settings.notice_lifetime),
        );
        true
    }

    /// Tear down the channel's game after the engine reported it finished
    pub async fn game_ended(&self, channel_id: &str) -> bool {
        self.end_game(channel_id, None).await
    }

    /// Drain game completion events until every sender is gone
    pub async fn run_lifecycle(&self, mut receiver: mpsc::UnboundedReceiver<GameFinished>) {
        info!("Game lifecycle listener started");
        while let Some(event) = receiver.recv().await {
            debug!(
                "Game {} in channel {} reported finished",
                event.game_id, event.channel_id
            );
            self.end_game(&event.channel_id, Some(event.game_id)).await;
        }
        info!("Game lifecycle listener stopped");
    }

    /// Route chat text to the running game of a channel.
    ///
    /// Returns `false` when no game is running or its input buffer is full.
    pub async fn forward_to_game(&self, channel_id: &str, input: GameInput) -> bool {
        let Some(shared) = self.lookup(channel_id) else {
            return false;
        };
        let entry = shared.lock().await;
        if entry.is_torn_down() || entry.phase != ChannelPhase::Running {
            return false;
        }

        match entry.send_input(input) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Input buffer of channel {} is full, dropping message", channel_id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Game in channel {} stopped reading input", channel_id);
                false
            }
        }
    }

    pub async fn snapshot(&self, channel_id: &str) -> Option<ChannelSnapshot> {
        let shared = self.lookup(channel_id)?;
        let entry = shared.lock().await;
        if entry.is_torn_down() {
            return None;
        }
        Some(entry.snapshot())
    }

    /// Snapshots of every active channel
    pub async fn snapshots(&self) -> Vec<ChannelSnapshot> {
        let mut snapshots = Vec::new();
        for shared in self.all_entries() {
            let entry = shared.lock().await;
            if !entry.is_torn_down() {
                snapshots.push(entry.snapshot());
            }
        }
        snapshots
    }

    pub async fn stats(&self) -> CoordinatorStats {
        let mut stats = CoordinatorStats {
            slot_capacity: self.admission.capacity(),
            slots_in_use: self.admission.in_use(),
            queue_waiting: self.admission.waiting(),
            mean_queue_wait_seconds: self.admission.mean_wait().as_secs_f64(),
            games_started: self.counters.games_started.load(Ordering::Relaxed),
            games_disbanded: self.counters.games_disbanded.load(Ordering::Relaxed),
            games_finished: self.counters.games_finished.load(Ordering::Relaxed),
            ..Default::default()
        };

        for snapshot in self.snapshots().await {
            stats.active_channels += 1;
            match snapshot.phase {
                ChannelPhase::WaitingForSlot => stats.waiting_for_slot += 1,
                ChannelPhase::WaitingForQuorum => stats.waiting_for_quorum += 1,
                ChannelPhase::Running => stats.running += 1,
            }
        }
        stats
    }

    /// Tear down every channel and stop admitting new games
    pub async fn shutdown(&self) {
        info!("Shutting down coordinator with {} channels", self.channels.len());
        self.admission.close();

        for shared in self.all_entries() {
            let mut entry = shared.lock().await;
            if !entry.is_torn_down() {
                self.teardown(&shared, &mut entry, TeardownReason::Shutdown)
                    .await;
            }
        }
    }

    fn lookup(&self, channel_id: &str) -> Option<SharedEntry> {
        self.channels.get(channel_id).map(|entry| entry.value().clone())
    }

    fn all_entries(&self) -> Vec<SharedEntry> {
        self.channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn create_entry(&self, request: &JoinRequest) -> Result<ChannelEntry> {
        let game_id = generate_game_id();
        let (input_tx, input_rx) = mpsc::channel(self.settings.game_input_buffer);

        let game = self
            .engine
            .create_game(GameContext {
                game_id,
                channel_id: request.channel_id.clone(),
                channel_name: request.channel_name.clone(),
                inputs: input_rx,
                publisher: self.publisher.clone(),
                finished: GameFinishedNotifier::new(
                    request.channel_id.clone(),
                    game_id,
                    self.finished_tx.clone(),
                ),
            })
            .map_err(|e| CoordinatorError::GameCreationFailed {
                channel_id: request.channel_id.clone(),
                reason: e.to_string(),
            })?;

        let mut entry = ChannelEntry::new(
            request.channel_id.clone(),
            request.channel_name.clone(),
            game,
            input_tx,
        );
        entry.add_player(&request.player_id, &request.player_name);
        Ok(entry)
    }

    async fn first_join(
        &self,
        shared: &SharedEntry,
        entry: &mut ChannelEntry,
        request: &JoinRequest,
    ) -> JoinOutcome {
        self.metrics.record_channel_opened();
        self.metrics.channel().players_joined_total.inc();
        info!(
            "Player '{}' requested a game in channel {} ({})",
            request.player_id, request.channel_id, request.channel_name
        );

        if let Some(slot) = self.admission.try_acquire() {
            entry.slot = Some(slot);
            return self.admitted(shared, entry).await;
        }

        if !self.queuing_enabled(&request.channel_id).await {
            info!(
                "No free slot and queuing disabled, admitting channel {} without a slot",
                request.channel_id
            );
            self.metrics.admission().queue_bypassed_total.inc();
            return self.admitted(shared, entry).await;
        }

        if let Err(e) = entry.advance(GameState::Queued) {
            warn!("Channel {}: {}", request.channel_id, e);
        }
        entry.phase = ChannelPhase::WaitingForSlot;

        let mean_wait = self.admission.mean_wait().as_secs_f64();
        let text = format!(
            "The game has been queued, average queue time is <b>{:.0}s</b>. \
             Others can still '/join@{}'. The game starts automatically when a slot frees up.",
            mean_wait, self.settings.bot_name
        );
        self.send(
            OutboundMessage::new(request.channel_id.clone(), text, MessageFormat::Html)
                .discard_after(self.settings.notice_lifetime),
        );
        info!(
            "Game {} in channel {} queued for a slot",
            entry.game_id(),
            request.channel_id
        );

        entry.admission_wait = Some(self.spawn_admission_wait(shared));
        JoinOutcome::Queued {
            joined: entry.quorum_size(),
        }
    }

    async fn next_join(
        &self,
        shared: &SharedEntry,
        entry: &mut ChannelEntry,
        request: &JoinRequest,
    ) -> JoinOutcome {
        if entry.phase == ChannelPhase::Running {
            debug!(
                "Join from '{}' ignored, game already running in {}",
                request.player_id, request.channel_id
            );
            return JoinOutcome::InProgress;
        }

        if !entry.add_player(&request.player_id, &request.player_name) {
            debug!(
                "Player '{}' already joined in {}",
                request.player_id, request.channel_id
            );
            return JoinOutcome::AlreadyJoined;
        }
        self.metrics.channel().players_joined_total.inc();
        info!(
            "Player '{}' joined channel {} ({}/{})",
            request.player_id,
            request.channel_id,
            entry.quorum_size(),
            self.settings.min_quorum
        );

        match entry.phase {
            ChannelPhase::WaitingForSlot => JoinOutcome::Queued {
                joined: entry.quorum_size(),
            },
            ChannelPhase::WaitingForQuorum => {
                entry.expiry.cancel();
                if entry.has_quorum(self.settings.min_quorum) {
                    return self.start_game(shared, entry).await;
                }
                self.arm_expiry(shared, entry);
                if entry.claim_notify() {
                    self.arm_notify(shared, entry);
                }
                JoinOutcome::WaitingForQuorum {
                    joined: entry.quorum_size(),
                    needed: self.settings.min_quorum,
                }
            }
            ChannelPhase::Running => JoinOutcome::InProgress,
        }
    }

    /// Continue a channel that just got past admission
    async fn admitted(&self, shared: &SharedEntry, entry: &mut ChannelEntry) -> JoinOutcome {
        if entry.game_state() == GameState::Queued {
            if let Err(e) = entry.advance(GameState::Created) {
                warn!("Channel {}: {}", entry.channel_id, e);
            }
        }

        if entry.has_quorum(self.settings.min_quorum) {
            return self.start_game(shared, entry).await;
        }

        entry.phase = ChannelPhase::WaitingForQuorum;
        self.metrics.channel().channels_awaiting_quorum.inc();
        self.arm_expiry(shared, entry);
        if entry.claim_notify() {
            self.arm_notify(shared, entry);
        }

        info!(
            "Channel {} admitted (slot held: {}), waiting for quorum {}/{}",
            entry.channel_id,
            entry.holds_slot(),
            entry.quorum_size(),
            self.settings.min_quorum
        );
        JoinOutcome::WaitingForQuorum {
            joined: entry.quorum_size(),
            needed: self.settings.min_quorum,
        }
    }

    async fn start_game(&self, shared: &SharedEntry, entry: &mut ChannelEntry) -> JoinOutcome {
        entry.expiry.cancel();
        entry.notify.cancel();

        let started = entry
            .advance(GameState::Started)
            .and_then(|_| entry.start_game());
        if let Err(e) = started {
            error!("Failed to start game in channel {}: {}", entry.channel_id, e);
            self.teardown(shared, entry, TeardownReason::StartFailed)
                .await;
            return JoinOutcome::Rejected;
        }

        if entry.phase == ChannelPhase::WaitingForQuorum {
            self.metrics.channel().channels_awaiting_quorum.dec();
        }
        entry.phase = ChannelPhase::Running;
        self.metrics.channel().games_started_total.inc();
        self.counters.games_started.fetch_add(1, Ordering::Relaxed);

        info!(
            "Game {} started in channel {} with players: {}",
            entry.game_id(),
            entry.channel_id,
            entry.player_names().join(", ")
        );
        JoinOutcome::Started
    }

    fn spawn_admission_wait(&self, shared: &SharedEntry) -> tokio::task::AbortHandle {
        let coordinator = self.clone();
        let target = Arc::downgrade(shared);
        let handle = tokio::spawn(async move {
            coordinator.wait_for_slot(target).await;
        });
        handle.abort_handle()
    }

    async fn wait_for_slot(&self, target: Weak<Mutex<ChannelEntry>>) {
        let acquired = self.admission.acquire().await;

        let Some(shared) = target.upgrade() else {
            return;
        };
        let mut entry = shared.lock().await;
        // this task is finishing on its own, do not abort it from teardown
        entry.admission_wait = None;
        if entry.is_torn_down() {
            debug!("Channel {} gone before admission, slot returned", entry.channel_id);
            return;
        }

        match acquired {
            Ok(slot) => {
                info!(
                    "Channel {} admitted ({:?}) with {} players",
                    entry.channel_id,
                    slot.mode(),
                    entry.quorum_size()
                );
                entry.slot = Some(slot);
                self.admitted(&shared, &mut entry).await;
            }
            Err(e) => {
                warn!("Channel {} could not be admitted: {}", entry.channel_id, e);
                self.teardown(&shared, &mut entry, TeardownReason::Shutdown)
                    .await;
            }
        }
    }

    fn arm_expiry(&self, shared: &SharedEntry, entry: &mut ChannelEntry) {
        let coordinator = self.clone();
        let target = Arc::downgrade(shared);
        entry
            .expiry
            .arm(self.settings.quorum_wait, move |ticket| async move {
                coordinator.on_quorum_timeout(target, ticket).await;
            });
    }

    fn arm_notify(&self, shared: &SharedEntry, entry: &mut ChannelEntry) {
        let coordinator = self.clone();
        let target = Arc::downgrade(shared);
        entry
            .notify
            .arm(self.settings.quorum_notify, move |ticket| async move {
                coordinator.on_notify(target, ticket).await;
            });
    }

    /// Expiry fired: disband if the channel is still short of quorum
    async fn on_quorum_timeout(&self, target: Weak<Mutex<ChannelEntry>>, ticket: TimerTicket) {
        let Some(shared) = target.upgrade() else {
            return;
        };
        let mut entry = shared.lock().await;
        if !entry.expiry.try_fire(ticket) {
            debug!("Stale quorum timer for channel {} ignored", entry.channel_id);
            return;
        }
        if entry.is_torn_down() || entry.phase != ChannelPhase::WaitingForQuorum {
            return;
        }

        info!(
            "Quorum not reached in channel {} ({}/{}), disbanding",
            entry.channel_id,
            entry.quorum_size(),
            self.settings.min_quorum
        );
        self.teardown(&shared, &mut entry, TeardownReason::Disbanded)
            .await;
    }

    /// Notify fired: remind the channel that players are still needed
    async fn on_notify(&self, target: Weak<Mutex<ChannelEntry>>, ticket: TimerTicket) {
        let Some(shared) = target.upgrade() else {
            return;
        };
        let mut entry = shared.lock().await;
        if !entry.notify.try_fire(ticket) {
            return;
        }
        if entry.is_torn_down() || entry.phase != ChannelPhase::WaitingForQuorum {
            return;
        }

        let text = format!(
            "Waiting for more players: {}/{} joined ({}). Type /join@{} to play!",
            entry.quorum_size(),
            self.settings.min_quorum,
            entry.player_names().join(", "),
            self.settings.bot_name
        );
        self.metrics.channel().quorum_reminders_total.inc();
        self.send(
            OutboundMessage::new(entry.channel_id.clone(), text, MessageFormat::Text)
                .discard_after(self.settings.quorum_wait),
        );
    }

    async fn end_game(&self, channel_id: &str, expected: Option<GameId>) -> bool {
        let Some(shared) = self.lookup(channel_id) else {
            debug!("Game end for unknown channel {}", channel_id);
            return false;
        };
        let mut entry = shared.lock().await;
        if entry.is_torn_down() {
            return false;
        }
        if let Some(game_id) = expected {
            if entry.game_id() != game_id {
                debug!(
                    "Ignoring end of game {} in channel {}, current game is {}",
                    game_id,
                    channel_id,
                    entry.game_id()
                );
                return false;
            }
        }

        self.teardown(&shared, &mut entry, TeardownReason::Finished)
            .await;
        true
    }

    /// Remove a channel entry, cancelling its timers and releasing its slot
    async fn teardown(&self, shared: &SharedEntry, entry: &mut ChannelEntry, reason: TeardownReason) {
        entry.expiry.cancel();
        entry.notify.cancel();
        if let Some(wait) = entry.admission_wait.take() {
            wait.abort();
        }
        if entry.phase == ChannelPhase::WaitingForQuorum {
            self.metrics.channel().channels_awaiting_quorum.dec();
        }
        if let Err(e) = entry.advance(GameState::Finished) {
            warn!("Channel {}: {}", entry.channel_id, e);
        }

        let held_for = entry.slot.take().map(|slot| slot.held_for());
        entry.mark_torn_down();
        self.channels
            .remove_if(&entry.channel_id, |_, current| Arc::ptr_eq(current, shared));
        self.metrics.record_channel_closed();

        info!(
            "Channel {} torn down ({:?}), slot released after: {:?}",
            entry.channel_id, reason, held_for
        );

        match reason {
            TeardownReason::Disbanded => {
                self.metrics.channel().games_disbanded_total.inc();
                self.counters.games_disbanded.fetch_add(1, Ordering::Relaxed);
                let text = format!(
                    "Not enough players joined in time, the game was cancelled. \
                     Type /join@{} to try again.",
                    self.settings.bot_name
                );
                self.send(OutboundMessage::new(
                    entry.channel_id.clone(),
                    text,
                    MessageFormat::Text,
                ));
            }
            TeardownReason::Finished => {
                self.metrics.channel().games_finished_total.inc();
                self.counters.games_finished.fetch_add(1, Ordering::Relaxed);
            }
            TeardownReason::StartFailed | TeardownReason::Shutdown => {}
        }
    }

    async fn queuing_enabled(&self, channel_id: &str) -> bool {
        match self.store.channel_config(channel_id, QUEUED_KEY, "").await {
            Ok(value) => value != "no",
            Err(e) => {
                warn!(
                    "Queue config lookup failed for channel {}, queuing: {}",
                    channel_id, e
                );
                true
            }
        }
    }

    /// Notices are sent under the channel lock, so they never wait for the transport
    fn send(&self, message: OutboundMessage) {
        let channel_id = message.channel_id.clone();
        if let Err(e) = self.publisher.try_publish(message) {
            warn!("Failed to send message to channel {}: {}", channel_id, e);
        }
    }
}
