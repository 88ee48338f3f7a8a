//! Per-channel coordination state

use crate::admission::AdmissionSlot;
use crate::coordinator::timer::OneShotTimer;
use crate::engine::{Game, GameInput, GameState};
use crate::error::{CoordinatorError, Result};
use crate::types::{ChannelId, GameId, PlayerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Where a channel is in the admission lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPhase {
    /// Blocked on the admission queue
    WaitingForSlot,
    /// Admitted, collecting players until quorum or expiry
    WaitingForQuorum,
    Running,
}

/// Read-only view of a channel entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel_id: ChannelId,
    pub display_name: String,
    pub game_id: GameId,
    pub phase: ChannelPhase,
    pub game_state: GameState,
    pub quorum_size: usize,
    pub player_names: Vec<String>,
    pub holds_slot: bool,
    pub expiry_pending: bool,
    pub notify_pending: bool,
}

/// State of one channel, guarded by its own mutex in the registry
pub struct ChannelEntry {
    pub(crate) channel_id: ChannelId,
    pub(crate) display_name: String,
    pub(crate) phase: ChannelPhase,
    game: Box<dyn Game>,
    was_queued: bool,
    /// Distinct players in join order
    quorum_players: Vec<PlayerId>,
    players: HashMap<PlayerId, String>,
    /// `None` when the channel bypassed the queue or has not been admitted
    pub(crate) slot: Option<AdmissionSlot>,
    pub(crate) expiry: OneShotTimer,
    pub(crate) notify: OneShotTimer,
    notify_armed: bool,
    pub(crate) admission_wait: Option<AbortHandle>,
    input_tx: mpsc::Sender<GameInput>,
    torn_down: bool,
}

impl ChannelEntry {
    pub fn new(
        channel_id: ChannelId,
        display_name: String,
        game: Box<dyn Game>,
        input_tx: mpsc::Sender<GameInput>,
    ) -> Self {
        Self {
            channel_id,
            display_name,
            phase: ChannelPhase::WaitingForSlot,
            game,
            was_queued: false,
            quorum_players: Vec::new(),
            players: HashMap::new(),
            slot: None,
            expiry: OneShotTimer::new(),
            notify: OneShotTimer::new(),
            notify_armed: false,
            admission_wait: None,
            input_tx,
            torn_down: false,
        }
    }

    /// Record a player. Returns `false` if they had already joined.
    pub fn add_player(&mut self, player_id: &str, display_name: &str) -> bool {
        if self.players.contains_key(player_id) {
            return false;
        }
        self.players
            .insert(player_id.to_string(), display_name.to_string());
        self.quorum_players.push(player_id.to_string());
        true
    }

    pub fn quorum_size(&self) -> usize {
        self.quorum_players.len()
    }

    pub fn has_quorum(&self, min_quorum: usize) -> bool {
        self.quorum_size() >= min_quorum
    }

    /// Display names in join order
    pub fn player_names(&self) -> Vec<String> {
        self.quorum_players
            .iter()
            .filter_map(|id| self.players.get(id).cloned())
            .collect()
    }

    pub fn game_id(&self) -> GameId {
        self.game.id()
    }

    pub fn game_state(&self) -> GameState {
        self.game.state()
    }

    /// Move the game forward, refusing backwards or repeated transitions
    pub fn advance(&mut self, next: GameState) -> Result<()> {
        let current = self.game.state();
        let repeat_queue = next == GameState::Queued && self.was_queued;
        if !current.can_advance_to(next) || repeat_queue {
            return Err(CoordinatorError::InvalidStateTransition {
                from: current.to_string(),
                to: next.to_string(),
            }
            .into());
        }
        if next == GameState::Queued {
            self.was_queued = true;
        }
        self.game.set_state(next);
        Ok(())
    }

    pub fn start_game(&mut self) -> Result<()> {
        self.game.start()
    }

    /// Arm bookkeeping for the notify timer; false if already armed this episode
    pub(crate) fn claim_notify(&mut self) -> bool {
        if self.notify_armed {
            return false;
        }
        self.notify_armed = true;
        true
    }

    pub fn holds_slot(&self) -> bool {
        self.slot.is_some()
    }

    /// Hand chat text to the running game without waiting
    pub(crate) fn send_input(
        &self,
        input: GameInput,
    ) -> std::result::Result<(), mpsc::error::TrySendError<GameInput>> {
        self.input_tx.try_send(input)
    }

    pub(crate) fn mark_torn_down(&mut self) {
        self.torn_down = true;
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            channel_id: self.channel_id.clone(),
            display_name: self.display_name.clone(),
            game_id: self.game.id(),
            phase: self.phase,
            game_state: self.game.state(),
            quorum_size: self.quorum_size(),
            player_names: self.player_names(),
            holds_slot: self.holds_slot(),
            expiry_pending: self.expiry.is_pending(),
            notify_pending: self.notify.is_pending(),
        }
    }
}
