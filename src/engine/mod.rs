//! Game engine seam
//!
//! The coordinator never looks inside a game. It constructs one through a
//! `GameEngine`, drives its state through the admission lifecycle, starts it
//! once quorum is reached and waits for the game to report that it finished.

pub mod timed;

pub use timed::{TimedGame, TimedGameEngine};

use crate::error::Result;
use crate::messaging::MessagePublisher;
use crate::types::{ChannelId, GameId, Player};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Lifecycle state of a game as seen by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Created,
    Queued,
    Started,
    Finished,
}

impl GameState {
    /// Whether the lifecycle may move from `self` to `next`.
    ///
    /// `Queued -> Created` is the only backwards-looking edge; callers are
    /// responsible for allowing `Queued` at most once per game.
    pub fn can_advance_to(self, next: GameState) -> bool {
        use GameState::*;
        matches!(
            (self, next),
            (Created, Queued) | (Queued, Created) | (Created, Started) | (Created, Finished)
                | (Queued, Finished)
                | (Started, Finished)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == GameState::Finished
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameState::Created => "created",
            GameState::Queued => "queued",
            GameState::Started => "started",
            GameState::Finished => "finished",
        };
        write!(f, "{}", name)
    }
}

/// Chat text routed to a running game
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameInput {
    pub player: Player,
    pub text: String,
}

/// Emitted by a game when it has run to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameFinished {
    pub channel_id: ChannelId,
    pub game_id: GameId,
}

/// Handle a game uses to report that it finished
#[derive(Debug, Clone)]
pub struct GameFinishedNotifier {
    channel_id: ChannelId,
    game_id: GameId,
    sender: mpsc::UnboundedSender<GameFinished>,
}

impl GameFinishedNotifier {
    pub fn new(
        channel_id: ChannelId,
        game_id: GameId,
        sender: mpsc::UnboundedSender<GameFinished>,
    ) -> Self {
        Self {
            channel_id,
            game_id,
            sender,
        }
    }

    pub fn notify(&self) {
        let event = GameFinished {
            channel_id: self.channel_id.clone(),
            game_id: self.game_id,
        };
        if self.sender.send(event).is_err() {
            warn!(
                "Game {} in channel {} finished but nobody is listening",
                self.game_id, self.channel_id
            );
        }
    }
}

/// Everything a game needs from its surroundings
pub struct GameContext {
    pub game_id: GameId,
    pub channel_id: ChannelId,
    pub channel_name: String,
    /// Player chat routed to this game while it runs
    pub inputs: mpsc::Receiver<GameInput>,
    pub publisher: Arc<dyn MessagePublisher>,
    pub finished: GameFinishedNotifier,
}

/// Opaque game instance owned by a channel
pub trait Game: Send + Sync {
    fn id(&self) -> GameId;

    fn state(&self) -> GameState;

    fn set_state(&mut self, state: GameState);

    /// Begin play. Called exactly once, after quorum.
    fn start(&mut self) -> Result<()>;
}

/// Factory for games
pub trait GameEngine: Send + Sync {
    fn create_game(&self, context: GameContext) -> Result<Box<dyn Game>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(GameState::Created.can_advance_to(GameState::Queued));
        assert!(GameState::Queued.can_advance_to(GameState::Created));
        assert!(GameState::Created.can_advance_to(GameState::Started));
        assert!(GameState::Started.can_advance_to(GameState::Finished));
        assert!(GameState::Queued.can_advance_to(GameState::Finished));
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!GameState::Queued.can_advance_to(GameState::Started));
        assert!(!GameState::Started.can_advance_to(GameState::Created));
        assert!(!GameState::Finished.can_advance_to(GameState::Created));
        assert!(!GameState::Finished.can_advance_to(GameState::Finished));
        assert!(GameState::Finished.is_terminal());
    }

    #[tokio::test]
    async fn test_notifier_sends_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let game_id = crate::utils::generate_game_id();
        let notifier = GameFinishedNotifier::new("c1".to_string(), game_id, tx);

        notifier.notify();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel_id, "c1");
        assert_eq!(event.game_id, game_id);
    }
}
