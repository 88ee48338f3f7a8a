//! Demo engine used by the binary
//!
//! A `TimedGame` announces itself, collects chat answers for a fixed round
//! duration and then reports that it finished. It stands in for the real
//! trivia round logic.

use crate::engine::{Game, GameContext, GameEngine, GameInput, GameState};
use crate::error::{CoordinatorError, Result};
use crate::types::{ChannelId, GameId, MessageFormat, OutboundMessage};
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Engine producing fixed-duration demo games
#[derive(Debug, Clone)]
pub struct TimedGameEngine {
    round_duration: Duration,
}

impl TimedGameEngine {
    pub fn new(round_duration: Duration) -> Self {
        Self { round_duration }
    }
}

impl GameEngine for TimedGameEngine {
    fn create_game(&self, context: GameContext) -> Result<Box<dyn Game>> {
        debug!(
            "Creating timed game {} for channel {}",
            context.game_id, context.channel_id
        );
        Ok(Box::new(TimedGame {
            id: context.game_id,
            channel_id: context.channel_id.clone(),
            state: GameState::Created,
            round_duration: self.round_duration,
            context: Some(context),
            round: None,
        }))
    }
}

pub struct TimedGame {
    id: GameId,
    channel_id: ChannelId,
    state: GameState,
    round_duration: Duration,
    context: Option<GameContext>,
    round: Option<JoinHandle<()>>,
}

impl Game for TimedGame {
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
        let context = self
            .context
            .take()
            .ok_or_else(|| CoordinatorError::GameStartFailed {
                channel_id: self.channel_id.clone(),
                reason: format!("game {} was already started", self.id),
            })?;

        info!(
            "Starting timed game {} in channel {} for {:?}",
            self.id, self.channel_id, self.round_duration
        );
        self.round = Some(tokio::spawn(play_round(context, self.round_duration)));
        Ok(())
    }
}

impl Drop for TimedGame {
    fn drop(&mut self) {
        if let Some(round) = self.round.take() {
            round.abort();
        }
    }
}

async fn play_round(mut context: GameContext, round_duration: Duration) {
    let channel_id = context.channel_id.clone();
    let announce = OutboundMessage::new(
        channel_id.clone(),
        format!(
            "The game has started! Answer in chat, the round ends in {}s.",
            round_duration.as_secs()
        ),
        MessageFormat::Text,
    );
    if let Err(e) = context.publisher.publish(announce).await {
        warn!("Failed to announce game in channel {}: {}", channel_id, e);
    }

    let deadline = Instant::now() + round_duration;
    let mut answers: HashMap<String, usize> = HashMap::new();
    loop {
        tokio::select! {
            _ = sleep_until(deadline) => break,
            input = context.inputs.recv() => match input {
                Some(GameInput { player, text }) => {
                    debug!("Answer from {} in {}: {}", player.display_name, channel_id, text);
                    *answers.entry(player.display_name).or_default() += 1;
                }
                None => break,
            },
        }
    }

    let total: usize = answers.values().sum();
    let summary = OutboundMessage::new(
        channel_id.clone(),
        format!(
            "Round over: {} answers from {} players.",
            total,
            answers.len()
        ),
        MessageFormat::Text,
    );
    if let Err(e) = context.publisher.publish(summary).await {
        warn!("Failed to send round summary to {}: {}", channel_id, e);
    }

    context.finished.notify();
}
