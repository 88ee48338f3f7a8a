//! Common types used throughout the coordinator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a chat room
pub type ChannelId = String;

/// Stable identifier of a chat participant
pub type PlayerId = String;

/// Unique identifier for game instances
pub type GameId = Uuid;

/// A chat participant as seen by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
}

/// A chat message arriving from the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub channel_name: String,
    pub sender: Player,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Request to join the forming game of a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub channel_id: ChannelId,
    pub channel_name: String,
    pub player_id: PlayerId,
    pub player_name: String,
}

impl From<&InboundMessage> for JoinRequest {
    fn from(message: &InboundMessage) -> Self {
        Self {
            channel_id: message.channel_id.clone(),
            channel_name: message.channel_name.clone(),
            player_id: message.sender.id.clone(),
            player_name: message.sender.display_name.clone(),
        }
    }
}

/// Markup dialect of an outbound message body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    Text,
    Html,
    Markdown,
}

/// Message enqueued to the outbound sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel_id: ChannelId,
    pub text: String,
    pub format: MessageFormat,
    /// Transient notices may be dropped by the transport after this instant
    pub discard_after: Option<DateTime<Utc>>,
}

impl OutboundMessage {
    pub fn new(channel_id: impl Into<ChannelId>, text: impl Into<String>, format: MessageFormat) -> Self {
        Self {
            channel_id: channel_id.into(),
            text: text.into(),
            format,
            discard_after: None,
        }
    }

    /// Mark the message as transient for `lifetime` from now.
    ///
    /// A lifetime too large to represent leaves the message permanent.
    pub fn discard_after(mut self, lifetime: std::time::Duration) -> Self {
        self.discard_after = chrono::Duration::from_std(lifetime)
            .ok()
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));
        self
    }
}

/// One line of a channel ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub position: u32,
    pub score: i64,
    pub name: String,
}

/// Outcome of a join event, reported back to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The channel is disabled; the explanatory message was sent instead
    ChannelDisabled,
    /// The game could not be constructed; no channel entry exists
    Rejected,
    /// The channel is waiting for a free admission slot
    Queued { joined: usize },
    /// Admitted and collecting players
    WaitingForQuorum { joined: usize, needed: usize },
    /// This join completed the quorum and started the game
    Started,
    /// The player had already committed to this game
    AlreadyJoined,
    /// A game is already running in this channel
    InProgress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_discard_after_sets_deadline() {
        let before = Utc::now();
        let message = OutboundMessage::new("c1", "notice", MessageFormat::Text)
            .discard_after(Duration::from_secs(5));

        let deadline = message.discard_after.unwrap();
        assert!(deadline >= before + chrono::Duration::seconds(5));
        assert!(deadline <= Utc::now() + chrono::Duration::seconds(5));
    }

    #[test]
    fn test_discard_after_out_of_range_keeps_message() {
        // far past the largest representable date
        let message = OutboundMessage::new("c1", "notice", MessageFormat::Text)
            .discard_after(Duration::from_secs(10_000_000_000_000));
        assert!(message.discard_after.is_none());

        let message = OutboundMessage::new("c1", "notice", MessageFormat::Text)
            .discard_after(Duration::MAX);
        assert!(message.discard_after.is_none());
    }
}
