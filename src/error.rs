//! Error types for the quorum coordinator
//!
//! Domain failures are expressed as `CoordinatorError` variants and carried
//! through the crate as `anyhow::Error` for consistent propagation.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific coordination scenarios
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Game creation failed for channel {channel_id}: {reason}")]
    GameCreationFailed { channel_id: String, reason: String },

    #[error("Game start failed for channel {channel_id}: {reason}")]
    GameStartFailed { channel_id: String, reason: String },

    #[error("Invalid game state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Message publish failed: {reason}")]
    PublishFailed { reason: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}
