//! Trivia Quorum - admission queue and quorum coordinator for chat trivia
//!
//! Channels ask for a game with `/join`. The coordinator caps the number of
//! concurrently running games, queues channels behind that cap, collects a
//! quorum of distinct players and disbands games that never fill up.

pub mod admission;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod messaging;
pub mod metrics;
pub mod rate_limit;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{CoordinatorError, Result};
pub use types::*;

// Re-export key components
pub use admission::{AdmissionQueue, AdmissionSlot};
pub use commands::CommandDispatcher;
pub use coordinator::{ChannelCoordinator, CoordinatorSettings};
pub use engine::{Game, GameEngine};
pub use messaging::MessagePublisher;
pub use rate_limit::RateLimiter;
pub use store::{ChannelStore, InMemoryChannelStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
