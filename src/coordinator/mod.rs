//! Game admission and quorum coordination
//!
//! A channel moves through `WaitingForSlot -> WaitingForQuorum -> Running`
//! and is removed when its game ends or is disbanded.

pub mod channel;
pub mod manager;
pub mod timer;

pub use channel::{ChannelEntry, ChannelPhase, ChannelSnapshot};
pub use manager::{ChannelCoordinator, CoordinatorSettings, CoordinatorStats};
pub use timer::{OneShotTimer, TimerTicket};
