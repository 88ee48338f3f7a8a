//! Admission control for running games
//!
//! A fixed number of games may run at once. Channels that cannot get a slot
//! immediately wait in the queue unless queuing is disabled for them.

pub mod queue;

pub use queue::{AdmissionMode, AdmissionQueue, AdmissionSlot};
