//! Per-key cooldown gate for chat commands
//!
//! A call for a key is allowed when the key has never been allowed before or
//! when its last allowed call is at least `cooldown` old. Allowed calls
//! overwrite the stored timestamp; rejected calls leave it untouched.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// Cooldown limiter keyed by string (command and channel)
#[derive(Debug, Default)]
pub struct RateLimiter {
    last_allowed: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a call for `key` is allowed now
    pub fn allow(&self, key: &str, cooldown: Duration) -> bool {
        self.allow_at(key, cooldown, Instant::now())
    }

    /// Check whether a call for `key` made at `now` is allowed.
    pub fn allow_at(&self, key: &str, cooldown: Duration, now: Instant) -> bool {
        let mut last_allowed = self.entries();

        if let Some(last) = last_allowed.get(key) {
            // a clock that went backwards counts as "no time elapsed"
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < cooldown {
                debug!(
                    "Rate limited '{}' - {:?} remaining",
                    key,
                    cooldown - elapsed
                );
                return false;
            }
        }

        last_allowed.insert(key.to_string(), now);
        true
    }

    /// Remove keys whose last allowed call is older than `older_than`
    pub fn cleanup(&self, older_than: Duration) -> usize {
        let mut last_allowed = self.entries();
        let before = last_allowed.len();
        let now = Instant::now();
        last_allowed.retain(|_, last| now.saturating_duration_since(*last) < older_than);
        before - last_allowed.len()
    }

    /// Number of tracked keys
    pub fn tracked_keys(&self) -> usize {
        self.entries().len()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        // the map holds plain timestamps, so a poisoned guard is still consistent
        self.last_allowed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
