//! Bounded pool of game slots
//!
//! Each running game holds one `AdmissionSlot`. Slots are RAII permits: the
//! slot goes back to the pool when the holder drops it, so a slot can only be
//! released by the component that acquired it, and only once.

use crate::error::{CoordinatorError, Result};
use crate::metrics::MetricsCollector;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

/// How a slot was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionMode {
    /// A slot was free when the channel asked
    Immediate,
    /// The channel waited in the queue
    Queued,
}

impl AdmissionMode {
    fn as_label(&self) -> &'static str {
        match self {
            AdmissionMode::Immediate => "immediate",
            AdmissionMode::Queued => "queued",
        }
    }
}

/// A held admission slot. Dropping it releases the slot.
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
    mode: AdmissionMode,
    acquired_at: Instant,
    metrics: Arc<MetricsCollector>,
}

impl std::fmt::Debug for AdmissionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionSlot")
            .field("mode", &self.mode)
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

impl AdmissionSlot {
    pub fn mode(&self) -> AdmissionMode {
        self.mode
    }

    /// Time since the slot was acquired
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        self.metrics.record_slot_released();
        debug!("Admission slot released after {:?}", self.acquired_at.elapsed());
    }
}

/// Decrements the waiting counters even if the acquiring future is dropped
struct WaitingGuard<'a> {
    waiting: &'a AtomicUsize,
    metrics: &'a MetricsCollector,
}

impl<'a> WaitingGuard<'a> {
    fn enter(waiting: &'a AtomicUsize, metrics: &'a MetricsCollector) -> Self {
        waiting.fetch_add(1, Ordering::SeqCst);
        metrics.admission().games_queued.inc();
        Self { waiting, metrics }
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        self.metrics.admission().games_queued.dec();
    }
}

/// Counting semaphore limiting the number of concurrently running games
pub struct AdmissionQueue {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    waiting: AtomicUsize,
    metrics: Arc<MetricsCollector>,
}

impl AdmissionQueue {
    /// Create a queue with `capacity` slots
    pub fn new(capacity: usize, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            waiting: AtomicUsize::new(0),
            metrics,
        }
    }

    /// Take a slot if one is free right now
    pub fn try_acquire(&self) -> Option<AdmissionSlot> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.wrap(permit, AdmissionMode::Immediate))
    }

    /// Wait until a slot is free and take it.
    ///
    /// Waiters are served in arrival order. Fails only after `close`.
    pub async fn acquire(&self) -> Result<AdmissionSlot> {
        let start = Instant::now();
        let permit = {
            let _waiting = WaitingGuard::enter(&self.waiting, &self.metrics);
            self.semaphore.clone().acquire_owned().await.map_err(|_| {
                CoordinatorError::InternalError {
                    message: "Admission queue is closed".to_string(),
                }
            })?
        };

        let waited = start.elapsed();
        self.metrics.record_queue_wait(waited);
        debug!("Admission slot acquired after waiting {:?}", waited);

        Ok(self.wrap(permit, AdmissionMode::Queued))
    }

    /// Refuse further acquisitions and wake every waiter with an error
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of free slots
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of slots currently held
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Number of channels blocked in `acquire`
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Mean time spent waiting for a slot, read from the wait histogram
    pub fn mean_wait(&self) -> Duration {
        let histogram = &self.metrics.admission().queue_wait_seconds;
        let count = histogram.get_sample_count();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(histogram.get_sample_sum() / count as f64).unwrap_or_default()
    }

    fn wrap(&self, permit: OwnedSemaphorePermit, mode: AdmissionMode) -> AdmissionSlot {
        self.metrics.record_slot_acquired(mode.as_label());
        AdmissionSlot {
            _permit: permit,
            mode,
            acquired_at: Instant::now(),
            metrics: self.metrics.clone(),
        }
    }
}
