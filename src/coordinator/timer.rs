//! Cancellable one-shot timers
//!
//! A `OneShotTimer` is owned by a channel entry and guarded by the channel
//! lock. Every arming gets a fresh generation ticket. The spawned task hands
//! its ticket back to the owner through `try_fire` once it holds the lock,
//! so a fire that lost a race against `cancel` or a re-arm is ignored.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Identifies one arming of a timer
pub type TimerTicket = u64;

#[derive(Debug, Default)]
pub struct OneShotTimer {
    generation: TimerTicket,
    pending: Option<JoinHandle<()>>,
}

impl OneShotTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer, cancelling any previous arming first.
    ///
    /// After `delay`, `on_fire` runs with this arming's ticket. It must call
    /// `try_fire` under the owner's lock before acting.
    pub fn arm<F, Fut>(&mut self, delay: Duration, on_fire: F) -> TimerTicket
    where
        F: FnOnce(TimerTicket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let ticket = self.generation;
        self.pending = Some(tokio::spawn(async move {
            sleep(delay).await;
            on_fire(ticket).await;
        }));
        ticket
    }

    /// Cancel the outstanding arming. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        // bump so a task already past its sleep cannot claim the fire
        self.generation += 1;
        match self.pending.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Claim the fire for `ticket`.
    ///
    /// Succeeds at most once per arming and only for the latest one. The
    /// task's handle is released without aborting it, since the caller is
    /// that task.
    pub fn try_fire(&mut self, ticket: TimerTicket) -> bool {
        if self.pending.is_none() || ticket != self.generation {
            return false;
        }
        self.pending = None;
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex};

    /// Arm a shared timer whose fire reports the claimed ticket
    fn arm_reporting(
        timer: &Arc<Mutex<OneShotTimer>>,
        guard: &mut OneShotTimer,
        delay: Duration,
        fired: mpsc::UnboundedSender<TimerTicket>,
    ) -> TimerTicket {
        let owner = timer.clone();
        guard.arm(delay, move |ticket| async move {
            let mut timer = owner.lock().await;
            if timer.try_fire(ticket) {
                let _ = fired.send(ticket);
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let timer = Arc::new(Mutex::new(OneShotTimer::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let ticket = {
            let mut guard = timer.lock().await;
            arm_reporting(&timer, &mut guard, Duration::from_secs(5), tx)
        };
        assert!(timer.lock().await.is_pending());

        sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());

        assert_eq!(rx.recv().await, Some(ticket));
        assert!(!timer.lock().await.is_pending());
        // sender dropped with the finished task
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let timer = Arc::new(Mutex::new(OneShotTimer::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        {
            let mut guard = timer.lock().await;
            arm_reporting(&timer, &mut guard, Duration::from_secs(5), tx);
            assert!(guard.cancel());
            // second cancel is a no-op
            assert!(!guard.cancel());
        }

        sleep(Duration::from_secs(10)).await;
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous() {
        let timer = Arc::new(Mutex::new(OneShotTimer::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (first, second) = {
            let mut guard = timer.lock().await;
            let first = arm_reporting(&timer, &mut guard, Duration::from_secs(5), tx.clone());
            let second = arm_reporting(&timer, &mut guard, Duration::from_secs(8), tx);
            (first, second)
        };
        assert_ne!(first, second);

        sleep(Duration::from_secs(6)).await;
        assert!(rx.try_recv().is_err());

        assert_eq!(rx.recv().await, Some(second));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_stale_ticket_rejected() {
        let mut timer = OneShotTimer::new();
        let first = timer.arm(Duration::from_secs(60), |_| async {});
        let second = timer.arm(Duration::from_secs(60), |_| async {});

        assert!(!timer.try_fire(first));
        assert!(timer.try_fire(second));
        // a ticket fires at most once
        assert!(!timer.try_fire(second));
        assert!(!timer.cancel());
    }

    #[test]
    fn test_cancel_unarmed_is_noop() {
        let mut timer = OneShotTimer::new();
        assert!(!timer.cancel());
        assert!(!timer.is_pending());
        assert!(!timer.try_fire(0));
    }
}
