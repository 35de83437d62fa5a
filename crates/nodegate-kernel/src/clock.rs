//! Time sources for the admission and consistency components.
//!
//! Components never call `Instant::now()` or `tokio::time::sleep` directly;
//! they hold a [`SharedClock`] so tests can decide how time moves.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// A monotonic time source with a cooperative sleep.
#[async_trait]
pub trait Clock: Debug + Send + Sync {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Suspend the calling task for `duration` as measured by this clock.
    async fn sleep(&self, duration: Duration);
}

pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by tokio's timer.
///
/// Under `#[tokio::test(start_paused = true)]` both `now()` and `sleep()`
/// follow the paused runtime clock, so timing assertions are exact.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl TokioClock {
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that only moves when [`ManualClock::advance`] is called.
///
/// Sleepers park until the clock reaches their deadline. `advance` is
/// synchronous: it wakes sleepers but does not yield, so a test can advance
/// time and inspect component state before any woken task runs.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
    tick: Notify,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            tick: Notify::new(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Move the clock forward by `by` and wake every parked sleeper.
    pub fn advance(&self, by: Duration) {
        {
            let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
            *offset += by;
        }
        self.tick.notify_waiters();
    }

    /// Total time advanced since construction.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        loop {
            let notified = self.tick.notified();
            tokio::pin!(notified);
            // Register before re-checking so an advance between the check
            // and the await is not lost.
            notified.as_mut().enable();
            if self.now() >= deadline {
                return;
            }
            notified.await;
        }
    }
}
