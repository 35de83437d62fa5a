//! Stoppable background loops.
//!
//! Each component owns its sweep as a [`PeriodicTask`]: starting it is an
//! explicit call, and stopping it is either [`PeriodicTask::stop`] or dropping
//! the handle. The sweep bodies themselves are plain synchronous methods on
//! the components, so tests call them directly instead of waiting on a timer.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Handle to a closure running on a fixed interval.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `tick` onto the current tokio runtime, once per `period`.
    ///
    /// The first run happens one full `period` after spawning. The loop ends
    /// on its own when `tick` returns `false`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime, or if `period` is zero.
    pub fn spawn<F>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !tick() {
                    debug!(task = name, "periodic task owner dropped; exiting");
                    break;
                }
            }
        });
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the loop. A tick already in progress runs to completion.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
