//! The admission limiter: slot counting, FIFO handoff, and queue timeouts.
//!
//! All state sits behind one mutex that is never held across an await.
//! Every transition (grant, release + handoff, timeout, reset, sweep) happens
//! inside a single critical section, so `0 <= active <= max_slots` holds
//! whenever another task can observe it.

use crate::config::{LimiterConfig, LimiterSettings};
use crate::error::AdmissionError;
use crate::stats::{HoldHistory, PoolStats, StressReport};
use nodegate_kernel::{PeriodicTask, SharedClock, TokioClock};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// Queued requests older than this many slot timeouts are swept.
const SWEEP_TIMEOUT_MULTIPLIER: u32 = 2;

/// Proof of one granted slot.
///
/// Hand it back with [`AdmissionLimiter::release`]. Releasing the same
/// handle twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    id: Uuid,
}

impl SlotHandle {
    fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

type Grant = Result<SlotHandle, AdmissionError>;

struct PendingRequest {
    id: Uuid,
    enqueued_at: Instant,
    responder: oneshot::Sender<Grant>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    created: u64,
    destroyed: u64,
    max_used: usize,
}

struct LimiterState {
    max_slots: usize,
    slot_timeout: Duration,
    active: usize,
    /// Acquisition time per live slot.
    held: HashMap<Uuid, Instant>,
    queue: VecDeque<PendingRequest>,
    counters: Counters,
    holds: HoldHistory,
}

impl LimiterState {
    fn has_capacity(&self) -> bool {
        self.active < self.max_slots
    }

    fn grant(&mut self, now: Instant) -> SlotHandle {
        let handle = SlotHandle::new();
        self.active += 1;
        self.counters.created += 1;
        self.counters.max_used = self.counters.max_used.max(self.active);
        self.held.insert(handle.id, now);
        handle
    }

    /// Undo a grant whose receiver disappeared before it could be delivered.
    fn revoke(&mut self, handle: &SlotHandle) {
        if self.held.remove(&handle.id).is_some() {
            self.active = self.active.saturating_sub(1);
            self.counters.created = self.counters.created.saturating_sub(1);
        }
    }

    /// Give free capacity to queued requests, oldest first.
    fn hand_off(&mut self, now: Instant) {
        while self.has_capacity() {
            let Some(pending) = self.queue.pop_front() else {
                break;
            };
            let handle = self.grant(now);
            debug!(
                request = %pending.id,
                slot = %handle.id,
                waited_ms = millis(now.saturating_duration_since(pending.enqueued_at)),
                "handing released slot to queued request"
            );
            if let Err(Ok(undelivered)) = pending.responder.send(Ok(handle)) {
                self.revoke(&undelivered);
            }
        }
    }

    fn remove_pending(&mut self, id: Uuid) -> Option<PendingRequest> {
        let index = self.queue.iter().position(|pending| pending.id == id)?;
        self.queue.remove(index)
    }

    fn snapshot(&self, now: Instant) -> PoolStats {
        let utilization_percent = if self.max_slots == 0 {
            0.0
        } else {
            self.active as f64 * 100.0 / self.max_slots as f64
        };
        PoolStats {
            active: self.active,
            max_slots: self.max_slots,
            created: self.counters.created,
            destroyed: self.counters.destroyed,
            waiting: self.queue.len(),
            max_used: self.counters.max_used,
            queue_length: self.queue.len(),
            utilization_percent,
            average_slot_duration_ms: self.holds.average_ms(),
            oldest_wait_ms: self
                .queue
                .front()
                .map(|head| millis(now.saturating_duration_since(head.enqueued_at))),
        }
    }
}

/// Bounds the number of in-flight operations against a shared backend.
///
/// Construct one per process (or per test) and share it behind an `Arc`.
pub struct AdmissionLimiter {
    clock: SharedClock,
    state: Mutex<LimiterState>,
}

impl std::fmt::Debug for AdmissionLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("AdmissionLimiter")
            .field("active", &state.active)
            .field("max_slots", &state.max_slots)
            .field("queue_length", &state.queue.len())
            .finish()
    }
}

impl Default for AdmissionLimiter {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}

impl AdmissionLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_clock(config, TokioClock::shared())
    }

    pub fn with_clock(config: LimiterConfig, clock: SharedClock) -> Self {
        Self {
            clock,
            state: Mutex::new(LimiterState {
                max_slots: config.max_slots.max(1),
                slot_timeout: config.slot_timeout,
                active: 0,
                held: HashMap::new(),
                queue: VecDeque::new(),
                counters: Counters::default(),
                holds: HoldHistory::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Obtain a slot, queueing behind earlier callers when the pool is full.
    ///
    /// A queued caller is either handed a slot by [`release`](Self::release),
    /// or fails with [`AdmissionError::Timeout`] once the slot timeout elapses.
    /// Dropping the returned future while queued withdraws the request.
    pub async fn acquire(&self) -> Result<SlotHandle, AdmissionError> {
        let (request_id, receiver, timeout) = {
            let mut state = self.lock();
            let now = self.clock.now();
            if state.has_capacity() {
                let handle = state.grant(now);
                debug!(slot = %handle.id, active = state.active, "slot granted immediately");
                return Ok(handle);
            }

            let (responder, receiver) = oneshot::channel();
            let request_id = Uuid::new_v4();
            state.queue.push_back(PendingRequest {
                id: request_id,
                enqueued_at: now,
                responder,
            });
            debug!(
                request = %request_id,
                active = state.active,
                max_slots = state.max_slots,
                queue_length = state.queue.len(),
                "pool full; request queued"
            );
            (request_id, receiver, state.slot_timeout)
        };

        let mut waiter = QueuedWaiter {
            limiter: self,
            request_id,
            receiver,
            settled: false,
        };

        let outcome = tokio::select! {
            biased;
            delivered = &mut waiter.receiver => flatten_delivery(delivered),
            _ = self.clock.sleep(timeout) => self.expire(request_id, &mut waiter.receiver),
        };
        waiter.settled = true;
        outcome
    }

    /// Like [`acquire`](Self::acquire), but the slot is released when the
    /// returned guard drops.
    pub async fn acquire_guard(&self) -> Result<SlotGuard<'_>, AdmissionError> {
        let handle = self.acquire().await?;
        Ok(SlotGuard {
            limiter: self,
            handle: Some(handle),
        })
    }

    /// Timer path for a queued request.
    fn expire(&self, request_id: Uuid, receiver: &mut oneshot::Receiver<Grant>) -> Grant {
        let mut state = self.lock();
        let now = self.clock.now();
        if let Some(pending) = state.remove_pending(request_id) {
            let err = AdmissionError::Timeout {
                active: state.active,
                max_slots: state.max_slots,
                queue_length: state.queue.len(),
                waited_ms: millis(now.saturating_duration_since(pending.enqueued_at)),
            };
            warn!(request = %request_id, error = %err, "admission request timed out");
            return Err(err);
        }
        drop(state);

        // Already serviced (handoff, reset, or sweep) before the timer won;
        // the outcome is sitting in the channel.
        flatten_delivery(receiver.try_recv().map_err(|_| ()))
    }

    /// Return a slot to the pool.
    ///
    /// If requests are queued, the freed slot goes straight to the oldest one.
    /// Returns `false` when the handle is unknown (already released, or
    /// discarded by [`emergency_reset`](Self::emergency_reset)).
    pub fn release(&self, handle: &SlotHandle) -> bool {
        let mut state = self.lock();
        let now = self.clock.now();
        let Some(acquired_at) = state.held.remove(&handle.id) else {
            debug!(slot = %handle.id, "ignoring release of unknown slot");
            return false;
        };
        state.active = state.active.saturating_sub(1);
        state.counters.destroyed += 1;
        state
            .holds
            .record(now.saturating_duration_since(acquired_at));
        state.hand_off(now);
        true
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        state.snapshot(self.clock.now())
    }

    pub fn stress(&self) -> StressReport {
        StressReport::evaluate(&self.stats())
    }

    /// Reject every queued request and forget every live slot.
    ///
    /// Historical `created`/`destroyed` counters are kept.
    pub fn emergency_reset(&self) {
        let mut state = self.lock();
        let forgotten = state.held.len();
        state.held.clear();
        state.active = 0;
        // Send under the lock; `expire` expects the outcome in the channel.
        let mut rejected = 0usize;
        for pending in state.queue.drain(..) {
            let _ = pending.responder.send(Err(AdmissionError::EmergencyReset));
            rejected += 1;
        }
        drop(state);

        warn!(
            rejected,
            forgotten_slots = forgotten,
            "admission limiter emergency reset"
        );
    }

    /// Hot-reconfigure capacity and timeout. Zero values are ignored.
    ///
    /// Lowering `max_slots` never revokes live slots; the pool drains down to
    /// the new limit as slots are released. Raising it admits queued requests
    /// immediately.
    pub fn configure(&self, settings: LimiterSettings) {
        let mut state = self.lock();
        if let Some(max_slots) = settings.effective_max_slots() {
            state.max_slots = max_slots;
        }
        if let Some(slot_timeout) = settings.effective_slot_timeout() {
            state.slot_timeout = slot_timeout;
        }
        let now = self.clock.now();
        state.hand_off(now);
        debug!(
            max_slots = state.max_slots,
            slot_timeout_ms = millis(state.slot_timeout),
            "admission limiter reconfigured"
        );
    }

    /// Reject queued requests older than twice the slot timeout.
    ///
    /// Normally the per-request timer removes them first; anything this finds
    /// means a timer did not fire. Returns the number rejected.
    pub fn sweep_expired(&self) -> usize {
        let mut state = self.lock();
        let now = self.clock.now();
        let limit = state.slot_timeout * SWEEP_TIMEOUT_MULTIPLIER;

        let mut count = 0usize;
        let mut kept = VecDeque::with_capacity(state.queue.len());
        for pending in state.queue.drain(..) {
            let waited = now.saturating_duration_since(pending.enqueued_at);
            if waited <= limit {
                kept.push_back(pending);
                continue;
            }
            let waited_ms = millis(waited);
            warn!(
                request = %pending.id,
                waited_ms,
                "queued admission request outlived its timeout; removed by sweep"
            );
            let _ = pending
                .responder
                .send(Err(AdmissionError::CleanupExpired { waited_ms }));
            count += 1;
        }
        state.queue = kept;
        count
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `period` until the
    /// returned task is stopped or the limiter is dropped.
    pub fn start_sweeper(self: &Arc<Self>, period: Duration) -> PeriodicTask {
        let limiter: Weak<Self> = Arc::downgrade(self);
        PeriodicTask::spawn("admission-sweep", period, move || match limiter.upgrade() {
            Some(limiter) => {
                limiter.sweep_expired();
                true
            }
            None => false,
        })
    }

    /// Run `operation` while holding a slot.
    ///
    /// Fails fast with [`AdmissionError::StressRejection`] when the pool is
    /// already stressed, so new work is not piled onto a saturated queue. The
    /// slot is released on every exit path, including cancellation.
    pub async fn with_admission<T, E, F, Fut>(&self, operation: &str, run: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AdmissionError>,
    {
        let stress = self.stress();
        if stress.stressed {
            let reason = stress.reason.unwrap_or_default();
            warn!(operation, %reason, "shedding operation; pool under stress");
            return Err(AdmissionError::StressRejection { reason }.into());
        }

        let _slot = self.acquire_guard().await.map_err(|err| {
            warn!(operation, error = %err, "operation not admitted");
            E::from(err)
        })?;
        run().await
    }
}

/// A slot that releases itself on drop.
#[derive(Debug)]
pub struct SlotGuard<'a> {
    limiter: &'a AdmissionLimiter,
    handle: Option<SlotHandle>,
}

impl SlotGuard<'_> {
    pub fn handle(&self) -> Option<&SlotHandle> {
        self.handle.as_ref()
    }

    /// Release now instead of at end of scope.
    pub fn release(mut self) -> bool {
        self.handle
            .take()
            .is_some_and(|handle| self.limiter.release(&handle))
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.limiter.release(&handle);
        }
    }
}

/// Withdraws a queued request if its acquire future is dropped early.
struct QueuedWaiter<'a> {
    limiter: &'a AdmissionLimiter,
    request_id: Uuid,
    receiver: oneshot::Receiver<Grant>,
    settled: bool,
}

impl Drop for QueuedWaiter<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.limiter.lock();
        if state.remove_pending(self.request_id).is_some() {
            debug!(request = %self.request_id, "queued request abandoned by caller");
            return;
        }
        drop(state);
        // A slot may have been handed over after the caller stopped waiting.
        if let Ok(Ok(handle)) = self.receiver.try_recv() {
            self.limiter.release(&handle);
        }
    }
}

fn flatten_delivery<E>(delivered: Result<Grant, E>) -> Grant {
    // Responders are only dropped after sending, so a closed channel means
    // the request was discarded without an answer.
    delivered.unwrap_or(Err(AdmissionError::EmergencyReset))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodegate_kernel::ManualClock;

    fn limiter(max_slots: usize, timeout_ms: u64) -> AdmissionLimiter {
        AdmissionLimiter::new(LimiterConfig {
            max_slots,
            slot_timeout: Duration::from_millis(timeout_ms),
        })
    }

    #[tokio::test]
    async fn grants_immediately_below_capacity() {
        let limiter = limiter(2, 100);
        let first = limiter.acquire().await.expect("first slot");
        let second = limiter.acquire().await.expect("second slot");
        assert_ne!(first, second);

        let stats = limiter.stats();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.created, 2);
        assert_eq!(stats.max_used, 2);
        assert_eq!(stats.utilization_percent, 100.0);
    }

    #[tokio::test]
    async fn double_release_is_a_guarded_no_op() {
        let limiter = limiter(2, 100);
        let handle = limiter.acquire().await.expect("slot");

        assert!(limiter.release(&handle));
        assert!(!limiter.release(&handle));

        let stats = limiter.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.destroyed, 1);
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let limiter = limiter(1, 100);
        {
            let guard = limiter.acquire_guard().await.expect("slot");
            assert!(guard.handle().is_some());
            assert_eq!(limiter.stats().active, 1);
        }
        assert_eq!(limiter.stats().active, 0);

        let guard = limiter.acquire_guard().await.expect("slot");
        assert!(guard.release());
        assert_eq!(limiter.stats().destroyed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn release_records_hold_duration() {
        let limiter = limiter(1, 100);
        let handle = limiter.acquire().await.expect("slot");
        tokio::time::sleep(Duration::from_millis(40)).await;
        limiter.release(&handle);

        let average = limiter.stats().average_slot_duration_ms;
        assert!((40.0..41.0).contains(&average), "average was {average}");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_acquire_withdraws_from_queue() {
        let limiter = limiter(1, 1_000);
        let _held = limiter.acquire().await.expect("slot");

        let abandoned = tokio::time::timeout(Duration::from_millis(10), limiter.acquire()).await;
        assert!(abandoned.is_err(), "acquire should still be queued");
        assert_eq!(limiter.stats().queue_length, 0);
        assert_eq!(limiter.stats().waiting, 0);
    }

    #[tokio::test]
    async fn configure_ignores_zero_and_admits_waiters_on_growth() {
        let limiter = Arc::new(limiter(1, 5_000));
        let _held = limiter.acquire().await.expect("slot");

        let queued = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire().await })
        };
        tokio::task::yield_now().await;
        assert_eq!(limiter.stats().queue_length, 1);

        limiter.configure(LimiterSettings {
            max_slots: Some(0),
            slot_timeout: Some(Duration::ZERO),
        });
        assert_eq!(limiter.stats().max_slots, 1);

        limiter.configure(LimiterSettings::max_slots(2));
        let granted = queued.await.expect("task").expect("slot after growth");
        assert!(!granted.id().is_nil());

        let stats = limiter.stats();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.queue_length, 0);
    }

    #[tokio::test]
    async fn sweep_rejects_requests_past_twice_the_timeout() {
        let clock = ManualClock::shared();
        let limiter = Arc::new(AdmissionLimiter::with_clock(
            LimiterConfig {
                max_slots: 1,
                slot_timeout: Duration::from_millis(100),
            },
            clock.clone(),
        ));
        let _held = limiter.acquire().await.expect("slot");

        let queued = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire().await })
        };
        tokio::task::yield_now().await;
        assert_eq!(limiter.stats().queue_length, 1);

        clock.advance(Duration::from_millis(150));
        assert_eq!(limiter.sweep_expired(), 0, "within 2x timeout");

        clock.advance(Duration::from_millis(100));
        assert_eq!(limiter.sweep_expired(), 1);

        let err = queued.await.expect("task").expect_err("swept request fails");
        assert_eq!(err, AdmissionError::CleanupExpired { waited_ms: 250 });
        assert_eq!(limiter.stats().waiting, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sweep_rejects_request_stranded_by_a_shorter_timeout() {
        let clock = ManualClock::shared();
        let limiter = Arc::new(AdmissionLimiter::with_clock(
            LimiterConfig {
                max_slots: 1,
                slot_timeout: Duration::from_secs(10),
            },
            clock.clone(),
        ));
        let sweeper = limiter.start_sweeper(Duration::from_millis(50));
        let _held = limiter.acquire().await.expect("slot");

        let queued = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire().await })
        };
        tokio::task::yield_now().await;
        assert_eq!(limiter.stats().queue_length, 1);

        // The queued request keeps its 10s timer; the sweep judges it by the
        // new timeout.
        limiter.configure(LimiterSettings::slot_timeout(Duration::from_millis(100)));
        clock.advance(Duration::from_millis(250));
        tokio::task::yield_now().await;
        assert!(!queued.is_finished(), "own timer is not due yet");

        tokio::time::sleep(Duration::from_millis(60)).await;
        let err = queued.await.expect("task").expect_err("swept request fails");
        assert_eq!(err, AdmissionError::CleanupExpired { waited_ms: 250 });
        assert_eq!(limiter.stats().queue_length, 0);
        assert!(sweeper.is_running());
        sweeper.stop();
    }

    #[tokio::test]
    async fn reset_reaches_waiter_whose_timer_is_already_due() {
        let clock = ManualClock::shared();
        let limiter = Arc::new(AdmissionLimiter::with_clock(
            LimiterConfig {
                max_slots: 1,
                slot_timeout: Duration::from_millis(100),
            },
            clock.clone(),
        ));
        let held = limiter.acquire().await.expect("slot");

        let queued = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire().await })
        };
        tokio::task::yield_now().await;

        clock.advance(Duration::from_millis(150));
        limiter.emergency_reset();

        let err = queued.await.expect("task").expect_err("reset request fails");
        assert_eq!(err, AdmissionError::EmergencyReset);
        assert!(!limiter.release(&held), "reset forgets held slots");

        let stats = limiter.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queue_length, 0);
    }

    #[tokio::test]
    async fn with_admission_releases_when_operation_fails() {
        #[derive(Debug, PartialEq)]
        enum OpError {
            Admission(AdmissionError),
            Backend,
        }
        impl From<AdmissionError> for OpError {
            fn from(err: AdmissionError) -> Self {
                Self::Admission(err)
            }
        }

        let limiter = limiter(1, 100);
        let result: Result<(), OpError> = limiter
            .with_admission("failing", || async { Err(OpError::Backend) })
            .await;
        assert_eq!(result, Err(OpError::Backend));

        let stats = limiter.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.destroyed, 1);
    }
}
