//! Session-style read-after-write tracking.
//!
//! After a write, reads of the same entity are considered at risk of seeing
//! pre-write state until the write is `stale_window` old. The tracker keeps
//! one write record and one lock record per entity; a newer write simply
//! replaces both.
//!
//! Cleanup has two deliberately separate paths:
//! - `would_read_be_stale` drops the lock on the first check after expiry,
//!   but keeps the write record so later checks stay cheap;
//! - `sweep_expired` drops both records once they are `3 × stale_window` old,
//!   whether or not the entity is ever read again.

use crate::record::{LockRecord, WriteKind, WriteRecord};
use nodegate_kernel::{EntityKey, PeriodicTask, SharedClock, TokioClock};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_STALE_WINDOW: Duration = Duration::from_millis(1_000);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(2_000);
/// Records older than this many stale windows are swept.
pub const SWEEP_AGE_MULTIPLIER: u32 = 3;
/// A write record still present at this age means the sweep is not keeping up.
pub const STUCK_WRITE_AGE: Duration = Duration::from_millis(10_000);
pub const MAX_HEALTHY_LOCKS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    pub stale_window: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            stale_window: DEFAULT_STALE_WINDOW,
        }
    }
}

/// Answer to "would a read of this entity risk seeing stale state?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessCheck {
    pub stale: bool,
    /// Time left in the window.
    pub wait: Option<Duration>,
    /// Version of the write that opened the window.
    pub version: Option<u64>,
}

impl StalenessCheck {
    pub const FRESH: Self = Self {
        stale: false,
        wait: None,
        version: None,
    };

    fn stale(wait: Duration, version: u64) -> Self {
        Self {
            stale: true,
            wait: Some(wait),
            version: Some(version),
        }
    }
}

/// How a bounded consistency wait ended. Neither case is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The window closed (or there was none).
    Consistent { waited: Duration },
    /// The budget ran out first; a read now may observe stale state.
    BudgetExhausted { waited: Duration, version: Option<u64> },
}

impl WaitOutcome {
    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent { .. })
    }

    pub fn waited(&self) -> Duration {
        match self {
            Self::Consistent { waited } | Self::BudgetExhausted { waited, .. } => *waited,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStats {
    pub active_writes: usize,
    pub active_locks: usize,
    /// Age of the oldest write record, if any.
    pub oldest_write_ms: Option<u64>,
    pub average_write_age_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckWrite {
    pub entity_key: EntityKey,
    pub operation: WriteKind,
    pub version: u64,
    pub age_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyIssues {
    pub issues: bool,
    pub stuck_writes: Vec<StuckWrite>,
    pub active_locks: usize,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub writes_removed: usize,
    pub locks_removed: usize,
}

#[derive(Debug, Default)]
struct TrackerState {
    version_counter: u64,
    recent_writes: BTreeMap<EntityKey, WriteRecord>,
    locks: BTreeMap<EntityKey, LockRecord>,
}

/// Tracks recent writes per entity and gates reads behind them.
#[derive(Debug)]
pub struct ConsistencyTracker {
    clock: SharedClock,
    stale_window: Duration,
    state: Mutex<TrackerState>,
}

impl Default for ConsistencyTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl ConsistencyTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_clock(config, TokioClock::shared())
    }

    pub fn with_clock(config: TrackerConfig, clock: SharedClock) -> Self {
        Self {
            clock,
            stale_window: config.stale_window,
            state: Mutex::new(TrackerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stale_window(&self) -> Duration {
        self.stale_window
    }

    /// Highest version handed out so far.
    pub fn current_version(&self) -> u64 {
        self.lock().version_counter
    }

    /// Record a successful write and open a staleness window for `key`.
    ///
    /// Returns the new version; versions increase strictly across all keys.
    pub fn record_write(
        &self,
        key: impl Into<EntityKey>,
        operation: WriteKind,
        payload: Option<Value>,
    ) -> u64 {
        let entity_key = key.into();
        let mut state = self.lock();
        state.version_counter += 1;
        let version = state.version_counter;

        let record = WriteRecord {
            entity_key: entity_key.clone(),
            operation,
            written_at: self.clock.now(),
            version,
            payload,
        };
        state
            .locks
            .insert(entity_key.clone(), LockRecord::from(&record));
        let superseded = state.recent_writes.insert(entity_key.clone(), record);
        debug!(
            entity = %entity_key,
            %operation,
            version,
            superseded = superseded.map(|prior| prior.version),
            "write recorded"
        );
        version
    }

    pub fn would_read_be_stale(&self, key: impl AsRef<str>) -> StalenessCheck {
        let key = key.as_ref();
        let mut state = self.lock();
        let now = self.clock.now();
        let Some((written_at, version)) = state
            .recent_writes
            .get(key)
            .map(|record| (record.written_at, record.version))
        else {
            return StalenessCheck::FRESH;
        };

        let age = now.saturating_duration_since(written_at);
        if age < self.stale_window {
            return StalenessCheck::stale(self.stale_window - age, version);
        }
        state.locks.remove(key);
        StalenessCheck::FRESH
    }

    /// Wait until reads of `key` are safe, for at most `max_wait`.
    ///
    /// Best effort: when the budget runs out this logs a warning and returns
    /// [`WaitOutcome::BudgetExhausted`]; it never fails.
    pub async fn wait_for_consistency(&self, key: impl AsRef<str>, max_wait: Duration) -> WaitOutcome {
        let key = key.as_ref();
        let started = self.clock.now();
        loop {
            let check = self.would_read_be_stale(key);
            let waited = self.clock.now().saturating_duration_since(started);
            if !check.stale {
                return WaitOutcome::Consistent { waited };
            }
            if waited >= max_wait {
                warn!(
                    entity = key,
                    waited_ms = millis(waited),
                    version = check.version,
                    "consistency wait budget exhausted; read may be stale"
                );
                return WaitOutcome::BudgetExhausted {
                    waited,
                    version: check.version,
                };
            }
            let remaining = max_wait - waited;
            let step = check.wait.map_or(remaining, |wait| wait.min(remaining));
            self.clock.sleep(step).await;
        }
    }

    /// Forget `key` entirely, write record and lock alike.
    pub fn clear_lock(&self, key: impl AsRef<str>) {
        let key = key.as_ref();
        let mut state = self.lock();
        let had_write = state.recent_writes.remove(key).is_some();
        let had_lock = state.locks.remove(key).is_some();
        if had_write || had_lock {
            debug!(entity = key, "consistency records cleared");
        }
    }

    pub fn has_lock(&self, key: impl AsRef<str>) -> bool {
        self.lock().locks.contains_key(key.as_ref())
    }

    pub fn write_record(&self, key: impl AsRef<str>) -> Option<WriteRecord> {
        self.lock().recent_writes.get(key.as_ref()).cloned()
    }

    pub fn stats(&self) -> TrackerStats {
        let state = self.lock();
        let now = self.clock.now();
        let ages: Vec<Duration> = state
            .recent_writes
            .values()
            .map(|record| now.saturating_duration_since(record.written_at))
            .collect();

        let average_write_age_ms = if ages.is_empty() {
            0.0
        } else {
            let total: Duration = ages.iter().sum();
            total.as_secs_f64() * 1_000.0 / ages.len() as f64
        };

        TrackerStats {
            active_writes: state.recent_writes.len(),
            active_locks: state.locks.len(),
            oldest_write_ms: ages.iter().max().copied().map(millis),
            average_write_age_ms,
        }
    }

    pub fn consistency_issues(&self) -> ConsistencyIssues {
        let state = self.lock();
        let now = self.clock.now();

        let stuck_writes: Vec<StuckWrite> = state
            .recent_writes
            .values()
            .filter_map(|record| {
                let age = now.saturating_duration_since(record.written_at);
                (age > STUCK_WRITE_AGE).then(|| StuckWrite {
                    entity_key: record.entity_key.clone(),
                    operation: record.operation,
                    version: record.version,
                    age_ms: millis(age),
                })
            })
            .collect();
        let active_locks = state.locks.len();

        let mut details = Vec::new();
        if !stuck_writes.is_empty() {
            let keys: Vec<&str> = stuck_writes
                .iter()
                .map(|stuck| stuck.entity_key.as_str())
                .collect();
            details.push(format!(
                "{} write(s) older than {}ms: {}",
                stuck_writes.len(),
                millis(STUCK_WRITE_AGE),
                keys.join(", ")
            ));
        }
        if active_locks > MAX_HEALTHY_LOCKS {
            details.push(format!(
                "{active_locks} active locks exceeds {MAX_HEALTHY_LOCKS}"
            ));
        }

        ConsistencyIssues {
            issues: !details.is_empty(),
            stuck_writes,
            active_locks,
            details,
        }
    }

    /// Drop every write record and lock. The version counter keeps counting.
    pub fn emergency_cleanup(&self) {
        let mut state = self.lock();
        let writes = state.recent_writes.len();
        let locks = state.locks.len();
        state.recent_writes.clear();
        state.locks.clear();
        warn!(writes, locks, "consistency tracker emergency cleanup");
    }

    /// Remove records older than `3 × stale_window`.
    pub fn sweep_expired(&self) -> SweepReport {
        let mut state = self.lock();
        let now = self.clock.now();
        let max_age = self.stale_window * SWEEP_AGE_MULTIPLIER;

        let writes_before = state.recent_writes.len();
        state
            .recent_writes
            .retain(|_, record| now.saturating_duration_since(record.written_at) <= max_age);
        let locks_before = state.locks.len();
        state
            .locks
            .retain(|_, lock| now.saturating_duration_since(lock.locked_at) <= max_age);

        let report = SweepReport {
            writes_removed: writes_before - state.recent_writes.len(),
            locks_removed: locks_before - state.locks.len(),
        };
        if report != SweepReport::default() {
            debug!(
                writes_removed = report.writes_removed,
                locks_removed = report.locks_removed,
                "consistency sweep"
            );
        }
        report
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `period` until the
    /// returned task is stopped or the tracker is dropped.
    pub fn start_sweeper(self: &Arc<Self>, period: Duration) -> PeriodicTask {
        let tracker: Weak<Self> = Arc::downgrade(self);
        PeriodicTask::spawn(
            "consistency-sweep",
            period,
            move || match tracker.upgrade() {
                Some(tracker) => {
                    tracker.sweep_expired();
                    true
                }
                None => false,
            },
        )
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
