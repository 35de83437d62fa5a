//! Pool statistics and the stress signal derived from them.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Number of completed slot hold durations kept for the rolling average.
pub const HOLD_HISTORY_CAPACITY: usize = 100;

pub const STRESS_UTILIZATION_PERCENT: f64 = 90.0;
pub const STRESS_QUEUE_LENGTH: usize = 10;
pub const STRESS_AVERAGE_SLOT_DURATION: Duration = Duration::from_millis(10_000);
pub const STRESS_QUEUE_HEAD_WAIT: Duration = Duration::from_millis(2_000);

/// Point-in-time view of the limiter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub active: usize,
    pub max_slots: usize,
    /// Slots granted, either immediately or by handoff from a release.
    pub created: u64,
    /// Slots released.
    pub destroyed: u64,
    pub waiting: usize,
    /// High-water mark of `active`.
    pub max_used: usize,
    pub queue_length: usize,
    pub utilization_percent: f64,
    /// Mean hold time over the last [`HOLD_HISTORY_CAPACITY`] releases.
    pub average_slot_duration_ms: f64,
    /// How long the head of the queue has been waiting, if anyone is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_wait_ms: Option<u64>,
}

/// Load-shedding signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StressReport {
    pub stressed: bool,
    /// Comma-joined list of the thresholds that tripped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StressReport {
    /// Check every stress threshold against one stats snapshot.
    ///
    /// Thresholds are strict: exactly 90% utilization is not stressed.
    pub fn evaluate(stats: &PoolStats) -> Self {
        let mut tripped: Vec<String> = Vec::new();

        if stats.utilization_percent > STRESS_UTILIZATION_PERCENT {
            tripped.push(format!(
                "utilization {:.1}% > {STRESS_UTILIZATION_PERCENT}%",
                stats.utilization_percent
            ));
        }
        if stats.queue_length > STRESS_QUEUE_LENGTH {
            tripped.push(format!(
                "queue length {} > {STRESS_QUEUE_LENGTH}",
                stats.queue_length
            ));
        }
        let slow_ms = STRESS_AVERAGE_SLOT_DURATION.as_millis() as f64;
        if stats.average_slot_duration_ms > slow_ms {
            tripped.push(format!(
                "average slot duration {:.0}ms > {slow_ms:.0}ms",
                stats.average_slot_duration_ms
            ));
        }
        // Unreachable when the slot timeout is below the head-wait threshold;
        // queued requests time out first.
        let head_limit_ms = STRESS_QUEUE_HEAD_WAIT.as_millis() as u64;
        if let Some(waited) = stats.oldest_wait_ms
            && waited > head_limit_ms
        {
            tripped.push(format!(
                "oldest queued request waited {waited}ms > {head_limit_ms}ms"
            ));
        }

        if tripped.is_empty() {
            Self {
                stressed: false,
                reason: None,
            }
        } else {
            Self {
                stressed: true,
                reason: Some(tripped.join(", ")),
            }
        }
    }
}

/// Bounded history of completed hold durations.
#[derive(Debug, Clone, Default)]
pub(crate) struct HoldHistory {
    durations: VecDeque<Duration>,
}

impl HoldHistory {
    pub(crate) fn record(&mut self, held: Duration) {
        if self.durations.len() == HOLD_HISTORY_CAPACITY {
            self.durations.pop_front();
        }
        self.durations.push_back(held);
    }

    pub(crate) fn average_ms(&self) -> f64 {
        if self.durations.is_empty() {
            return 0.0;
        }
        let total: Duration = self.durations.iter().sum();
        total.as_secs_f64() * 1_000.0 / self.durations.len() as f64
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.durations.len()
    }
}
