//! Aggregate status objects for a health endpoint.
//!
//! These combine the raw component numbers with threshold-derived
//! recommendations. Transport and formatting are left to the caller; every
//! view serializes as camelCase JSON.

use chrono::{DateTime, Utc};
use nodegate_admission::{PoolStats, StressReport};
use nodegate_consistency::{ConsistencyIssues, MAX_HEALTHY_LOCKS, STUCK_WRITE_AGE, TrackerStats};
use serde::Serialize;
use std::time::Duration;

pub const RECOMMEND_UTILIZATION_PERCENT: f64 = 80.0;
pub const RECOMMEND_AVERAGE_HOLD: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub stats: PoolStats,
    pub stress: StressReport,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl PoolStatus {
    pub fn from_parts(stats: PoolStats, stress: StressReport, generated_at: DateTime<Utc>) -> Self {
        let recommendations = pool_recommendations(&stats);
        Self {
            stats,
            stress,
            recommendations,
            generated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyStatus {
    pub stats: TrackerStats,
    pub issues: ConsistencyIssues,
    pub stale_window_ms: u64,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl ConsistencyStatus {
    pub fn from_parts(
        stats: TrackerStats,
        issues: ConsistencyIssues,
        stale_window: Duration,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let recommendations = consistency_recommendations(&stats, &issues, stale_window);
        Self {
            stats,
            issues,
            stale_window_ms: millis(stale_window),
            recommendations,
            generated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// No stress and no consistency issues.
    pub healthy: bool,
    pub pool: PoolStatus,
    pub consistency: ConsistencyStatus,
    pub generated_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn from_parts(pool: PoolStatus, consistency: ConsistencyStatus) -> Self {
        let generated_at = pool.generated_at.max(consistency.generated_at);
        Self {
            healthy: !pool.stress.stressed && !consistency.issues.issues,
            pool,
            consistency,
            generated_at,
        }
    }
}

pub fn pool_recommendations(stats: &PoolStats) -> Vec<String> {
    let mut out = Vec::new();
    if stats.utilization_percent > RECOMMEND_UTILIZATION_PERCENT {
        out.push(format!(
            "utilization {:.1}% is above {RECOMMEND_UTILIZATION_PERCENT}%; consider raising max_slots (currently {})",
            stats.utilization_percent, stats.max_slots
        ));
    }
    if stats.queue_length > 0 {
        out.push(format!(
            "{} request(s) queued for a slot; backend calls are waiting on admission",
            stats.queue_length
        ));
    }
    if stats.average_slot_duration_ms > RECOMMEND_AVERAGE_HOLD.as_millis() as f64 {
        out.push(format!(
            "average slot hold {:.0}ms exceeds {}ms; the backend is responding slowly",
            stats.average_slot_duration_ms,
            RECOMMEND_AVERAGE_HOLD.as_millis()
        ));
    }
    if stats.max_used >= stats.max_slots {
        out.push(format!(
            "pool reached capacity ({}/{}) at least once",
            stats.max_used, stats.max_slots
        ));
    }
    out
}

pub fn consistency_recommendations(
    stats: &TrackerStats,
    issues: &ConsistencyIssues,
    stale_window: Duration,
) -> Vec<String> {
    let mut out = Vec::new();
    if !issues.stuck_writes.is_empty() {
        out.push(format!(
            "{} write record(s) older than {}ms; check that the consistency sweeper is running",
            issues.stuck_writes.len(),
            STUCK_WRITE_AGE.as_millis()
        ));
    }
    if issues.active_locks > MAX_HEALTHY_LOCKS {
        out.push(format!(
            "{} active locks; concurrent write fan-out is unusually high",
            issues.active_locks
        ));
    }
    let window_ms = stale_window.as_secs_f64() * 1_000.0;
    if stats.average_write_age_ms > window_ms {
        out.push(format!(
            "average write age {:.0}ms exceeds the {}ms stale window; reads are likely waiting",
            stats.average_write_age_ms,
            millis(stale_window)
        ));
    }
    out
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
