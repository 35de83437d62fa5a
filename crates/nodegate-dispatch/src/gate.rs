//! Consistency gates around entity reads and writes.
//!
//! Reads are never refused, only delayed. Writes are recorded only once the
//! backend reports success.

use nodegate_consistency::{ConsistencyTracker, WaitOutcome, WriteKind};
use nodegate_kernel::EntityKey;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Result of a gated read.
#[derive(Debug, Clone, PartialEq)]
pub struct GatedRead<T> {
    pub value: T,
    /// Set when the read had to wait for a staleness window first.
    pub waited: Option<WaitOutcome>,
}

impl<T> GatedRead<T> {
    pub fn into_inner(self) -> T {
        self.value
    }

    /// `true` when the wait budget ran out and the read went ahead anyway.
    pub fn possibly_stale(&self) -> bool {
        matches!(self.waited, Some(WaitOutcome::BudgetExhausted { .. }))
    }
}

/// Result of a recorded write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

impl<T> Versioned<T> {
    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Delay `read` until `key` is outside its staleness window or `max_wait`
/// has passed, then run it.
pub async fn with_read_consistency<T, F, Fut>(
    tracker: &ConsistencyTracker,
    key: &EntityKey,
    max_wait: Duration,
    read: F,
) -> GatedRead<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let check = tracker.would_read_be_stale(key);
    let waited = if check.stale {
        debug!(
            entity = %key,
            version = check.version,
            wait_ms = check.wait.map(|wait| wait.as_millis() as u64),
            "read inside staleness window; waiting"
        );
        Some(tracker.wait_for_consistency(key, max_wait).await)
    } else {
        None
    };
    GatedRead {
        value: read().await,
        waited,
    }
}

/// Run `write` and record it against `key` only if it succeeds.
///
/// Errors pass through unchanged and leave the tracker untouched.
pub async fn with_write_consistency<T, E, F, Fut>(
    tracker: &ConsistencyTracker,
    key: &EntityKey,
    kind: WriteKind,
    write: F,
) -> Result<Versioned<T>, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let value = write().await?;
    let version = tracker.record_write(key.clone(), kind, None);
    Ok(Versioned { value, version })
}
