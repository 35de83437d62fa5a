//! # nodegate-consistency
//!
//! Read-after-write consistency over a backend whose replicas lag.
//!
//! Every successful write is recorded with a globally increasing version and
//! opens a staleness window for its entity. Reads that land inside the window
//! can wait, within a budget, for it to close.
//!
//! ```text
//! write ok ──► record_write(key) ──► version N, lock(key)
//!
//! read(key) ──► would_read_be_stale?
//!                 ├── no  ──► read now
//!                 └── yes ──► wait_for_consistency(key, budget)
//!                               ├── Consistent       ──► read
//!                               └── BudgetExhausted  ──► read anyway (warned)
//! ```
//!
//! Records older than three windows are swept periodically; see
//! [`ConsistencyTracker::start_sweeper`].

pub mod record;
pub mod tracker;

pub use record::{LockRecord, WriteKind, WriteRecord};
pub use tracker::{
    ConsistencyIssues, ConsistencyTracker, DEFAULT_MAX_WAIT, DEFAULT_STALE_WINDOW,
    MAX_HEALTHY_LOCKS, STUCK_WRITE_AGE, SWEEP_AGE_MULTIPLIER, StalenessCheck, StuckWrite,
    SweepReport, TrackerConfig, TrackerStats, WaitOutcome,
};
