//! # nodegate-admission
//!
//! Bounded admission control in front of a shared backend.
//!
//! At most `max_slots` operations hold a slot at once. Callers beyond that
//! wait in a strict FIFO queue; each queued request carries a hard timeout.
//! A released slot goes directly to the oldest waiter, so a handoff never
//! makes `active` dip.
//!
//! ```text
//! acquire ──► slot free? ──yes──► grant (active += 1)
//!                 │
//!                 no
//!                 ▼
//!           FIFO queue ──release──► handoff to head
//!                 │
//!                 ├── slot timeout ──► AdmissionError::Timeout
//!                 ├── emergency_reset ► AdmissionError::EmergencyReset
//!                 └── sweep (> 2×timeout) ► AdmissionError::CleanupExpired
//! ```
//!
//! [`AdmissionLimiter::with_admission`] adds load shedding: when the pool is
//! already stressed it fails with `AdmissionError::StressRejection` before
//! queueing.

pub mod config;
pub mod error;
pub mod limiter;
pub mod stats;

pub use config::{DEFAULT_MAX_SLOTS, DEFAULT_SLOT_TIMEOUT, LimiterConfig, LimiterSettings};
pub use error::AdmissionError;
pub use limiter::{AdmissionLimiter, SlotGuard, SlotHandle};
pub use stats::{
    HOLD_HISTORY_CAPACITY, PoolStats, STRESS_AVERAGE_SLOT_DURATION, STRESS_QUEUE_HEAD_WAIT,
    STRESS_QUEUE_LENGTH, STRESS_UTILIZATION_PERCENT, StressReport,
};
