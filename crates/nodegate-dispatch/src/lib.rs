//! # nodegate-dispatch
//!
//! The layer tool handlers call instead of touching the graph backend
//! directly. It owns one [`AdmissionLimiter`](nodegate_admission::AdmissionLimiter)
//! and one [`ConsistencyTracker`](nodegate_consistency::ConsistencyTracker),
//! both constructed explicitly from a [`GateConfig`] and shared by reference.
//!
//! ```text
//! read_entity(key)  ──► admission ──► staleness wait ──► backend read
//! write_entity(key) ──► admission ──► backend write ──ok──► record_write(key)
//! run(op)           ──► admission ──► backend call
//! ```
//!
//! [`Dispatcher::health`] aggregates both components into a
//! [`HealthReport`] for an external health endpoint.

pub mod config;
pub mod dispatcher;
pub mod gate;
pub mod health;

pub use config::{ConfigError, DEFAULT_SWEEP_INTERVAL, GateConfig};
pub use dispatcher::{Dispatcher, DispatcherSweepers};
pub use gate::{GatedRead, Versioned, with_read_consistency, with_write_consistency};
pub use health::{
    ConsistencyStatus, HealthReport, PoolStatus, consistency_recommendations, pool_recommendations,
};
