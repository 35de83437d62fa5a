use crate::config::GateConfig;
use crate::gate::{GatedRead, Versioned, with_read_consistency, with_write_consistency};
use crate::health::{ConsistencyStatus, HealthReport, PoolStatus};
use chrono::Utc;
use nodegate_admission::{AdmissionError, AdmissionLimiter};
use nodegate_consistency::{ConsistencyTracker, WriteKind};
use nodegate_kernel::{EntityKey, PeriodicTask, SharedClock, TokioClock};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Composition point between tool handlers and the graph backend.
///
/// Every backend call goes through admission. Entity reads additionally wait
/// out any staleness window while holding their slot; entity writes are
/// recorded on success.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    limiter: Arc<AdmissionLimiter>,
    tracker: Arc<ConsistencyTracker>,
    read_wait_budget: Duration,
    sweep_interval: Duration,
}

impl Dispatcher {
    pub fn new(config: &GateConfig) -> Self {
        Self::with_clock(config, TokioClock::shared())
    }

    pub fn with_clock(config: &GateConfig, clock: SharedClock) -> Self {
        Self::from_parts(
            Arc::new(AdmissionLimiter::with_clock(
                config.limiter_config(),
                clock.clone(),
            )),
            Arc::new(ConsistencyTracker::with_clock(config.tracker_config(), clock)),
            config.read_wait_budget(),
            config.sweep_interval(),
        )
    }

    pub fn from_parts(
        limiter: Arc<AdmissionLimiter>,
        tracker: Arc<ConsistencyTracker>,
        read_wait_budget: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            limiter,
            tracker,
            read_wait_budget,
            sweep_interval,
        }
    }

    pub fn limiter(&self) -> &Arc<AdmissionLimiter> {
        &self.limiter
    }

    pub fn tracker(&self) -> &Arc<ConsistencyTracker> {
        &self.tracker
    }

    /// Admission only.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, call: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AdmissionError>,
    {
        self.limiter.with_admission(operation, call).await
    }

    /// Take an admission slot, then wait out any staleness window on `key`
    /// before running `call`. A stressed pool rejects the read before any
    /// wait starts.
    pub async fn read_entity<T, E, F, Fut>(
        &self,
        operation: &str,
        key: &EntityKey,
        call: F,
    ) -> Result<GatedRead<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AdmissionError>,
    {
        self.limiter
            .with_admission(operation, || async move {
                let read = with_read_consistency(&self.tracker, key, self.read_wait_budget, call)
                    .await;
                read.value.map(|value| GatedRead {
                    value,
                    waited: read.waited,
                })
            })
            .await
    }

    /// Run `call` under admission and record the write against `key` if it
    /// succeeds. Admission failures count as failed writes.
    pub async fn write_entity<T, E, F, Fut>(
        &self,
        operation: &str,
        key: &EntityKey,
        kind: WriteKind,
        call: F,
    ) -> Result<Versioned<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AdmissionError>,
    {
        with_write_consistency(&self.tracker, key, kind, || {
            self.limiter.with_admission(operation, call)
        })
        .await
    }

    pub fn pool_status(&self) -> PoolStatus {
        PoolStatus::from_parts(self.limiter.stats(), self.limiter.stress(), Utc::now())
    }

    pub fn consistency_status(&self) -> ConsistencyStatus {
        ConsistencyStatus::from_parts(
            self.tracker.stats(),
            self.tracker.consistency_issues(),
            self.tracker.stale_window(),
            Utc::now(),
        )
    }

    pub fn health(&self) -> HealthReport {
        HealthReport::from_parts(self.pool_status(), self.consistency_status())
    }

    /// Start both background sweeps on the current tokio runtime.
    pub fn start_sweepers(&self) -> DispatcherSweepers {
        info!(
            interval_ms = self.sweep_interval.as_millis() as u64,
            "starting admission and consistency sweepers"
        );
        DispatcherSweepers {
            admission: self.limiter.start_sweeper(self.sweep_interval),
            consistency: self.tracker.start_sweeper(self.sweep_interval),
        }
    }
}

/// Both sweep tasks; dropping this stops them.
#[derive(Debug)]
pub struct DispatcherSweepers {
    admission: PeriodicTask,
    consistency: PeriodicTask,
}

impl DispatcherSweepers {
    pub fn is_running(&self) -> bool {
        self.admission.is_running() && self.consistency.is_running()
    }

    pub fn stop(self) {
        self.admission.stop();
        self.consistency.stop();
    }
}
