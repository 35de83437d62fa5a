use std::time::Duration;

pub const DEFAULT_MAX_SLOTS: usize = 50;
pub const DEFAULT_SLOT_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Construction-time limiter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    pub max_slots: usize,
    pub slot_timeout: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_slots: DEFAULT_MAX_SLOTS,
            slot_timeout: DEFAULT_SLOT_TIMEOUT,
        }
    }
}

/// Partial update applied by `AdmissionLimiter::configure`.
///
/// Absent and zero values leave the current setting untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterSettings {
    pub max_slots: Option<usize>,
    pub slot_timeout: Option<Duration>,
}

impl LimiterSettings {
    pub fn max_slots(max_slots: usize) -> Self {
        Self {
            max_slots: Some(max_slots),
            slot_timeout: None,
        }
    }

    pub fn slot_timeout(slot_timeout: Duration) -> Self {
        Self {
            max_slots: None,
            slot_timeout: Some(slot_timeout),
        }
    }

    pub(crate) fn effective_max_slots(&self) -> Option<usize> {
        self.max_slots.filter(|slots| *slots > 0)
    }

    pub(crate) fn effective_slot_timeout(&self) -> Option<Duration> {
        self.slot_timeout.filter(|timeout| !timeout.is_zero())
    }
}
