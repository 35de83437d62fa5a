//! Error types for admission operations.

/// Reasons an operation was not admitted.
///
/// Every variant is retryable from the caller's side. None of them are
/// retried inside the limiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// A queued request waited longer than the slot timeout.
    #[error(
        "timed out after {waited_ms}ms waiting for an admission slot \
         (active {active}/{max_slots}, queue length {queue_length})"
    )]
    Timeout {
        active: usize,
        max_slots: usize,
        queue_length: usize,
        waited_ms: u64,
    },

    /// The queue was discarded by an administrative reset.
    #[error("admission request discarded by emergency reset")]
    EmergencyReset,

    /// The defensive sweep found the request far past its timeout.
    #[error("admission request expired in queue after {waited_ms}ms (removed by cleanup sweep)")]
    CleanupExpired { waited_ms: u64 },

    /// The pool was already stressed, so acquisition was not attempted.
    #[error("admission rejected: pool under stress ({reason})")]
    StressRejection { reason: String },
}

impl AdmissionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. }
            | Self::EmergencyReset
            | Self::CleanupExpired { .. }
            | Self::StressRejection { .. } => true,
        }
    }

    /// Stable snake_case label for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::EmergencyReset => "emergency_reset",
            Self::CleanupExpired { .. } => "cleanup_expired",
            Self::StressRejection { .. } => "stress_rejection",
        }
    }
}
