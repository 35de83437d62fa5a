//! Gate configuration: TOML file plus `NODEGATE_*` overrides.
//!
//! The core crates never read the environment. Overrides come in through an
//! injected lookup so the binary can pass `std::env::var` and tests can pass
//! a map.

use nodegate_admission::{DEFAULT_MAX_SLOTS, DEFAULT_SLOT_TIMEOUT, LimiterConfig};
use nodegate_consistency::{DEFAULT_MAX_WAIT, DEFAULT_STALE_WINDOW, TrackerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(30_000);

pub const ENV_MAX_SLOTS: &str = "NODEGATE_MAX_SLOTS";
pub const ENV_SLOT_TIMEOUT_MS: &str = "NODEGATE_SLOT_TIMEOUT_MS";
pub const ENV_STALE_WINDOW_MS: &str = "NODEGATE_STALE_WINDOW_MS";
pub const ENV_READ_WAIT_BUDGET_MS: &str = "NODEGATE_READ_WAIT_BUDGET_MS";
pub const ENV_SWEEP_INTERVAL_MS: &str = "NODEGATE_SWEEP_INTERVAL_MS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid toml in {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid value for {var}: {value:?} (expected a non-negative integer)")]
    InvalidOverride { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    pub max_slots: usize,
    pub slot_timeout_ms: u64,
    pub stale_window_ms: u64,
    pub read_wait_budget_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_slots: DEFAULT_MAX_SLOTS,
            slot_timeout_ms: millis(DEFAULT_SLOT_TIMEOUT),
            stale_window_ms: millis(DEFAULT_STALE_WINDOW),
            read_wait_budget_ms: millis(DEFAULT_MAX_WAIT),
            sweep_interval_ms: millis(DEFAULT_SWEEP_INTERVAL),
        }
    }
}

impl GateConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, "<inline>")
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::parse(&text, &display)
    }

    fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// File (or defaults), then overrides, then validation.
    pub fn resolve<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `NODEGATE_*` variables. Blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = read_override(&lookup, ENV_MAX_SLOTS)? {
            self.max_slots = usize::try_from(value).map_err(|_| ConfigError::InvalidOverride {
                var: ENV_MAX_SLOTS,
                value: value.to_string(),
            })?;
        }
        if let Some(value) = read_override(&lookup, ENV_SLOT_TIMEOUT_MS)? {
            self.slot_timeout_ms = value;
        }
        if let Some(value) = read_override(&lookup, ENV_STALE_WINDOW_MS)? {
            self.stale_window_ms = value;
        }
        if let Some(value) = read_override(&lookup, ENV_READ_WAIT_BUDGET_MS)? {
            self.read_wait_budget_ms = value;
        }
        if let Some(value) = read_override(&lookup, ENV_SWEEP_INTERVAL_MS)? {
            self.sweep_interval_ms = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("max_slots", self.max_slots as u64),
            ("slot_timeout_ms", self.slot_timeout_ms),
            ("stale_window_ms", self.stale_window_ms),
            ("read_wait_budget_ms", self.read_wait_budget_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
        ];
        let zero: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| *value == 0)
            .map(|(name, _)| *name)
            .collect();
        if zero.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!(
                "{} must be greater than zero",
                zero.join(", ")
            )))
        }
    }

    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            max_slots: self.max_slots,
            slot_timeout: self.slot_timeout(),
        }
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            stale_window: self.stale_window(),
        }
    }

    pub fn slot_timeout(&self) -> Duration {
        Duration::from_millis(self.slot_timeout_ms)
    }

    pub fn stale_window(&self) -> Duration {
        Duration::from_millis(self.stale_window_ms)
    }

    pub fn read_wait_budget(&self) -> Duration {
        Duration::from_millis(self.read_wait_budget_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn read_override<F>(lookup: &F, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidOverride { var, value: raw })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
