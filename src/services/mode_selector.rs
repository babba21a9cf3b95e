//! Tracking mode selection policy
//!
//! Maps the current ETA to a sampling mode and the delay until the next
//! reevaluation. Each mode also carries the acquisition parameters handed to
//! the platform when the sampler (re)starts.

use crate::domain::types::TrackingMode;
use std::time::Duration;

const PRECISION_ETA: Duration = Duration::from_secs(5 * 60);
const ACTIVE_SHORT_ETA: Duration = Duration::from_secs(15 * 60);
const ACTIVE_LONG_ETA: Duration = Duration::from_secs(30 * 60);

const PRECISION_RECHECK: Duration = Duration::from_secs(30);
const ACTIVE_SHORT_RECHECK: Duration = Duration::from_secs(120);
const ACTIVE_LONG_RECHECK: Duration = Duration::from_secs(300);

/// Default ceiling for the minimal-mode recheck delay
pub const DEFAULT_MAX_RECHECK: Duration = Duration::from_secs(30 * 60);

/// Platform acquisition parameters for one tracking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeProfile {
    pub high_accuracy: bool,
    /// Samples older than this are dropped
    pub max_age: Duration,
    /// One-shot acquisitions give up after this long
    pub timeout: Duration,
    /// Interval of the fallback poll that backs up the continuous watch
    pub fallback_poll: Option<Duration>,
}

impl ModeProfile {
    pub fn for_mode(mode: TrackingMode) -> Self {
        match mode {
            TrackingMode::Precision => Self {
                high_accuracy: true,
                max_age: Duration::from_secs(15),
                timeout: Duration::from_secs(10),
                fallback_poll: Some(Duration::from_secs(10)),
            },
            TrackingMode::Active => Self {
                high_accuracy: true,
                max_age: Duration::from_secs(30),
                timeout: Duration::from_secs(15),
                fallback_poll: Some(Duration::from_secs(30)),
            },
            TrackingMode::Minimal => Self {
                high_accuracy: false,
                max_age: Duration::from_secs(120),
                timeout: Duration::from_secs(30),
                fallback_poll: None,
            },
        }
    }
}

/// Outcome of one policy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeDecision {
    pub mode: TrackingMode,
    /// Delay until the policy should be evaluated again
    pub recheck: Duration,
}

/// ETA-driven selection of tracking mode and recheck interval
#[derive(Debug, Clone, Copy)]
pub struct TrackingModeSelector {
    max_recheck: Duration,
}

impl TrackingModeSelector {
    pub fn new(max_recheck: Duration) -> Self {
        Self { max_recheck }
    }

    /// Choose mode and recheck delay for the given ETA
    pub fn select(&self, eta: Duration) -> ModeDecision {
        if eta <= PRECISION_ETA {
            ModeDecision { mode: TrackingMode::Precision, recheck: PRECISION_RECHECK }
        } else if eta <= ACTIVE_SHORT_ETA {
            ModeDecision { mode: TrackingMode::Active, recheck: ACTIVE_SHORT_RECHECK }
        } else if eta <= ACTIVE_LONG_ETA {
            ModeDecision { mode: TrackingMode::Active, recheck: ACTIVE_LONG_RECHECK }
        } else {
            ModeDecision { mode: TrackingMode::Minimal, recheck: self.max_recheck.min(eta / 4) }
        }
    }

    /// Same as `select`, taking the ETA in milliseconds
    pub fn select_ms(&self, eta_ms: u64) -> ModeDecision {
        self.select(Duration::from_millis(eta_ms))
    }
}

impl Default for TrackingModeSelector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECHECK)
    }
}
