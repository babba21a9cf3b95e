//! Location sampling
//!
//! A `LocationSampler` turns platform fixes into a filtered stream of
//! samples. Two variants exist and exactly one is built per controller:
//! - `ForegroundSampler` - watch + fallback poll, mode driven by the caller
//! - `BackgroundSampler` - same stream, keeps the platform awake and
//!   reevaluates its own mode from the journey target
//!
//! Drop rules applied to every sample:
//! - older than the mode's max age: stale
//! - older than the last emitted sample: out of order
//! - fallback poll samples only fill gaps in the watch and must move more
//!   than `tracking.fallback_min_delta_deg` from the last emitted sample

mod background;
mod foreground;
mod pipeline;

pub use background::BackgroundSampler;
pub use foreground::ForegroundSampler;

use crate::domain::error::TrackerError;
use crate::domain::types::{Location, TrackingMode, TransportMode};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::platform::LocationPlatform;
use crate::services::mode_selector::TrackingModeSelector;
use crate::services::observers::{Observer, Subscription};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    Foreground,
    Background,
}

impl SamplerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplerKind::Foreground => "foreground",
            SamplerKind::Background => "background",
        }
    }
}

/// Where the journey is heading; lets a self-steering sampler compute ETAs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub destination: Location,
    pub transport_mode: TransportMode,
}

pub trait LocationSampler: Send + Sync {
    fn kind(&self) -> SamplerKind;

    /// Start sampling, replacing any running watch
    fn start(&self, mode: TrackingMode);

    /// Stop sampling; returns after the watch and all tasks are cancelled
    fn stop(&self);

    /// Request one extra fix without reconfiguring
    fn sample_once(&self);

    /// Current mode, `None` when stopped
    fn mode(&self) -> Option<TrackingMode>;

    fn is_running(&self) -> bool {
        self.mode().is_some()
    }

    /// Last emitted sample; kept after `stop`
    fn last_position(&self) -> Option<Location>;

    fn subscribe(&self, observer: Observer<Location>) -> Subscription;

    fn subscribe_errors(&self, observer: Observer<TrackerError>) -> Subscription;

    /// Restart at `mode` if it is above the running mode. Returns true when
    /// the sampler was restarted.
    fn escalate(&self, mode: TrackingMode) -> bool {
        match self.mode() {
            Some(current) if mode > current => {
                self.start(mode);
                true
            }
            _ => false,
        }
    }

    fn set_target(&self, _target: Option<Target>) {}

    /// True when the sampler schedules its own mode reevaluation
    fn reevaluates_itself(&self) -> bool {
        false
    }
}

/// Build the sampler variant the platform supports
pub fn build_sampler(
    platform: Arc<dyn LocationPlatform>,
    config: &Config,
    metrics: Arc<Metrics>,
) -> Box<dyn LocationSampler> {
    let background = config.prefer_background() && platform.supports_background();
    let sampler: Box<dyn LocationSampler> = if background {
        Box::new(BackgroundSampler::new(
            platform,
            metrics,
            config.fallback_min_delta_deg(),
            TrackingModeSelector::new(config.max_recheck()),
        ))
    } else {
        Box::new(ForegroundSampler::new(platform, metrics, config.fallback_min_delta_deg()))
    };
    info!(kind = sampler.kind().as_str(), "sampler_selected");
    sampler
}
