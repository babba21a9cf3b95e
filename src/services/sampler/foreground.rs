//! Foreground sampler: continuous watch plus fallback poll
//!
//! Mode changes come from outside (the journey controller).

use super::pipeline::SamplerCore;
use super::{LocationSampler, SamplerKind};
use crate::domain::error::TrackerError;
use crate::domain::types::{Location, TrackingMode};
use crate::infra::metrics::Metrics;
use crate::io::platform::LocationPlatform;
use crate::services::observers::{Observer, Subscription};
use std::sync::Arc;

pub struct ForegroundSampler {
    core: SamplerCore,
}

impl ForegroundSampler {
    pub fn new(
        platform: Arc<dyn LocationPlatform>,
        metrics: Arc<Metrics>,
        fallback_min_delta_deg: f64,
    ) -> Self {
        Self { core: SamplerCore::new(platform, metrics, fallback_min_delta_deg) }
    }
}

impl LocationSampler for ForegroundSampler {
    fn kind(&self) -> SamplerKind {
        SamplerKind::Foreground
    }

    fn start(&self, mode: TrackingMode) {
        self.core.start(mode);
    }

    fn stop(&self) {
        self.core.stop();
    }

    fn sample_once(&self) {
        self.core.sample_once();
    }

    fn mode(&self) -> Option<TrackingMode> {
        self.core.mode()
    }

    fn last_position(&self) -> Option<Location> {
        self.core.last_position()
    }

    fn subscribe(&self, observer: Observer<Location>) -> Subscription {
        self.core.subscribe(observer)
    }

    fn subscribe_errors(&self, observer: Observer<TrackerError>) -> Subscription {
        self.core.subscribe_errors(observer)
    }
}

impl Drop for ForegroundSampler {
    fn drop(&mut self) {
        self.core.stop();
    }
}
