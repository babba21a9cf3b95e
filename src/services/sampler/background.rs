//! Background sampler
//!
//! Keeps the platform awake while running and reevaluates its own tracking
//! mode from the journey target, so it keeps adapting while the controller is
//! not scheduling anything. Modes raised through `escalate` act as a floor
//! the reevaluation loop never goes below.

use super::pipeline::SamplerCore;
use super::{LocationSampler, SamplerKind, Target};
use crate::domain::error::TrackerError;
use crate::domain::types::{Location, TrackingMode};
use crate::infra::metrics::Metrics;
use crate::io::platform::LocationPlatform;
use crate::services::distance::{distance, estimate_arrival};
use crate::services::mode_selector::{ModeDecision, TrackingModeSelector};
use crate::services::observers::{Observer, Subscription};
use crate::services::scheduler::ScheduledTask;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Recheck delay used until a position and target are known
const UNKNOWN_ETA_RECHECK: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Steering {
    target: Option<Target>,
    floor: Option<TrackingMode>,
}

pub struct BackgroundSampler {
    core: SamplerCore,
    selector: TrackingModeSelector,
    steering: Arc<Mutex<Steering>>,
    reevaluation: Mutex<Option<ScheduledTask>>,
}

impl BackgroundSampler {
    pub fn new(
        platform: Arc<dyn LocationPlatform>,
        metrics: Arc<Metrics>,
        fallback_min_delta_deg: f64,
        selector: TrackingModeSelector,
    ) -> Self {
        Self {
            core: SamplerCore::new(platform, metrics, fallback_min_delta_deg),
            selector,
            steering: Arc::new(Mutex::new(Steering::default())),
            reevaluation: Mutex::new(None),
        }
    }

    fn schedule_reevaluation(&self) {
        let initial = decide(&self.core, &self.steering, &self.selector)
            .map(|d| d.recheck)
            .unwrap_or(UNKNOWN_ETA_RECHECK);

        let core = self.core.clone();
        let steering = self.steering.clone();
        let selector = self.selector;
        let task = ScheduledTask::chain("background_reevaluation", initial, move || {
            let core = core.clone();
            let steering = steering.clone();
            async move { reevaluate(&core, &steering, &selector) }
        });

        if let Some(previous) = self.reevaluation.lock().replace(task) {
            previous.cancel();
        }
    }
}

/// Policy decision for the current position, clamped to the escalation floor
fn decide(
    core: &SamplerCore,
    steering: &Mutex<Steering>,
    selector: &TrackingModeSelector,
) -> Option<ModeDecision> {
    let (target, floor) = {
        let steering = steering.lock();
        (steering.target?, steering.floor)
    };
    let position = core.last_position()?;
    let eta_ms = estimate_arrival(distance(&position, &target.destination), target.transport_mode);
    let mut decision = selector.select_ms(eta_ms);
    if let Some(floor) = floor {
        decision.mode = decision.mode.max(floor);
    }
    Some(decision)
}

/// One run of the reevaluation chain; `None` ends the chain
fn reevaluate(
    core: &SamplerCore,
    steering: &Mutex<Steering>,
    selector: &TrackingModeSelector,
) -> Option<Duration> {
    let current = core.mode()?;
    let Some(decision) = decide(core, steering, selector) else {
        core.sample_once();
        return Some(UNKNOWN_ETA_RECHECK);
    };

    if decision.mode != current {
        info!(
            from = %current,
            to = %decision.mode,
            recheck_secs = %decision.recheck.as_secs(),
            "background_mode_changed"
        );
        core.metrics().record_mode_change();
        core.start(decision.mode);
    } else {
        debug!(mode = %current, recheck_secs = %decision.recheck.as_secs(), "background_mode_unchanged");
        core.sample_once();
    }
    Some(decision.recheck)
}

impl LocationSampler for BackgroundSampler {
    fn kind(&self) -> SamplerKind {
        SamplerKind::Background
    }

    fn start(&self, mode: TrackingMode) {
        self.core.platform().set_keep_awake(true);
        self.core.start(mode);
        self.schedule_reevaluation();
    }

    fn stop(&self) {
        if let Some(task) = self.reevaluation.lock().take() {
            task.cancel();
        }
        let was_running = self.core.mode().is_some();
        self.core.stop();
        if was_running {
            self.core.platform().set_keep_awake(false);
        }
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

    fn escalate(&self, mode: TrackingMode) -> bool {
        {
            let mut steering = self.steering.lock();
            steering.floor = Some(steering.floor.map_or(mode, |f| f.max(mode)));
        }
        match self.core.mode() {
            Some(current) if mode > current => {
                self.core.start(mode);
                true
            }
            _ => false,
        }
    }

    fn set_target(&self, target: Option<Target>) {
        let mut steering = self.steering.lock();
        steering.target = target;
        steering.floor = None;
    }

    fn reevaluates_itself(&self) -> bool {
        true
    }
}

impl Drop for BackgroundSampler {
    fn drop(&mut self) {
        self.stop();
    }
}
