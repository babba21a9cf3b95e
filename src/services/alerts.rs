//! Proximity alert state machine
//!
//! Stages advance forward only: none -> first warning -> approaching ->
//! final warning -> arrived. A stage is entered only when it ranks above the
//! current one, so stages skipped by a fast approach are never backfilled and
//! a distance oscillating around a threshold fires at most once. Emergency
//! is an orthogonal override that ends evaluation.

use crate::domain::journey::{Alert, Journey};
use crate::domain::types::{AlertType, TrackingMode};
use crate::infra::config::Config;
use crate::io::notifier::{Notification, SoundCue};
use crate::services::distance::{format_distance, format_eta};
use std::time::Duration;
use tracing::{debug, info};

const APPROACHING_VIBRATION: &[u64] = &[200];
const FINAL_VIBRATION: &[u64] = &[200, 100, 200];
const ARRIVED_VIBRATION: &[u64] = &[300, 100, 300, 100, 300];
const EMERGENCY_VIBRATION: &[u64] = &[500, 200, 500];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    pub arrival_m: f64,
    pub final_m: f64,
    pub approaching_m: f64,
    pub first_warning_eta: Duration,
}

impl AlertThresholds {
    pub fn from_config(config: &Config) -> Self {
        Self {
            arrival_m: config.arrival_threshold_m(),
            final_m: config.final_threshold_m(),
            approaching_m: config.approaching_threshold_m(),
            first_warning_eta: config.first_warning_eta(),
        }
    }

    /// Override the user-adjustable distances, keeping them ordered
    pub fn with_preferences(mut self, approaching_m: Option<f64>, final_m: Option<f64>) -> Self {
        if let Some(final_m) = final_m.filter(|f| *f > self.arrival_m) {
            self.final_m = final_m;
        }
        if let Some(approaching_m) = approaching_m.filter(|a| *a > self.final_m) {
            self.approaching_m = approaching_m;
        }
        self
    }
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Proximity stage, ordered by rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertStage {
    None,
    FirstWarning,
    Approaching,
    FinalWarning,
    Arrived,
}

impl AlertStage {
    fn alert_type(&self) -> Option<AlertType> {
        match self {
            AlertStage::None => None,
            AlertStage::FirstWarning => Some(AlertType::FirstWarning),
            AlertStage::Approaching => Some(AlertType::Approaching),
            AlertStage::FinalWarning => Some(AlertType::FinalWarning),
            AlertStage::Arrived => Some(AlertType::Arrived),
        }
    }

    fn from_alert_type(alert_type: AlertType) -> Option<Self> {
        match alert_type {
            AlertType::FirstWarning => Some(AlertStage::FirstWarning),
            AlertType::Approaching => Some(AlertStage::Approaching),
            AlertType::FinalWarning => Some(AlertStage::FinalWarning),
            AlertType::Arrived => Some(AlertStage::Arrived),
            AlertType::Emergency => None,
        }
    }

    /// Mode the stage forces the sampler up to
    fn force_mode(&self) -> Option<TrackingMode> {
        match self {
            AlertStage::Approaching => Some(TrackingMode::Active),
            AlertStage::FinalWarning => Some(TrackingMode::Precision),
            _ => None,
        }
    }
}

/// One fired alert and everything the controller does about it
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub alert: Alert,
    pub notification: Notification,
    /// Escalate sampling to at least this mode
    pub force_mode: Option<TrackingMode>,
    /// Journey ends (arrived or emergency)
    pub terminal: bool,
}

#[derive(Debug, Clone)]
pub struct AlertStateMachine {
    thresholds: AlertThresholds,
    stage: AlertStage,
    fired: u8,
}

impl AlertStateMachine {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds, stage: AlertStage::None, fired: 0 }
    }

    pub fn thresholds(&self) -> AlertThresholds {
        self.thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: AlertThresholds) {
        self.thresholds = thresholds;
    }

    pub fn stage(&self) -> AlertStage {
        self.stage
    }

    pub fn has_fired(&self, alert_type: AlertType) -> bool {
        self.fired & alert_type.bit() != 0
    }

    /// Forget all fired alerts (new journey)
    pub fn reset(&mut self) {
        self.stage = AlertStage::None;
        self.fired = 0;
    }

    /// Rebuild state from a journey's recorded alerts
    pub fn restore(&mut self, alerts: &[Alert]) {
        self.reset();
        for alert in alerts {
            self.fired |= alert.alert_type.bit();
            if let Some(stage) = AlertStage::from_alert_type(alert.alert_type) {
                self.stage = self.stage.max(stage);
            }
        }
        debug!(stage = ?self.stage, fired = %self.fired, "alert_state_restored");
    }

    /// Stage the nearest-first rules put this sample in
    fn classify(&self, distance_m: f64, eta_ms: u64) -> AlertStage {
        let t = &self.thresholds;
        if distance_m <= t.arrival_m {
            AlertStage::Arrived
        } else if distance_m <= t.final_m {
            AlertStage::FinalWarning
        } else if distance_m <= t.approaching_m {
            AlertStage::Approaching
        } else if Duration::from_millis(eta_ms) <= t.first_warning_eta {
            AlertStage::FirstWarning
        } else {
            AlertStage::None
        }
    }

    /// Evaluate one sample. Returns the transition when a new stage is entered.
    pub fn evaluate(&mut self, journey: &Journey, distance_m: f64, eta_ms: u64) -> Option<Transition> {
        if self.has_fired(AlertType::Emergency) || self.stage == AlertStage::Arrived {
            return None;
        }

        let candidate = self.classify(distance_m, eta_ms);
        if candidate <= self.stage {
            return None;
        }
        let alert_type = candidate.alert_type()?;
        self.stage = candidate;
        if self.has_fired(alert_type) {
            return None;
        }
        self.fired |= alert_type.bit();

        info!(
            jid = %journey.id,
            alert = %alert_type,
            distance_m = %distance_m.round(),
            eta_ms = %eta_ms,
            "alert_stage_entered"
        );

        let notification = notification_for(journey, alert_type, distance_m, eta_ms);
        Some(Transition {
            alert: Alert::new(alert_type, notification.body.clone(), distance_m),
            notification,
            force_mode: candidate.force_mode(),
            terminal: candidate == AlertStage::Arrived,
        })
    }

    /// Fire the emergency alert, whatever stage the journey is in
    pub fn trigger_emergency(&mut self, journey: &Journey, distance_m: f64) -> Option<Transition> {
        if self.has_fired(AlertType::Emergency) {
            return None;
        }
        self.fired |= AlertType::Emergency.bit();
        info!(jid = %journey.id, stage = ?self.stage, "alert_emergency");

        let notification = notification_for(journey, AlertType::Emergency, distance_m, 0);
        Some(Transition {
            alert: Alert::new(AlertType::Emergency, notification.body.clone(), distance_m),
            notification,
            force_mode: None,
            terminal: true,
        })
    }
}

impl Default for AlertStateMachine {
    fn default() -> Self {
        Self::new(AlertThresholds::default())
    }
}

fn notification_for(journey: &Journey, alert_type: AlertType, distance_m: f64, eta_ms: u64) -> Notification {
    let place = &journey.destination.name;
    let away = format_distance(distance_m);
    let (title, body, vibration, sound) = match alert_type {
        AlertType::FirstWarning => (
            format!("Heading to {place}"),
            format!("About {} to go ({away})", format_eta(eta_ms)),
            None,
            Some(SoundCue::Chime),
        ),
        AlertType::Approaching => (
            format!("Approaching {place}"),
            format!("{away} away, about {}", format_eta(eta_ms)),
            Some(APPROACHING_VIBRATION),
            Some(SoundCue::Chime),
        ),
        AlertType::FinalWarning => (
            "Get ready".to_string(),
            format!("{place} is {away} away"),
            Some(FINAL_VIBRATION),
            Some(SoundCue::Alarm),
        ),
        AlertType::Arrived => (
            format!("You have arrived at {place}"),
            format!("{place} reached"),
            Some(ARRIVED_VIBRATION),
            Some(SoundCue::Alarm),
        ),
        AlertType::Emergency => (
            "Tracking stopped".to_string(),
            format!("Emergency stop {away} from {place}"),
            Some(EMERGENCY_VIBRATION),
            Some(SoundCue::Alarm),
        ),
    };

    Notification {
        title,
        body,
        tag: format!("journey-{}-{}", journey.id, alert_type.as_str()),
        require_interaction: matches!(
            alert_type,
            AlertType::FinalWarning | AlertType::Arrived | AlertType::Emergency
        ),
        vibration,
        sound,
    }
}
