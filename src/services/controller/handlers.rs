//! Journey operations and event handlers for the JourneyController
//!
//! Every mutation of the current journey ends in `publish`, which persists
//! the snapshot and notifies observers.

use super::{ControllerEvent, JourneyController};
use crate::domain::error::{Result, TrackerError};
use crate::domain::journey::Journey;
use crate::domain::types::{AlertType, Destination, JourneyStatus, Location, TrackingMode, TransportMode};
use crate::infra::metrics::DropReason;
use crate::io::notifier::Notification;
use crate::io::platform::{acquire_with_timeout, PermissionState, PositionOptions};
use crate::services::alerts::{AlertThresholds, Transition};
use crate::services::distance::{distance, estimate_arrival};
use crate::services::mode_selector::ModeProfile;
use crate::services::sampler::Target;
use crate::services::scheduler::ScheduledTask;
use std::time::Duration;
use tracing::{debug, info, warn};

impl JourneyController {
    /// Start a journey toward `destination`
    ///
    /// Fails with `PermissionDenied` when location (or, with notifications
    /// enabled, notification) access is refused, and with
    /// `JourneyAlreadyActive` while another journey is tracking or paused.
    pub async fn start(
        &mut self,
        destination: Destination,
        transport_mode: Option<TransportMode>,
    ) -> Result<Journey> {
        if self.journey.as_ref().is_some_and(|j| j.status.is_in_flight()) {
            return Err(TrackerError::JourneyAlreadyActive);
        }

        if self.platform.request_permission().await == PermissionState::Denied {
            warn!(dest = %destination.id, "location_permission_denied");
            return Err(TrackerError::PermissionDenied("location"));
        }

        self.preferences = self.persistence.preferences();
        if self.preferences.notifications_enabled
            && self.notifier.request_permission().await == PermissionState::Denied
        {
            warn!(dest = %destination.id, "notification_permission_denied");
            return Err(TrackerError::PermissionDenied("notifications"));
        }

        let options = PositionOptions::from(ModeProfile::for_mode(TrackingMode::Precision));
        let start_location = acquire_with_timeout(self.platform.as_ref(), options).await?;

        // A finished journey still waiting for its grace delay is replaced now
        if let Some(pending) = self.clear_timer.take() {
            pending.cancel();
        }

        let transport_mode = transport_mode.unwrap_or(self.preferences.default_transport_mode);
        let eta_ms = estimate_arrival(distance(&start_location, &destination.location), transport_mode);
        let decision = self.selector.select_ms(eta_ms);

        self.alerts.reset();
        self.alerts.set_thresholds(self.thresholds());
        self.mode_floor = None;

        let journey = Journey::new(destination, transport_mode, start_location, decision.mode);
        info!(
            jid = %journey.id,
            dest = %journey.destination.id,
            transport = %transport_mode,
            mode = %decision.mode,
            eta_ms = %eta_ms,
            "journey_started"
        );

        self.sampler.set_target(Some(Target {
            destination: journey.destination.location,
            transport_mode,
        }));
        self.sampler.start(decision.mode);
        if !self.sampler.reevaluates_itself() {
            self.schedule_reevaluation(decision.recheck);
        }

        self.persistence.remember_destination(&journey.destination);
        self.metrics.record_journey_started();
        self.journey = Some(journey);

        // The start location is evaluated like any other sample
        self.handle_sample(start_location).await;
        self.current().ok_or(TrackerError::NoActiveJourney)
    }

    /// Stop the journey without arriving
    pub async fn stop(&mut self) -> Result<Journey> {
        self.require_in_flight()?;
        self.halt_sampling();
        self.finish(JourneyStatus::Stopped)
    }

    /// Halt sampling, keeping the journey and its mode
    pub async fn pause(&mut self) -> Result<Journey> {
        let running_mode = self.sampler.mode();
        let journey = self.journey.as_mut().ok_or(TrackerError::NoActiveJourney)?;
        journey.transition(JourneyStatus::Paused)?;
        if let Some(mode) = running_mode {
            journey.tracking_mode = mode;
        }
        info!(jid = %journey.id, mode = %journey.tracking_mode, "journey_paused");

        self.halt_sampling();
        self.publish();
        self.current().ok_or(TrackerError::NoActiveJourney)
    }

    /// Restart sampling at the mode cached when pausing
    pub async fn resume(&mut self) -> Result<Journey> {
        let journey = self.journey.as_mut().ok_or(TrackerError::NoActiveJourney)?;
        journey.transition(JourneyStatus::Tracking)?;
        let mode = journey.tracking_mode;
        let eta_ms = eta_of(journey);
        info!(jid = %journey.id, mode = %mode, "journey_resumed");

        self.sampler.start(mode);
        if !self.sampler.reevaluates_itself() {
            self.schedule_reevaluation(self.selector.select_ms(eta_ms).recheck);
        }
        self.publish();
        self.current().ok_or(TrackerError::NoActiveJourney)
    }

    /// Cancel everything and fire the emergency alert, whatever stage the
    /// journey has reached
    pub async fn emergency_stop(&mut self) -> Result<Journey> {
        self.require_in_flight()?;
        self.halt_sampling();

        let transition = match self.journey.as_ref() {
            Some(journey) => {
                let distance_m = journey
                    .distance
                    .unwrap_or_else(|| distance(&journey.current_location, &journey.destination.location));
                self.alerts.trigger_emergency(journey, distance_m)
            }
            None => None,
        };
        if let Some(transition) = transition {
            self.record_transition(&transition);
            self.dispatch(&transition.notification).await;
        }
        self.finish(JourneyStatus::Stopped)
    }

    /// Resume a journey persisted before a restart. Terminal snapshots are
    /// cleared instead.
    pub fn restore(&mut self) -> Result<Option<Journey>> {
        if self.journey.as_ref().is_some_and(|j| j.status.is_in_flight()) {
            return Err(TrackerError::JourneyAlreadyActive);
        }
        let Some(journey) = self.persistence.current_journey() else {
            return Ok(None);
        };
        if !journey.status.is_in_flight() {
            info!(jid = %journey.id, status = %journey.status, "stale_journey_snapshot_cleared");
            self.persistence.save_current_journey(None);
            return Ok(None);
        }

        self.preferences = self.persistence.preferences();
        self.alerts.set_thresholds(self.thresholds());
        self.alerts.restore(&journey.alerts);
        self.mode_floor = journey
            .alerts
            .iter()
            .filter_map(|a| match a.alert_type {
                AlertType::Approaching => Some(TrackingMode::Active),
                AlertType::FinalWarning => Some(TrackingMode::Precision),
                _ => None,
            })
            .max();

        self.sampler.set_target(Some(Target {
            destination: journey.destination.location,
            transport_mode: journey.transport_mode,
        }));

        info!(
            jid = %journey.id,
            status = %journey.status,
            mode = %journey.tracking_mode,
            alerts = %journey.alerts.len(),
            "journey_restored"
        );
        let status = journey.status;
        let mode = journey.tracking_mode;
        let eta_ms = eta_of(&journey);
        self.journey = Some(journey);

        // Recorded even while stopped so a paused journey keeps its floor on resume
        if let Some(floor) = self.mode_floor {
            self.sampler.escalate(floor);
        }
        if status == JourneyStatus::Tracking {
            self.sampler.start(self.mode_floor.map_or(mode, |floor| mode.max(floor)));
            if !self.sampler.reevaluates_itself() {
                self.schedule_reevaluation(self.selector.select_ms(eta_ms).recheck);
            }
        }
        self.publish();
        Ok(self.current())
    }

    /// Evaluate a sample against the current journey
    pub(crate) async fn handle_sample(&mut self, fix: Location) {
        let running_mode = self.sampler.mode();
        let Some(journey) = self.journey.as_mut().filter(|j| j.status == JourneyStatus::Tracking) else {
            self.metrics.record_sample_dropped(DropReason::Inactive);
            debug!(fix = %fix, "sample_ignored_no_tracking_journey");
            return;
        };

        let distance_m = distance(&fix, &journey.destination.location);
        let eta_ms = estimate_arrival(distance_m, journey.transport_mode);
        journey.current_location = fix;
        journey.distance = Some(distance_m);
        journey.eta_ms = Some(eta_ms);
        if let Some(mode) = running_mode {
            journey.tracking_mode = mode;
        }
        debug!(jid = %journey.id, distance_m = %distance_m.round(), eta_ms = %eta_ms, "journey_sample");

        let Some(transition) = self.alerts.evaluate(journey, distance_m, eta_ms) else {
            self.publish();
            return;
        };

        self.record_transition(&transition);
        if let Some(mode) = transition.force_mode {
            self.force_mode(mode);
        }
        self.dispatch(&transition.notification).await;

        if transition.terminal {
            self.halt_sampling();
            if let Err(e) = self.finish(JourneyStatus::Arrived) {
                warn!(error = %e, "journey_finish_failed");
            }
        } else {
            self.publish();
        }
    }

    pub(crate) fn handle_sampler_error(&mut self, err: &TrackerError) {
        let jid = self.journey.as_ref().map(|j| j.id.as_str()).unwrap_or("-");
        warn!(jid = %jid, error = %err, kind = err.kind(), "journey_sampler_error");
    }

    /// Rerun the mode policy for the current ETA
    pub(crate) fn handle_reevaluate(&mut self) {
        let Some(journey) = self.journey.as_ref().filter(|j| j.status == JourneyStatus::Tracking) else {
            return;
        };
        let eta_ms = eta_of(journey);
        let decision = self.selector.select_ms(eta_ms);
        let mode = self.mode_floor.map_or(decision.mode, |floor| decision.mode.max(floor));
        let current = self.sampler.mode();

        if current != Some(mode) {
            info!(
                jid = %journey.id,
                from = ?current.map(|m| m.as_str()),
                to = %mode,
                eta_ms = %eta_ms,
                recheck_secs = %decision.recheck.as_secs(),
                "tracking_mode_changed"
            );
            self.metrics.record_mode_change();
            self.sampler.start(mode);
            if let Some(journey) = self.journey.as_mut() {
                journey.tracking_mode = mode;
            }
            self.publish();
        } else {
            debug!(
                jid = %journey.id,
                mode = %mode,
                recheck_secs = %decision.recheck.as_secs(),
                "tracking_mode_unchanged"
            );
            self.sampler.sample_once();
        }
        self.schedule_reevaluation(decision.recheck);
    }

    /// Drop the terminal journey once its grace delay has passed
    pub(crate) fn handle_clear_active(&mut self, id: &str) {
        let due = self.journey.as_ref().is_some_and(|j| j.id == id && j.status.is_terminal());
        if !due {
            debug!(jid = %id, "clear_active_ignored");
            return;
        }
        info!(jid = %id, "active_journey_cleared");
        self.journey = None;
        self.clear_timer = None;
        self.persistence.save_current_journey(None);
        self.observers.notify(&None);
    }

    pub(crate) fn cancel_timers(&mut self) {
        if let Some(task) = self.reevaluation.take() {
            task.cancel();
        }
    }

    /// Cancel timers and sampling, then discard samples already queued so
    /// nothing delivered before this call is processed after it
    fn halt_sampling(&mut self) {
        self.cancel_timers();
        self.sampler.stop();

        let mut cleared = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                ControllerEvent::Sample(_) => self.metrics.record_sample_dropped(DropReason::Inactive),
                ControllerEvent::ClearActive(id) => cleared.push(id),
                ControllerEvent::SamplerError(_) | ControllerEvent::Reevaluate => {}
            }
        }
        for id in cleared {
            self.handle_clear_active(&id);
        }
    }

    fn schedule_reevaluation(&mut self, delay: Duration) {
        let tx = self.events_tx.clone();
        let task = ScheduledTask::once("mode_reevaluation", delay, move || async move {
            let _ = tx.send(ControllerEvent::Reevaluate);
        });
        if let Some(previous) = self.reevaluation.replace(task) {
            previous.cancel();
        }
    }

    /// Move the journey to a terminal status, record it and schedule the
    /// release of the active slot
    fn finish(&mut self, status: JourneyStatus) -> Result<Journey> {
        let journey = self.journey.as_mut().ok_or(TrackerError::NoActiveJourney)?;
        journey.transition(status)?;
        info!(
            jid = %journey.id,
            status = %status,
            alerts = %journey.alerts.len(),
            duration_ms = %journey.duration_ms(),
            "journey_finished"
        );
        let snapshot = journey.clone();

        self.metrics.record_journey_finished();
        self.sampler.set_target(None);
        self.mode_floor = None;
        self.publish();
        self.persistence.record_journey(&snapshot);

        let tx = self.events_tx.clone();
        let id = snapshot.id.clone();
        let grace = self.config.clear_grace();
        self.clear_timer = Some(ScheduledTask::once("clear_active_journey", grace, move || async move {
            let _ = tx.send(ControllerEvent::ClearActive(id));
        }));
        Ok(snapshot)
    }

    fn record_transition(&mut self, transition: &Transition) {
        if let Some(journey) = self.journey.as_mut() {
            if journey.record_alert(transition.alert.clone()) {
                self.metrics.record_alert_fired();
            }
        }
    }

    /// Escalate sampling; never lowers the mode
    fn force_mode(&mut self, mode: TrackingMode) {
        self.mode_floor = Some(self.mode_floor.map_or(mode, |floor| floor.max(mode)));
        if self.sampler.escalate(mode) {
            self.metrics.record_mode_change();
            if let Some(journey) = self.journey.as_mut() {
                info!(jid = %journey.id, mode = %mode, "tracking_mode_escalated");
                journey.tracking_mode = mode;
            }
        }
    }

    /// Deliver a notification, honouring the user's preferences. Failures
    /// are logged and counted; the alert stays recorded.
    async fn dispatch(&self, notification: &Notification) {
        if !self.preferences.notifications_enabled {
            debug!(tag = %notification.tag, "notification_suppressed");
            return;
        }
        if let Err(e) = self.notifier.show(notification).await {
            self.metrics.record_notifier_failure();
            warn!(tag = %notification.tag, error = %e, "notification_failed");
        }
        if self.preferences.vibration_enabled {
            if let Some(pattern) = notification.vibration {
                self.notifier.vibrate(pattern);
            }
        }
        if self.preferences.sound_enabled {
            if let Some(cue) = notification.sound {
                self.notifier.play_sound(cue);
            }
        }
    }

    /// Persist the current snapshot and notify observers
    fn publish(&self) {
        let snapshot = self.current();
        self.persistence.save_current_journey(snapshot.as_ref());
        self.observers.notify(&snapshot);
    }

    fn require_in_flight(&self) -> Result<()> {
        match self.journey.as_ref() {
            Some(journey) if journey.status.is_in_flight() => Ok(()),
            _ => Err(TrackerError::NoActiveJourney),
        }
    }

    fn thresholds(&self) -> AlertThresholds {
        AlertThresholds::from_config(&self.config)
            .with_preferences(self.preferences.approaching_threshold_m, self.preferences.final_threshold_m)
    }
}

/// ETA from the latest sample, or from the current location when none was taken
fn eta_of(journey: &Journey) -> u64 {
    journey.eta_ms.unwrap_or_else(|| {
        estimate_arrival(
            distance(&journey.current_location, &journey.destination.location),
            journey.transport_mode,
        )
    })
}
