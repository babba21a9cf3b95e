//! Tests for the JourneyController module

use super::*;
use crate::domain::types::{AlertType, JourneyStatus};
use crate::io::notifier::{Notification, SoundCue};
use crate::io::platform::PermissionState;
use crate::io::simulated::ScriptedPlatform;
use crate::io::store::MemoryStore;
use crate::services::persistence::Preferences;
use crate::services::sampler::SamplerKind;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::Duration;

const METERS_PER_DEGREE: f64 = 111_194.93;

/// Notifier that records everything it is asked to deliver
#[derive(Default)]
struct RecordingNotifier {
    shown: Mutex<Vec<Notification>>,
    vibrations: Mutex<Vec<Vec<u64>>>,
    sounds: Mutex<Vec<SoundCue>>,
    fail: AtomicBool,
    deny: AtomicBool,
}

impl RecordingNotifier {
    fn tags(&self) -> Vec<String> {
        self.shown.lock().iter().map(|n| n.tag.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn request_permission(&self) -> PermissionState {
        if self.deny.load(Ordering::SeqCst) {
            PermissionState::Denied
        } else {
            PermissionState::Granted
        }
    }

    async fn show(&self, notification: &Notification) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TrackerError::Notifier("display unavailable".into()));
        }
        self.shown.lock().push(notification.clone());
        Ok(())
    }

    fn vibrate(&self, pattern: &[u64]) {
        self.vibrations.lock().push(pattern.to_vec());
    }

    fn play_sound(&self, cue: SoundCue) {
        self.sounds.lock().push(cue);
    }
}

struct TestController {
    controller: JourneyController,
    platform: Arc<ScriptedPlatform>,
    notifier: Arc<RecordingNotifier>,
    store: Arc<MemoryStore>,
    metrics: Arc<Metrics>,
}

impl std::ops::Deref for TestController {
    type Target = JourneyController;
    fn deref(&self) -> &Self::Target {
        &self.controller
    }
}

impl std::ops::DerefMut for TestController {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.controller
    }
}

impl TestController {
    /// Deliver a watch fix and let the controller handle it
    async fn feed(&mut self, fix: Location) {
        self.platform.push(fix);
        settle().await;
        self.controller.process_pending().await;
    }

    async fn feed_distance(&mut self, meters: f64) {
        self.feed(at(meters)).await;
    }

    fn alert_types(&self) -> Vec<AlertType> {
        self.controller
            .current()
            .map(|j| j.alerts.iter().map(|a| a.alert_type).collect())
            .unwrap_or_default()
    }
}

fn create_test_controller() -> TestController {
    create_test_controller_with(Config::default(), ScriptedPlatform::new(), Arc::new(MemoryStore::new()))
}

fn create_test_controller_with(
    config: Config,
    platform: ScriptedPlatform,
    store: Arc<MemoryStore>,
) -> TestController {
    let platform = Arc::new(platform);
    let notifier = Arc::new(RecordingNotifier::default());
    let metrics = Arc::new(Metrics::new());
    let controller = JourneyController::new(
        config,
        platform.clone(),
        notifier.clone(),
        store.clone(),
        metrics.clone(),
    );
    TestController { controller, platform, notifier, store, metrics }
}

fn destination() -> Destination {
    Destination::new("central", "Central Station", "Main St 1", Location::new(59.9, 10.75))
}

/// Point `meters` due north of the destination
fn at(meters: f64) -> Location {
    Location::new(59.9 + meters / METERS_PER_DEGREE, 10.75)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn start_at(t: &mut TestController, meters: f64) -> Journey {
    t.platform.set_position(at(meters));
    t.controller.start(destination(), Some(TransportMode::Bus)).await.unwrap()
}

// ============================================================================
// Start
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_start_creates_tracking_journey() {
    let mut t = create_test_controller();
    let journey = start_at(&mut t, 5000.0).await;

    assert_eq!(journey.status, JourneyStatus::Tracking);
    assert_eq!(journey.transport_mode, TransportMode::Bus);
    // 5 km by bus is 12 minutes away
    assert_eq!(journey.tracking_mode, TrackingMode::Active);
    assert!((journey.distance.unwrap() - 5000.0).abs() < 1.0);
    assert!(journey.alerts.is_empty());

    assert_eq!(t.platform.active_watches(), 1);
    assert_eq!(t.persistence().destinations()[0].id, "central");
    assert_eq!(t.persistence().current_journey().map(|j| j.id), Some(journey.id));
}

#[tokio::test(start_paused = true)]
async fn test_start_uses_preferred_transport_mode() {
    let mut t = create_test_controller();
    t.persistence().save_preferences(&Preferences {
        default_transport_mode: TransportMode::Walk,
        ..Preferences::default()
    });
    t.platform.set_position(at(5000.0));

    let journey = t.start(destination(), None).await.unwrap();
    assert_eq!(journey.transport_mode, TransportMode::Walk);
    // An hour on foot
    assert_eq!(journey.tracking_mode, TrackingMode::Minimal);
}

#[tokio::test(start_paused = true)]
async fn test_start_location_permission_denied() {
    let mut t = create_test_controller();
    t.platform.set_permission(PermissionState::Denied);
    t.platform.set_position(at(5000.0));

    let err = t.start(destination(), None).await.unwrap_err();
    assert_eq!(err, TrackerError::PermissionDenied("location"));
    assert!(t.current().is_none());
    assert_eq!(t.platform.active_watches(), 0);
    assert!(t.persistence().destinations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_notification_permission_denied() {
    let mut t = create_test_controller();
    t.notifier.deny.store(true, Ordering::SeqCst);
    t.platform.set_position(at(5000.0));

    let err = t.start(destination(), None).await.unwrap_err();
    assert_eq!(err, TrackerError::PermissionDenied("notifications"));
    assert!(t.current().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_start_while_active_rejected() {
    let mut t = create_test_controller();
    start_at(&mut t, 5000.0).await;

    let err = t.start(destination(), None).await.unwrap_err();
    assert_eq!(err, TrackerError::JourneyAlreadyActive);

    t.pause().await.unwrap();
    let err = t.start(destination(), None).await.unwrap_err();
    assert_eq!(err, TrackerError::JourneyAlreadyActive);
}

#[tokio::test(start_paused = true)]
async fn test_start_acquisition_failure() {
    let mut t = create_test_controller();
    t.platform.set_position(at(5000.0));
    t.platform.fail_next_fix(TrackerError::AcquisitionTimeout);

    let err = t.start(destination(), None).await.unwrap_err();
    assert_eq!(err, TrackerError::AcquisitionTimeout);
    assert!(t.current().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_start_inside_arrival_radius_arrives() {
    let mut t = create_test_controller();
    let journey = start_at(&mut t, 20.0).await;

    assert_eq!(journey.status, JourneyStatus::Arrived);
    assert_eq!(t.alert_types(), vec![AlertType::Arrived]);
    assert_eq!(t.platform.active_watches(), 0);
}

// ============================================================================
// Alerts
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_standard_approach_sequence() {
    let mut t = create_test_controller();
    start_at(&mut t, 5000.0).await;

    t.feed_distance(900.0).await;
    t.feed_distance(150.0).await;
    assert_eq!(t.sampler().mode(), Some(TrackingMode::Precision));
    t.feed_distance(40.0).await;

    assert_eq!(t.alert_types(), vec![AlertType::Approaching, AlertType::FinalWarning, AlertType::Arrived]);
    let journey = t.current().unwrap();
    assert_eq!(journey.status, JourneyStatus::Arrived);
    assert!(journey.end_time.is_some());
    assert_eq!(t.platform.active_watches(), 0);

    let id = &journey.id;
    assert_eq!(
        t.notifier.tags(),
        vec![
            format!("journey-{id}-approaching"),
            format!("journey-{id}-final_warning"),
            format!("journey-{id}-arrived"),
        ]
    );
    assert_eq!(t.notifier.vibrations.lock().last().cloned(), Some(vec![300, 100, 300, 100, 300]));
    assert_eq!(t.notifier.sounds.lock().len(), 3);
    assert_eq!(t.metrics.alerts_fired(), 3);

    let history = t.persistence().history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, JourneyStatus::Arrived);
    assert_eq!(t.persistence().stats().arrived_journeys, 1);
}

#[tokio::test(start_paused = true)]
async fn test_oscillating_distance_fires_once() {
    let mut t = create_test_controller();
    start_at(&mut t, 5000.0).await;

    for meters in [1010.0, 990.0, 1010.0, 995.0, 1020.0, 980.0] {
        t.feed_distance(meters).await;
    }

    assert_eq!(t.alert_types(), vec![AlertType::FirstWarning, AlertType::Approaching]);
    assert_eq!(t.notifier.shown.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_escalation_restarts_sampler() {
    let mut t = create_test_controller();
    start_at(&mut t, 5000.0).await;
    assert_eq!(t.platform.watch_history().len(), 1);

    // Already active: approaching does not restart
    t.feed_distance(900.0).await;
    assert_eq!(t.platform.watch_history().len(), 1);

    t.feed_distance(150.0).await;
    let history = t.platform.watch_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].max_age, Duration::from_secs(15));
    assert_eq!(t.current().unwrap().tracking_mode, TrackingMode::Precision);
    assert_eq!(t.metrics.mode_changes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_notifier_failure_keeps_alert() {
    let mut t = create_test_controller();
    start_at(&mut t, 5000.0).await;
    t.notifier.fail.store(true, Ordering::SeqCst);

    t.feed_distance(900.0).await;

    assert_eq!(t.alert_types(), vec![AlertType::Approaching]);
    assert_eq!(t.metrics.notifier_failures(), 1);
    assert_eq!(t.current().unwrap().status, JourneyStatus::Tracking);
}

#[tokio::test(start_paused = true)]
async fn test_preferences_gate_notifications() {
    let mut t = create_test_controller();
    t.persistence().save_preferences(&Preferences {
        sound_enabled: false,
        vibration_enabled: false,
        ..Preferences::default()
    });
    start_at(&mut t, 5000.0).await;
    t.feed_distance(150.0).await;

    assert_eq!(t.notifier.shown.lock().len(), 1);
    assert!(t.notifier.sounds.lock().is_empty());
    assert!(t.notifier.vibrations.lock().is_empty());

    t.persistence().save_preferences(&Preferences { notifications_enabled: false, ..Preferences::default() });
    t.stop().await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    t.process_pending().await;

    start_at(&mut t, 5000.0).await;
    t.feed_distance(900.0).await;
    assert_eq!(t.alert_types(), vec![AlertType::Approaching]);
    assert_eq!(t.notifier.shown.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_preference_thresholds_apply() {
    let mut t = create_test_controller();
    t.persistence().save_preferences(&Preferences {
        approaching_threshold_m: Some(2000.0),
        ..Preferences::default()
    });
    start_at(&mut t, 8000.0).await;

    t.feed_distance(1800.0).await;
    assert_eq!(t.alert_types(), vec![AlertType::Approaching]);
}

// ============================================================================
// Pause / resume / stop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_pause_resume_preserves_journey() {
    let mut t = create_test_controller();
    let started = start_at(&mut t, 5000.0).await;
    t.feed_distance(900.0).await;

    let paused = t.pause().await.unwrap();
    assert_eq!(paused.status, JourneyStatus::Paused);
    assert_eq!(paused.tracking_mode, TrackingMode::Active);
    assert_eq!(t.platform.active_watches(), 0);
    assert!(!t.sampler().is_running());

    let resumed = t.resume().await.unwrap();
    assert_eq!(resumed.id, started.id);
    assert_eq!(resumed.status, JourneyStatus::Tracking);
    assert_eq!(resumed.alerts, paused.alerts);
    assert_eq!(t.sampler().mode(), Some(TrackingMode::Active));
    assert_eq!(t.platform.active_watches(), 1);

    // Alert state survived the pause
    t.feed_distance(950.0).await;
    assert_eq!(t.alert_types(), vec![AlertType::Approaching]);
}

#[tokio::test(start_paused = true)]
async fn test_samples_queued_before_pause_are_discarded() {
    let mut t = create_test_controller();
    start_at(&mut t, 5000.0).await;

    // Sample reaches the controller queue but is not handled yet
    t.platform.push(at(900.0));
    settle().await;

    t.pause().await.unwrap();
    t.process_pending().await;

    assert!(t.alert_types().is_empty());
    assert!((t.current().unwrap().distance.unwrap() - 5000.0).abs() < 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_transitions() {
    let mut t = create_test_controller();
    assert_eq!(t.pause().await.unwrap_err(), TrackerError::NoActiveJourney);
    assert_eq!(t.stop().await.unwrap_err(), TrackerError::NoActiveJourney);

    start_at(&mut t, 5000.0).await;
    assert!(matches!(t.resume().await, Err(TrackerError::InvalidTransition { .. })));

    t.pause().await.unwrap();
    assert!(matches!(t.pause().await, Err(TrackerError::InvalidTransition { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_stop_from_paused() {
    let mut t = create_test_controller();
    start_at(&mut t, 5000.0).await;
    t.pause().await.unwrap();

    let stopped = t.stop().await.unwrap();
    assert_eq!(stopped.status, JourneyStatus::Stopped);
    assert!(stopped.alerts.is_empty());
    assert_eq!(t.persistence().history()[0].id, stopped.id);
}

#[tokio::test(start_paused = true)]
async fn test_active_journey_cleared_after_grace() {
    let mut t = create_test_controller();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let _sub = t.subscribe(move |snapshot: &Option<Journey>| {
        s.lock().push(snapshot.as_ref().map(|j| j.status));
    });

    start_at(&mut t, 5000.0).await;
    t.stop().await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    t.process_pending().await;
    assert!(t.current().is_some());

    tokio::time::sleep(Duration::from_secs(2)).await;
    t.process_pending().await;
    assert!(t.current().is_none());
    assert_eq!(t.store.raw("current_journey").as_deref(), Some("null"));

    let seen = seen.lock();
    assert_eq!(seen.first(), Some(&Some(JourneyStatus::Tracking)));
    assert!(seen.contains(&Some(JourneyStatus::Stopped)));
    assert_eq!(seen.last(), Some(&None));
}

#[tokio::test(start_paused = true)]
async fn test_new_journey_during_grace_replaces_finished_one() {
    let mut t = create_test_controller();
    let first = start_at(&mut t, 5000.0).await;
    t.stop().await.unwrap();

    let second = start_at(&mut t, 5000.0).await;
    assert_ne!(first.id, second.id);

    // The first journey's clear never fires against the second
    tokio::time::sleep(Duration::from_secs(10)).await;
    t.process_pending().await;
    assert_eq!(t.current().map(|j| j.id), Some(second.id));
}

// ============================================================================
// Emergency
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_fires_exactly_one_alert() {
    let mut t = create_test_controller();
    start_at(&mut t, 5000.0).await;
    t.feed_distance(150.0).await;

    let stopped = t.emergency_stop().await.unwrap();
    assert_eq!(stopped.status, JourneyStatus::Stopped);
    let emergencies = stopped.alerts.iter().filter(|a| a.alert_type == AlertType::Emergency).count();
    assert_eq!(emergencies, 1);
    assert_eq!(t.platform.active_watches(), 0);
    assert!(t.notifier.tags().last().unwrap().ends_with("-emergency"));

    assert_eq!(t.emergency_stop().await.unwrap_err(), TrackerError::NoActiveJourney);

    // Late samples change nothing
    t.feed_distance(10.0).await;
    assert_eq!(t.current().unwrap().alerts.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_while_paused() {
    let mut t = create_test_controller();
    start_at(&mut t, 5000.0).await;
    t.pause().await.unwrap();

    let stopped = t.emergency_stop().await.unwrap();
    assert_eq!(stopped.status, JourneyStatus::Stopped);
    assert_eq!(t.alert_types(), vec![AlertType::Emergency]);
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_after_arrival_rejected() {
    let mut t = create_test_controller();
    start_at(&mut t, 5000.0).await;
    for meters in [900.0, 150.0, 40.0] {
        t.feed_distance(meters).await;
    }
    assert_eq!(t.current().unwrap().status, JourneyStatus::Arrived);

    // Still inside the clear grace window
    assert_eq!(t.emergency_stop().await.unwrap_err(), TrackerError::NoActiveJourney);
    assert_eq!(t.current().unwrap().status, JourneyStatus::Arrived);
    assert!(!t.alert_types().contains(&AlertType::Emergency));
}

// ============================================================================
// Mode reevaluation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reevaluation_switches_mode() {
    let mut t = create_test_controller();
    start_at(&mut t, 5000.0).await;

    // 1.5 km by bus is under four minutes: first warning, then precision
    t.feed_distance(1500.0).await;
    assert_eq!(t.alert_types(), vec![AlertType::FirstWarning]);
    assert_eq!(t.sampler().mode(), Some(TrackingMode::Active));

    tokio::time::sleep(Duration::from_secs(121)).await;
    t.process_pending().await;

    assert_eq!(t.sampler().mode(), Some(TrackingMode::Precision));
    assert_eq!(t.current().unwrap().tracking_mode, TrackingMode::Precision);
    assert_eq!(t.metrics.mode_changes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_mode_samples_once() {
    let mut t = create_test_controller();
    start_at(&mut t, 5000.0).await;
    let one_shots = t.platform.one_shot_requests();

    tokio::time::sleep(Duration::from_secs(121)).await;
    t.process_pending().await;
    settle().await;

    assert_eq!(t.sampler().mode(), Some(TrackingMode::Active));
    assert_eq!(t.platform.watch_history().len(), 1);
    // Four fallback polls plus the reevaluation's own fix
    assert!(t.platform.one_shot_requests() >= one_shots + 5);
}

#[tokio::test(start_paused = true)]
async fn test_forced_mode_is_a_floor() {
    let mut t = create_test_controller();
    start_at(&mut t, 5000.0).await;
    t.feed_distance(150.0).await;
    assert_eq!(t.sampler().mode(), Some(TrackingMode::Precision));

    // Moving away would let the policy pick active
    t.feed_distance(4000.0).await;
    tokio::time::sleep(Duration::from_secs(121)).await;
    t.process_pending().await;

    assert_eq!(t.sampler().mode(), Some(TrackingMode::Precision));
    assert_eq!(t.metrics.mode_changes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sampler_errors_do_not_stop_tracking() {
    let mut t = create_test_controller();
    start_at(&mut t, 5000.0).await;

    t.platform.push_error(TrackerError::AcquisitionTimeout);
    settle().await;
    t.process_pending().await;

    assert_eq!(t.current().unwrap().status, JourneyStatus::Tracking);
    assert_eq!(t.metrics.acquisition_errors(), 1);
    t.feed_distance(900.0).await;
    assert_eq!(t.alert_types(), vec![AlertType::Approaching]);
}

// ============================================================================
// Background sampler
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_background_sampler_steers_itself() {
    let mut t = create_test_controller_with(
        Config::default(),
        ScriptedPlatform::new().with_background(true),
        Arc::new(MemoryStore::new()),
    );
    assert_eq!(t.sampler().kind(), SamplerKind::Background);

    start_at(&mut t, 5000.0).await;
    assert!(t.platform.keep_awake());
    assert!(t.reevaluation.is_none());

    t.feed_distance(900.0).await;
    t.feed_distance(150.0).await;
    assert_eq!(t.sampler().mode(), Some(TrackingMode::Precision));

    t.feed_distance(30.0).await;
    assert_eq!(t.current().unwrap().status, JourneyStatus::Arrived);
    assert!(!t.platform.keep_awake());
    assert_eq!(t.platform.active_watches(), 0);
}

// ============================================================================
// Restore / persistence
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_restore_in_flight_journey() {
    let store = Arc::new(MemoryStore::new());
    let id = {
        let mut t = create_test_controller_with(Config::default(), ScriptedPlatform::new(), store.clone());
        let journey = start_at(&mut t, 5000.0).await;
        t.feed_distance(900.0).await;
        journey.id
    };

    let mut t = create_test_controller_with(Config::default(), ScriptedPlatform::new(), store);
    let restored = t.restore().unwrap().unwrap();
    assert_eq!(restored.id, id);
    assert_eq!(restored.status, JourneyStatus::Tracking);
    assert_eq!(t.sampler().mode(), Some(TrackingMode::Active));

    // Already-fired alerts are not repeated
    t.feed_distance(950.0).await;
    t.feed_distance(150.0).await;
    assert_eq!(t.alert_types(), vec![AlertType::Approaching, AlertType::FinalWarning]);
}

#[tokio::test(start_paused = true)]
async fn test_restore_paused_journey_stays_paused() {
    let store = Arc::new(MemoryStore::new());
    {
        let mut t = create_test_controller_with(Config::default(), ScriptedPlatform::new(), store.clone());
        start_at(&mut t, 5000.0).await;
        t.pause().await.unwrap();
    }

    let mut t = create_test_controller_with(Config::default(), ScriptedPlatform::new(), store);
    let restored = t.restore().unwrap().unwrap();
    assert_eq!(restored.status, JourneyStatus::Paused);
    assert!(!t.sampler().is_running());

    t.resume().await.unwrap();
    assert_eq!(t.sampler().mode(), Some(TrackingMode::Active));
}

#[tokio::test(start_paused = true)]
async fn test_restore_paused_keeps_floor_on_background() {
    let store = Arc::new(MemoryStore::new());
    {
        let mut t = create_test_controller_with(
            Config::default(),
            ScriptedPlatform::new().with_background(true),
            store.clone(),
        );
        start_at(&mut t, 5000.0).await;
        t.feed_distance(150.0).await;
        assert_eq!(t.sampler().mode(), Some(TrackingMode::Precision));
        t.pause().await.unwrap();
    }

    let mut t = create_test_controller_with(
        Config::default(),
        ScriptedPlatform::new().with_background(true),
        store,
    );
    let restored = t.restore().unwrap().unwrap();
    assert_eq!(restored.status, JourneyStatus::Paused);
    assert!(!t.sampler().is_running());

    t.resume().await.unwrap();
    assert_eq!(t.sampler().mode(), Some(TrackingMode::Precision));

    // Moving away would let the policy pick active
    t.feed_distance(4000.0).await;
    tokio::time::sleep(Duration::from_secs(31)).await;
    t.process_pending().await;

    assert_eq!(t.sampler().mode(), Some(TrackingMode::Precision));
}

#[tokio::test(start_paused = true)]
async fn test_restore_clears_terminal_snapshot() {
    let store = Arc::new(MemoryStore::new());
    {
        let mut t = create_test_controller_with(Config::default(), ScriptedPlatform::new(), store.clone());
        start_at(&mut t, 5000.0).await;
        t.stop().await.unwrap();
    }

    let mut t = create_test_controller_with(Config::default(), ScriptedPlatform::new(), store.clone());
    assert_eq!(t.restore().unwrap(), None);
    assert_eq!(store.raw("current_journey").as_deref(), Some("null"));
}

#[tokio::test(start_paused = true)]
async fn test_persistence_failures_do_not_break_tracking() {
    let mut t = create_test_controller();
    t.store.set_fail_writes(true);

    start_at(&mut t, 5000.0).await;
    t.feed_distance(900.0).await;

    assert_eq!(t.alert_types(), vec![AlertType::Approaching]);
    assert!(t.metrics.persistence_failures() > 0);
}

// ============================================================================
// Run loop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_run_loop_via_handle() {
    let t = create_test_controller();
    let platform = t.platform.clone();
    let mut controller = t.controller;
    let (handle, commands) = ControllerHandle::channel(16);

    let task = tokio::spawn(async move {
        controller.run(commands).await;
        controller
    });

    platform.set_position(at(5000.0));
    let journey = handle.start(destination(), Some(TransportMode::Bus)).await.unwrap();
    assert_eq!(journey.status, JourneyStatus::Tracking);

    platform.push(at(900.0));
    settle().await;
    let current = handle.current().await.unwrap().unwrap();
    assert_eq!(current.alerts.len(), 1);

    let stopped = handle.emergency_stop().await.unwrap();
    assert_eq!(stopped.status, JourneyStatus::Stopped);

    drop(handle);
    let controller = task.await.unwrap();
    assert!(!controller.sampler().is_running());
}

#[tokio::test(start_paused = true)]
async fn test_handle_reports_closed_controller() {
    let (handle, commands) = ControllerHandle::channel(1);
    drop(commands);
    assert_eq!(handle.pause().await.unwrap_err(), TrackerError::ControllerClosed);
}
