//! Shared sampling machinery
//!
//! Owns the platform watch, its pump task, the fallback poll and one-shot
//! acquisitions. Every sample passes through `offer`, which applies the drop
//! rules and the generation gate before observers see it.

use crate::domain::error::TrackerError;
use crate::domain::journey::epoch_ms;
use crate::domain::types::{Location, TrackingMode};
use crate::infra::metrics::{DropReason, Metrics};
use crate::io::platform::{acquire_with_timeout, LocationPlatform, PositionOptions, WatchId};
use crate::services::mode_selector::ModeProfile;
use crate::services::observers::{Observer, ObserverSet, Subscription};
use crate::services::scheduler::ScheduledTask;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleSource {
    Watch,
    OneShot,
    /// Fallback poll with its interval
    Fallback(Duration),
}

impl SampleSource {
    fn as_str(&self) -> &'static str {
        match self {
            SampleSource::Watch => "watch",
            SampleSource::OneShot => "one_shot",
            SampleSource::Fallback(_) => "fallback",
        }
    }
}

#[derive(Default)]
struct CoreState {
    /// Some while running
    mode: Option<TrackingMode>,
    /// Bumped on every start and stop; tasks carry the value they were
    /// spawned with and are ignored once it no longer matches
    generation: u64,
    watch: Option<WatchId>,
    pump: Option<JoinHandle<()>>,
    poll: Option<ScheduledTask>,
    one_shots: Vec<JoinHandle<()>>,
    last_emitted: Option<Location>,
    last_watch_emit: Option<Instant>,
    last_position: Option<Location>,
}

struct CoreInner {
    platform: Arc<dyn LocationPlatform>,
    metrics: Arc<Metrics>,
    fallback_min_delta_deg: f64,
    state: Mutex<CoreState>,
    locations: ObserverSet<Location>,
    errors: ObserverSet<TrackerError>,
}

/// Cheap handle to the sampling machinery; clones share state
#[derive(Clone)]
pub(crate) struct SamplerCore {
    inner: Arc<CoreInner>,
}

impl SamplerCore {
    pub(crate) fn new(
        platform: Arc<dyn LocationPlatform>,
        metrics: Arc<Metrics>,
        fallback_min_delta_deg: f64,
    ) -> Self {
        Self {
            inner: Arc::new(CoreInner {
                platform,
                metrics,
                fallback_min_delta_deg,
                state: Mutex::new(CoreState::default()),
                locations: ObserverSet::new(),
                errors: ObserverSet::new(),
            }),
        }
    }

    pub(crate) fn platform(&self) -> &Arc<dyn LocationPlatform> {
        &self.inner.platform
    }

    pub(crate) fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Start (or restart) sampling with `mode`'s acquisition profile
    pub(crate) fn start(&self, mode: TrackingMode) {
        let profile = ModeProfile::for_mode(mode);
        let options = PositionOptions::from(profile);

        let mut state = self.inner.state.lock();
        let previous = state.mode;
        self.teardown(&mut state);
        state.generation += 1;
        let generation = state.generation;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let watch = self.inner.platform.watch_position(options, tx);

        let core = self.clone();
        let pump = tokio::spawn(async move {
            while let Some(result) = rx.recv().await {
                match result {
                    Ok(fix) => core.offer(generation, fix, SampleSource::Watch),
                    Err(e) => core.report_error(generation, e),
                }
            }
        });

        let poll = profile.fallback_poll.map(|period| {
            let core = self.clone();
            ScheduledTask::repeating("fallback_poll", period, move || {
                let core = core.clone();
                async move {
                    match acquire_with_timeout(core.inner.platform.as_ref(), options).await {
                        Ok(fix) => core.offer(generation, fix, SampleSource::Fallback(period)),
                        Err(e) => core.report_error(generation, e),
                    }
                }
            })
        });

        state.mode = Some(mode);
        state.watch = Some(watch);
        state.pump = Some(pump);
        state.poll = poll;

        info!(
            mode = %mode,
            previous = ?previous.map(|m| m.as_str()),
            watch_id = %watch,
            high_accuracy = %options.high_accuracy,
            fallback_poll_secs = ?profile.fallback_poll.map(|p| p.as_secs()),
            "sampler_started"
        );
    }

    /// Cancel the watch and every task; nothing started before this call is
    /// delivered after it
    pub(crate) fn stop(&self) {
        let mut state = self.inner.state.lock();
        let was_running = state.mode.is_some();
        self.teardown(&mut state);
        state.generation += 1;
        state.last_emitted = None;
        state.last_watch_emit = None;
        if was_running {
            info!("sampler_stopped");
        }
    }

    /// Request a single fix outside the watch
    pub(crate) fn sample_once(&self) {
        let mut state = self.inner.state.lock();
        let Some(mode) = state.mode else {
            debug!("sample_once_ignored_not_running");
            return;
        };
        let generation = state.generation;
        let options = PositionOptions::from(ModeProfile::for_mode(mode));

        state.one_shots.retain(|h| !h.is_finished());
        let core = self.clone();
        state.one_shots.push(tokio::spawn(async move {
            match acquire_with_timeout(core.inner.platform.as_ref(), options).await {
                Ok(fix) => core.offer(generation, fix, SampleSource::OneShot),
                Err(e) => core.report_error(generation, e),
            }
        }));
    }

    pub(crate) fn mode(&self) -> Option<TrackingMode> {
        self.inner.state.lock().mode
    }

    pub(crate) fn last_position(&self) -> Option<Location> {
        self.inner.state.lock().last_position
    }

    pub(crate) fn subscribe(&self, observer: Observer<Location>) -> Subscription {
        self.inner.locations.subscribe(move |fix: &Location| observer(fix))
    }

    pub(crate) fn subscribe_errors(&self, observer: Observer<TrackerError>) -> Subscription {
        self.inner.errors.subscribe(move |err: &TrackerError| observer(err))
    }

    fn teardown(&self, state: &mut CoreState) {
        if let Some(id) = state.watch.take() {
            self.inner.platform.clear_watch(id);
        }
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        if let Some(poll) = state.poll.take() {
            poll.cancel();
        }
        for handle in state.one_shots.drain(..) {
            handle.abort();
        }
        state.mode = None;
    }

    /// Apply the drop rules; emits to observers when the sample survives
    fn offer(&self, generation: u64, fix: Location, source: SampleSource) {
        let metrics = &self.inner.metrics;
        metrics.record_sample_received();

        let emitted = {
            let mut state = self.inner.state.lock();
            let mode = match state.mode {
                Some(mode) if state.generation == generation => mode,
                _ => {
                    metrics.record_sample_dropped(DropReason::Inactive);
                    return;
                }
            };

            let now = epoch_ms();
            let taken_at = fix.timestamp.unwrap_or(now);
            let age_ms = now.saturating_sub(taken_at);
            let max_age_ms = ModeProfile::for_mode(mode).max_age.as_millis() as u64;
            if age_ms > max_age_ms {
                debug!(source = source.as_str(), age_ms = %age_ms, max_age_ms = %max_age_ms, "sample_dropped_stale");
                metrics.record_sample_dropped(DropReason::Stale);
                return;
            }

            if let Some(last_taken) = state.last_emitted.and_then(|l| l.timestamp) {
                if taken_at < last_taken {
                    debug!(source = source.as_str(), "sample_dropped_out_of_order");
                    metrics.record_sample_dropped(DropReason::OutOfOrder);
                    return;
                }
            }

            if let SampleSource::Fallback(period) = source {
                if state.last_watch_emit.is_some_and(|at| at.elapsed() < period) {
                    metrics.record_sample_dropped(DropReason::WatchPreferred);
                    return;
                }
                if let Some(last) = state.last_emitted {
                    if !fix.differs_from(&last, self.inner.fallback_min_delta_deg) {
                        metrics.record_sample_dropped(DropReason::Duplicate);
                        return;
                    }
                }
            }

            let fix = fix.with_timestamp(taken_at);
            state.last_emitted = Some(fix);
            state.last_position = Some(fix);
            if source == SampleSource::Watch {
                state.last_watch_emit = Some(Instant::now());
            }
            metrics.record_sample_emitted(age_ms);
            fix
        };

        self.inner.locations.notify(&emitted);
    }

    fn report_error(&self, generation: u64, error: TrackerError) {
        if self.inner.state.lock().generation != generation {
            return;
        }
        self.inner.metrics.record_acquisition_error();
        warn!(error = %error, kind = error.kind(), "location_acquisition_failed");
        self.inner.errors.notify(&error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::simulated::ScriptedPlatform;

    struct Harness {
        platform: Arc<ScriptedPlatform>,
        metrics: Arc<Metrics>,
        core: SamplerCore,
        seen: Arc<Mutex<Vec<Location>>>,
        errors: Arc<Mutex<Vec<TrackerError>>>,
        _subs: (Subscription, Subscription),
    }

    fn harness() -> Harness {
        let platform = Arc::new(ScriptedPlatform::new());
        let metrics = Arc::new(Metrics::new());
        let core = SamplerCore::new(platform.clone(), metrics.clone(), 0.0001);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let e = errors.clone();
        let subs = (
            core.subscribe(Arc::new(move |fix: &Location| s.lock().push(*fix))),
            core.subscribe_errors(Arc::new(move |err: &TrackerError| e.lock().push(err.clone()))),
        );
        Harness { platform, metrics, core, seen, errors, _subs: subs }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_samples_are_emitted() {
        let h = harness();
        h.core.start(TrackingMode::Active);
        assert_eq!(h.platform.active_watches(), 1);

        h.platform.push(Location::new(1.0, 1.0));
        h.platform.push(Location::new(1.0, 1.001));
        settle().await;

        assert_eq!(h.seen.lock().len(), 2);
        assert_eq!(h.core.last_position().map(|l| l.lng), Some(1.001));
        assert_eq!(h.metrics.samples_emitted(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_and_out_of_order_samples_dropped() {
        let h = harness();
        h.core.start(TrackingMode::Precision);
        let now = epoch_ms();

        // Older than precision's 15 s max age
        h.platform.push(Location::new(1.0, 1.0).with_timestamp(now - 60_000));
        h.platform.push(Location::new(1.0, 1.0).with_timestamp(now));
        h.platform.push(Location::new(1.0, 1.1).with_timestamp(now - 1_000));
        settle().await;

        assert_eq!(h.seen.lock().len(), 1);
        assert_eq!(h.metrics.dropped(DropReason::Stale), 1);
        assert_eq!(h.metrics.dropped(DropReason::OutOfOrder), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_watch_and_gates_emission() {
        let h = harness();
        h.core.start(TrackingMode::Active);
        h.platform.push(Location::new(1.0, 1.0));
        h.core.stop();
        settle().await;

        assert!(h.seen.lock().is_empty());
        assert_eq!(h.platform.active_watches(), 0);
        assert_eq!(h.core.mode(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_watch() {
        let h = harness();
        h.core.start(TrackingMode::Minimal);
        h.core.start(TrackingMode::Precision);

        assert_eq!(h.platform.active_watches(), 1);
        let history = h.platform.watch_history();
        assert_eq!(history.len(), 2);
        assert!(!history[0].high_accuracy);
        assert!(history[1].high_accuracy);
        assert_eq!(history[1].max_age, Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_fills_gaps_only() {
        let h = harness();
        h.platform.set_position(Location::new(2.0, 2.0));
        h.core.start(TrackingMode::Active);

        // No watch samples: first poll at 30 s fills the gap
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(h.seen.lock().len(), 1);

        // Same position within the delta is not forwarded again
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.seen.lock().len(), 1);
        assert_eq!(h.metrics.dropped(DropReason::Duplicate), 1);

        // A fresh watch sample takes precedence over the next poll
        h.platform.push(Location::new(2.01, 2.0));
        settle().await;
        h.platform.set_position(Location::new(2.02, 2.0));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.seen.lock().len(), 2);
        assert_eq!(h.metrics.dropped(DropReason::WatchPreferred), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimal_mode_has_no_fallback_poll() {
        let h = harness();
        h.platform.set_position(Location::new(2.0, 2.0));
        h.core.start(TrackingMode::Minimal);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(h.seen.lock().is_empty());
        assert_eq!(h.platform.one_shot_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_reported_and_watch_continues() {
        let h = harness();
        h.core.start(TrackingMode::Active);

        h.platform.push_error(TrackerError::AcquisitionTimeout);
        h.platform.push(Location::new(1.0, 1.0));
        settle().await;

        assert_eq!(*h.errors.lock(), vec![TrackerError::AcquisitionTimeout]);
        assert_eq!(h.seen.lock().len(), 1);
        assert_eq!(h.metrics.acquisition_errors(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_once() {
        let h = harness();
        h.platform.set_position(Location::new(3.0, 3.0));

        // Not running: nothing requested
        h.core.sample_once();
        settle().await;
        assert_eq!(h.platform.one_shot_requests(), 0);

        h.core.start(TrackingMode::Minimal);
        h.core.sample_once();
        settle().await;
        assert_eq!(h.platform.one_shot_requests(), 1);
        assert_eq!(h.seen.lock().len(), 1);
    }
}
