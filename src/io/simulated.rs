//! In-process location platforms
//!
//! - `ScriptedPlatform` delivers exactly the fixes it is told to (`push`),
//!   used for JSONL replays and tests.
//! - `SimulatedPlatform` moves along a straight line toward a target at a
//!   fixed speed and streams fixes on every watch, used by the simulator.

use crate::domain::error::{Result, TrackerError};
use crate::domain::journey::epoch_ms;
use crate::domain::types::Location;
use crate::io::platform::{LocationPlatform, PermissionState, PositionOptions, PositionSink, WatchId};
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

fn stamp(location: Location) -> Location {
    match location.timestamp {
        Some(_) => location,
        None => location.with_timestamp(epoch_ms()),
    }
}

struct ScriptedState {
    permission: PermissionState,
    current: Option<Location>,
    next_fix_error: Option<TrackerError>,
    watches: FxHashMap<WatchId, (PositionOptions, PositionSink)>,
    watch_history: Vec<PositionOptions>,
    next_watch_id: u64,
    keep_awake: bool,
    one_shot_requests: u32,
}

/// Platform that only reports what the caller scripts
pub struct ScriptedPlatform {
    state: Mutex<ScriptedState>,
    background: bool,
}

impl ScriptedPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScriptedState {
                permission: PermissionState::Granted,
                current: None,
                next_fix_error: None,
                watches: FxHashMap::default(),
                watch_history: Vec::new(),
                next_watch_id: 1,
                keep_awake: false,
                one_shot_requests: 0,
            }),
            background: false,
        }
    }

    /// Advertise background capability
    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn set_permission(&self, permission: PermissionState) {
        self.state.lock().permission = permission;
    }

    /// Position returned by one-shot requests, without notifying watches
    pub fn set_position(&self, location: Location) {
        self.state.lock().current = Some(location);
    }

    /// Make the next one-shot request fail
    pub fn fail_next_fix(&self, error: TrackerError) {
        self.state.lock().next_fix_error = Some(error);
    }

    /// Deliver a fix to every active watch; returns how many watches got it
    pub fn push(&self, location: Location) -> usize {
        let mut state = self.state.lock();
        state.current = Some(location);
        let fix = stamp(location);
        state.watches.values().filter(|(_, sink)| sink.send(Ok(fix)).is_ok()).count()
    }

    /// Deliver an acquisition error to every active watch
    pub fn push_error(&self, error: TrackerError) -> usize {
        let state = self.state.lock();
        state.watches.values().filter(|(_, sink)| sink.send(Err(error.clone())).is_ok()).count()
    }

    pub fn active_watches(&self) -> usize {
        self.state.lock().watches.len()
    }

    /// Options of every watch ever started, in order
    pub fn watch_history(&self) -> Vec<PositionOptions> {
        self.state.lock().watch_history.clone()
    }

    pub fn keep_awake(&self) -> bool {
        self.state.lock().keep_awake
    }

    pub fn one_shot_requests(&self) -> u32 {
        self.state.lock().one_shot_requests
    }
}

impl Default for ScriptedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationPlatform for ScriptedPlatform {
    async fn request_permission(&self) -> PermissionState {
        self.state.lock().permission
    }

    async fn get_current_position(&self, _options: PositionOptions) -> Result<Location> {
        let mut state = self.state.lock();
        state.one_shot_requests += 1;
        if let Some(err) = state.next_fix_error.take() {
            return Err(err);
        }
        match state.current {
            Some(current) => Ok(Location { timestamp: Some(epoch_ms()), ..current }),
            None => Err(TrackerError::Acquisition("no fix available".to_string())),
        }
    }

    fn watch_position(&self, options: PositionOptions, sink: PositionSink) -> WatchId {
        let mut state = self.state.lock();
        let id = WatchId(state.next_watch_id);
        state.next_watch_id += 1;
        state.watches.insert(id, (options, sink));
        state.watch_history.push(options);
        id
    }

    fn clear_watch(&self, id: WatchId) {
        self.state.lock().watches.remove(&id);
    }

    fn supports_background(&self) -> bool {
        self.background
    }

    fn set_keep_awake(&self, enabled: bool) {
        self.state.lock().keep_awake = enabled;
    }
}

/// Straight-line movement at constant speed
#[derive(Debug, Clone, Copy)]
pub struct SimulatedRoute {
    pub origin: Location,
    pub target: Location,
    /// Ground speed in meters per second (already scaled)
    pub speed_mps: f64,
}

impl SimulatedRoute {
    /// Position after `elapsed` of travel; stops at the target
    pub fn position_at(&self, elapsed: Duration) -> Location {
        let total = crate::services::distance::distance(&self.origin, &self.target);
        let fraction = if total <= 0.0 {
            1.0
        } else {
            (self.speed_mps * elapsed.as_secs_f64() / total).min(1.0)
        };
        Location::new(
            self.origin.lat + (self.target.lat - self.origin.lat) * fraction,
            self.origin.lng + (self.target.lng - self.origin.lng) * fraction,
        )
        .with_accuracy(5.0)
        .with_timestamp(epoch_ms())
    }
}

/// `tokio::time::interval` rejects a zero period
const MIN_FIX_INTERVAL: Duration = Duration::from_millis(1);

/// Platform that moves along a `SimulatedRoute` from the moment it is created
pub struct SimulatedPlatform {
    route: SimulatedRoute,
    started: Instant,
    /// Delay between fixes on high-accuracy watches; low-accuracy watches
    /// report five times less often
    fix_interval: Duration,
    background: bool,
    watches: Mutex<FxHashMap<WatchId, JoinHandle<()>>>,
    next_watch_id: Mutex<u64>,
}

impl SimulatedPlatform {
    pub fn new(route: SimulatedRoute, fix_interval: Duration, background: bool) -> Self {
        Self {
            route,
            started: Instant::now(),
            fix_interval: fix_interval.max(MIN_FIX_INTERVAL),
            background,
            watches: Mutex::new(FxHashMap::default()),
            next_watch_id: Mutex::new(1),
        }
    }

    fn current(&self) -> Location {
        self.route.position_at(self.started.elapsed())
    }
}

#[async_trait]
impl LocationPlatform for SimulatedPlatform {
    async fn request_permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn get_current_position(&self, _options: PositionOptions) -> Result<Location> {
        Ok(self.current())
    }

    fn watch_position(&self, options: PositionOptions, sink: PositionSink) -> WatchId {
        let id = {
            let mut next = self.next_watch_id.lock();
            let id = WatchId(*next);
            *next += 1;
            id
        };

        let interval =
            if options.high_accuracy { self.fix_interval } else { self.fix_interval * 5 };
        let route = self.route;
        let started = self.started;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if sink.send(Ok(route.position_at(started.elapsed()))).is_err() {
                    break;
                }
            }
        });

        debug!(watch_id = %id, interval_ms = %interval.as_millis(), "simulated_watch_started");
        self.watches.lock().insert(id, handle);
        id
    }

    fn clear_watch(&self, id: WatchId) {
        if let Some(handle) = self.watches.lock().remove(&id) {
            handle.abort();
        }
    }

    fn supports_background(&self) -> bool {
        self.background
    }

    fn set_keep_awake(&self, enabled: bool) {
        info!(enabled = %enabled, "simulated_keep_awake");
    }
}
