//! Journey control and event orchestration
//!
//! The JourneyController owns the single current journey and coordinates:
//! - Sampling (one sampler, restarted on mode changes)
//! - Mode policy (periodic reevaluation unless the sampler steers itself)
//! - Proximity alerts and notification dispatch
//! - Write-through persistence of every journey mutation
//!
//! Samples, sampler errors and timer ticks all arrive on one ordered event
//! channel. `run` multiplexes that channel with the command channel fed by
//! `ControllerHandle`s.

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::error::{Result, TrackerError};
use crate::domain::journey::Journey;
use crate::domain::types::{Destination, Location, TrackingMode, TransportMode};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::notifier::Notifier;
use crate::io::platform::LocationPlatform;
use crate::io::store::KeyValueStore;
use crate::services::alerts::{AlertStateMachine, AlertThresholds};
use crate::services::mode_selector::TrackingModeSelector;
use crate::services::observers::{ObserverSet, Subscription};
use crate::services::persistence::{Persistence, Preferences};
use crate::services::sampler::{build_sampler, LocationSampler};
use crate::services::scheduler::ScheduledTask;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

/// Internal events, produced by sampler callbacks and timers
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Sample(Location),
    SamplerError(TrackerError),
    /// Time to rerun the mode policy
    Reevaluate,
    /// Grace delay after a terminal status elapsed for this journey id
    ClearActive(String),
}

/// Requests accepted by `JourneyController::run`
#[derive(Debug)]
pub enum Command {
    Start {
        destination: Destination,
        /// `None` uses the preferred transport mode
        transport_mode: Option<TransportMode>,
        reply: oneshot::Sender<Result<Journey>>,
    },
    Stop { reply: oneshot::Sender<Result<Journey>> },
    Pause { reply: oneshot::Sender<Result<Journey>> },
    Resume { reply: oneshot::Sender<Result<Journey>> },
    EmergencyStop { reply: oneshot::Sender<Result<Journey>> },
    Current { reply: oneshot::Sender<Option<Journey>> },
}

/// Owner of the current journey
pub struct JourneyController {
    pub(crate) config: Config,
    pub(crate) platform: Arc<dyn LocationPlatform>,
    pub(crate) sampler: Box<dyn LocationSampler>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) persistence: Persistence,
    pub(crate) selector: TrackingModeSelector,
    pub(crate) alerts: AlertStateMachine,
    pub(crate) metrics: Arc<Metrics>,
    /// Preferences captured when the journey started or was restored
    pub(crate) preferences: Preferences,
    /// The single current journey; terminal journeys linger for the grace delay
    pub(crate) journey: Option<Journey>,
    /// Highest mode forced by an alert; reevaluation never goes below it
    pub(crate) mode_floor: Option<TrackingMode>,
    pub(crate) reevaluation: Option<ScheduledTask>,
    pub(crate) clear_timer: Option<ScheduledTask>,
    pub(crate) observers: ObserverSet<Option<Journey>>,
    pub(crate) events_tx: mpsc::UnboundedSender<ControllerEvent>,
    pub(crate) events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    _sampler_subscriptions: (Subscription, Subscription),
}

impl JourneyController {
    /// Create a controller, choosing the sampler variant the platform supports
    pub fn new(
        config: Config,
        platform: Arc<dyn LocationPlatform>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn KeyValueStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let sampler = build_sampler(platform.clone(), &config, metrics.clone());
        Self::with_sampler(config, platform, sampler, notifier, store, metrics)
    }

    /// Create a controller around an already built sampler
    pub fn with_sampler(
        config: Config,
        platform: Arc<dyn LocationPlatform>,
        sampler: Box<dyn LocationSampler>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn KeyValueStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let tx = events_tx.clone();
        let samples = sampler.subscribe(Arc::new(move |fix: &Location| {
            let _ = tx.send(ControllerEvent::Sample(*fix));
        }));
        let tx = events_tx.clone();
        let errors = sampler.subscribe_errors(Arc::new(move |err: &TrackerError| {
            let _ = tx.send(ControllerEvent::SamplerError(err.clone()));
        }));

        let default_preferences = Preferences {
            default_transport_mode: config.default_transport_mode(),
            ..Preferences::default()
        };
        let persistence =
            Persistence::new(store, metrics.clone()).with_default_preferences(default_preferences);
        let preferences = persistence.preferences();

        Self {
            selector: TrackingModeSelector::new(config.max_recheck()),
            alerts: AlertStateMachine::new(AlertThresholds::from_config(&config)),
            config,
            platform,
            sampler,
            notifier,
            persistence,
            metrics,
            preferences,
            journey: None,
            mode_floor: None,
            reevaluation: None,
            clear_timer: None,
            observers: ObserverSet::new(),
            events_tx,
            events_rx,
            _sampler_subscriptions: (samples, errors),
        }
    }

    /// Register an observer of journey snapshots; `None` means the active
    /// journey was cleared
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&Option<Journey>) + Send + Sync + 'static,
    {
        self.observers.subscribe(observer)
    }

    /// Snapshot of the current journey
    pub fn current(&self) -> Option<Journey> {
        self.journey.clone()
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    pub fn sampler(&self) -> &dyn LocationSampler {
        self.sampler.as_ref()
    }

    /// Handle every event already queued, without waiting for more
    pub async fn process_pending(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event).await;
        }
    }

    /// Run the controller, consuming commands until every handle is dropped
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Command>) {
        info!("controller_running");
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(c) => self.handle_command(c).await,
                        None => break, // All handles dropped
                    }
                }
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event).await;
                }
            }
        }
        self.shutdown();
    }

    async fn handle_command(&mut self, command: Command) {
        // A dropped reply receiver only means the caller stopped waiting
        match command {
            Command::Start { destination, transport_mode, reply } => {
                let _ = reply.send(self.start(destination, transport_mode).await);
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.stop().await);
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            Command::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
            Command::EmergencyStop { reply } => {
                let _ = reply.send(self.emergency_stop().await);
            }
            Command::Current { reply } => {
                let _ = reply.send(self.current());
            }
        }
    }

    /// Dispatch a single internal event
    pub async fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Sample(fix) => self.handle_sample(fix).await,
            ControllerEvent::SamplerError(err) => self.handle_sampler_error(&err),
            ControllerEvent::Reevaluate => self.handle_reevaluate(),
            ControllerEvent::ClearActive(id) => self.handle_clear_active(&id),
        }
    }

    /// Stop sampling and timers; an in-flight journey stays persisted for
    /// `restore`
    fn shutdown(&mut self) {
        self.cancel_timers();
        self.sampler.stop();
        if let Some(pending) = self.clear_timer.take() {
            pending.cancel();
        }
        info!(
            in_flight = %self.journey.as_ref().is_some_and(|j| j.status.is_in_flight()),
            "controller_stopped"
        );
    }
}

/// Cloneable front end sending commands to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Command>,
}

impl ControllerHandle {
    /// Create a handle and the receiver to pass to `JourneyController::run`
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| TrackerError::ControllerClosed)?;
        rx.await.map_err(|_| TrackerError::ControllerClosed)
    }

    pub async fn start(
        &self,
        destination: Destination,
        transport_mode: Option<TransportMode>,
    ) -> Result<Journey> {
        self.request(|reply| Command::Start { destination, transport_mode, reply }).await?
    }

    pub async fn stop(&self) -> Result<Journey> {
        self.request(|reply| Command::Stop { reply }).await?
    }

    pub async fn pause(&self) -> Result<Journey> {
        self.request(|reply| Command::Pause { reply }).await?
    }

    pub async fn resume(&self) -> Result<Journey> {
        self.request(|reply| Command::Resume { reply }).await?
    }

    pub async fn emergency_stop(&self) -> Result<Journey> {
        self.request(|reply| Command::EmergencyStop { reply }).await?
    }

    pub async fn current(&self) -> Result<Option<Journey>> {
        self.request(|reply| Command::Current { reply }).await
    }
}
