//! Arrival alert simulator
//!
//! Drives one journey end to end against a simulated location platform:
//! either a straight-line route at a scaled transport speed, or a replay of
//! recorded fixes (JSONL, one `Location` per line). Alerts go to the log.
//!
//! Module structure:
//! - `domain/` - Journey, locations, errors
//! - `io/` - Platform, notifier, storage and place search interfaces
//! - `services/` - Controller, samplers, mode policy, alerts, persistence
//! - `infra/` - Config and metrics

use anyhow::Context;
use arrival_alert::domain::journey::Journey;
use arrival_alert::domain::types::{Destination, JourneyStatus, Location, TransportMode};
use arrival_alert::infra::{Config, Metrics};
use arrival_alert::io::places::{CatalogPlaceSearch, PlaceSearch, ThrottledPlaceSearch};
use arrival_alert::io::{
    FileStore, LocationPlatform, LogNotifier, ScriptedPlatform, SimulatedPlatform, SimulatedRoute,
};
use arrival_alert::services::distance::speed_kmh;
use arrival_alert::services::{ControllerHandle, JourneyController};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Track a simulated journey and log proximity alerts
#[derive(Parser, Debug)]
#[command(name = "arrival-alert", version, about)]
struct Args {
    /// Path to TOML configuration file (default: CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Place to travel to, searched in the configured places
    #[arg(short, long)]
    destination: Option<String>,

    /// Destination latitude (overrides --destination)
    #[arg(long, requires = "to_lng", allow_negative_numbers = true)]
    to_lat: Option<f64>,

    #[arg(long, requires = "to_lat", allow_negative_numbers = true)]
    to_lng: Option<f64>,

    /// Start latitude; defaults to 3 km south of the destination
    #[arg(long, requires = "from_lng", allow_negative_numbers = true)]
    from_lat: Option<f64>,

    #[arg(long, requires = "from_lat", allow_negative_numbers = true)]
    from_lng: Option<f64>,

    /// Transport mode (walk, bus, train, car); defaults to the preferred mode
    #[arg(short, long)]
    mode: Option<String>,

    /// Simulation speed multiplier
    #[arg(long, default_value_t = 10.0)]
    speed_factor: f64,

    /// Delay between simulated fixes in milliseconds
    #[arg(long, default_value_t = 1000)]
    fix_interval_ms: u64,

    /// Advertise background location capability
    #[arg(long)]
    background: bool,

    /// Replay recorded fixes from a JSONL file instead of simulating a route
    #[arg(long)]
    replay: Option<PathBuf>,
}

/// Meters of latitude per degree on the mean Earth sphere
const METERS_PER_DEGREE: f64 = 111_194.93;
const DEFAULT_START_OFFSET_M: f64 = 3000.0;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls verbosity, default INFO
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "arrival-alert starting");

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(&[]),
    };
    info!(
        config_file = %config.config_file(),
        approaching_m = %config.approaching_threshold_m(),
        final_m = %config.final_threshold_m(),
        arrival_m = %config.arrival_threshold_m(),
        store_dir = %config.store_dir(),
        places = %config.places().len(),
        "config_loaded"
    );

    let origin = match (args.from_lat, args.from_lng) {
        (Some(lat), Some(lng)) => Some(Location::new(lat, lng)),
        _ => None,
    };
    let destination = resolve_destination(&args, &config, origin).await?;
    let origin = origin.unwrap_or_else(|| {
        Location::new(
            destination.location.lat - DEFAULT_START_OFFSET_M / METERS_PER_DEGREE,
            destination.location.lng,
        )
    });
    let transport_mode = args.mode.as_deref().map(TransportMode::parse);

    // tokio intervals reject a zero period
    let fix_interval_ms = args.fix_interval_ms.max(1);
    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(FileStore::new(config.store_dir()));
    let platform: Arc<dyn LocationPlatform> = match &args.replay {
        Some(path) => replay_platform(path, origin, fix_interval_ms, args.background).await?,
        None => {
            let mode = transport_mode.unwrap_or(config.default_transport_mode());
            let route = SimulatedRoute {
                origin,
                target: destination.location,
                speed_mps: speed_kmh(mode) / 3.6 * args.speed_factor,
            };
            info!(
                mode = %mode,
                speed_mps = format!("{:.1}", route.speed_mps),
                "simulated_route"
            );
            Arc::new(SimulatedPlatform::new(
                route,
                Duration::from_millis(fix_interval_ms),
                args.background,
            ))
        }
    };

    let mut controller =
        JourneyController::new(config.clone(), platform, Arc::new(LogNotifier), store, metrics.clone());

    // Terminal snapshots end the run
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Journey>();
    let _done = controller.subscribe(move |snapshot: &Option<Journey>| {
        if let Some(journey) = snapshot.as_ref().filter(|j| j.status.is_terminal()) {
            let _ = done_tx.send(journey.clone());
        }
    });

    let restored = controller.restore().context("Failed to restore journey")?;
    let (handle, commands) = ControllerHandle::channel(16);
    let controller_task = tokio::spawn(async move {
        controller.run(commands).await;
        controller
    });

    match restored {
        Some(journey) => {
            info!(jid = %journey.id, status = %journey.status, dest = %journey.destination.id, "journey_restored");
            if journey.status == JourneyStatus::Paused {
                handle.resume().await?;
            }
        }
        None => {
            let journey = handle.start(destination, transport_mode).await?;
            info!(jid = %journey.id, "journey_started_from_cli");
        }
    }

    // Periodic metrics report
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    tokio::select! {
        finished = done_rx.recv() => {
            if let Some(journey) = finished {
                info!(
                    jid = %journey.id,
                    status = %journey.status,
                    alerts = %journey.alerts.len(),
                    duration_ms = %journey.duration_ms(),
                    "journey_finished"
                );
            }
        }
        _ = tokio::signal::ctrl_c() => {
            // Left in flight on purpose: the next run restores it
            info!("interrupted");
        }
    }

    reporter.abort();
    drop(handle);
    let controller = controller_task.await.context("Controller task failed")?;
    let stats = controller.persistence().stats();
    info!(
        total_journeys = %stats.total_journeys,
        arrived_journeys = %stats.arrived_journeys,
        total_distance_m = format!("{:.0}", stats.total_distance_m),
        "travel_stats"
    );
    metrics.report().log();
    info!("arrival-alert stopped");
    Ok(())
}

async fn resolve_destination(
    args: &Args,
    config: &Config,
    near: Option<Location>,
) -> anyhow::Result<Destination> {
    if let (Some(lat), Some(lng)) = (args.to_lat, args.to_lng) {
        let name = args.destination.clone().unwrap_or_else(|| format!("{lat:.5},{lng:.5}"));
        return Ok(Destination::new("custom", &name, "", Location::new(lat, lng)));
    }

    let query = args.destination.as_deref().unwrap_or_default();
    let search = ThrottledPlaceSearch::new(CatalogPlaceSearch::new(config.places().to_vec()));
    let matches = search.search_places(query, near).await?;
    info!(query = %query, matches = %matches.len(), "place_search");
    matches
        .into_iter()
        .next()
        .with_context(|| format!("No configured place matches '{query}' (or pass --to-lat/--to-lng)"))
}

/// Scripted platform fed from a JSONL recording, one fix per interval
async fn replay_platform(
    path: &PathBuf,
    origin: Location,
    interval_ms: u64,
    background: bool,
) -> anyhow::Result<Arc<dyn LocationPlatform>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read replay file {}", path.display()))?;

    let mut fixes = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Location>(line) {
            // Restamped on delivery
            Ok(fix) => fixes.push(Location { timestamp: None, ..fix }),
            Err(e) => warn!(line = %(line_no + 1), error = %e, "replay_line_skipped"),
        }
    }
    info!(path = %path.display(), fixes = %fixes.len(), "replay_loaded");

    let platform = Arc::new(ScriptedPlatform::new().with_background(background));
    platform.set_position(fixes.first().copied().unwrap_or(origin));

    let feeder = platform.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        interval.tick().await;
        for fix in fixes {
            interval.tick().await;
            feeder.push(fix);
        }
        info!("replay_exhausted");
    });

    Ok(platform)
}
