//! Persisted user data
//!
//! Typed records on top of a `KeyValueStore`:
//! - `preferences` - user-adjustable settings
//! - `destinations` - recent places, most recent first, capped at 50
//! - `journey_history` - finished journeys, most recent first, capped at 100
//! - `travel_stats` - totals plus the last 12 ISO weeks and 12 months
//! - `current_journey` - snapshot of the in-flight journey, or null
//!
//! Failures never propagate: reads fall back to defaults and writes report
//! `false`, both logged and counted.

use crate::domain::journey::{epoch_ms, Journey};
use crate::domain::types::{Destination, JourneyStatus, TransportMode};
use crate::infra::metrics::Metrics;
use crate::io::store::KeyValueStore;
use crate::services::distance::distance;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const PREFERENCES_KEY: &str = "preferences";
pub const DESTINATIONS_KEY: &str = "destinations";
pub const HISTORY_KEY: &str = "journey_history";
pub const STATS_KEY: &str = "travel_stats";
pub const CURRENT_JOURNEY_KEY: &str = "current_journey";

pub const MAX_DESTINATIONS: usize = 50;
pub const MAX_HISTORY: usize = 100;
pub const MAX_PERIODS: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub default_transport_mode: TransportMode,
    /// Overrides `alerts.approaching_threshold_m` when set
    pub approaching_threshold_m: Option<f64>,
    /// Overrides `alerts.final_threshold_m` when set
    pub final_threshold_m: Option<f64>,
    pub notifications_enabled: bool,
    pub sound_enabled: bool,
    pub vibration_enabled: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            default_transport_mode: TransportMode::Bus,
            approaching_threshold_m: None,
            final_threshold_m: None,
            notifications_enabled: true,
            sound_enabled: true,
            vibration_enabled: true,
        }
    }
}

/// Aggregate for one ISO week ("2026-W42") or month ("2026-10")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodStats {
    pub key: String,
    pub journeys: u32,
    pub distance_m: f64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TravelStats {
    pub total_journeys: u32,
    pub arrived_journeys: u32,
    pub total_distance_m: f64,
    pub total_duration_ms: u64,
    /// Most recent first
    pub weekly: Vec<PeriodStats>,
    /// Most recent first
    pub monthly: Vec<PeriodStats>,
}

fn week_key(at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

fn month_key(at: DateTime<Utc>) -> String {
    format!("{}-{:02}", at.year(), at.month())
}

fn fold_period(periods: &mut Vec<PeriodStats>, key: String, distance_m: f64, duration_ms: u64) {
    match periods.iter_mut().find(|p| p.key == key) {
        Some(period) => {
            period.journeys += 1;
            period.distance_m += distance_m;
            period.duration_ms += duration_ms;
        }
        None => {
            periods.push(PeriodStats { key, journeys: 1, distance_m, duration_ms });
            // Same-format keys sort chronologically
            periods.sort_by(|a, b| b.key.cmp(&a.key));
            periods.truncate(MAX_PERIODS);
        }
    }
}

impl TravelStats {
    /// Add a finished journey to the totals and its week/month buckets
    pub fn fold(&mut self, journey: &Journey) {
        let travelled = distance(&journey.start_location, &journey.current_location);
        let duration_ms = journey.duration_ms();
        let ended_at = journey.end_time.unwrap_or(journey.start_time);
        let at = Utc
            .timestamp_millis_opt(ended_at as i64)
            .single()
            .unwrap_or_else(Utc::now);

        self.total_journeys += 1;
        if journey.status == JourneyStatus::Arrived {
            self.arrived_journeys += 1;
        }
        self.total_distance_m += travelled;
        self.total_duration_ms += duration_ms;
        fold_period(&mut self.weekly, week_key(at), travelled, duration_ms);
        fold_period(&mut self.monthly, month_key(at), travelled, duration_ms);
    }
}

pub struct Persistence {
    store: Arc<dyn KeyValueStore>,
    metrics: Arc<Metrics>,
    /// Returned while no preferences are stored
    default_preferences: Preferences,
}

impl Persistence {
    pub fn new(store: Arc<dyn KeyValueStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics, default_preferences: Preferences::default() }
    }

    pub fn with_default_preferences(mut self, preferences: Preferences) -> Self {
        self.default_preferences = preferences;
        self
    }

    fn load_or<T: DeserializeOwned>(&self, key: &str, fallback: impl FnOnce() -> T) -> T {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return fallback(),
            Err(e) => {
                self.metrics.record_persistence_failure();
                warn!(key = %key, error = %e, "persistence_read_failed");
                return fallback();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                self.metrics.record_persistence_failure();
                warn!(key = %key, error = %e, "persistence_record_corrupt");
                fallback()
            }
        }
    }

    fn load<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.load_or(key, T::default)
    }

    /// Returns true if the record was written
    fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                self.metrics.record_persistence_failure();
                error!(key = %key, error = %e, "persistence_encode_failed");
                return false;
            }
        };
        match self.store.set(key, &json) {
            Ok(()) => {
                debug!(key = %key, bytes = %json.len(), "persistence_saved");
                true
            }
            Err(e) => {
                self.metrics.record_persistence_failure();
                error!(key = %key, error = %e, "persistence_write_failed");
                false
            }
        }
    }

    pub fn preferences(&self) -> Preferences {
        self.load_or(PREFERENCES_KEY, || self.default_preferences.clone())
    }

    pub fn save_preferences(&self, preferences: &Preferences) -> bool {
        self.save(PREFERENCES_KEY, preferences)
    }

    /// Recent destinations, most recent first
    pub fn destinations(&self) -> Vec<Destination> {
        self.load(DESTINATIONS_KEY)
    }

    /// Move `destination` to the front of the recents, keeping its favourite
    /// flag. When over capacity the oldest non-favourite is dropped.
    pub fn remember_destination(&self, destination: &Destination) -> bool {
        let mut recents = self.destinations();
        let was_favorite = recents
            .iter()
            .position(|d| d.id == destination.id)
            .map(|i| recents.remove(i).is_favorite)
            .unwrap_or(false);

        let mut entry = destination.clone();
        entry.is_favorite = entry.is_favorite || was_favorite;
        entry.last_used = Some(epoch_ms());
        recents.insert(0, entry);

        while recents.len() > MAX_DESTINATIONS {
            match recents.iter().rposition(|d| !d.is_favorite) {
                Some(i) => {
                    recents.remove(i);
                }
                None => {
                    recents.pop();
                }
            }
        }
        self.save(DESTINATIONS_KEY, &recents)
    }

    /// Returns false if the destination is unknown or the write failed
    pub fn set_favorite(&self, id: &str, favorite: bool) -> bool {
        let mut recents = self.destinations();
        let Some(entry) = recents.iter_mut().find(|d| d.id == id) else {
            return false;
        };
        entry.is_favorite = favorite;
        self.save(DESTINATIONS_KEY, &recents)
    }

    /// Finished journeys, most recent first
    pub fn history(&self) -> Vec<Journey> {
        self.load(HISTORY_KEY)
    }

    pub fn stats(&self) -> TravelStats {
        self.load(STATS_KEY)
    }

    /// Append a finished journey to history and fold it into the stats.
    /// Recording the same journey twice is a no-op.
    pub fn record_journey(&self, journey: &Journey) -> bool {
        let mut history = self.history();
        if history.iter().any(|j| j.id == journey.id) {
            debug!(jid = %journey.id, "journey_already_recorded");
            return true;
        }
        history.insert(0, journey.clone());
        history.truncate(MAX_HISTORY);
        if !self.save(HISTORY_KEY, &history) {
            return false;
        }

        let mut stats = self.stats();
        stats.fold(journey);
        let saved = self.save(STATS_KEY, &stats);
        info!(
            jid = %journey.id,
            status = %journey.status,
            duration_ms = %journey.duration_ms(),
            history_len = %history.len(),
            "journey_recorded"
        );
        saved
    }

    pub fn current_journey(&self) -> Option<Journey> {
        self.load(CURRENT_JOURNEY_KEY)
    }

    /// Write-through snapshot of the in-flight journey; `None` clears it
    pub fn save_current_journey(&self, journey: Option<&Journey>) -> bool {
        self.save(CURRENT_JOURNEY_KEY, &journey)
    }
}
