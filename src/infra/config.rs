//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::types::{Destination, Location, TransportMode};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_approaching_threshold_m")]
    pub approaching_threshold_m: f64,
    #[serde(default = "default_final_threshold_m")]
    pub final_threshold_m: f64,
    #[serde(default = "default_arrival_threshold_m")]
    pub arrival_threshold_m: f64,
    /// ETA at or below which the first warning fires
    #[serde(default = "default_first_warning_eta_secs")]
    pub first_warning_eta_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            approaching_threshold_m: default_approaching_threshold_m(),
            final_threshold_m: default_final_threshold_m(),
            arrival_threshold_m: default_arrival_threshold_m(),
            first_warning_eta_secs: default_first_warning_eta_secs(),
        }
    }
}

fn default_approaching_threshold_m() -> f64 {
    1000.0
}

fn default_final_threshold_m() -> f64 {
    200.0
}

fn default_arrival_threshold_m() -> f64 {
    50.0
}

fn default_first_warning_eta_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Use the background sampler when the platform supports it
    #[serde(default = "default_prefer_background")]
    pub prefer_background: bool,
    /// Minimum lat/lng delta (degrees) for a fallback poll sample to be forwarded
    #[serde(default = "default_fallback_min_delta_deg")]
    pub fallback_min_delta_deg: f64,
    /// Upper bound on the minimal-mode recheck interval
    #[serde(default = "default_max_recheck_secs")]
    pub max_recheck_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            prefer_background: default_prefer_background(),
            fallback_min_delta_deg: default_fallback_min_delta_deg(),
            max_recheck_secs: default_max_recheck_secs(),
        }
    }
}

fn default_prefer_background() -> bool {
    true
}

fn default_fallback_min_delta_deg() -> f64 {
    0.0001
}

fn default_max_recheck_secs() -> u64 {
    30 * 60
}

#[derive(Debug, Clone, Deserialize)]
pub struct JourneyConfig {
    /// Delay before an arrived/stopped journey is cleared from the active slot
    #[serde(default = "default_clear_grace_ms")]
    pub clear_grace_ms: u64,
    #[serde(default = "default_transport_mode")]
    pub default_transport_mode: String,
}

impl Default for JourneyConfig {
    fn default() -> Self {
        Self {
            clear_grace_ms: default_clear_grace_ms(),
            default_transport_mode: default_transport_mode(),
        }
    }
}

fn default_clear_grace_ms() -> u64 {
    3000
}

fn default_transport_mode() -> String {
    "bus".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one JSON file per persisted record
    #[serde(default = "default_store_dir")]
    pub dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { dir: default_store_dir() }
    }
}

fn default_store_dir() -> String {
    "data".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    60
}

/// A named place available to the catalog search
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    pub lat: f64,
    pub lng: f64,
}

impl PlaceConfig {
    pub fn to_destination(&self) -> Destination {
        Destination::new(&self.id, &self.name, &self.address, Location::new(self.lat, self.lng))
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub journey: JourneyConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub places: Vec<PlaceConfig>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    approaching_threshold_m: f64,
    final_threshold_m: f64,
    arrival_threshold_m: f64,
    first_warning_eta_secs: u64,
    prefer_background: bool,
    fallback_min_delta_deg: f64,
    max_recheck_secs: u64,
    clear_grace_ms: u64,
    default_transport_mode: TransportMode,
    store_dir: String,
    metrics_interval_secs: u64,
    places: Vec<Destination>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            approaching_threshold_m: toml_config.alerts.approaching_threshold_m,
            final_threshold_m: toml_config.alerts.final_threshold_m,
            arrival_threshold_m: toml_config.alerts.arrival_threshold_m,
            first_warning_eta_secs: toml_config.alerts.first_warning_eta_secs,
            prefer_background: toml_config.tracking.prefer_background,
            fallback_min_delta_deg: toml_config.tracking.fallback_min_delta_deg,
            max_recheck_secs: toml_config.tracking.max_recheck_secs,
            clear_grace_ms: toml_config.journey.clear_grace_ms,
            default_transport_mode: TransportMode::parse(&toml_config.journey.default_transport_mode),
            store_dir: toml_config.store.dir,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            places: toml_config.places.iter().map(PlaceConfig::to_destination).collect(),
            config_file: config_file.to_string(),
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, &path.display().to_string());
        config.validate().with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Thresholds must nest: arrival < final < approaching
    fn validate(&self) -> anyhow::Result<()> {
        if !(self.arrival_threshold_m < self.final_threshold_m
            && self.final_threshold_m < self.approaching_threshold_m)
        {
            anyhow::bail!(
                "alert thresholds must satisfy arrival < final < approaching (got {} / {} / {})",
                self.arrival_threshold_m,
                self.final_threshold_m,
                self.approaching_threshold_m
            );
        }
        if self.fallback_min_delta_deg <= 0.0 {
            anyhow::bail!("tracking.fallback_min_delta_deg must be positive");
        }
        Ok(())
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        let config_path = Self::resolve_config_path(args);
        Self::load_from_path(&config_path)
    }

    /// Load from an explicit path, falling back to defaults on any error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn approaching_threshold_m(&self) -> f64 {
        self.approaching_threshold_m
    }

    pub fn final_threshold_m(&self) -> f64 {
        self.final_threshold_m
    }

    pub fn arrival_threshold_m(&self) -> f64 {
        self.arrival_threshold_m
    }

    pub fn first_warning_eta(&self) -> Duration {
        Duration::from_secs(self.first_warning_eta_secs)
    }

    pub fn prefer_background(&self) -> bool {
        self.prefer_background
    }

    pub fn fallback_min_delta_deg(&self) -> f64 {
        self.fallback_min_delta_deg
    }

    pub fn max_recheck(&self) -> Duration {
        Duration::from_secs(self.max_recheck_secs)
    }

    pub fn clear_grace(&self) -> Duration {
        Duration::from_millis(self.clear_grace_ms)
    }

    pub fn default_transport_mode(&self) -> TransportMode {
        self.default_transport_mode
    }

    pub fn store_dir(&self) -> &str {
        &self.store_dir
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn places(&self) -> &[Destination] {
        &self.places
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to override the clear grace delay
    pub fn with_clear_grace_ms(mut self, ms: u64) -> Self {
        self.clear_grace_ms = ms;
        self
    }

    /// Builder method to choose the sampler variant preference
    pub fn with_prefer_background(mut self, prefer: bool) -> Self {
        self.prefer_background = prefer;
        self
    }
}
