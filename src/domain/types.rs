//! Shared types for journey tracking

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single position sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    /// Horizontal accuracy radius in meters, when the platform reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Epoch milliseconds at which the fix was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Location {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng, accuracy: None, timestamp: None }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// True if either coordinate differs from `other` by more than `epsilon_deg`
    #[inline]
    pub fn differs_from(&self, other: &Location, epsilon_deg: f64) -> bool {
        (self.lat - other.lat).abs() > epsilon_deg || (self.lng - other.lng).abs() > epsilon_deg
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lng)
    }
}

/// A place the user can travel to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub id: String,
    pub name: String,
    pub address: String,
    pub location: Location,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<u64>,
}

impl Destination {
    pub fn new(id: &str, name: &str, address: &str, location: Location) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            address: address.to_string(),
            location,
            is_favorite: false,
            last_used: None,
        }
    }
}

/// How the user is travelling; drives the constant-speed ETA heuristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Walk,
    Bus,
    Train,
    Car,
    #[serde(other)]
    Unknown,
}

impl TransportMode {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Walk => "walk",
            TransportMode::Bus => "bus",
            TransportMode::Train => "train",
            TransportMode::Car => "car",
            TransportMode::Unknown => "unknown",
        }
    }

    /// Parse a transport mode name; anything unrecognised becomes `Unknown`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "walk" | "walking" => TransportMode::Walk,
            "bus" => TransportMode::Bus,
            "train" => TransportMode::Train,
            "car" => TransportMode::Car,
            _ => TransportMode::Unknown,
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location sampling profile, ordered by power use
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    Minimal,
    Active,
    Precision,
}

impl TrackingMode {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingMode::Minimal => "minimal",
            TrackingMode::Active => "active",
            TrackingMode::Precision => "precision",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Some(TrackingMode::Minimal),
            "active" => Some(TrackingMode::Active),
            "precision" => Some(TrackingMode::Precision),
            _ => None,
        }
    }
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Journey lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JourneyStatus {
    Idle,
    Tracking,
    Paused,
    Arrived,
    Stopped,
}

impl JourneyStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            JourneyStatus::Idle => "idle",
            JourneyStatus::Tracking => "tracking",
            JourneyStatus::Paused => "paused",
            JourneyStatus::Arrived => "arrived",
            JourneyStatus::Stopped => "stopped",
        }
    }

    /// Arrived and stopped journeys never change again
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, JourneyStatus::Arrived | JourneyStatus::Stopped)
    }

    /// Tracking or paused: the journey still holds the single active slot
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JourneyStatus::Tracking | JourneyStatus::Paused)
    }

    /// Forward-only, except for the pause <-> resume pair
    pub fn can_transition_to(&self, next: JourneyStatus) -> bool {
        use JourneyStatus::*;
        matches!(
            (self, next),
            (Idle, Tracking)
                | (Tracking, Paused)
                | (Tracking, Arrived)
                | (Tracking, Stopped)
                | (Paused, Tracking)
                | (Paused, Stopped)
        )
    }
}

impl fmt::Display for JourneyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proximity milestones plus the emergency override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    FirstWarning,
    Approaching,
    FinalWarning,
    Arrived,
    Emergency,
}

impl AlertType {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::FirstWarning => "first_warning",
            AlertType::Approaching => "approaching",
            AlertType::FinalWarning => "final_warning",
            AlertType::Arrived => "arrived",
            AlertType::Emergency => "emergency",
        }
    }

    /// Bit used by the alert state machine's fired set
    #[inline]
    pub(crate) fn bit(&self) -> u8 {
        match self {
            AlertType::FirstWarning => 1 << 0,
            AlertType::Approaching => 1 << 1,
            AlertType::FinalWarning => 1 << 2,
            AlertType::Arrived => 1 << 3,
            AlertType::Emergency => 1 << 4,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
