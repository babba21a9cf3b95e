//! Journey data model for tracking a trip toward one destination

use crate::domain::error::{Result, TrackerError};
use crate::domain::types::{AlertType, Destination, JourneyStatus, Location, TrackingMode, TransportMode};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// A fired proximity or emergency alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub message: String,
    pub timestamp: u64, // epoch ms
    pub distance: f64,  // meters to destination when fired
}

impl Alert {
    pub fn new(alert_type: AlertType, message: String, distance: f64) -> Self {
        Self { id: new_uuid_v7(), alert_type, message, timestamp: epoch_ms(), distance }
    }
}

/// Complete record of one trip. Owned and mutated only by the controller;
/// everyone else sees clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    pub id: String,
    pub destination: Destination,
    pub start_time: u64,       // epoch ms
    pub end_time: Option<u64>, // epoch ms
    pub transport_mode: TransportMode,
    pub status: JourneyStatus,
    pub start_location: Location,
    pub current_location: Location,
    pub alerts: SmallVec<[Alert; 5]>,
    /// Meters to destination from the latest sample
    pub distance: Option<f64>,
    /// ETA in ms from the latest sample
    #[serde(default)]
    pub eta_ms: Option<u64>,
    /// Mode in effect when the snapshot was taken; resume restarts here
    pub tracking_mode: TrackingMode,
}

impl Journey {
    /// Create a new journey in `Tracking` state.
    ///
    /// # Example
    ///
    /// ```
    /// use arrival_alert::domain::journey::Journey;
    /// use arrival_alert::domain::types::{Destination, JourneyStatus, Location, TrackingMode, TransportMode};
    ///
    /// let dest = Destination::new("d1", "Central", "Main St 1", Location::new(0.0, 0.0));
    /// let journey = Journey::new(dest, TransportMode::Walk, Location::new(0.0, 0.01), TrackingMode::Active);
    /// assert_eq!(journey.status, JourneyStatus::Tracking);
    /// assert!(journey.alerts.is_empty());
    /// ```
    pub fn new(
        destination: Destination,
        transport_mode: TransportMode,
        start_location: Location,
        tracking_mode: TrackingMode,
    ) -> Self {
        Self {
            id: new_uuid_v7(),
            destination,
            start_time: epoch_ms(),
            end_time: None,
            transport_mode,
            status: JourneyStatus::Tracking,
            start_location,
            current_location: start_location,
            alerts: SmallVec::new(),
            distance: None,
            eta_ms: None,
            tracking_mode,
        }
    }

    /// Move to `next` if the lifecycle allows it
    pub fn transition(&mut self, next: JourneyStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(TrackerError::InvalidTransition { from: self.status, to: next });
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(epoch_ms());
        }
        Ok(())
    }

    pub fn has_alert(&self, alert_type: AlertType) -> bool {
        self.alerts.iter().any(|a| a.alert_type == alert_type)
    }

    /// Append an alert unless one of the same type was already recorded.
    /// Returns false when the alert was a duplicate.
    pub fn record_alert(&mut self, alert: Alert) -> bool {
        if self.has_alert(alert.alert_type) {
            return false;
        }
        self.alerts.push(alert);
        true
    }

    /// Wall-clock duration so far (or total, once ended)
    pub fn duration_ms(&self) -> u64 {
        self.end_time.unwrap_or_else(epoch_ms).saturating_sub(self.start_time)
    }

    /// Serialize to a JSON snapshot
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
