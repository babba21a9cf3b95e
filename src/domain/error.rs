//! Error types for journey tracking
//!
//! Nothing in here is fatal to the process. Callers decide whether an error
//! aborts the operation (permission refusal on start) or is only reported
//! (acquisition, persistence, notifier failures).

use crate::domain::types::JourneyStatus;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackerError {
    /// Location or notification permission was refused
    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),

    /// Platform did not produce a position within the mode's timeout
    #[error("location acquisition timed out")]
    AcquisitionTimeout,

    #[error("location acquisition failed: {0}")]
    Acquisition(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("notification delivery failed: {0}")]
    Notifier(String),

    #[error("no active journey")]
    NoActiveJourney,

    #[error("a journey is already in progress")]
    JourneyAlreadyActive,

    #[error("invalid journey transition {from} -> {to}")]
    InvalidTransition { from: JourneyStatus, to: JourneyStatus },

    /// The controller task is gone (command channel closed)
    #[error("journey controller is not running")]
    ControllerClosed,
}

impl TrackerError {
    /// Short machine-readable label used in log fields and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerError::PermissionDenied(_) => "permission_denied",
            TrackerError::AcquisitionTimeout => "acquisition_timeout",
            TrackerError::Acquisition(_) => "acquisition_error",
            TrackerError::Persistence(_) => "persistence_error",
            TrackerError::Notifier(_) => "notifier_error",
            TrackerError::NoActiveJourney => "no_active_journey",
            TrackerError::JourneyAlreadyActive => "journey_already_active",
            TrackerError::InvalidTransition { .. } => "invalid_transition",
            TrackerError::ControllerClosed => "controller_closed",
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
