//! Domain models - core journey types
//!
//! This module contains the canonical data types used throughout the system:
//! - `Journey` - the single in-flight trip toward a destination
//! - `Alert` - a fired proximity or emergency milestone
//! - `Location`, `Destination` - position samples and travel targets
//! - `TrackingMode`, `JourneyStatus`, `AlertType`, `TransportMode` - enums
//! - `TrackerError` - the crate's error type

pub mod error;
pub mod journey;
pub mod types;

pub use error::{Result, TrackerError};
pub use journey::{Alert, Journey};
pub use types::{AlertType, Destination, JourneyStatus, Location, TrackingMode, TransportMode};
