//! Platform location and permission primitives
//!
//! The core never talks to a GPS directly. A `LocationPlatform` provides
//! permission prompts, one-shot fixes and continuous watches; the samplers
//! build everything else on top of it.

use crate::domain::error::{Result, TrackerError};
use crate::domain::types::Location;
use crate::services::mode_selector::ModeProfile;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Options passed to position requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub max_age: Duration,
}

impl From<ModeProfile> for PositionOptions {
    fn from(profile: ModeProfile) -> Self {
        Self { high_accuracy: profile.high_accuracy, timeout: profile.timeout, max_age: profile.max_age }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
}

/// Identifier of a continuous watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct WatchId(pub u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a watch delivers fixes and acquisition failures
pub type PositionSink = mpsc::UnboundedSender<Result<Location>>;

#[async_trait]
pub trait LocationPlatform: Send + Sync {
    async fn request_permission(&self) -> PermissionState;

    async fn get_current_position(&self, options: PositionOptions) -> Result<Location>;

    /// Start a continuous watch delivering into `sink` until `clear_watch`
    fn watch_position(&self, options: PositionOptions, sink: PositionSink) -> WatchId;

    fn clear_watch(&self, id: WatchId);

    /// True when the platform can keep sampling while the app is suspended
    fn supports_background(&self) -> bool {
        false
    }

    /// Hold or release the platform's suspension guard
    fn set_keep_awake(&self, _enabled: bool) {}
}

/// One-shot acquisition bounded by the options' timeout
pub async fn acquire_with_timeout(
    platform: &dyn LocationPlatform,
    options: PositionOptions,
) -> Result<Location> {
    match tokio::time::timeout(options.timeout, platform.get_current_position(options)).await {
        Ok(result) => result,
        Err(_) => Err(TrackerError::AcquisitionTimeout),
    }
}
