//! Notification delivery
//!
//! Delivery is best-effort: the controller logs failures and moves on.
//! `LogNotifier` writes notifications to the tracing log and is what the
//! simulator binary uses.

use crate::domain::error::Result;
use crate::io::platform::PermissionState;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// Audible cue accompanying a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundCue {
    Chime,
    Alarm,
}

impl SoundCue {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoundCue::Chime => "chime",
            SoundCue::Alarm => "alarm",
        }
    }
}

/// A notification ready for delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Replaces an earlier notification with the same tag
    pub tag: String,
    pub require_interaction: bool,
    /// Vibration pattern in ms (on, off, on, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibration: Option<&'static [u64]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<SoundCue>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn request_permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn show(&self, notification: &Notification) -> Result<()>;

    fn vibrate(&self, _pattern: &[u64]) {}

    fn play_sound(&self, _cue: SoundCue) {}
}

/// Notifier that writes to the structured log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn show(&self, notification: &Notification) -> Result<()> {
        info!(
            title = %notification.title,
            body = %notification.body,
            tag = %notification.tag,
            require_interaction = %notification.require_interaction,
            "notification"
        );
        Ok(())
    }

    fn vibrate(&self, pattern: &[u64]) {
        info!(pattern = ?pattern, "vibrate");
    }

    fn play_sound(&self, cue: SoundCue) {
        info!(cue = %cue.as_str(), "play_sound");
    }
}
