//! IO modules - platform and storage interfaces
//!
//! - `platform` - Location provider abstraction (permissions, one-shot fixes, watches)
//! - `notifier` - Notification delivery
//! - `store` - Key/value persistence backends (file and in-memory)
//! - `places` - Destination lookup over configured places
//! - `simulated` - Scripted and route-following platforms for tests and the simulator

pub mod notifier;
pub mod places;
pub mod platform;
pub mod simulated;
pub mod store;

// Re-export commonly used types
pub use notifier::{LogNotifier, Notification, Notifier, SoundCue};
pub use platform::{LocationPlatform, PermissionState, PositionOptions, WatchId};
pub use simulated::{ScriptedPlatform, SimulatedPlatform, SimulatedRoute};
pub use store::{FileStore, KeyValueStore, MemoryStore};
