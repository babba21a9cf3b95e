//! Services - tracking logic and state management
//!
//! - `controller` - Journey lifecycle and event orchestration
//! - `sampler` - Foreground and background location sampling
//! - `mode_selector` - ETA-driven tracking mode policy
//! - `alerts` - Staged proximity alert state machine
//! - `distance` - Haversine distance, ETA and display formatting
//! - `persistence` - Preferences, destinations, history and statistics
//! - `observers` - Subscription plumbing
//! - `scheduler` - Cancellable timers

pub mod alerts;
pub mod controller;
pub mod distance;
pub mod mode_selector;
pub mod observers;
pub mod persistence;
pub mod sampler;
pub mod scheduler;

// Re-export commonly used types
pub use alerts::{AlertStage, AlertStateMachine, AlertThresholds};
pub use controller::{ControllerHandle, JourneyController};
pub use mode_selector::{ModeDecision, ModeProfile, TrackingModeSelector};
pub use persistence::{Persistence, Preferences, TravelStats};
pub use sampler::{build_sampler, LocationSampler, SamplerKind};
