//! Arrival alert library
//!
//! Journey tracking toward a single destination with staged proximity
//! alerts. Exposes modules for integration testing and the simulator binary.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
