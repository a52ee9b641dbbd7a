//! Tethercap Common Utilities
//!
//! Shared infrastructure for all Tethercap crates:
//! - Error types and result aliases
//! - Output path generation for recordings
//! - Tracing/logging initialization
//! - Configuration loading

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use config::*;
pub use error::*;
pub use paths::*;
