//! Schema module - Configuration types for playback and recording.

mod config;

pub use config::*;
