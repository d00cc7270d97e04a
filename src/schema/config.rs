//! Configuration types for recording playback.

use serde::{Deserialize, Serialize};

/// Playback bounds and pacing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Snapshots start at the first TIMESTAMP at or after this epoch second.
    #[serde(default)]
    pub begin_capture: Option<u64>,
    /// Playback stops once a TIMESTAMP passes this epoch second.
    #[serde(default)]
    pub end_capture: Option<u64>,
    /// Sleep between timestamps to reproduce the recorded timing.
    #[serde(default)]
    pub real_time: bool,
    /// Stop after this many interpreted units (0 = unlimited).
    #[serde(default)]
    pub max_order_count: u32,
}

impl PlayerConfig {
    /// Begin bound in microseconds, the unit of TIMESTAMP records.
    pub fn begin_micros(&self) -> Option<u64> {
        self.begin_capture.map(|s| s.saturating_mul(1_000_000))
    }

    /// End bound in microseconds.
    pub fn end_micros(&self) -> Option<u64> {
        self.end_capture.map(|s| s.saturating_mul(1_000_000))
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let (Some(begin), Some(end)) = (self.begin_capture, self.end_capture) {
            if end < begin {
                return Err(ConfigError::EmptyWindow { begin, end });
            }
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Capture window is empty: end {end} precedes begin {begin}")]
    EmptyWindow { begin: u64, end: u64 },
    #[error("Recorder declares {0} bitmap cache tiers, at most 5 are supported")]
    TooManyCacheTiers(usize),
    #[error("Recorder version {0} cannot express the requested option: {1}")]
    VersionTooOld(u16, &'static str),
    #[error("Screen dimensions must be non-zero")]
    InvalidDimensions,
}
