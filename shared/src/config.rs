//! Tunables for the movement core, loadable from JSON.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_GRAVITY_MPS2, DEFAULT_MAX_TIME_DELTA_CORRECTION_ABSOLUTE,
    DEFAULT_MAX_TIME_DELTA_CORRECTION_PERCENT, MAX_MOVE_DELTA_TIME, MAX_POSITION_ERROR_SQ,
    MAX_SOURCES_TO_SERIALIZE,
};
use crate::error::ConfigError;

/// Root-motion composition settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootMotionConfig {
    /// Share of a rewound time gap made up per tick while catching up.
    pub max_time_delta_correction_percent: f32,
    /// Cap (seconds) on the catch-up added to a single tick.
    pub max_time_delta_correction_absolute: f32,
    /// Sources written per group; the wire count is one byte.
    pub max_sources_to_serialize: u8,
}

impl Default for RootMotionConfig {
    fn default() -> Self {
        Self {
            max_time_delta_correction_percent: DEFAULT_MAX_TIME_DELTA_CORRECTION_PERCENT,
            max_time_delta_correction_absolute: DEFAULT_MAX_TIME_DELTA_CORRECTION_ABSOLUTE,
            max_sources_to_serialize: MAX_SOURCES_TO_SERIALIZE,
        }
    }
}

impl RootMotionConfig {
    /// Extra simulation time for a source whose cursor was rewound by `gap` seconds.
    pub fn catch_up_time(&self, gap: f32) -> f32 {
        if gap <= 0.0 {
            return 0.0;
        }
        (gap * self.max_time_delta_correction_percent).min(self.max_time_delta_correction_absolute)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    pub gravity_mps2: f32,
    /// Input acceleration is clamped to this length (m/s^2).
    pub max_acceleration: f32,
    /// Longest single move simulated (seconds).
    pub max_move_delta_time: f32,
    /// Squared client/server position disagreement that triggers a correction (m^2).
    pub max_position_error_sq: f32,
    pub capsule_radius: f32,
    pub capsule_half_height: f32,
    pub root_motion: RootMotionConfig,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            gravity_mps2: DEFAULT_GRAVITY_MPS2,
            max_acceleration: 20.0,
            max_move_delta_time: MAX_MOVE_DELTA_TIME,
            max_position_error_sq: MAX_POSITION_ERROR_SQ,
            capsule_radius: 0.35,
            capsule_half_height: 0.55,
            root_motion: RootMotionConfig::default(),
        }
    }
}

impl MovementConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_move_delta_time > 0.0) {
            return Err(ConfigError::Invalid {
                field: "max_move_delta_time",
                reason: format!("must be positive, got {}", self.max_move_delta_time),
            });
        }
        if self.max_position_error_sq < 0.0 {
            return Err(ConfigError::Invalid {
                field: "max_position_error_sq",
                reason: "must not be negative".to_string(),
            });
        }
        let rm = &self.root_motion;
        if !(0.0..=1.0).contains(&rm.max_time_delta_correction_percent) {
            return Err(ConfigError::Invalid {
                field: "root_motion.max_time_delta_correction_percent",
                reason: format!("must be within 0..=1, got {}", rm.max_time_delta_correction_percent),
            });
        }
        Ok(())
    }
}
