//! Server tunables.

use serde::{Deserialize, Serialize};
use shared::constants::{MAX_PACKED_BITS, MIN_TIME_BETWEEN_TIMESTAMP_RESETS};
use shared::{ConfigError, MovementConfig};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub movement: MovementConfig,
    /// Client timestamps are expected to wrap after this many seconds.
    pub min_time_between_timestamp_resets: f32,
    /// Move packets declaring more bits than this are dropped.
    pub max_packed_bits: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            movement: MovementConfig::default(),
            min_time_between_timestamp_resets: MIN_TIME_BETWEEN_TIMESTAMP_RESETS,
            max_packed_bits: MAX_PACKED_BITS,
        }
    }
}

impl ServerConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.movement.validate()?;
        if !(config.min_time_between_timestamp_resets > 0.0) {
            return Err(ConfigError::Invalid {
                field: "min_time_between_timestamp_resets",
                reason: "must be positive".to_string(),
            });
        }
        Ok(config)
    }
}
