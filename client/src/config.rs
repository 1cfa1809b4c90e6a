//! Client tunables.

use serde::{Deserialize, Serialize};
use shared::constants::{MAX_PACKED_BITS, MIN_TIME_BETWEEN_TIMESTAMP_RESETS};
use shared::{ConfigError, MovementConfig};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub movement: MovementConfig,
    /// Unacknowledged moves kept for replay before the buffer is flushed.
    pub max_saved_moves: usize,
    /// Moves are held back and combined until this much time passed since the last send.
    pub net_send_interval: f32,
    /// Replicated root-motion snapshots older than this (seconds) are not replayed from.
    pub root_motion_rep_move_max_age: f32,
    /// Server-to-local source id mappings expire after this many seconds without use.
    pub id_mapping_validity: f32,
    /// The move timestamp wraps back by this much once it grows past it.
    pub min_time_between_timestamp_resets: f32,
    pub max_packed_bits: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            movement: MovementConfig::default(),
            max_saved_moves: 96,
            net_send_interval: 1.0 / 60.0,
            root_motion_rep_move_max_age: 0.5,
            id_mapping_validity: 3.0,
            min_time_between_timestamp_resets: MIN_TIME_BETWEEN_TIMESTAMP_RESETS,
            max_packed_bits: MAX_PACKED_BITS,
        }
    }
}

impl ClientConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.movement.validate()?;
        if self.max_saved_moves == 0 {
            return Err(ConfigError::Invalid {
                field: "max_saved_moves",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.min_time_between_timestamp_resets > 0.0) {
            return Err(ConfigError::Invalid {
                field: "min_time_between_timestamp_resets",
                reason: "must be positive".to_string(),
            });
        }
        if self.net_send_interval < 0.0 {
            return Err(ConfigError::Invalid {
                field: "net_send_interval",
                reason: format!("must not be negative, got {}", self.net_send_interval),
            });
        }
        Ok(())
    }
}
