use shared::WireError;
use thiserror::Error;

/// Reasons a client move packet was not simulated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MoveError {
    #[error("malformed move packet: {0}")]
    Wire(#[from] WireError),

    #[error("stale client timestamp {time_stamp} (current {current})")]
    StaleTimeStamp { time_stamp: f32, current: f32 },

    #[error("invalid client timestamp {0}")]
    InvalidTimeStamp(f32),
}

pub type MoveResult<T> = Result<T, MoveError>;
