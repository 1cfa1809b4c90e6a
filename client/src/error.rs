use shared::{BaseId, WireError};
use thiserror::Error;

/// Reasons a server response was not applied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResponseError {
    #[error("malformed move response: {0}")]
    Wire(#[from] WireError),

    #[error("no saved move data for response timestamp {time_stamp}")]
    MissingSavedMove { time_stamp: f32 },

    #[error("correction relative to unknown movement base {0:?}")]
    UnknownBase(BaseId),
}

pub type ResponseResult<T> = Result<T, ResponseError>;
