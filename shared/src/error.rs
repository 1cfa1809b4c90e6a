//! Error types for the wire codec and configuration loading.

use thiserror::Error;

/// Failures decoding untrusted network payloads.
///
/// Any of these drops the whole packet; previously accumulated state is kept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("read past end of bit stream")]
    ReadPastEnd,

    #[error("rejected root motion source type tag {0}")]
    UnknownSourceType(u8),

    #[error("malformed bit count: declared {declared}, available {available}")]
    MalformedBitCount { declared: u32, available: u32 },

    #[error("packed payload too large: {bits} > {max} bits")]
    PacketTooLarge { bits: u32, max: u32 },

    #[error("invalid {what} value {value}")]
    InvalidEnum { what: &'static str, value: u32 },

    #[error("non-finite {what} value")]
    NonFinite { what: &'static str },

    #[error("string of {0} bytes exceeds the wire limit")]
    StringTooLong(usize),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

impl WireError {
    /// Trust-boundary violations, as opposed to plain truncation.
    pub fn is_suspicious(&self) -> bool {
        matches!(
            self,
            WireError::UnknownSourceType(_)
                | WireError::MalformedBitCount { .. }
                | WireError::PacketTooLarge { .. }
                | WireError::NonFinite { .. }
        )
    }
}

pub type WireResult<T> = Result<T, WireError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}
