//! Wire-framing errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("truncated message: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("unknown message id {0}")]
    UnknownId(u32),

    #[error("message length field {declared} does not match payload length {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("message exceeds maximum allowed size: {len} > {max}")]
    TooLarge { len: u32, max: u32 },
}

pub type Result<T> = std::result::Result<T, ProtoError>;
