//! Errors for stream construction and the connection state machine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("cb_threshold ({cb_threshold}) exceeds buffer_frames ({buffer_frames})")]
    ThresholdExceedsBuffer { cb_threshold: u32, buffer_frames: u32 },

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: crate::state::ConnState, to: crate::state::ConnState },

    #[error("shm allocation failed: {0}")]
    ShmAlloc(#[from] auralink_shm::ShmError),
}

pub type Result<T> = std::result::Result<T, StreamError>;
