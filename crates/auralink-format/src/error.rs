//! Errors for format description and conversion.

use thiserror::Error;

use crate::SampleFormat;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("channel_count must be nonzero, got {channel_count}")]
    InvalidChannelCount { channel_count: u16 },

    #[error("frame_rate_hz must be nonzero, got {frame_rate_hz}")]
    InvalidFrameRate { frame_rate_hz: u32 },

    #[error("channel layout has an out-of-range or duplicate index")]
    InvalidLayout,

    /// spec.md §4.2 "Failure": unsupported combinations fail at
    /// construction.
    #[error("unsupported sample format: {0:?}")]
    UnsupportedFormat(SampleFormat),
}

pub type Result<T> = std::result::Result<T, FormatError>;
