//! Device back-end interface.
//!
//! Each back-end is a concrete type implementing [`IoDevBackend`], boxed as
//! a trait object so the engine never sees back-end-specific types. The trait's contract requires every
//! method to be non-blocking: I/O latency is absorbed in the kernel buffer
//! or the back-end's own staging buffer, never on the engine thread.

pub mod a2dp;
pub mod cpal_device;
pub mod error;
pub mod loopback;
pub mod null;

use std::time::Duration;

pub use cpal_device::{list_host_devices, CpalDevice, HostDeviceInfo};
pub use error::{IoDevError, Result};

use auralink_format::AudioFormat;

/// Direction of a device or stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
    Unified,
    PostMixPreDsp,
}

/// Device lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevState {
    Closed,
    OpenIdle,
    Running,
    Draining,
    Error,
}

/// A contiguous buffer handed to the engine by [`IoDevBackend::get_buffer`].
pub struct DevBuffer<'a> {
    pub bytes: &'a mut [u8],
    pub frames: u32,
}

/// Uniform non-blocking contract over hardware/virtual devices
///. Implementors must never block the calling (engine)
/// thread; any I/O latency is absorbed internally.
pub trait IoDevBackend: Send {
    fn direction(&self) -> Direction;

    /// Currently negotiated format. Valid only once `open` has succeeded.
    fn format(&self) -> Option<AudioFormat>;

    /// Capacity of the device buffer, in frames.
    fn buffer_size(&self) -> u32;

    /// Safety margin (output) / minimum batch (input), in frames.
    fn min_buffer_level(&self) -> u32;

    /// Negotiate `requested` against the back-end's supported rates/
    /// channels/formats and open the device. `CLOSED -> OPEN_IDLE`.
    fn open(&mut self, requested: AudioFormat) -> Result<AudioFormat>;

    /// `OPEN_IDLE`/`RUNNING`/`DRAINING` -> `CLOSED`.
    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    fn dev_running(&self) -> bool;

    /// Frames currently queued in the device's output buffer (playback) or
    /// available to be drained (capture staging), never exceeding
    /// `buffer_size`.
    fn frames_queued(&self) -> Result<u32>;

    /// Estimated playback/capture delay, in frames, beyond `frames_queued`.
    fn delay_frames(&self) -> Result<u32>;

    /// Lend the engine a buffer of up to `frames_wanted` frames. For
    /// output, this is write space in the device buffer; for input, this is
    /// captured data ready to read.
    fn get_buffer(&mut self, frames_wanted: u32) -> Result<DevBuffer<'_>>;

    /// Commit `frames` (<= the frames returned by the last `get_buffer`) to
    /// the device. `OPEN_IDLE -> RUNNING` on the first successful call with
    /// `frames > 0`.
    fn put_buffer(&mut self, frames: u32) -> Result<()>;

    /// Re-probe supported rates/channels/formats (hotplug, node switch).
    fn update_supported_formats(&mut self) -> Result<()> {
        Ok(())
    }

    /// How long the device may sit idle with zero attached streams before
    /// the engine closes it.
    fn idle_close_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_values_are_distinct() {
        assert_ne!(Direction::Out, Direction::In);
        assert_ne!(Direction::Unified, Direction::PostMixPreDsp);
    }
}
