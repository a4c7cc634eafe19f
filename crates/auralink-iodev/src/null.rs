//! The fallback device: an empty sink/source that pretends to consume or
//! produce at the stream's rate.
//!
//! Always `OPEN_IDLE` or `RUNNING`, so a stream can be
//! reattached to it without the client ever observing device absence.

use std::time::{Duration, Instant};

use auralink_format::AudioFormat;

use crate::{DevBuffer, DevState, Direction, IoDevBackend, IoDevError, Result};

/// No-op device that discards (output) or synthesizes silence (input) at
/// the negotiated rate, used when no real device is available.
pub struct NullDevice {
    direction: Direction,
    format: Option<AudioFormat>,
    state: DevState,
    buffer_size: u32,
    scratch: Vec<u8>,
    last_service: Option<Instant>,
}

impl NullDevice {
    pub fn new(direction: Direction, buffer_size: u32) -> Self {
        Self {
            direction,
            format: None,
            state: DevState::Closed,
            buffer_size,
            scratch: Vec::new(),
            last_service: None,
        }
    }

    pub fn state(&self) -> DevState {
        self.state
    }
}

impl IoDevBackend for NullDevice {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    fn min_buffer_level(&self) -> u32 {
        self.buffer_size / 4
    }

    fn open(&mut self, requested: AudioFormat) -> Result<AudioFormat> {
        self.format = Some(requested);
        self.scratch = vec![0u8; (self.buffer_size * requested.frame_bytes()) as usize];
        self.state = DevState::OpenIdle;
        self.last_service = Some(Instant::now());
        Ok(requested)
    }

    fn close(&mut self) -> Result<()> {
        self.format = None;
        self.state = DevState::Closed;
        Ok(())
    }

    fn is_open(&self) -> bool {
        !matches!(self.state, DevState::Closed)
    }

    fn dev_running(&self) -> bool {
        matches!(self.state, DevState::Running)
    }

    fn frames_queued(&self) -> Result<u32> {
        if self.state == DevState::Closed {
            return Err(IoDevError::NotOpen);
        }
        Ok(0)
    }

    fn delay_frames(&self) -> Result<u32> {
        Ok(0)
    }

    fn get_buffer(&mut self, frames_wanted: u32) -> Result<DevBuffer<'_>> {
        if self.format.is_none() {
            return Err(IoDevError::NotOpen);
        }
        let frame_bytes = self.format.unwrap().frame_bytes() as usize;
        let frames = frames_wanted.min(self.buffer_size);
        let needed = frames as usize * frame_bytes;
        if self.scratch.len() < needed {
            self.scratch.resize(needed, 0);
        }
        Ok(DevBuffer {
            bytes: &mut self.scratch[..needed],
            frames,
        })
    }

    fn put_buffer(&mut self, frames: u32) -> Result<()> {
        if frames > 0 {
            self.state = DevState::Running;
        }
        self.last_service = Some(Instant::now());
        Ok(())
    }

    fn idle_close_timeout(&self) -> Duration {
        // The fallback device never actually closes from idling; it is
        // only ever closed explicitly when a real device is reattached.
        Duration::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auralink_format::SampleFormat;

    #[test]
    fn opens_idle_and_runs_on_first_write() {
        let mut dev = NullDevice::new(Direction::Out, 480);
        assert_eq!(dev.state(), DevState::Closed);
        let fmt = AudioFormat::simple(SampleFormat::S16Le, 48000, 2);
        dev.open(fmt).unwrap();
        assert_eq!(dev.state(), DevState::OpenIdle);

        let buf = dev.get_buffer(240).unwrap();
        assert_eq!(buf.frames, 240);
        dev.put_buffer(240).unwrap();
        assert_eq!(dev.state(), DevState::Running);
    }

    #[test]
    fn get_buffer_before_open_is_error() {
        let mut dev = NullDevice::new(Direction::Out, 480);
        assert!(matches!(dev.get_buffer(10), Err(IoDevError::NotOpen)));
    }
}
