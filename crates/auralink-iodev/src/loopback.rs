//! Loopback tap: a virtual input device fed by a hook registered on an
//! output device's post-mix (or post-DSP) signal.
//!
//! The tap itself is a plain byte ring (`LoopbackRing`) shared between the
//! output device's servicing routine (the writer, invoked by the engine
//! immediately after mixing or after DSP) and this device's `get_buffer`/
//! `put_buffer` (the reader).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use auralink_format::AudioFormat;

use crate::{DevBuffer, DevState, Direction, IoDevBackend, IoDevError, Result};

/// Byte ring shared between an output device's tap hook and a
/// [`LoopbackDevice`] reader. Bounded: if the reader falls behind, the
/// oldest bytes are dropped (an overrun, counted by the owning `RStream`'s
/// shm once copied in, not here).
#[derive(Clone)]
pub struct LoopbackRing {
    inner: Arc<Mutex<VecDeque<u8>>>,
    capacity_bytes: usize,
}

impl LoopbackRing {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity_bytes))),
            capacity_bytes,
        }
    }

    /// Invoked by the engine immediately after mix (pre-DSP) or after DSP
    /// (post-DSP), per spec.md §4.4 "Apply per-device post-mix hook".
    pub fn write_tap(&self, bytes: &[u8]) {
        let mut buf = self.inner.lock().expect("loopback ring poisoned");
        for &b in bytes {
            if buf.len() >= self.capacity_bytes {
                buf.pop_front();
            }
            buf.push_back(b);
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().expect("loopback ring poisoned").len()
    }

    fn drain_into(&self, out: &mut [u8]) -> usize {
        let mut buf = self.inner.lock().expect("loopback ring poisoned");
        let n = out.len().min(buf.len());
        for slot in out.iter_mut().take(n) {
            *slot = buf.pop_front().unwrap();
        }
        n
    }
}

/// Virtual capture device whose "hardware" is a tap on an output device.
pub struct LoopbackDevice {
    format: Option<AudioFormat>,
    state: DevState,
    buffer_size: u32,
    ring: LoopbackRing,
    scratch: Vec<u8>,
    pending_frames: u32,
}

impl LoopbackDevice {
    pub fn new(ring: LoopbackRing, buffer_size: u32) -> Self {
        Self {
            format: None,
            state: DevState::Closed,
            buffer_size,
            ring,
            scratch: Vec::new(),
            pending_frames: 0,
        }
    }

    pub fn ring(&self) -> &LoopbackRing {
        &self.ring
    }
}

impl IoDevBackend for LoopbackDevice {
    fn direction(&self) -> Direction {
        Direction::In
    }

    fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    fn min_buffer_level(&self) -> u32 {
        0
    }

    fn open(&mut self, requested: AudioFormat) -> Result<AudioFormat> {
        self.format = Some(requested);
        self.scratch = vec![0u8; (self.buffer_size * requested.frame_bytes()) as usize];
        self.state = DevState::OpenIdle;
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
        let fmt = self.format.ok_or(IoDevError::NotOpen)?;
        Ok((self.ring.len() as u32) / fmt.frame_bytes())
    }

    fn delay_frames(&self) -> Result<u32> {
        Ok(0)
    }

    fn get_buffer(&mut self, frames_wanted: u32) -> Result<DevBuffer<'_>> {
        let fmt = self.format.ok_or(IoDevError::NotOpen)?;
        let frame_bytes = fmt.frame_bytes() as usize;
        let avail_frames = (self.ring.len() / frame_bytes).min(frames_wanted as usize);
        let needed = avail_frames * frame_bytes;
        if self.scratch.len() < needed {
            self.scratch.resize(needed, 0);
        }
        let copied = self.ring.drain_into(&mut self.scratch[..needed]);
        let frames = (copied / frame_bytes) as u32;
        self.pending_frames = frames;
        self.state = DevState::Running;
        Ok(DevBuffer {
            bytes: &mut self.scratch[..needed],
            frames,
        })
    }

    fn put_buffer(&mut self, _frames: u32) -> Result<()> {
        // Capture: `put_buffer` just acknowledges consumption; the ring
        // already advanced in `get_buffer`'s drain.
        Ok(())
    }

    fn idle_close_timeout(&self) -> Duration {
        Duration::from_secs(20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auralink_format::SampleFormat;

    #[test]
    fn tap_writes_are_readable_as_captured_frames() {
        let ring = LoopbackRing::new(4096);
        let mut dev = LoopbackDevice::new(ring.clone(), 480);
        let fmt = AudioFormat::simple(SampleFormat::S16Le, 48000, 2);
        dev.open(fmt).unwrap();

        let frame_bytes = fmt.frame_bytes() as usize;
        ring.write_tap(&vec![1u8; frame_bytes * 10]);

        let buf = dev.get_buffer(480).unwrap();
        assert_eq!(buf.frames, 10);
        assert!(buf.bytes.iter().all(|&b| b == 1));
    }

    #[test]
    fn ring_drops_oldest_bytes_when_full() {
        let ring = LoopbackRing::new(4);
        ring.write_tap(&[1, 2, 3, 4]);
        ring.write_tap(&[5]);
        let mut out = [0u8; 4];
        let n = ring.drain_into(&mut out);
        assert_eq!(n, 4);
        assert_eq!(out, [2, 3, 4, 5]);
    }
}
