//! A2DP output reference back-end: a PCM byte ring, MTU-chunked flush, and
//! a virtual-buffer depth estimator so the engine can compute delay
//! without querying the Bluetooth peer.
//!
//! The SBC encode step is stubbed behind [`SbcEncoder`] — encoding bytes is
//! a codec detail — but the surrounding buffering, backpressure, and
//! timing estimator are real engine-facing behavior and are implemented in
//! full.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use auralink_format::AudioFormat;

use crate::{DevBuffer, DevState, Direction, IoDevBackend, IoDevError, Result};

/// Encodes raw PCM bytes into one Bluetooth transport packet. Real
/// implementations wrap an SBC (or other A2DP codec) encoder; out of scope
/// per spec.md §1 "DSP filter implementation" / codec details.
pub trait SbcEncoder: Send {
    /// Encode up to `mtu` bytes' worth of output from `pcm`, returning the
    /// encoded packet and how many input PCM bytes it consumed.
    fn encode(&mut self, pcm: &[u8], mtu: usize) -> (Vec<u8>, usize);
}

/// Encoder that passes PCM through unchanged, chunked to the MTU. Used in
/// tests and as a placeholder until a real SBC codec is wired in.
#[derive(Default)]
pub struct PassthroughEncoder;

impl SbcEncoder for PassthroughEncoder {
    fn encode(&mut self, pcm: &[u8], mtu: usize) -> (Vec<u8>, usize) {
        let n = pcm.len().min(mtu);
        (pcm[..n].to_vec(), n)
    }
}

/// Where encoded packets go. A real implementation writes to the A2DP
/// transport socket; tests use an in-memory sink.
pub trait PacketSink: Send {
    /// Write one packet. `Ok(false)` signals backpressure (the engine must
    /// arm a write-readiness callback and retry later), matching spec.md's
    /// "when the socket returns backpressure".
    fn write_packet(&mut self, packet: &[u8]) -> io::Result<bool>;
}

/// A `Write`-backed sink (e.g. a real transport socket) that never reports
/// backpressure beyond what `Write` itself returns.
pub struct WriteSink<W: Write + Send>(pub W);

impl<W: Write + Send> PacketSink for WriteSink<W> {
    fn write_packet(&mut self, packet: &[u8]) -> io::Result<bool> {
        match self.0.write_all(packet) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// A2DP output device: buffers PCM, flushes MTU-sized encoded packets, and
/// estimates virtual buffer depth without querying the peer.
pub struct A2dpDevice {
    format: Option<AudioFormat>,
    state: DevState,
    buffer_size: u32,
    mtu: usize,
    pcm_ring: VecDeque<u8>,
    encoder: Box<dyn SbcEncoder>,
    sink: Box<dyn PacketSink>,
    bt_written_frames: u64,
    opened_at: Option<Instant>,
    write_blocked: bool,
    scratch: Vec<u8>,
}

impl A2dpDevice {
    pub fn new(buffer_size: u32, mtu: usize, encoder: Box<dyn SbcEncoder>, sink: Box<dyn PacketSink>) -> Self {
        Self {
            format: None,
            state: DevState::Closed,
            buffer_size,
            mtu,
            pcm_ring: VecDeque::new(),
            encoder,
            sink,
            bt_written_frames: 0,
            opened_at: None,
            write_blocked: false,
            scratch: Vec::new(),
        }
    }

    /// Virtual-buffer depth: `bt_written_frames - elapsed_since_open * rate`,
    /// clamped at zero.
    fn virtual_buffer_frames(&self) -> u64 {
        let Some(fmt) = self.format else { return 0 };
        let Some(opened_at) = self.opened_at else { return 0 };
        let elapsed = opened_at.elapsed().as_secs_f64();
        let consumed = (elapsed * fmt.frame_rate_hz as f64) as u64;
        self.bt_written_frames.saturating_sub(consumed)
    }

    /// Encode as many MTU-worth packets as possible and write them. Stops
    /// (without erroring) on the first backpressure signal, arming
    /// `write_blocked` so the caller knows to retry later.
    fn flush_data(&mut self) -> Result<()> {
        let Some(fmt) = self.format else { return Err(IoDevError::NotOpen) };
        let frame_bytes = fmt.frame_bytes() as usize;
        self.write_blocked = false;

        loop {
            if self.pcm_ring.is_empty() {
                break;
            }
            let chunk: Vec<u8> = self.pcm_ring.iter().take(self.mtu).copied().collect();
            let (packet, consumed) = self.encoder.encode(&chunk, self.mtu);
            if consumed == 0 {
                break;
            }
            match self
                .sink
                .write_packet(&packet)
                .map_err(|e| IoDevError::BackendIo(e.to_string()))?
            {
                true => {
                    for _ in 0..consumed {
                        self.pcm_ring.pop_front();
                    }
                    let frames = consumed / frame_bytes.max(1);
                    self.bt_written_frames += frames as u64;
                }
                false => {
                    self.write_blocked = true;
                    tracing::debug!("a2dp transport backpressure, arming write-ready callback");
                    break;
                }
            }
        }
        Ok(())
    }
}

impl IoDevBackend for A2dpDevice {
    fn direction(&self) -> Direction {
        Direction::Out
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
        self.opened_at = Some(Instant::now());
        self.bt_written_frames = 0;
        self.scratch = vec![0u8; (self.buffer_size * requested.frame_bytes()) as usize];
        self.state = DevState::OpenIdle;
        Ok(requested)
    }

    fn close(&mut self) -> Result<()> {
        self.format = None;
        self.opened_at = None;
        self.pcm_ring.clear();
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
        let queued_bytes = self.pcm_ring.len() as u64 + self.virtual_buffer_frames() * fmt.frame_bytes() as u64;
        Ok((queued_bytes / fmt.frame_bytes() as u64).min(self.buffer_size as u64) as u32)
    }

    fn delay_frames(&self) -> Result<u32> {
        Ok(self.virtual_buffer_frames() as u32)
    }

    fn get_buffer(&mut self, frames_wanted: u32) -> Result<DevBuffer<'_>> {
        let fmt = self.format.ok_or(IoDevError::NotOpen)?;
        let frame_bytes = fmt.frame_bytes() as usize;
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
        let fmt = self.format.ok_or(IoDevError::NotOpen)?;
        let frame_bytes = fmt.frame_bytes() as usize;
        let n_bytes = (frames as usize * frame_bytes).min(self.scratch.len());
        self.pcm_ring.extend(self.scratch[..n_bytes].iter().copied());
        self.flush_data()?;
        if frames > 0 {
            self.state = DevState::Running;
        }
        Ok(())
    }

    fn idle_close_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auralink_format::SampleFormat;

    struct CollectingSink {
        packets: Vec<Vec<u8>>,
        block_after: Option<usize>,
    }

    impl PacketSink for CollectingSink {
        fn write_packet(&mut self, packet: &[u8]) -> io::Result<bool> {
            if let Some(n) = self.block_after {
                if self.packets.len() >= n {
                    return Ok(false);
                }
            }
            self.packets.push(packet.to_vec());
            Ok(true)
        }
    }

    #[test]
    fn put_buffer_flushes_mtu_chunks() {
        let sink = CollectingSink {
            packets: Vec::new(),
            block_after: None,
        };
        let mut dev = A2dpDevice::new(480, 8, Box::new(PassthroughEncoder), Box::new(sink));
        let fmt = AudioFormat::simple(SampleFormat::S16Le, 48000, 2);
        dev.open(fmt).unwrap();

        let buf = dev.get_buffer(10).unwrap();
        buf.bytes.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);
        dev.put_buffer(10).unwrap();

        assert!(dev.dev_running());
        assert_eq!(dev.pcm_ring.len(), 0);
    }

    #[test]
    fn backpressure_stops_flush_without_error() {
        let sink = CollectingSink {
            packets: Vec::new(),
            block_after: Some(0),
        };
        let mut dev = A2dpDevice::new(480, 8, Box::new(PassthroughEncoder), Box::new(sink));
        let fmt = AudioFormat::simple(SampleFormat::S16Le, 48000, 2);
        dev.open(fmt).unwrap();

        let buf = dev.get_buffer(10).unwrap();
        buf.bytes.fill(1);
        dev.put_buffer(10).unwrap();

        assert!(dev.write_blocked);
        assert!(!dev.pcm_ring.is_empty());
    }

    #[test]
    fn virtual_buffer_clamps_at_zero_before_any_write() {
        let sink = CollectingSink {
            packets: Vec::new(),
            block_after: None,
        };
        let dev = A2dpDevice::new(480, 8, Box::new(PassthroughEncoder), Box::new(sink));
        assert_eq!(dev.virtual_buffer_frames(), 0);
    }
}
