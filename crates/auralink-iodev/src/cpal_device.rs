//! Hardware back-end adapted from cpal's closure-based non-blocking
//! contract into the engine's pull-based `get_buffer`/`put_buffer`
//! contract.
//!
//! cpal's real-time callback runs on cpal's own thread and is this type's
//! private producer/consumer: the engine never runs inside it. An inner
//! lock-free SPSC ring (the same kind [`auralink_shm`] uses for client
//! streams) bridges the two.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use auralink_format::{AudioFormat, SampleFormat};

use crate::{DevBuffer, DevState, Direction, IoDevBackend, IoDevError, Result};

/// Fixed-capacity SPSC byte ring between cpal's real-time callback and the
/// engine's polling `get_buffer`/`put_buffer` calls.
struct CallbackRing {
    buf: Vec<u8>,
    capacity: usize,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
}

impl CallbackRing {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            capacity,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
        }
    }

    fn available_to_read(&self) -> usize {
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        w.wrapping_sub(r).min(self.capacity)
    }

    fn available_to_write(&self) -> usize {
        self.capacity - self.available_to_read()
    }
}

/// Shared ring plus the mutex guarding the raw byte storage (storage
/// itself isn't atomic per-byte here, unlike `auralink_shm::Shm`, because
/// both sides of this ring are internal to this crate and already
/// synchronized by the position counters' acquire/release pairing combined
/// with a short-held lock).
struct SharedRing {
    ring: Mutex<CallbackRing>,
}

impl SharedRing {
    fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(CallbackRing::new(capacity)),
        }
    }

    fn push(&self, data: &[u8]) -> usize {
        let mut ring = self.ring.lock().expect("cpal ring poisoned");
        let avail = ring.available_to_write();
        let n = data.len().min(avail);
        let cap = ring.capacity;
        let w = ring.write_pos.load(Ordering::Relaxed) % cap;
        for (i, &b) in data.iter().take(n).enumerate() {
            let idx = (w + i) % cap;
            ring.buf[idx] = b;
        }
        ring.write_pos.fetch_add(n, Ordering::Release);
        n
    }

    fn pop(&self, out: &mut [u8]) -> usize {
        let mut ring = self.ring.lock().expect("cpal ring poisoned");
        let avail = ring.available_to_read();
        let n = out.len().min(avail);
        let cap = ring.capacity;
        let r = ring.read_pos.load(Ordering::Relaxed) % cap;
        for (i, slot) in out.iter_mut().take(n).enumerate() {
            *slot = ring.buf[(r + i) % cap];
        }
        ring.read_pos.fetch_add(n, Ordering::Release);
        n
    }

    fn available_to_read(&self) -> usize {
        self.ring.lock().expect("cpal ring poisoned").available_to_read()
    }
}

fn cpal_sample_format(fmt: SampleFormat) -> cpal::SampleFormat {
    match fmt {
        SampleFormat::S16Le => cpal::SampleFormat::I16,
        SampleFormat::S24Le | SampleFormat::S32Le => cpal::SampleFormat::I32,
        SampleFormat::F32Le => cpal::SampleFormat::F32,
    }
}

/// A real hardware output or input device, backed by cpal.
pub struct CpalDevice {
    direction: Direction,
    device_name: Option<String>,
    format: Option<AudioFormat>,
    state: DevState,
    buffer_size: u32,
    ring: Option<Arc<SharedRing>>,
    _stream: Option<cpal::Stream>,
    scratch: Vec<u8>,
}

// SAFETY/Send: cpal::Stream is not Send on some platforms because it holds
// platform handles tied to the thread that created it; this back-end is
// only ever driven from the single audio engine thread that created it, so
// it is moved, not shared, never accessed concurrently.
#[allow(unsafe_code)]
unsafe impl Send for CpalDevice {}

impl CpalDevice {
    pub fn new(direction: Direction, device_name: Option<String>, buffer_size: u32) -> Self {
        Self {
            direction,
            device_name,
            format: None,
            state: DevState::Closed,
            buffer_size,
            ring: None,
            _stream: None,
            scratch: Vec::new(),
        }
    }

    fn find_device(&self, host: &cpal::Host) -> Result<cpal::Device> {
        if let Some(name) = &self.device_name {
            let needle = name.to_lowercase();
            let devices = match self.direction {
                Direction::Out => host
                    .output_devices()
                    .map_err(|e| IoDevError::OpenFailed(e.to_string()))?
                    .collect::<Vec<_>>(),
                _ => host
                    .input_devices()
                    .map_err(|e| IoDevError::OpenFailed(e.to_string()))?
                    .collect::<Vec<_>>(),
            };
            devices
                .into_iter()
                .find(|d| {
                    d.name()
                        .map(|n| n.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
                .ok_or_else(|| IoDevError::OpenFailed(format!("no device matching '{name}'")))
        } else {
            let default = match self.direction {
                Direction::Out => host.default_output_device(),
                _ => host.default_input_device(),
            };
            default.ok_or_else(|| IoDevError::OpenFailed("no default device".into()))
        }
    }
}

impl IoDevBackend for CpalDevice {
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
        let host = cpal::default_host();
        let device = self.find_device(&host)?;

        let stream_config = cpal::StreamConfig {
            channels: requested.channel_count,
            sample_rate: cpal::SampleRate(requested.frame_rate_hz),
            buffer_size: cpal::BufferSize::Fixed(self.buffer_size),
        };

        let ring_capacity = (self.buffer_size * requested.frame_bytes() * 4) as usize;
        let ring = Arc::new(SharedRing::new(ring_capacity));
        let ring_for_cb = ring.clone();
        let sample_fmt = cpal_sample_format(requested.sample_format);

        tracing::info!(
            direction = ?self.direction,
            rate = requested.frame_rate_hz,
            channels = requested.channel_count,
            "opening cpal device"
        );

        let stream = build_stream(&device, &stream_config, sample_fmt, self.direction, ring_for_cb)
            .map_err(|e| IoDevError::OpenFailed(e.to_string()))?;

        stream.play().map_err(|e| IoDevError::OpenFailed(e.to_string()))?;

        self.format = Some(requested);
        self.ring = Some(ring);
        self._stream = Some(stream);
        self.state = DevState::OpenIdle;
        Ok(requested)
    }

    fn close(&mut self) -> Result<()> {
        self._stream = None;
        self.ring = None;
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
        let ring = self.ring.as_ref().ok_or(IoDevError::NotOpen)?;
        Ok(ring.available_to_read() as u32 / fmt.frame_bytes())
    }

    fn delay_frames(&self) -> Result<u32> {
        Ok(0)
    }

    fn get_buffer(&mut self, frames_wanted: u32) -> Result<DevBuffer<'_>> {
        let fmt = self.format.ok_or(IoDevError::NotOpen)?;
        let ring = self.ring.as_ref().ok_or(IoDevError::NotOpen)?;
        let frame_bytes = fmt.frame_bytes() as usize;

        match self.direction {
            Direction::Out => {
                // Output: lend scratch space the engine fills; put_buffer
                // pushes it into the ring for cpal's callback to drain.
                let needed = frames_wanted as usize * frame_bytes;
                if self.scratch.len() < needed {
                    self.scratch.resize(needed, 0);
                }
                Ok(DevBuffer {
                    bytes: &mut self.scratch[..needed],
                    frames: frames_wanted,
                })
            }
            _ => {
                // Input: drain whatever cpal's callback has produced.
                let avail_frames = (ring.available_to_read() / frame_bytes).min(frames_wanted as usize);
                let needed = avail_frames * frame_bytes;
                if self.scratch.len() < needed {
                    self.scratch.resize(needed, 0);
                }
                let copied = ring.pop(&mut self.scratch[..needed]);
                let frames = (copied / frame_bytes) as u32;
                Ok(DevBuffer {
                    bytes: &mut self.scratch[..needed],
                    frames,
                })
            }
        }
    }

    fn put_buffer(&mut self, frames: u32) -> Result<()> {
        if self.direction == Direction::Out {
            let fmt = self.format.ok_or(IoDevError::NotOpen)?;
            let ring = self.ring.as_ref().ok_or(IoDevError::NotOpen)?;
            let frame_bytes = fmt.frame_bytes() as usize;
            let n_bytes = frames as usize * frame_bytes;
            let pushed = ring.push(&self.scratch[..n_bytes.min(self.scratch.len())]);
            if pushed < n_bytes {
                tracing::warn!(dropped = n_bytes - pushed, "cpal output ring overrun");
            }
        }
        if frames > 0 {
            self.state = DevState::Running;
        }
        Ok(())
    }

    fn idle_close_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    direction: Direction,
    ring: Arc<SharedRing>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError> {
    match direction {
        Direction::Out => match sample_format {
            cpal::SampleFormat::F32 => device.build_output_stream(
                config,
                move |data: &mut [f32], _| {
                    let bytes: &mut [u8] = bytemuck_cast_mut_f32(data);
                    let n = ring.pop(bytes);
                    if n < bytes.len() {
                        bytes[n..].fill(0);
                    }
                },
                |err| tracing::error!(%err, "cpal output stream error"),
                None,
            ),
            _ => device.build_output_stream(
                config,
                move |data: &mut [i16], _| {
                    let bytes: &mut [u8] = bytemuck_cast_mut_i16(data);
                    let n = ring.pop(bytes);
                    if n < bytes.len() {
                        bytes[n..].fill(0);
                    }
                },
                |err| tracing::error!(%err, "cpal output stream error"),
                None,
            ),
        },
        _ => match sample_format {
            cpal::SampleFormat::F32 => device.build_input_stream(
                config,
                move |data: &[f32], _| {
                    let bytes = bytemuck_cast_f32(data);
                    ring.push(bytes);
                },
                |err| tracing::error!(%err, "cpal input stream error"),
                None,
            ),
            _ => device.build_input_stream(
                config,
                move |data: &[i16], _| {
                    let bytes = bytemuck_cast_i16(data);
                    ring.push(bytes);
                },
                |err| tracing::error!(%err, "cpal input stream error"),
                None,
            ),
        },
    }
}

/// Reinterpret a `f32` sample slice as its little-endian byte
/// representation, matching `SampleFormat::F32Le`'s wire layout.
fn bytemuck_cast_f32(data: &[f32]) -> Vec<u8> {
    data.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn bytemuck_cast_mut_f32(data: &mut [f32]) -> &mut [u8] {
    // SAFETY: `f32` and four `u8`s share size/alignment requirements
    // trivially (there is no alignment requirement stricter than `f32`'s on
    // any platform this targets); the returned slice's lifetime is tied to
    // `data`'s borrow.
    #[allow(unsafe_code)]
    unsafe {
        std::slice::from_raw_parts_mut(data.as_mut_ptr().cast::<u8>(), std::mem::size_of_val(data))
    }
}

fn bytemuck_cast_i16(data: &[i16]) -> Vec<u8> {
    data.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn bytemuck_cast_mut_i16(data: &mut [i16]) -> &mut [u8] {
    #[allow(unsafe_code)]
    unsafe {
        std::slice::from_raw_parts_mut(data.as_mut_ptr().cast::<u8>(), std::mem::size_of_val(data))
    }
}

/// A host audio device as reported by cpal, independent of any engine
/// attachment — used by `auralinkd devices` to list what `CpalDevice::open`
/// could bind to.
#[derive(Debug, Clone)]
pub struct HostDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub default_sample_rate: u32,
}

/// Enumerate every input/output device the default cpal host can see.
pub fn list_host_devices() -> Result<Vec<HostDeviceInfo>> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            let Ok(name) = device.name() else { continue };
            let sample_rate = device
                .default_input_config()
                .map(|c| c.sample_rate().0)
                .unwrap_or(48000);
            let is_output = device.default_output_config().is_ok();
            devices.push(HostDeviceInfo {
                name,
                is_input: true,
                is_output,
                default_sample_rate: sample_rate,
            });
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            let Ok(name) = device.name() else { continue };
            if devices.iter().any(|d| d.name == name) {
                continue;
            }
            let sample_rate = device
                .default_output_config()
                .map(|c| c.sample_rate().0)
                .unwrap_or(48000);
            devices.push(HostDeviceInfo {
                name,
                is_input: false,
                is_output: true,
                default_sample_rate: sample_rate,
            });
        }
    }

    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_ring_push_pop_round_trips() {
        let ring = SharedRing::new(16);
        let pushed = ring.push(&[1, 2, 3, 4]);
        assert_eq!(pushed, 4);
        let mut out = [0u8; 4];
        let popped = ring.pop(&mut out);
        assert_eq!(popped, 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn shared_ring_caps_push_at_capacity() {
        let ring = SharedRing::new(4);
        let pushed = ring.push(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(pushed, 4);
    }
}
