//! The audio engine: a single real-time thread that selects devices ready
//! to be serviced, schedules stream wakes, performs mix/demix, and drives
//! back-ends. The only mutator of `RStream` and
//! `DevStream` data-plane state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use auralink_format::FmtConv;
use auralink_iodev::{Direction, IoDevBackend};
use auralink_iodev::null::NullDevice;
use auralink_proto::{AudioMessage, StreamId};
use auralink_shm::backing::ShmBacking;
use auralink_stream::socket::AudioSocket;
use auralink_stream::{ConnState, RStream, StreamDirection};

use crate::control::{DeviceSnapshot, EngineEvent, EngineReply, EngineRequest, EngineSnapshot, StreamSnapshot};
use crate::dev_stream::DevStream;
use crate::device_slot::{DeviceId, DeviceSlot};
use crate::error::{EngineError, Result};
use crate::mixing::MixAccumulator;

/// Idle bound on a hotword stream's device: no periodic wake is scheduled,
/// but the engine still re-polls at this interval.
const HOTWORD_IDLE_WAKE: Duration = Duration::from_secs(20);

/// A fallback-device buffer size large enough for any stream this engine
/// is likely to see; real sizing comes from the negotiated format.
const FALLBACK_BUFFER_FRAMES: u32 = 4096;

struct StreamSlot<B: ShmBacking> {
    stream: RStream<B>,
    socket: Box<dyn AudioSocket>,
    /// When the current capture half started filling, for
    /// [`RStream::capture_deadline`].
    half_start: Option<Instant>,
}

/// Single real-time audio-servicing thread.
pub struct AudioThread<B: ShmBacking> {
    devices: BTreeMap<DeviceId, DeviceSlot>,
    streams: std::collections::HashMap<StreamId, StreamSlot<B>>,
    next_device_id: u32,
    fallback_out: DeviceId,
    fallback_in: DeviceId,
    requests: Receiver<EngineRequest<B>>,
    replies: Sender<EngineReply>,
    events: Sender<EngineEvent>,
}

impl<B: ShmBacking> AudioThread<B> {
    pub fn new(
        requests: Receiver<EngineRequest<B>>,
        replies: Sender<EngineReply>,
        events: Sender<EngineEvent>,
    ) -> Self {
        let mut devices = BTreeMap::new();
        let fallback_out = DeviceId(0);
        let fallback_in = DeviceId(1);
        devices.insert(
            fallback_out,
            DeviceSlot::new(
                fallback_out,
                Box::new(NullDevice::new(Direction::Out, FALLBACK_BUFFER_FRAMES)),
                Direction::Out,
                true,
            ),
        );
        devices.insert(
            fallback_in,
            DeviceSlot::new(
                fallback_in,
                Box::new(NullDevice::new(Direction::In, FALLBACK_BUFFER_FRAMES)),
                Direction::In,
                true,
            ),
        );
        Self {
            devices,
            streams: std::collections::HashMap::new(),
            next_device_id: 2,
            fallback_out,
            fallback_in,
            requests,
            replies,
            events,
        }
    }

    fn alloc_device_id(&mut self) -> DeviceId {
        let id = DeviceId(self.next_device_id);
        self.next_device_id += 1;
        id
    }

    fn fallback_id(&self, direction: Direction) -> DeviceId {
        match direction {
            Direction::Out => self.fallback_out,
            _ => self.fallback_in,
        }
    }

    /// Main loop: block on the control pipe until the next computed
    /// deadline, apply any message, then service whatever is due
    ///. Runs until `shutdown` is set or the
    /// request channel disconnects.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            let now = Instant::now();
            let next_wake = self.next_wake(now);
            let timeout = next_wake.saturating_duration_since(now);
            match self.requests.recv_timeout(timeout) {
                Ok(req) => self.handle_request(req),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.service_tick(Instant::now());
        }
    }

    /// Run exactly one scheduling pass without blocking, for tests and for
    /// `auralinkd`'s embedding of the engine in a larger poll loop.
    pub fn tick(&mut self) {
        while let Ok(req) = self.requests.try_recv() {
            self.handle_request(req);
        }
        self.service_tick(Instant::now());
    }

    fn next_wake(&self, now: Instant) -> Instant {
        let device_wake = self
            .devices
            .values()
            .filter_map(|d| d.wake_ts)
            .min()
            .unwrap_or(now + Duration::from_millis(50));
        let stream_wake = self
            .streams
            .values()
            .filter_map(|s| s.stream.next_cb_ts)
            .min()
            .unwrap_or(device_wake);
        device_wake.min(stream_wake).max(now)
    }

    fn handle_request(&mut self, req: EngineRequest<B>) {
        let reply = match req {
            EngineRequest::AddStream { stream, socket, preferred_device } => {
                match self.add_stream(*stream, socket, preferred_device) {
                    Ok(reply) => reply,
                    Err(err) => EngineReply::error(err),
                }
            }
            EngineRequest::RemoveStream { stream_id } => self.remove_stream(stream_id),
            EngineRequest::AddDevice { backend, direction } => self.add_device(backend, direction),
            EngineRequest::RemoveDevice { device_id } => match self.remove_device(device_id) {
                Ok(reply) => reply,
                Err(err) => EngineReply::error(err),
            },
            EngineRequest::Dump => EngineReply::Dump(self.snapshot()),
        };
        let _ = self.replies.send(reply);
    }

    // -- stream/device attachment -----------------------------------------

    fn add_stream(
        &mut self,
        mut stream: RStream<B>,
        socket: Box<dyn AudioSocket>,
        preferred: Option<DeviceId>,
    ) -> Result<EngineReply> {
        if stream.conn_state() == ConnState::ConnectedReady {
            stream.transition(ConnState::AttachedRunning)?;
        }
        let direction = match stream.direction {
            StreamDirection::Out => Direction::Out,
            StreamDirection::In | StreamDirection::Unified | StreamDirection::PostMixPreDsp => Direction::In,
        };

        let chosen = preferred
            .filter(|id| self.devices.get(id).is_some_and(|d| d.direction == direction))
            .or_else(|| Self::select_device(&self.devices, direction));

        let device_id = match chosen {
            Some(id) => match Self::attach_to_device(&mut self.devices, id, &mut stream) {
                Ok(()) => id,
                Err(err) => {
                    tracing::warn!(stream_id = stream.id.0, %err, "device attach failed, using fallback");
                    let fb = self.fallback_id(direction);
                    Self::attach_to_device(&mut self.devices, fb, &mut stream)?;
                    fb
                }
            },
            None => {
                let fb = self.fallback_id(direction);
                Self::attach_to_device(&mut self.devices, fb, &mut stream)?;
                fb
            }
        };

        // Newly attached streams get an immediate initial deadline.
        stream.next_cb_ts = Some(Instant::now());
        let format = stream.format;
        let stream_id = stream.id;
        self.streams.insert(stream_id, StreamSlot { stream, socket, half_start: None });
        Ok(EngineReply::StreamAttached { stream_id, device_id, format })
    }

    fn select_device(devices: &BTreeMap<DeviceId, DeviceSlot>, direction: Direction) -> Option<DeviceId> {
        devices
            .values()
            .find(|d| !d.is_fallback && d.direction == direction)
            .map(|d| d.id)
    }

    fn attach_to_device(
        devices: &mut BTreeMap<DeviceId, DeviceSlot>,
        device_id: DeviceId,
        stream: &mut RStream<B>,
    ) -> Result<()> {
        let device = devices.get_mut(&device_id).ok_or(EngineError::UnknownDevice(device_id))?;
        if !device.backend.is_open() {
            device.backend.open(stream.format)?;
        }
        let dev_format = device.backend.format().ok_or(auralink_iodev::IoDevError::NotOpen)?;
        let converter = if dev_format == stream.format {
            None
        } else {
            Some(FmtConv::new(stream.format, dev_format)?)
        };
        device.dev_streams.push(DevStream::new(stream.id, converter));
        device.idle_since = None;
        device.wake_ts = Some(Instant::now());
        Ok(())
    }

    /// Idempotent: removing an unknown
    /// stream id is a no-op success, not an error.
    fn remove_stream(&mut self, stream_id: StreamId) -> EngineReply {
        if let Some(mut slot) = self.streams.remove(&stream_id) {
            for device in self.devices.values_mut() {
                device.remove_stream(stream_id);
            }
            let _ = slot.stream.transition(ConnState::Detaching);
            let _ = slot.stream.transition(ConnState::Dead);
        }
        EngineReply::StreamRemoved { stream_id }
    }

    fn add_device(&mut self, backend: Box<dyn IoDevBackend>, direction: Direction) -> EngineReply {
        let id = self.alloc_device_id();
        self.devices.insert(id, DeviceSlot::new(id, backend, direction, false));
        EngineReply::DeviceAdded { device_id: id }
    }

    /// Device removed while streams are attached: reattach every stream to
    /// the fallback device and notify main.
    fn remove_device(&mut self, device_id: DeviceId) -> Result<EngineReply> {
        let Some(mut device) = self.devices.remove(&device_id) else {
            return Ok(EngineReply::DeviceRemoved { device_id });
        };
        if device.is_fallback {
            self.devices.insert(device_id, device);
            return Ok(EngineReply::DeviceRemoved { device_id });
        }
        let _ = device.backend.close();
        let direction = device.direction;
        let fallback = self.fallback_id(direction);

        for ds in device.dev_streams.drain(..) {
            let Some(slot) = self.streams.get_mut(&ds.stream_id) else { continue };
            let _ = slot.stream.transition(ConnState::AwaitingConnect);
            if Self::attach_to_device(&mut self.devices, fallback, &mut slot.stream).is_ok() {
                let _ = slot.stream.transition(ConnState::ConnectedReady);
                let _ = slot.stream.transition(ConnState::AttachedRunning);
            }
            let _ = self.events.send(EngineEvent::StreamReattach { stream_id: ds.stream_id });
        }
        Ok(EngineReply::DeviceRemoved { device_id })
    }

    // -- per-tick device service and deadline checks -----------------------

    fn service_tick(&mut self, now: Instant) {
        let due: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|(_, d)| d.wake_ts.is_some_and(|t| t <= now) && !d.dev_streams.is_empty())
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            let direction = self.devices[&id].direction;
            let result = match direction {
                Direction::Out => self.service_output_device(id, now),
                Direction::In => self.service_input_device(id, now),
                Direction::Unified | Direction::PostMixPreDsp => Ok(()),
            };
            if let Err(err) = result {
                self.handle_device_error(id, err);
            }
        }

        self.check_stream_deadlines(now);
        self.close_idle_devices(now);
    }

    fn handle_device_error(&mut self, device_id: DeviceId, err: EngineError) {
        tracing::warn!(?device_id, %err, "device service pass failed, detaching streams");
        let _ = self.events.send(EngineEvent::DeviceError {
            device_id,
            message: err.to_string(),
        });
        let _ = self.remove_device(device_id);
    }

    /// Mixing pass for one output device.
    fn service_output_device(&mut self, device_id: DeviceId, now: Instant) -> Result<()> {
        let device = self.devices.get_mut(&device_id).ok_or(EngineError::UnknownDevice(device_id))?;
        if device.dev_streams.is_empty() {
            device.wake_ts = None;
            return Ok(());
        }

        let frames_queued = device.backend.frames_queued()?;
        let buffer_size = device.backend.buffer_size();
        let min_buffer_level = device.backend.min_buffer_level();

        let mut cb_threshold_min = u32::MAX;
        for ds in &device.dev_streams {
            if let Some(slot) = self.streams.get(&ds.stream_id) {
                cb_threshold_min = cb_threshold_min.min(slot.stream.cb_threshold.max(1));
            }
        }
        if cb_threshold_min == u32::MAX {
            return Ok(());
        }
        if buffer_size.saturating_sub(frames_queued) < cb_threshold_min {
            device.wake_ts = Some(now + Duration::from_millis(1));
            return Ok(());
        }

        // cb_threshold only gates *whether* to service (checked above); the
        // amount pulled is all the device has room for. The ledger's
        // cross-stream minimum, not this cap, limits the real advance.
        let frames_wanted = buffer_size.saturating_sub(frames_queued);
        let format = device.backend.format().ok_or(auralink_iodev::IoDevError::NotOpen)?;
        let out_channels = format.channel_count as usize;
        let out_frame_bytes = format.frame_bytes();
        let sample_bytes = format.sample_format.sample_bytes();

        let dev_buf = device.backend.get_buffer(frames_wanted)?;
        let frames_granted = dev_buf.frames;
        if frames_granted == 0 {
            device.wake_ts = Some(now + Duration::from_millis(1));
            return Ok(());
        }

        let mut accum = MixAccumulator::new(frames_granted as usize, out_channels);
        let mut pending_commit: Vec<(StreamId, u32, u32)> = Vec::new(); // (id, take_in, raw_dev_offset)
        let mut cb_timeouts = Vec::new();

        for ds in device.dev_streams.iter_mut() {
            let Some(slot) = self.streams.get_mut(&ds.stream_id) else { continue };
            let stream = &mut slot.stream;
            let in_frame_bytes = stream.format.frame_bytes();
            let want_in = ds.out_frames_to_in(frames_granted);
            let avail_in = stream.shm.begin_read();
            let take_in = avail_in.min(want_in);

            if take_in == 0 {
                // A missed deadline is counted and fed silence, not detached;
                // it still fully "contributes" so it does not block the
                // ledger's cross-stream minimum.
                if stream.next_cb_ts.is_some_and(|t| t <= now) {
                    stream.note_cb_timeout();
                    cb_timeouts.push(stream.id);
                }
                device.ledger.record(ds.stream_id, frames_granted);
                ds.dev_offset = 0;
                continue;
            }

            let mut raw = vec![0u8; take_in as usize * in_frame_bytes as usize];
            stream.shm.read_samples(&mut raw);

            ds.ensure_scratch(frames_granted, out_frame_bytes);
            let produced = if let Some(conv) = ds.converter.as_mut() {
                conv.convert(&raw, &mut ds.scratch, take_in, frames_granted)
            } else {
                let n = take_in.min(frames_granted);
                let bytes = n as usize * out_frame_bytes as usize;
                ds.scratch[..bytes].copy_from_slice(&raw[..bytes]);
                n
            };
            ds.dev_offset = produced;
            device.ledger.record(ds.stream_id, produced);
            pending_commit.push((ds.stream_id, take_in, produced));

            let scale = stream.shm.volume_scaler();
            for f in 0..produced as usize {
                let base = f * out_frame_bytes as usize;
                for ch in 0..out_channels {
                    let off = base + ch * sample_bytes;
                    let v = format.sample_format.normalize(&ds.scratch[off..off + sample_bytes]);
                    accum.add_sample(f, ch, v, scale);
                }
            }
        }

        let min_dev = device.ledger.advance();

        for (stream_id, take_in, produced) in pending_commit {
            let Some(slot) = self.streams.get_mut(&stream_id) else { continue };
            let ds = device.dev_streams.iter().find(|d| d.stream_id == stream_id);
            let actual_in = if produced > 0 {
                ds.map_or(min_dev, |d| d.out_frames_to_in(min_dev)).min(take_in)
            } else {
                0
            };
            slot.stream.shm.commit_read(actual_in);
        }

        for f in 0..min_dev as usize {
            let base = f * out_frame_bytes as usize;
            for ch in 0..out_channels {
                let off = base + ch * sample_bytes;
                format
                    .sample_format
                    .denormalize(accum.get(f, ch), &mut dev_buf.bytes[off..off + sample_bytes]);
            }
        }

        if let Some(tap) = &device.pre_dsp_tap {
            tap.ring.write_tap(&dev_buf.bytes[..min_dev as usize * out_frame_bytes as usize]);
        }
        // DSP filter bodies are a pluggable per-device transform we don't
        // implement here; the post-DSP tap observes the signal unchanged
        // in the absence of a configured DSP chain.
        if let Some(tap) = &device.post_dsp_tap {
            tap.ring.write_tap(&dev_buf.bytes[..min_dev as usize * out_frame_bytes as usize]);
        }

        device.backend.put_buffer(min_dev)?;

        let frames_queued_after = device.backend.frames_queued()?;
        device.wake_ts = Some(if frames_queued_after <= min_buffer_level {
            now
        } else {
            let secs = (frames_queued_after - min_buffer_level) as f64 / format.frame_rate_hz as f64;
            now + Duration::from_secs_f64(secs)
        });

        for stream_id in cb_timeouts {
            let _ = self.events.send(EngineEvent::CallbackTimeout {
                stream_id,
                total: self.streams.get(&stream_id).map_or(0, |s| s.stream.num_cb_timeouts()),
            });
        }

        Ok(())
    }

    /// Fan-out pass for one input device; bulk-drains in one shot only when
    /// every attached stream is a hotword stream. A device mixing a hotword
    /// stream with an ordinary periodic one still services at the ordinary
    /// periodic rate, since only the hotword stream's own timing is
    /// device-driven, not the whole device's.
    fn service_input_device(&mut self, device_id: DeviceId, now: Instant) -> Result<()> {
        let device = self.devices.get_mut(&device_id).ok_or(EngineError::UnknownDevice(device_id))?;
        if device.dev_streams.is_empty() {
            device.wake_ts = None;
            return Ok(());
        }

        let format = device.backend.format().ok_or(auralink_iodev::IoDevError::NotOpen)?;
        let in_frame_bytes = format.frame_bytes();
        let queued = device.backend.frames_queued()?;
        if queued == 0 {
            device.wake_ts = Some(now + Duration::from_millis(5));
            return Ok(());
        }
        let all_hotword = device
            .dev_streams
            .iter()
            .all(|ds| self.streams.get(&ds.stream_id).is_some_and(|s| s.stream.is_hotword()));
        let frames_wanted = if all_hotword { queued } else { queued.min(device.backend.buffer_size()) };

        let captured_bytes = {
            let dev_buf = device.backend.get_buffer(frames_wanted)?;
            dev_buf.bytes[..dev_buf.frames as usize * in_frame_bytes as usize].to_vec()
        };
        let frames_captured = (captured_bytes.len() / in_frame_bytes.max(1) as usize) as u32;
        device.backend.put_buffer(frames_captured)?;

        if frames_captured == 0 {
            device.wake_ts = Some(now + Duration::from_millis(5));
            return Ok(());
        }

        for ds in device.dev_streams.iter_mut() {
            let Some(slot) = self.streams.get_mut(&ds.stream_id) else { continue };
            let stream = &mut slot.stream;
            let out_frame_bytes = stream.format.frame_bytes();
            let want_out = ds.in_frames_to_out(frames_captured);
            ds.ensure_scratch(want_out, out_frame_bytes);
            let produced = if let Some(conv) = ds.converter.as_mut() {
                conv.convert(&captured_bytes, &mut ds.scratch, frames_captured, want_out)
            } else {
                let n = frames_captured.min(want_out);
                let bytes = n as usize * out_frame_bytes as usize;
                ds.scratch[..bytes].copy_from_slice(&captured_bytes[..bytes]);
                n
            };

            let room = stream.shm.begin_write();
            let to_write = produced.min(room);
            ds.dev_offset = to_write;
            if to_write == 0 {
                stream.shm.header().note_overrun();
                continue;
            }
            let bytes = to_write as usize * out_frame_bytes as usize;
            stream.shm.write_samples(&ds.scratch[..bytes]);
            let flipped = stream.shm.commit_write(to_write);

            if stream.is_hotword() {
                let _ = slot.socket.send(AudioMessage::data_ready(to_write));
                slot.half_start = None;
                device.wake_ts = Some(now + HOTWORD_IDLE_WAKE);
            } else {
                if slot.half_start.is_none() {
                    slot.half_start = Some(now);
                }
                if flipped {
                    let _ = slot.socket.send(AudioMessage::data_ready(to_write));
                    slot.half_start = Some(now);
                }
                stream.next_cb_ts = Some(stream.capture_deadline(slot.half_start.unwrap_or(now)));
            }
        }

        // Any ordinary stream on this device still needs periodic pacing,
        // even if a co-attached hotword stream also set `wake_ts` above.
        if !all_hotword {
            let secs = (device.backend.min_buffer_level().max(1)) as f64 / format.frame_rate_hz as f64;
            device.wake_ts = Some(now + Duration::from_secs_f64(secs));
        }

        Ok(())
    }

    /// Playback streams whose deadline elapsed get a direct `REQUEST_DATA`
    /// nudge even outside a device servicing pass (e.g. a stream attached
    /// to a currently-idle device). Capture-side timing is owned entirely
    /// by [`Self::service_input_device`].
    fn check_stream_deadlines(&mut self, now: Instant) {
        for slot in self.streams.values_mut() {
            if slot.stream.is_hotword() || slot.stream.direction != StreamDirection::Out {
                continue;
            }
            if slot.stream.conn_state() != ConnState::AttachedRunning {
                continue;
            }
            let Some(deadline) = slot.stream.next_cb_ts else { continue };
            if deadline > now {
                continue;
            }
            let fill = slot.stream.shm.begin_read();
            let _ = slot.socket.send(AudioMessage::request_data(fill));
            slot.stream.next_cb_ts = Some(slot.stream.playback_deadline(fill, now));
        }
    }

    fn close_idle_devices(&mut self, now: Instant) {
        for device in self.devices.values_mut() {
            if device.is_fallback {
                continue;
            }
            if device.dev_streams.is_empty() {
                match device.idle_since {
                    None => device.idle_since = Some(now),
                    Some(since) if now.duration_since(since) >= device.backend.idle_close_timeout() => {
                        if device.backend.is_open() {
                            let _ = device.backend.close();
                            tracing::debug!(device_id = ?device.id, "closed idle device");
                        }
                    }
                    Some(_) => {}
                }
            } else {
                device.idle_since = None;
            }
        }
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            devices: self
                .devices
                .values()
                .map(|d| DeviceSnapshot {
                    id: d.id,
                    direction: d.direction,
                    state: d.state(),
                    attached_streams: d.dev_streams.iter().map(|ds| ds.stream_id).collect(),
                    is_fallback: d.is_fallback,
                })
                .collect(),
            streams: self
                .streams
                .values()
                .map(|s| StreamSnapshot {
                    id: s.stream.id,
                    conn_state: s.stream.conn_state(),
                    num_cb_timeouts: s.stream.num_cb_timeouts(),
                })
                .collect(),
        }
    }

    /// Test/introspection accessor: is a stream currently attached to any
    /// device, and which one?
    #[cfg(test)]
    pub(crate) fn device_of(&self, stream_id: StreamId) -> Option<DeviceId> {
        self.devices
            .values()
            .find(|d| d.has_stream(stream_id))
            .map(|d| d.id)
    }

    #[cfg(test)]
    pub(crate) fn device(&self, id: DeviceId) -> Option<&DeviceSlot> {
        self.devices.get(&id)
    }

    #[cfg(test)]
    pub(crate) fn stream(&self, id: StreamId) -> Option<&RStream<B>> {
        self.streams.get(&id).map(|s| &s.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auralink_format::{AudioFormat, SampleFormat};
    use auralink_shm::backing::InMemoryBacking;
    use auralink_shm::Shm;
    use auralink_stream::socket::LoopbackAudioSocket;
    use auralink_stream::StreamFlags;

    fn stereo_48k() -> AudioFormat {
        AudioFormat::simple(SampleFormat::S16Le, 48000, 2)
    }

    fn new_engine() -> (
        AudioThread<InMemoryBacking>,
        Sender<EngineRequest<InMemoryBacking>>,
        Receiver<EngineReply>,
        Receiver<EngineEvent>,
    ) {
        let (req_tx, req_rx) = crossbeam_channel::unbounded();
        let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        (AudioThread::new(req_rx, reply_tx, event_tx), req_tx, reply_rx, event_rx)
    }

    fn make_ready_stream(
        id: StreamId,
        buffer_frames: u32,
        cb_threshold: u32,
        prefill_frames: u32,
    ) -> RStream<InMemoryBacking> {
        let format = stereo_48k();
        let frame_bytes = format.frame_bytes();
        let used_size = (buffer_frames * frame_bytes) as usize;
        let shm = Shm::new(frame_bytes, used_size, InMemoryBacking::new(used_size * 2)).unwrap();
        let mut stream = RStream::new(
            id,
            StreamDirection::Out,
            format,
            buffer_frames,
            cb_threshold,
            1,
            StreamFlags::empty(),
            shm,
        )
        .unwrap();
        stream.transition(ConnState::AwaitingConnect).unwrap();
        stream.transition(ConnState::ConnectedReady).unwrap();
        if prefill_frames > 0 {
            let bytes = vec![0u8; prefill_frames as usize * frame_bytes as usize];
            assert!(stream.shm.begin_write() >= prefill_frames);
            stream.shm.write_samples(&bytes);
            stream.shm.commit_write(prefill_frames);
        }
        stream
    }

    #[test]
    fn differing_fill_levels_advance_by_the_shared_minimum() {
        // Stream A has 480 frames ready, stream B has 240; the device can
        // only advance by the minimum the two streams agree on.
        let (mut engine, _req_tx, _reply_rx, _event_rx) = new_engine();
        let EngineReply::DeviceAdded { device_id } =
            engine.add_device(Box::new(NullDevice::new(Direction::Out, 480)), Direction::Out)
        else {
            panic!("expected DeviceAdded");
        };

        let stream_a = make_ready_stream(StreamId::new(1, 1), 480, 240, 480);
        let stream_b = make_ready_stream(StreamId::new(1, 2), 480, 240, 240);

        engine
            .add_stream(stream_a, Box::new(LoopbackAudioSocket::default()), Some(device_id))
            .unwrap();
        engine
            .add_stream(stream_b, Box::new(LoopbackAudioSocket::default()), Some(device_id))
            .unwrap();

        engine.service_output_device(device_id, Instant::now()).unwrap();

        let remaining_a = engine.stream(StreamId::new(1, 1)).unwrap().shm.begin_read();
        let remaining_b = engine.stream(StreamId::new(1, 2)).unwrap().shm.begin_read();
        assert_eq!(remaining_a, 240);
        assert_eq!(remaining_b, 0);
    }

    fn make_capture_stream(id: StreamId, buffer_frames: u32, cb_threshold: u32, hotword: bool) -> RStream<InMemoryBacking> {
        let format = stereo_48k();
        let frame_bytes = format.frame_bytes();
        let used_size = (buffer_frames * frame_bytes) as usize;
        let shm = Shm::new(frame_bytes, used_size, InMemoryBacking::new(used_size * 2)).unwrap();
        let flags = if hotword { StreamFlags::HOTWORD } else { StreamFlags::empty() };
        let mut stream = RStream::new(id, StreamDirection::In, format, buffer_frames, cb_threshold, 1, flags, shm).unwrap();
        stream.transition(ConnState::AwaitingConnect).unwrap();
        stream.transition(ConnState::ConnectedReady).unwrap();
        stream
    }

    #[test]
    fn hotword_stream_does_not_starve_a_co_attached_ordinary_capture_stream() {
        // A hotword stream attached to the same input device as an ordinary
        // stream must not suppress the ordinary stream's periodic wake --
        // only the hotword stream's own timing is device-driven.
        use auralink_iodev::loopback::{LoopbackDevice, LoopbackRing};

        let (mut engine, _req_tx, _reply_rx, _event_rx) = new_engine();
        let ring = LoopbackRing::new(1 << 16);
        let EngineReply::DeviceAdded { device_id } =
            engine.add_device(Box::new(LoopbackDevice::new(ring.clone(), 480)), Direction::In)
        else {
            panic!("expected DeviceAdded");
        };

        let hotword_id = StreamId::new(5, 1);
        let ordinary_id = StreamId::new(5, 2);
        engine
            .add_stream(make_capture_stream(hotword_id, 4096, 240, true), Box::new(LoopbackAudioSocket::default()), Some(device_id))
            .unwrap();
        engine
            .add_stream(make_capture_stream(ordinary_id, 480, 240, false), Box::new(LoopbackAudioSocket::default()), Some(device_id))
            .unwrap();

        let frame_bytes = stereo_48k().frame_bytes() as usize;
        ring.write_tap(&vec![0u8; frame_bytes * 100]);

        engine.service_input_device(device_id, Instant::now()).unwrap();

        let wake_ts = engine.device(device_id).unwrap().wake_ts.expect("device must re-arm");
        let until_wake = wake_ts.saturating_duration_since(Instant::now());
        assert!(
            until_wake < HOTWORD_IDLE_WAKE,
            "ordinary stream must keep the device on a periodic wake, not the 20s hotword idle wake"
        );
    }

    #[test]
    fn single_stream_fully_ready_advances_by_all_ready_frames_not_cb_threshold() {
        // spec.md §8 scenario 1: buffer_frames=480, cb_threshold=240,
        // device buffer_size=960. A single stream with a full 480 frames
        // ready must have the device consume all 480, not just cb_threshold
        // worth of them -- cb_threshold only gates whether to service.
        let (mut engine, _req_tx, _reply_rx, _event_rx) = new_engine();
        let EngineReply::DeviceAdded { device_id } =
            engine.add_device(Box::new(NullDevice::new(Direction::Out, 960)), Direction::Out)
        else {
            panic!("expected DeviceAdded");
        };

        let stream_id = StreamId::new(4, 1);
        let stream = make_ready_stream(stream_id, 480, 240, 480);
        engine
            .add_stream(stream, Box::new(LoopbackAudioSocket::default()), Some(device_id))
            .unwrap();

        engine.service_output_device(device_id, Instant::now()).unwrap();

        let remaining = engine.stream(stream_id).unwrap().shm.begin_read();
        assert_eq!(remaining, 0, "all 480 ready frames must be consumed in one pass");
    }

    #[test]
    fn add_stream_falls_back_when_no_real_device_registered() {
        let (mut engine, _req_tx, _reply_rx, _event_rx) = new_engine();
        let stream = make_ready_stream(StreamId::new(2, 1), 480, 240, 0);
        let reply = engine
            .add_stream(stream, Box::new(LoopbackAudioSocket::default()), None)
            .unwrap();
        let EngineReply::StreamAttached { device_id, .. } = reply else {
            panic!("expected StreamAttached");
        };
        assert_eq!(device_id, engine.fallback_out);
    }

    #[test]
    fn removing_a_device_reattaches_its_streams_to_the_fallback() {
        let (mut engine, _req_tx, _reply_rx, event_rx) = new_engine();
        let EngineReply::DeviceAdded { device_id } =
            engine.add_device(Box::new(NullDevice::new(Direction::Out, 480)), Direction::Out)
        else {
            panic!("expected DeviceAdded");
        };
        let stream_id = StreamId::new(3, 1);
        let stream = make_ready_stream(stream_id, 480, 240, 0);
        engine
            .add_stream(stream, Box::new(LoopbackAudioSocket::default()), Some(device_id))
            .unwrap();
        assert_eq!(engine.device_of(stream_id), Some(device_id));

        engine.remove_device(device_id).unwrap();

        assert_eq!(engine.device_of(stream_id), Some(engine.fallback_out));
        assert_eq!(engine.stream(stream_id).unwrap().conn_state(), ConnState::AttachedRunning);
        assert!(matches!(event_rx.try_recv(), Ok(EngineEvent::StreamReattach { stream_id: s }) if s == stream_id));
    }

    #[test]
    fn removing_an_unknown_stream_is_a_no_op() {
        let (mut engine, _req_tx, _reply_rx, _event_rx) = new_engine();
        let reply = engine.remove_stream(StreamId::new(9, 9));
        assert!(matches!(reply, EngineReply::StreamRemoved { .. }));
    }

    #[test]
    fn a_fallback_device_is_never_user_removable() {
        let (mut engine, _req_tx, _reply_rx, _event_rx) = new_engine();
        let fallback = engine.fallback_out;
        engine.remove_device(fallback).unwrap();
        assert!(engine.device(fallback).is_some());
    }
}
