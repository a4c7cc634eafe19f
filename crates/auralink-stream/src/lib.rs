//! Server-side mirror of a client stream.
//!
//! `RStream` holds everything the audio engine needs to schedule and
//! service one connected stream: its shm, its negotiated format, and its
//! callback timing. Once attached, only the audio
//! thread mutates `next_cb_ts` and shm indices — this type has no internal
//! locking because a single owner (the engine) holds it for its entire
//! attached lifetime.

pub mod error;
pub mod socket;
pub mod state;

use std::time::Instant;

use auralink_format::AudioFormat;
use auralink_proto::StreamId;
use auralink_shm::backing::ShmBacking;
use auralink_shm::Shm;

pub use error::{Result, StreamError};
pub use state::{ConnState, ConnectionState};

use bitflags::bitflags;

bitflags! {
    /// Stream flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StreamFlags: u32 {
        /// Fed from a wake-word device; uses device-driven timing, not
        /// periodic.
        const HOTWORD = 1 << 0;
    }
}

/// Stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Out,
    In,
    Unified,
    PostMixPreDsp,
}

/// Server-side object per connected stream.
pub struct RStream<B: ShmBacking> {
    pub id: StreamId,
    pub direction: StreamDirection,
    pub format: AudioFormat,
    pub buffer_frames: u32,
    pub cb_threshold: u32,
    pub min_cb_level: u32,
    pub flags: StreamFlags,
    pub shm: Shm<B>,
    pub next_cb_ts: Option<Instant>,
    conn: ConnectionState,
    num_cb_timeouts: u32,
}

impl<B: ShmBacking> RStream<B> {
    /// Construct a stream. `cb_threshold <= buffer_frames` is validated
    /// per spec.md §3 invariant.
    pub fn new(
        id: StreamId,
        direction: StreamDirection,
        format: AudioFormat,
        buffer_frames: u32,
        cb_threshold: u32,
        min_cb_level: u32,
        flags: StreamFlags,
        shm: Shm<B>,
    ) -> Result<Self> {
        if cb_threshold > buffer_frames {
            return Err(StreamError::ThresholdExceedsBuffer {
                cb_threshold,
                buffer_frames,
            });
        }
        Ok(Self {
            id,
            direction,
            format,
            buffer_frames,
            cb_threshold,
            min_cb_level,
            flags,
            shm,
            next_cb_ts: None,
            conn: ConnectionState::new(),
            num_cb_timeouts: 0,
        })
    }

    pub fn is_hotword(&self) -> bool {
        self.flags.contains(StreamFlags::HOTWORD)
    }

    pub fn conn_state(&self) -> ConnState {
        self.conn.current()
    }

    pub fn transition(&mut self, next: ConnState) -> Result<()> {
        self.conn.transition(next)
    }

    /// Deadline computation for a playback stream: `(F - T) / rate` from now, where `F` is the current
    /// shm fill and `T` is `cb_threshold`. Never earlier than `now`.
    pub fn playback_deadline(&self, shm_fill_frames: u32, now: Instant) -> Instant {
        if shm_fill_frames <= self.cb_threshold {
            return now;
        }
        let frames_until_due = shm_fill_frames - self.cb_threshold;
        let secs = frames_until_due as f64 / self.format.frame_rate_hz as f64;
        now + std::time::Duration::from_secs_f64(secs)
    }

    /// Deadline computation for a capture stream: no later
    /// than `T / rate` from the moment the half started filling.
    pub fn capture_deadline(&self, half_start: Instant) -> Instant {
        let secs = self.cb_threshold as f64 / self.format.frame_rate_hz as f64;
        half_start + std::time::Duration::from_secs_f64(secs)
    }

    /// Record a missed callback deadline: counted
    /// and logged, the stream is preserved, not detached.
    pub fn note_cb_timeout(&mut self) {
        self.num_cb_timeouts += 1;
        self.shm.header().note_cb_timeout();
        tracing::warn!(stream_id = self.id.0, total = self.num_cb_timeouts, "stream callback deadline missed");
    }

    pub fn num_cb_timeouts(&self) -> u32 {
        self.num_cb_timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auralink_format::SampleFormat;
    use auralink_shm::backing::InMemoryBacking;

    fn make_stream(cb_threshold: u32, buffer_frames: u32) -> Result<RStream<InMemoryBacking>> {
        let format = AudioFormat::simple(SampleFormat::S16Le, 48000, 2);
        let frame_bytes = format.frame_bytes();
        let used_size = (buffer_frames * frame_bytes) as usize;
        let backing = InMemoryBacking::new(used_size * 2);
        let shm = Shm::new(frame_bytes, used_size, backing).unwrap();
        RStream::new(
            StreamId::new(1, 1),
            StreamDirection::Out,
            format,
            buffer_frames,
            cb_threshold,
            1,
            StreamFlags::empty(),
            shm,
        )
    }

    #[test]
    fn threshold_over_buffer_is_rejected() {
        assert!(make_stream(500, 480).is_err());
    }

    #[test]
    fn scenario_1_deadline_is_five_ms() {
        // spec.md §8 scenario 1: buffer_frames=480, cb_threshold=240, rate
        // 48000 -> next wake at now + 240/48000s = 5ms.
        let stream = make_stream(240, 480).unwrap();
        let now = Instant::now();
        let deadline = stream.playback_deadline(480, now);
        let delta = deadline.duration_since(now);
        assert!((delta.as_secs_f64() - 0.005).abs() < 1e-6);
    }

    #[test]
    fn cb_timeout_is_counted_not_fatal() {
        let mut stream = make_stream(240, 480).unwrap();
        stream.note_cb_timeout();
        assert_eq!(stream.num_cb_timeouts(), 1);
        assert_eq!(stream.conn_state(), ConnState::Created);
    }
}
