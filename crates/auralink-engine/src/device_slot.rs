//! One attached device as the engine sees it: its back-end, its lifecycle
//! state, its attached [`crate::dev_stream::DevStream`]s, its buffer-share
//! ledger, and its next servicing deadline.

use std::time::Instant;

use auralink_iodev::{DevState, Direction, IoDevBackend};

use crate::dev_stream::DevStream;
use crate::ledger::BufferShareLedger;

/// Opaque device id, assigned by the engine when a device is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

/// A loopback tap hook invoked immediately after mix (pre-DSP) or after
/// DSP (post-DSP), feeding a [`auralink_iodev::loopback::LoopbackRing`].
pub struct TapHook {
    pub ring: auralink_iodev::loopback::LoopbackRing,
    pub post_dsp: bool,
}

pub struct DeviceSlot {
    pub id: DeviceId,
    pub backend: Box<dyn IoDevBackend>,
    pub direction: Direction,
    pub dev_streams: Vec<DevStream>,
    pub ledger: BufferShareLedger,
    pub wake_ts: Option<Instant>,
    pub idle_since: Option<Instant>,
    pub is_fallback: bool,
    pub pre_dsp_tap: Option<TapHook>,
    pub post_dsp_tap: Option<TapHook>,
}

impl DeviceSlot {
    pub fn new(id: DeviceId, backend: Box<dyn IoDevBackend>, direction: Direction, is_fallback: bool) -> Self {
        Self {
            id,
            backend,
            direction,
            dev_streams: Vec::new(),
            ledger: BufferShareLedger::new(),
            wake_ts: None,
            idle_since: None,
            is_fallback,
            pre_dsp_tap: None,
            post_dsp_tap: None,
        }
    }

    pub fn state(&self) -> DevState {
        if !self.backend.is_open() {
            DevState::Closed
        } else if self.backend.dev_running() {
            DevState::Running
        } else {
            DevState::OpenIdle
        }
    }

    pub fn has_stream(&self, stream_id: auralink_proto::StreamId) -> bool {
        self.dev_streams.iter().any(|d| d.stream_id == stream_id)
    }

    pub fn remove_stream(&mut self, stream_id: auralink_proto::StreamId) -> Option<DevStream> {
        let idx = self.dev_streams.iter().position(|d| d.stream_id == stream_id)?;
        self.ledger.remove_stream(stream_id);
        Some(self.dev_streams.remove(idx))
    }
}
