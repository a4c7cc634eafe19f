//! Messages posted on the main→engine wakeup pipe and the engine→main
//! reply/event channels.
//!
//! Modeled as [`crossbeam_channel`] channels rather than a literal pipe —
//! the engine's main loop blocks on `requests.recv_timeout` the same way
//! it would block in `pselect` on a real pipe fd, and FIFO delivery plus
//! one-reply-per-message falls out of
//! the channel's own ordering guarantee.

use auralink_format::AudioFormat;
use auralink_iodev::{Direction, IoDevBackend};
use auralink_proto::StreamId;
use auralink_shm::backing::ShmBacking;
use auralink_stream::{socket::AudioSocket, RStream};

use crate::device_slot::DeviceId;
use crate::error::EngineError;

/// A request posted on the main→engine pipe. Only one is ever in flight: the engine sends a single reply
/// before consuming the next.
pub enum EngineRequest<B: ShmBacking> {
    /// Attach a newly `CONNECTED_READY` stream.
    AddStream {
        stream: Box<RStream<B>>,
        socket: Box<dyn AudioSocket>,
        preferred_device: Option<DeviceId>,
    },
    /// Idempotent stream removal.
    RemoveStream { stream_id: StreamId },
    /// Register a new back-end with the engine.
    AddDevice {
        backend: Box<dyn IoDevBackend>,
        direction: Direction,
    },
    /// Hotplug/node-switch removal; triggers reattach for any attached
    /// streams.
    RemoveDevice { device_id: DeviceId },
    /// Snapshot of scheduler state for `auralinkd dump`.
    Dump,
}

/// One reply per [`EngineRequest`], sent before the next request is
/// consumed.
#[derive(Debug)]
pub enum EngineReply {
    StreamAttached { stream_id: StreamId, device_id: DeviceId, format: AudioFormat },
    StreamRemoved { stream_id: StreamId },
    DeviceAdded { device_id: DeviceId },
    DeviceRemoved { device_id: DeviceId },
    Dump(EngineSnapshot),
    Error(String),
}

impl EngineReply {
    pub fn error(err: EngineError) -> Self {
        EngineReply::Error(err.to_string())
    }
}

/// A point-in-time snapshot of scheduler state, independent of any
/// in-flight request.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub devices: Vec<DeviceSnapshot>,
    pub streams: Vec<StreamSnapshot>,
}

#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    pub direction: Direction,
    pub state: auralink_iodev::DevState,
    pub attached_streams: Vec<StreamId>,
    pub is_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    pub id: StreamId,
    pub conn_state: auralink_stream::ConnState,
    pub num_cb_timeouts: u32,
}

/// Asynchronous, engine-initiated notifications to main — not replies to
/// any specific request.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Device removed/errored while streams were attached; main should
    /// replay `CONNECT` for this stream against the currently-selected
    /// device.
    StreamReattach { stream_id: StreamId },
    /// Repeated back-end failures marked a device `ERROR`.
    DeviceError { device_id: DeviceId, message: String },
    /// A callback deadline was missed; the stream is preserved, not
    /// detached.
    CallbackTimeout { stream_id: StreamId, total: u32 },
}
