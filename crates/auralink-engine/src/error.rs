//! Unified engine error kinds: `PROTOCOL` / `NEGOTIATION` /
//! `RESOURCE` / `DEVICE` / `TIMING` / `DISCONNECT`, as one crate-scoped
//! `thiserror` enum so call sites match on a closed set rather than a
//! stringly-typed catch-all.

use thiserror::Error;

use auralink_format::FormatError;
use auralink_iodev::IoDevError;
use auralink_proto::ProtoError;
use auralink_stream::StreamError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed message, unknown opcode, truncated read.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// No intersection of supported formats between stream and device.
    #[error("no format intersection between stream and device")]
    Negotiation,

    /// shm allocation, socket creation, thread spawn failure.
    #[error("resource error: {0}")]
    Resource(#[from] StreamError),

    /// Back-end `open`/`put_buffer` failure.
    #[error("device error: {0}")]
    Device(#[from] IoDevError),

    /// Format converter construction failed.
    #[error("format converter error: {0}")]
    Format(#[from] FormatError),

    /// Referenced a stream id the engine doesn't know about.
    #[error("unknown stream id {0:?}")]
    UnknownStream(auralink_proto::StreamId),

    /// Referenced a device id the engine doesn't know about.
    #[error("unknown device id {0:?}")]
    UnknownDevice(crate::device_slot::DeviceId),
}

pub type Result<T> = std::result::Result<T, EngineError>;
