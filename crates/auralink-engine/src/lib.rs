//! The audio engine: the
//! single real-time thread that owns every attached device and stream,
//! mixes/demixes audio, and drives back-ends to their deadlines.
//!
//! Everything here runs on one thread with no internal locking — streams
//! and devices are only ever touched by [`thread::AudioThread`] itself;
//! the main thread communicates purely through [`control::EngineRequest`]/
//! [`control::EngineReply`]/[`control::EngineEvent`] channels.

pub mod control;
pub mod dev_stream;
pub mod device_slot;
pub mod error;
pub mod ledger;
pub mod mixing;
pub mod rt_priority;
pub mod thread;

pub use control::{EngineEvent, EngineReply, EngineRequest, EngineSnapshot};
pub use device_slot::{DeviceId, DeviceSlot};
pub use error::{EngineError, Result};
pub use rt_priority::{DefaultRtPriority, RtPriority};
pub use thread::AudioThread;
