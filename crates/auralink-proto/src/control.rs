//! Control-socket framing.
//!
//! Every message is length-prefixed: a 32-bit `length` (total bytes
//! including itself), a 32-bit `id`, and a payload. This module implements
//! only the framing and the message id/payload shapes named in spec.md —
//! not device enumeration, volume policy, or DSP reload *handlers*, which
//! are out of scope per spec.md §1 and left to [`crate::ControlHandler`].

use std::io::{self, Read, Write};

use crate::error::{ProtoError, Result};

/// Upper bound on a single control message's declared length, guarding
/// against a malformed/hostile length field forcing an unbounded
/// allocation.
pub const MAX_MESSAGE_LEN: u32 = 1 << 20;

macro_rules! message_ids {
    ($($name:ident = $val:expr),* $(,)?) => {
        /// Wire message id.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u32)]
        pub enum MessageId {
            $($name = $val),*
        }

        impl MessageId {
            pub fn from_u32(v: u32) -> Option<Self> {
                match v {
                    $($val => Some(MessageId::$name)),*,
                    _ => None,
                }
            }
        }
    };
}

message_ids! {
    ConnectStream = 1,
    DisconnectStream = 2,
    SwitchIodev = 3,
    SetSystemVolume = 4,
    SetSystemMute = 5,
    SetSystemCaptureGain = 6,
    SetNodeAttr = 7,
    SelectNode = 8,
    ReloadDsp = 9,
    ClientConnected = 100,
    StreamConnected = 101,
    StreamReattach = 102,
    IodevList = 103,
    VolumeUpdate = 104,
    ClientListUpdate = 105,
}

/// A parsed control message: the id plus its raw payload bytes. Higher
/// layers (out of scope here) interpret the payload per-id; this crate
/// only guarantees the payload round-trips byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub id: MessageId,
    pub payload: Vec<u8>,
}

impl ControlMessage {
    pub fn new(id: MessageId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Total encoded size: 4 (length) + 4 (id) + payload.
    pub fn wire_len(&self) -> u32 {
        8 + self.payload.len() as u32
    }

    /// Serialize to the wire format: `length | id | payload`.
    pub fn serialize(&self) -> Vec<u8> {
        let len = self.wire_len();
        let mut out = Vec::with_capacity(len as usize);
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&(self.id as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse one message from the front of `buf`. `parse(serialize(m)) ==
    /// m` for every valid message.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(ProtoError::Truncated {
                need: 8,
                have: buf.len(),
            });
        }
        let len = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if len > MAX_MESSAGE_LEN {
            return Err(ProtoError::TooLarge {
                len,
                max: MAX_MESSAGE_LEN,
            });
        }
        if (buf.len() as u32) < len {
            return Err(ProtoError::Truncated {
                need: len as usize,
                have: buf.len(),
            });
        }
        let id_raw = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let id = MessageId::from_u32(id_raw).ok_or(ProtoError::UnknownId(id_raw))?;
        let payload = buf[8..len as usize].to_vec();
        Ok(ControlMessage { id, payload })
    }

    /// Read one complete message from a blocking stream, one length-
    /// prefixed frame at a time.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut len_bytes = [0u8; 4];
        read_exact_mapped(r, &mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes);
        if len > MAX_MESSAGE_LEN {
            return Err(ProtoError::TooLarge {
                len,
                max: MAX_MESSAGE_LEN,
            });
        }
        if len < 8 {
            return Err(ProtoError::LengthMismatch {
                declared: len,
                actual: 0,
            });
        }
        let mut rest = vec![0u8; len as usize - 4];
        read_exact_mapped(r, &mut rest)?;
        let mut full = Vec::with_capacity(len as usize);
        full.extend_from_slice(&len_bytes);
        full.extend_from_slice(&rest);
        Self::parse(&full)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.serialize())
    }
}

fn read_exact_mapped<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    r.read_exact(buf).map_err(|_| ProtoError::Truncated {
        need: buf.len(),
        have: 0,
    })
}

/// The minimal callbacks the engine's own state machine needs to invoke in
/// response to control messages (connect/disconnect/reattach). Device
/// enumeration, volume policy, and DSP reload *handlers* are out of scope
/// per spec.md §1 and are not part of this trait.
pub trait ControlHandler: Send {
    fn on_connect_stream(&mut self, payload: &[u8]) -> Result<ControlMessage>;
    fn on_disconnect_stream(&mut self, payload: &[u8]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_message_id() {
        let ids = [
            MessageId::ConnectStream,
            MessageId::DisconnectStream,
            MessageId::SwitchIodev,
            MessageId::SetSystemVolume,
            MessageId::SetSystemMute,
            MessageId::SetSystemCaptureGain,
            MessageId::SetNodeAttr,
            MessageId::SelectNode,
            MessageId::ReloadDsp,
            MessageId::ClientConnected,
            MessageId::StreamConnected,
            MessageId::StreamReattach,
            MessageId::IodevList,
            MessageId::VolumeUpdate,
            MessageId::ClientListUpdate,
        ];
        for id in ids {
            let msg = ControlMessage::new(id, vec![1, 2, 3, 4, 5]);
            let bytes = msg.serialize();
            let parsed = ControlMessage::parse(&bytes).unwrap();
            assert_eq!(parsed, msg);
        }
    }

    #[test]
    fn empty_payload_round_trips() {
        let msg = ControlMessage::new(MessageId::DisconnectStream, vec![]);
        let bytes = msg.serialize();
        assert_eq!(bytes.len(), 8);
        assert_eq!(ControlMessage::parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn unknown_id_is_rejected() {
        let mut bytes = vec![8, 0, 0, 0, 0xff, 0xff, 0xff, 0xff];
        bytes[0] = 8;
        assert!(matches!(ControlMessage::parse(&bytes), Err(ProtoError::UnknownId(_))));
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert!(matches!(
            ControlMessage::parse(&[1, 2, 3]),
            Err(ProtoError::Truncated { .. })
        ));
    }

    #[test]
    fn read_from_stream_parses_one_frame_at_a_time() {
        let msg1 = ControlMessage::new(MessageId::ConnectStream, vec![9, 9]);
        let msg2 = ControlMessage::new(MessageId::SetSystemVolume, vec![4, 4, 4, 4]);
        let mut buf = Vec::new();
        buf.extend(msg1.serialize());
        buf.extend(msg2.serialize());

        let mut cursor = io::Cursor::new(buf);
        let read1 = ControlMessage::read_from(&mut cursor).unwrap();
        let read2 = ControlMessage::read_from(&mut cursor).unwrap();
        assert_eq!(read1, msg1);
        assert_eq!(read2, msg2);
    }
}
