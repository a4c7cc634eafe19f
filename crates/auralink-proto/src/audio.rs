//! Audio-socket framing: one per stream, fixed-size messages.

use std::io::{self, Read, Write};

use crate::error::{ProtoError, Result};

pub const AUDIO_MESSAGE_LEN: usize = 12;

/// Audio-socket message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AudioMessageId {
    /// server -> client, playback: ask for more frames.
    RequestData = 1,
    /// either direction: data is ready to be consumed.
    DataReady = 2,
}

impl AudioMessageId {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(AudioMessageId::RequestData),
            2 => Some(AudioMessageId::DataReady),
            _ => None,
        }
    }
}

/// Fixed-size audio-socket message: `{id: u32, frames: u32, error: i32}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioMessage {
    pub id: AudioMessageId,
    pub frames: u32,
    pub error: i32,
}

impl AudioMessage {
    pub fn request_data(frames: u32) -> Self {
        Self {
            id: AudioMessageId::RequestData,
            frames,
            error: 0,
        }
    }

    pub fn data_ready(frames: u32) -> Self {
        Self {
            id: AudioMessageId::DataReady,
            frames,
            error: 0,
        }
    }

    pub fn error(id: AudioMessageId, error: i32) -> Self {
        Self { id, frames: 0, error }
    }

    pub fn serialize(&self) -> [u8; AUDIO_MESSAGE_LEN] {
        let mut out = [0u8; AUDIO_MESSAGE_LEN];
        out[0..4].copy_from_slice(&(self.id as u32).to_le_bytes());
        out[4..8].copy_from_slice(&self.frames.to_le_bytes());
        out[8..12].copy_from_slice(&self.error.to_le_bytes());
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < AUDIO_MESSAGE_LEN {
            return Err(ProtoError::Truncated {
                need: AUDIO_MESSAGE_LEN,
                have: buf.len(),
            });
        }
        let id_raw = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let id = AudioMessageId::from_u32(id_raw).ok_or(ProtoError::UnknownId(id_raw))?;
        let frames = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let error = i32::from_le_bytes(buf[8..12].try_into().unwrap());
        Ok(Self { id, frames, error })
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut buf = [0u8; AUDIO_MESSAGE_LEN];
        r.read_exact(&mut buf).map_err(|_| ProtoError::Truncated {
            need: AUDIO_MESSAGE_LEN,
            have: 0,
        })?;
        Self::parse(&buf)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_data_round_trips() {
        let msg = AudioMessage::request_data(240);
        let bytes = msg.serialize();
        assert_eq!(AudioMessage::parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn data_ready_round_trips() {
        let msg = AudioMessage::data_ready(480);
        let bytes = msg.serialize();
        assert_eq!(AudioMessage::parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn error_message_round_trips() {
        let msg = AudioMessage::error(AudioMessageId::RequestData, -5);
        let bytes = msg.serialize();
        assert_eq!(AudioMessage::parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn unknown_id_rejected() {
        let mut buf = [0u8; AUDIO_MESSAGE_LEN];
        buf[0..4].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(AudioMessage::parse(&buf), Err(ProtoError::UnknownId(_))));
    }
}
