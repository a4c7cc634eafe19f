//! Shared-memory key payloads carried inside `CLIENT_CONNECTED` and
//! `STREAM_CONNECTED` control messages.
//!
//! Keys are POSIX shm segment names (see `auralink_shm::posix`), encoded as
//! fixed-width, nul-padded byte strings so the payload stays a flat struct
//! layout rather than a length-prefixed one, matching the rest of this
//! crate's "raw struct over socket" wire format.

use crate::error::{ProtoError, Result};

/// Maximum encoded length of a shm segment name.
pub const KEY_LEN: usize = 64;

fn encode_key(key: &str, out: &mut [u8; KEY_LEN]) {
    let bytes = key.as_bytes();
    let n = bytes.len().min(KEY_LEN);
    out[..n].copy_from_slice(&bytes[..n]);
    out[n..].fill(0);
}

fn decode_key(bytes: &[u8; KEY_LEN]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(KEY_LEN);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Payload of a `CLIENT_CONNECTED` reply: the assigned client id and the
/// key of the read-only server-state shm region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConnectedPayload {
    pub client_id: u32,
    pub server_state_key: String,
    pub state_version: u32,
}

impl ClientConnectedPayload {
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + KEY_LEN + 4);
        out.extend_from_slice(&self.client_id.to_le_bytes());
        let mut key_buf = [0u8; KEY_LEN];
        encode_key(&self.server_state_key, &mut key_buf);
        out.extend_from_slice(&key_buf);
        out.extend_from_slice(&self.state_version.to_le_bytes());
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let need = 4 + KEY_LEN + 4;
        if buf.len() < need {
            return Err(ProtoError::Truncated { need, have: buf.len() });
        }
        let client_id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let mut key_buf = [0u8; KEY_LEN];
        key_buf.copy_from_slice(&buf[4..4 + KEY_LEN]);
        let server_state_key = decode_key(&key_buf);
        let state_version = u32::from_le_bytes(buf[4 + KEY_LEN..need].try_into().unwrap());
        Ok(Self {
            client_id,
            server_state_key,
            state_version,
        })
    }
}

/// Payload of a `STREAM_CONNECTED` reply: the stream's shm key(s),
/// negotiated format, and shm size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConnectedPayload {
    pub stream_id: u32,
    pub shm_key: String,
    pub shm_size_bytes: u32,
    pub frame_rate_hz: u32,
    pub channel_count: u16,
    /// Negotiation error code; `0` on success.
    pub err: i32,
}

impl StreamConnectedPayload {
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + KEY_LEN + 4 + 4 + 2 + 4);
        out.extend_from_slice(&self.stream_id.to_le_bytes());
        let mut key_buf = [0u8; KEY_LEN];
        encode_key(&self.shm_key, &mut key_buf);
        out.extend_from_slice(&key_buf);
        out.extend_from_slice(&self.shm_size_bytes.to_le_bytes());
        out.extend_from_slice(&self.frame_rate_hz.to_le_bytes());
        out.extend_from_slice(&self.channel_count.to_le_bytes());
        out.extend_from_slice(&self.err.to_le_bytes());
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let need = 4 + KEY_LEN + 4 + 4 + 2 + 4;
        if buf.len() < need {
            return Err(ProtoError::Truncated { need, have: buf.len() });
        }
        let mut pos = 0;
        let stream_id = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let mut key_buf = [0u8; KEY_LEN];
        key_buf.copy_from_slice(&buf[pos..pos + KEY_LEN]);
        let shm_key = decode_key(&key_buf);
        pos += KEY_LEN;
        let shm_size_bytes = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let frame_rate_hz = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let channel_count = u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap());
        pos += 2;
        let err = i32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        Ok(Self {
            stream_id,
            shm_key,
            shm_size_bytes,
            frame_rate_hz,
            channel_count,
            err,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_connected_round_trips() {
        let payload = ClientConnectedPayload {
            client_id: 7,
            server_state_key: "auralink-server-state".into(),
            state_version: 1,
        };
        let bytes = payload.serialize();
        assert_eq!(ClientConnectedPayload::parse(&bytes).unwrap(), payload);
    }

    #[test]
    fn stream_connected_round_trips() {
        let payload = StreamConnectedPayload {
            stream_id: 0x0007_0001,
            shm_key: "auralink-stream-7-1".into(),
            shm_size_bytes: 960 * 4,
            frame_rate_hz: 48000,
            channel_count: 2,
            err: 0,
        };
        let bytes = payload.serialize();
        assert_eq!(StreamConnectedPayload::parse(&bytes).unwrap(), payload);
    }

    #[test]
    fn key_longer_than_buffer_is_truncated_not_panicking() {
        let long_key = "x".repeat(KEY_LEN + 16);
        let payload = ClientConnectedPayload {
            client_id: 1,
            server_state_key: long_key,
            state_version: 1,
        };
        let bytes = payload.serialize();
        let parsed = ClientConnectedPayload::parse(&bytes).unwrap();
        assert_eq!(parsed.server_state_key.len(), KEY_LEN);
    }
}
