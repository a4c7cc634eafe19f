//! The connected stream audio socket:
//! `REQUEST_DATA` / `DATA_READY` messages between server and client.

use std::io;
use std::os::unix::net::UnixStream;

use auralink_proto::AudioMessage;

/// Abstraction over the stream's connected audio socket, so the engine can
/// be driven against an in-memory double for tests.
pub trait AudioSocket: Send {
    fn send(&mut self, msg: AudioMessage) -> io::Result<()>;
    fn try_recv(&mut self) -> io::Result<Option<AudioMessage>>;
}

impl AudioSocket for UnixStream {
    fn send(&mut self, msg: AudioMessage) -> io::Result<()> {
        msg.write_to(self)
    }

    fn try_recv(&mut self) -> io::Result<Option<AudioMessage>> {
        self.set_nonblocking(true)?;
        match AudioMessage::read_from(self) {
            Ok(msg) => Ok(Some(msg)),
            Err(_) => Ok(None),
        }
    }
}

/// In-memory double used in engine tests: a pair of queues standing in for
/// the two directions of the socket.
#[derive(Default)]
pub struct LoopbackAudioSocket {
    pub sent: Vec<AudioMessage>,
    pub inbox: std::collections::VecDeque<AudioMessage>,
}

impl AudioSocket for LoopbackAudioSocket {
    fn send(&mut self, msg: AudioMessage) -> io::Result<()> {
        self.sent.push(msg);
        Ok(())
    }

    fn try_recv(&mut self) -> io::Result<Option<AudioMessage>> {
        Ok(self.inbox.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_socket_records_sends() {
        let mut sock = LoopbackAudioSocket::default();
        sock.send(AudioMessage::request_data(240)).unwrap();
        assert_eq!(sock.sent.len(), 1);
        assert_eq!(sock.sent[0].frames, 240);
    }
}
