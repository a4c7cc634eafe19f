//! Per-stream connection state machine.
//!
//! Transitions are driven exclusively by messages on the control socket
//! (main thread) and the thread-internal pipe (main->audio); this module
//! only tracks the state and validates transitions, it does not perform
//! I/O itself.

use crate::error::{Result, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Created,
    AwaitingConnect,
    ConnectedReady,
    AttachedRunning,
    Detaching,
    Dead,
}

impl ConnState {
    fn can_transition_to(self, next: ConnState) -> bool {
        use ConnState::*;
        matches!(
            (self, next),
            (Created, AwaitingConnect)
                | (AwaitingConnect, ConnectedReady)
                | (ConnectedReady, AttachedRunning)
                | (AttachedRunning, Detaching)
                // Reattach walks a running stream back through
                // connect without a full teardown.
                | (AttachedRunning, AwaitingConnect)
                | (Detaching, Dead)
                // A connect that never completes, or a stream dropped before
                // the engine attaches it, can be torn down directly.
                | (AwaitingConnect, Dead)
                | (ConnectedReady, Dead)
        )
    }
}

/// Tracks one stream's position in the connect/attach/detach lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionState {
    current: ConnState,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            current: ConnState::Created,
        }
    }

    pub fn current(&self) -> ConnState {
        self.current
    }

    pub fn transition(&mut self, next: ConnState) -> Result<()> {
        if self.current.can_transition_to(next) {
            tracing::debug!(from = ?self.current, to = ?next, "stream connection state transition");
            self.current = next;
            Ok(())
        } else {
            Err(StreamError::InvalidTransition {
                from: self.current,
                to: next,
            })
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.current == ConnState::Dead
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnState::*;

    #[test]
    fn happy_path_walks_every_state() {
        let mut s = ConnectionState::new();
        assert_eq!(s.current(), Created);
        s.transition(AwaitingConnect).unwrap();
        s.transition(ConnectedReady).unwrap();
        s.transition(AttachedRunning).unwrap();
        s.transition(Detaching).unwrap();
        s.transition(Dead).unwrap();
        assert!(s.is_terminal());
    }

    #[test]
    fn reattach_returns_to_awaiting_connect() {
        let mut s = ConnectionState::new();
        s.transition(AwaitingConnect).unwrap();
        s.transition(ConnectedReady).unwrap();
        s.transition(AttachedRunning).unwrap();
        s.transition(AwaitingConnect).unwrap();
        assert_eq!(s.current(), AwaitingConnect);
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let mut s = ConnectionState::new();
        assert!(s.transition(AttachedRunning).is_err());
    }

    #[test]
    fn dead_is_terminal_and_has_no_outgoing_transitions() {
        let mut s = ConnectionState::new();
        s.transition(AwaitingConnect).unwrap();
        s.transition(Dead).unwrap();
        assert!(s.transition(AwaitingConnect).is_err());
    }
}
