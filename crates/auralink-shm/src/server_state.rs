//! Read-only server-state shared memory.
//!
//! A single writer (the main thread) publishes a snapshot of volumes and
//! device lists; any number of readers attach and poll it. Consistency is a
//! seqlock: the writer increments a counter to odd before mutating and back
//! to even after; a reader samples the counter, reads, and re-samples —
//! unequal (or odd) means retry.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Result, ShmError};

/// Version stamped into every server-state region this crate writes.
/// Clients built against a different version must refuse to attach.
pub const STATE_VERSION: u32 = 1;

/// Seqlock-guarded server-state publisher.
///
/// `T` is the snapshot payload (volumes, device list, client list, …); it
/// must be `Copy` so a reader can take it out from behind the lock without
/// holding a reference across the consistency check.
pub struct ServerState<T: Copy> {
    version: u32,
    seq: AtomicU32,
    value: std::cell::UnsafeCell<T>,
}

// SAFETY: all mutation goes through `write`, which is only ever called by
// the single owning thread; readers only ever copy `T` out via `read`,
// never hold a live reference across the seqlock retry loop.
#[allow(unsafe_code)]
unsafe impl<T: Copy + Send> Sync for ServerState<T> {}

impl<T: Copy> ServerState<T> {
    pub fn new(initial: T) -> Self {
        Self {
            version: STATE_VERSION,
            seq: AtomicU32::new(0),
            value: std::cell::UnsafeCell::new(initial),
        }
    }

    /// Publish a new snapshot. Must only be called by the single writer
    /// (the main thread owns this region, per spec.md §5).
    pub fn write(&self, new_value: T) {
        self.seq.fetch_add(1, Ordering::Release); // now odd
        // SAFETY: single-writer invariant upheld by the caller; readers spin
        // on `seq` parity and never observe a torn write because the
        // acquire/release fences below order this store against the seq
        // flips.
        #[allow(unsafe_code)]
        unsafe {
            *self.value.get() = new_value;
        }
        self.seq.fetch_add(1, Ordering::Release); // back to even
    }

    /// Read a consistent snapshot, retrying while the writer is mid-update.
    pub fn read(&self, expected_version: u32) -> Result<T> {
        if expected_version != self.version {
            return Err(ShmError::VersionMismatch {
                expected: expected_version,
                found: self.version,
            });
        }
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before % 2 != 0 {
                std::hint::spin_loop();
                continue;
            }
            // SAFETY: `before` was observed even; if it is still even after
            // the read below, no write interleaved and the copy is
            // consistent.
            #[allow(unsafe_code)]
            let snapshot = unsafe { *self.value.get() };
            let after = self.seq.load(Ordering::Acquire);
            if before == after {
                return Ok(snapshot);
            }
            std::hint::spin_loop();
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq)]
    struct Snapshot {
        volume: u32,
        mute: bool,
    }

    #[test]
    fn read_reflects_last_write() {
        let state = ServerState::new(Snapshot { volume: 50, mute: false });
        assert_eq!(
            state.read(STATE_VERSION).unwrap(),
            Snapshot { volume: 50, mute: false }
        );
        state.write(Snapshot { volume: 80, mute: true });
        assert_eq!(
            state.read(STATE_VERSION).unwrap(),
            Snapshot { volume: 80, mute: true }
        );
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let state = ServerState::new(Snapshot { volume: 0, mute: false });
        assert!(matches!(
            state.read(STATE_VERSION + 1),
            Err(ShmError::VersionMismatch { .. })
        ));
    }
}
