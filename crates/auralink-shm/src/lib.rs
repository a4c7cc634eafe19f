//! Lock-free single-producer/single-consumer shared-memory audio ring.
//!
//! Implements spec.md §3 "Shared-memory ring (`Shm`)" and §4.1: a fixed
//! region split into a header plus two equal-size buffers. Exactly one side
//! writes into the currently-writable half; the other only reads. Playback
//! and capture use the same ring with producer/consumer roles swapped.
//!
//! The header ([`header::ShmHeader`]) is always process-local atomics; the
//! sample bytes live behind a [`backing::ShmBacking`] so the same ring logic
//! works for in-process tests and for a real POSIX mapping
//! ([`posix::PosixBacking`]).

pub mod backing;
pub mod error;
pub mod header;
pub mod posix;
pub mod server_state;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use backing::{atomic_copy_in, atomic_copy_out, ShmBacking};
pub use error::{Result, ShmError};
use header::ShmHeader;

/// A double-buffered shared-memory ring between one producer and one
/// consumer.
pub struct Shm<B: ShmBacking> {
    header: Arc<ShmHeader>,
    backing: B,
    used_size: usize,
}

impl<B: ShmBacking> Shm<B> {
    /// Build a ring over `backing`, which must provide at least
    /// `2 * used_size` bytes.
    pub fn new(frame_bytes: u32, used_size: usize, backing: B) -> Result<Self> {
        if used_size == 0 {
            return Err(ShmError::EmptyHalf);
        }
        let needed = used_size.checked_mul(2).ok_or(ShmError::RegionTooSmall {
            needed: usize::MAX,
            got: backing.len(),
        })?;
        if backing.len() < needed {
            return Err(ShmError::RegionTooSmall {
                needed,
                got: backing.len(),
            });
        }
        Ok(Self {
            header: Arc::new(ShmHeader::new(frame_bytes, used_size as u32)),
            backing,
            used_size,
        })
    }

    /// Capacity of one half, in frames.
    pub fn capacity_frames(&self) -> u32 {
        self.used_size as u32 / self.header.frame_bytes().max(1)
    }

    pub fn header(&self) -> &Arc<ShmHeader> {
        &self.header
    }

    fn half_base(&self, idx: usize) -> usize {
        idx * self.used_size
    }

    /// Lend the producer a contiguous byte range in the currently-writable
    /// half, from the current write offset to the end of the half.
    ///
    /// Returns the number of whole frames available to write. Never fails
    /// except when the half is already full (`0` frames returned).
    pub fn begin_write(&self) -> u32 {
        let idx = self.header.write_buf_idx();
        let half = self.header.half(idx);
        let write_off = half.write_offset.load(Ordering::Relaxed);
        let frame_bytes = self.header.frame_bytes().max(1);
        (self.used_size as u32 - write_off) / frame_bytes
    }

    /// Write `frames` worth of interleaved sample bytes from `src` into the
    /// writable half at the current write offset, without committing them.
    pub fn write_samples(&self, src: &[u8]) {
        let idx = self.header.write_buf_idx();
        let half = self.header.half(idx);
        let write_off = half.write_offset.load(Ordering::Relaxed) as usize;
        let base = self.half_base(idx);
        atomic_copy_in(self.backing.bytes(), base + write_off, src, Ordering::Relaxed);
    }

    /// Advance `write_offset` by `n_frames`. If the half is now full,
    /// atomically flips `write_buf_idx` and publishes. Returns `true` if the half flipped.
    pub fn commit_write(&self, n_frames: u32) -> bool {
        let idx = self.header.write_buf_idx();
        let half = self.header.half(idx);
        let frame_bytes = self.header.frame_bytes().max(1);
        let new_off = half.write_offset.load(Ordering::Relaxed) + n_frames * frame_bytes;
        half.write_offset.store(new_off, Ordering::Relaxed);
        half.frames_written.fetch_add(n_frames, Ordering::Relaxed);

        if new_off as usize >= self.used_size {
            self.header.flip();
            self.header.publish();
            true
        } else {
            self.header.publish();
            false
        }
    }

    /// Bytes available to read in the currently-readable half, from
    /// `read_offset` to `write_offset`.
    pub fn begin_read(&self) -> u32 {
        self.header.acquire();
        let idx = self.header.read_buf_idx();
        let half = self.header.half(idx);
        let write_off = half.write_offset.load(Ordering::Relaxed);
        let read_off = half.read_offset.load(Ordering::Relaxed);
        let frame_bytes = self.header.frame_bytes().max(1);
        write_off.saturating_sub(read_off) / frame_bytes
    }

    /// Copy `frames` worth of interleaved sample bytes from the readable
    /// half into `dst`, without advancing the read offset.
    pub fn read_samples(&self, dst: &mut [u8]) {
        let idx = self.header.read_buf_idx();
        let half = self.header.half(idx);
        let read_off = half.read_offset.load(Ordering::Relaxed) as usize;
        let base = self.half_base(idx);
        atomic_copy_out(self.backing.bytes(), base + read_off, dst, Ordering::Relaxed);
    }

    /// Advance `read_offset` by `n_frames`. When the half is drained, clears
    /// `callback_pending` to signal the producer; `read_buf_idx` itself only
    /// ever moves as a side effect of the producer's `commit_write` flip
    /// (§3 invariant 2), never here. Returns `true` if the half drained.
    pub fn commit_read(&self, n_frames: u32) -> bool {
        let idx = self.header.read_buf_idx();
        let half = self.header.half(idx);
        let frame_bytes = self.header.frame_bytes().max(1);
        let write_off = half.write_offset.load(Ordering::Relaxed);
        let new_off = half.read_offset.load(Ordering::Relaxed) + n_frames * frame_bytes;
        half.read_offset.store(new_off, Ordering::Relaxed);

        if new_off >= write_off {
            self.header.clear_pending();
            true
        } else {
            false
        }
    }

    /// Volume scaler sampled once per read.
    pub fn volume_scaler(&self) -> f32 {
        self.header.volume_scaler()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::InMemoryBacking;
    use proptest::prelude::*;

    fn make_ring(used_size: usize) -> Shm<InMemoryBacking> {
        let backing = InMemoryBacking::new(used_size * 2);
        Shm::new(4, used_size, backing).unwrap()
    }

    #[test]
    fn rejects_undersized_backing() {
        let backing = InMemoryBacking::new(10);
        assert!(matches!(
            Shm::new(4, 8, backing),
            Err(ShmError::RegionTooSmall { .. })
        ));
    }

    #[test]
    fn write_then_read_round_trips() {
        let ring = make_ring(16); // 4 frames of 4 bytes
        let src = [1u8, 2, 3, 4, 5, 6, 7, 8];
        assert!(ring.begin_write() >= 2);
        ring.write_samples(&src);
        ring.commit_write(2);

        assert_eq!(ring.begin_read(), 2);
        let mut dst = [0u8; 8];
        ring.read_samples(&mut dst);
        ring.commit_read(2);
        assert_eq!(dst, src);
    }

    #[test]
    fn filling_a_half_flips_buffers() {
        let ring = make_ring(8); // 2 frames of 4 bytes
        ring.write_samples(&[0u8; 8]);
        let flipped = ring.commit_write(2);
        assert!(flipped);
        assert_eq!(ring.begin_read(), 2);
    }

    proptest! {
        #[test]
        fn read_offset_never_exceeds_write_offset(writes in proptest::collection::vec(1u32..=3, 0..20)) {
            let ring = make_ring(4 * 4); // 4 frames per half
            for n in writes {
                let avail = ring.begin_write();
                let n = n.min(avail);
                if n == 0 {
                    continue;
                }
                let buf = vec![0u8; (n * 4) as usize];
                ring.write_samples(&buf);
                ring.commit_write(n);

                let readable = ring.begin_read();
                prop_assert!(readable <= ring.capacity_frames());
                if readable > 0 {
                    let mut dst = vec![0u8; (readable * 4) as usize];
                    ring.read_samples(&mut dst);
                    ring.commit_read(readable);
                }
            }
        }
    }
}
