//! The fixed-size header shared between the two halves of a [`crate::Shm`] ring.
//!
//! Every field is a native atomic so the header can live in memory mapped by
//! two independent processes (or, in-process, be shared behind an `Arc`)
//! without a lock. Writer mutations are followed by a release fence; the
//! reader performs an acquire fence before trusting the counters it just
//! read.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Per-half bookkeeping: how far the producer has written, how far the
/// consumer has read, and the running frame count for this half.
#[derive(Debug, Default)]
pub struct HalfCounters {
    pub(crate) frames_written: AtomicU32,
    pub(crate) read_offset: AtomicU32,
    pub(crate) write_offset: AtomicU32,
}

impl HalfCounters {
    fn reset(&self) {
        self.frames_written.store(0, Ordering::Relaxed);
        self.read_offset.store(0, Ordering::Relaxed);
        self.write_offset.store(0, Ordering::Relaxed);
    }
}

/// Shared header for one [`crate::Shm`] double buffer.
///
/// Field names mirror the wire layout directly so the struct can be read
/// as a transliteration of it.
#[derive(Debug)]
pub struct ShmHeader {
    pub(crate) frame_bytes: AtomicU32,
    pub(crate) used_size: AtomicU32,
    pub(crate) read_buf_idx: AtomicU8,
    pub(crate) write_buf_idx: AtomicU8,
    pub(crate) halves: [HalfCounters; 2],
    pub(crate) mute: AtomicBool,
    /// `f32` volume scalar stored as raw bits so it can be an atomic.
    pub(crate) volume_scaler_bits: AtomicU32,
    /// Monotonic capture timestamp snapshot, nanoseconds since an
    /// unspecified epoch fixed at ring creation.
    pub(crate) ts_nanos: AtomicU64,
    pub(crate) num_overruns: AtomicU32,
    pub(crate) num_cb_timeouts: AtomicU32,
    pub(crate) callback_pending: AtomicBool,
}

impl ShmHeader {
    pub(crate) fn new(frame_bytes: u32, used_size: u32) -> Self {
        Self {
            frame_bytes: AtomicU32::new(frame_bytes),
            used_size: AtomicU32::new(used_size),
            read_buf_idx: AtomicU8::new(0),
            write_buf_idx: AtomicU8::new(0),
            halves: [HalfCounters::default(), HalfCounters::default()],
            mute: AtomicBool::new(false),
            volume_scaler_bits: AtomicU32::new(1.0f32.to_bits()),
            ts_nanos: AtomicU64::new(0),
            num_overruns: AtomicU32::new(0),
            num_cb_timeouts: AtomicU32::new(0),
            callback_pending: AtomicBool::new(false),
        }
    }

    pub fn frame_bytes(&self) -> u32 {
        self.frame_bytes.load(Ordering::Relaxed)
    }

    pub fn used_size(&self) -> u32 {
        self.used_size.load(Ordering::Relaxed)
    }

    /// Volume scaler sampled once per read, per spec.md §4.1 "Volume scaling".
    pub fn volume_scaler(&self) -> f32 {
        f32::from_bits(self.volume_scaler_bits.load(Ordering::Relaxed))
    }

    pub fn set_volume_scaler(&self, scale: f32) {
        self.volume_scaler_bits.store(scale.to_bits(), Ordering::Relaxed);
    }

    pub fn mute(&self) -> bool {
        self.mute.load(Ordering::Relaxed)
    }

    pub fn set_mute(&self, mute: bool) {
        self.mute.store(mute, Ordering::Relaxed);
    }

    pub fn num_overruns(&self) -> u32 {
        self.num_overruns.load(Ordering::Relaxed)
    }

    pub fn note_overrun(&self) {
        self.num_overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn num_cb_timeouts(&self) -> u32 {
        self.num_cb_timeouts.load(Ordering::Relaxed)
    }

    pub fn note_cb_timeout(&self) {
        self.num_cb_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ts_nanos(&self) -> u64 {
        self.ts_nanos.load(Ordering::Relaxed)
    }

    pub fn set_ts_nanos(&self, ts: u64) {
        self.ts_nanos.store(ts, Ordering::Relaxed);
    }

    pub(crate) fn read_buf_idx(&self) -> usize {
        self.read_buf_idx.load(Ordering::Acquire) as usize
    }

    pub(crate) fn write_buf_idx(&self) -> usize {
        self.write_buf_idx.load(Ordering::Acquire) as usize
    }

    /// Flip which half is writable/readable. Called by `commit_write` when a
    /// half fills, or by `commit_read` when a half drains.
    pub(crate) fn flip(&self) {
        let next_write = 1 - self.write_buf_idx();
        self.write_buf_idx.store(next_write as u8, Ordering::Release);
        self.read_buf_idx.store((1 - next_write) as u8, Ordering::Release);
        self.halves[next_write].reset();
    }

    pub(crate) fn half(&self, idx: usize) -> &HalfCounters {
        &self.halves[idx]
    }

    /// Release fence followed by the producer→consumer handoff signal.
    pub(crate) fn publish(&self) {
        std::sync::atomic::fence(Ordering::Release);
        self.callback_pending.store(true, Ordering::Release);
    }

    /// Acquire fence performed before the reader trusts the counters it just
    /// observed.
    pub(crate) fn acquire(&self) {
        std::sync::atomic::fence(Ordering::Acquire);
    }

    /// Clear the handoff signal, waking the producer.
    pub(crate) fn clear_pending(&self) {
        self.callback_pending.store(false, Ordering::Release);
    }

    pub fn callback_pending(&self) -> bool {
        self.callback_pending.load(Ordering::Acquire)
    }
}
