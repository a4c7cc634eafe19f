//! Buffer-share ledger.
//!
//! Per device: how many frames each attached stream has committed against
//! the *current* device buffer. A device serving streams with differing
//! fill rates cannot advance its read cursor until every stream has
//! contributed; advancing by the minimum and subtracting it from every
//! entry is the only legal move.

use std::collections::HashMap;

use auralink_proto::StreamId;

/// `stream_id -> frames_consumed_in_current_dev_buffer` for one device.
#[derive(Debug, Default)]
pub struct BufferShareLedger {
    entries: HashMap<StreamId, u32>,
}

impl BufferShareLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how many frames `stream_id` contributed to the device buffer
    /// this servicing pass, replacing any prior record for it.
    pub fn record(&mut self, stream_id: StreamId, frames: u32) {
        self.entries.insert(stream_id, frames);
    }

    pub fn remove_stream(&mut self, stream_id: StreamId) {
        self.entries.remove(&stream_id);
    }

    /// `0` if no stream is attached.
    pub fn min_committed(&self) -> u32 {
        self.entries.values().copied().min().unwrap_or(0)
    }

    /// Advance the device cursor by [`Self::min_committed`] and subtract it
    /// from every entry. Returns
    /// the amount advanced.
    pub fn advance(&mut self) -> u32 {
        let min = self.min_committed();
        for v in self.entries.values_mut() {
            *v -= min;
        }
        min
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, stream_id: StreamId) -> u32 {
        self.entries.get(&stream_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sid(n: u16) -> StreamId {
        StreamId::new(1, n)
    }

    #[test]
    fn advance_uses_minimum_across_streams() {
        let mut ledger = BufferShareLedger::new();
        ledger.record(sid(1), 480);
        ledger.record(sid(2), 240);
        let advanced = ledger.advance();
        assert_eq!(advanced, 240);
        // Invariant: 0 <= ledger[s] <= current buffer frames.
        assert_eq!(ledger.get(sid(1)), 240);
        assert_eq!(ledger.get(sid(2)), 0);
    }

    #[test]
    fn empty_ledger_advances_by_zero() {
        let mut ledger = BufferShareLedger::new();
        assert_eq!(ledger.advance(), 0);
    }

    #[test]
    fn removed_stream_no_longer_counted() {
        let mut ledger = BufferShareLedger::new();
        ledger.record(sid(1), 100);
        ledger.record(sid(2), 50);
        ledger.remove_stream(sid(2));
        assert_eq!(ledger.min_committed(), 100);
    }

    proptest! {
        #[test]
        fn advance_never_exceeds_recorded_minimum(
            a in 0u32..2000, b in 0u32..2000, c in 0u32..2000,
        ) {
            let mut ledger = BufferShareLedger::new();
            ledger.record(sid(1), a);
            ledger.record(sid(2), b);
            ledger.record(sid(3), c);
            let min = a.min(b).min(c);
            let advanced = ledger.advance();
            prop_assert_eq!(advanced, min);
            prop_assert!(ledger.get(sid(1)) <= a);
            prop_assert!(ledger.get(sid(2)) <= b);
            prop_assert!(ledger.get(sid(3)) <= c);
        }
    }
}
