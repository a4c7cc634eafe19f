//! Dev-stream adapter: one stream as seen from one attached device. Owns the
//! per-attachment converter, a conversion scratch buffer, and the
//! per-device-buffer offset.

use auralink_format::FmtConv;
use auralink_proto::StreamId;

/// One (stream, device) pairing. Refers to its [`auralink_stream::RStream`]
/// only by stable [`StreamId`]; the
/// engine resolves the live reference for the duration of one servicing
/// pass and never holds it across a poll boundary.
pub struct DevStream {
    pub stream_id: StreamId,
    /// `None` when the device's negotiated format already matches the
    /// stream's format exactly (no conversion stage needed).
    pub converter: Option<FmtConv>,
    /// Scratch buffer sized for the worst-case fan-out of one callback,
    /// reused across passes to avoid a per-callback allocation.
    pub scratch: Vec<u8>,
    /// Frames of this stream already consumed (output) or produced
    /// (input) on the current device buffer.
    pub dev_offset: u32,
}

impl DevStream {
    pub fn new(stream_id: StreamId, converter: Option<FmtConv>) -> Self {
        Self {
            stream_id,
            converter,
            scratch: Vec::new(),
            dev_offset: 0,
        }
    }

    /// Ensure the scratch buffer can hold `frames` worth of `frame_bytes`
    /// each, without shrinking (reused across passes).
    pub fn ensure_scratch(&mut self, frames: u32, frame_bytes: u32) {
        let needed = frames as usize * frame_bytes as usize;
        if self.scratch.len() < needed {
            self.scratch.resize(needed, 0);
        }
    }

    /// Output frames this conversion stage produces per `in_frames` input
    /// frames, identity when there's no converter.
    pub fn in_frames_to_out(&self, in_frames: u32) -> u32 {
        self.converter
            .as_ref()
            .map_or(in_frames, |c| c.in_frames_to_out(in_frames))
    }

    /// Inverse of [`Self::in_frames_to_out`].
    pub fn out_frames_to_in(&self, out_frames: u32) -> u32 {
        self.converter
            .as_ref()
            .map_or(out_frames, |c| c.out_frames_to_in(out_frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_conversion_passes_frame_counts_through() {
        let ds = DevStream::new(StreamId::new(1, 1), None);
        assert_eq!(ds.in_frames_to_out(480), 480);
        assert_eq!(ds.out_frames_to_in(480), 480);
    }

    #[test]
    fn scratch_grows_but_never_shrinks() {
        let mut ds = DevStream::new(StreamId::new(1, 1), None);
        ds.ensure_scratch(100, 4);
        assert_eq!(ds.scratch.len(), 400);
        ds.ensure_scratch(10, 4);
        assert_eq!(ds.scratch.len(), 400);
        ds.ensure_scratch(200, 4);
        assert_eq!(ds.scratch.len(), 800);
    }
}
