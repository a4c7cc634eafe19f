//! Mix stage: for an output device
//! servicing N streams, the produced sample at index `i` is
//! `sat(sum_k scale_k * stream_k[i])`, where `scale_k` is sampled once per
//! buffer from the stream's shm volume scaler.
//!
//! Mixing runs in the same normalized float domain the converter uses
//!, so saturation is simply a
//! clamp to `[-1.0, 1.0]` applied once, last, by
//! [`auralink_format::SampleFormat::denormalize`] — order of accumulation
//! doesn't matter because addition is commutative up to the final clamp.

/// Accumulator for one output device buffer: `channels` interleaved float
/// frames, reset to silence at the start of each servicing pass.
pub struct MixAccumulator {
    channels: usize,
    samples: Vec<f32>,
}

impl MixAccumulator {
    pub fn new(frames: usize, channels: usize) -> Self {
        Self {
            channels,
            samples: vec![0.0; frames * channels],
        }
    }

    pub fn reset(&mut self, frames: usize) {
        let needed = frames * self.channels;
        if self.samples.len() < needed {
            self.samples.resize(needed, 0.0);
        }
        self.samples[..needed].fill(0.0);
    }

    /// Add `frame[ch] * scale` into frame `frame_idx`, channel `ch`.
    pub fn add_sample(&mut self, frame_idx: usize, ch: usize, value: f32, scale: f32) {
        self.samples[frame_idx * self.channels + ch] += value * scale;
    }

    /// Saturating value at `frame_idx`, channel `ch`.
    pub fn get(&self, frame_idx: usize, ch: usize) -> f32 {
        self.samples[frame_idx * self.channels + ch].clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn silent_mix_stays_in_range() {
        let accum = MixAccumulator::new(4, 2);
        assert_eq!(accum.get(0, 0), 0.0);
    }

    #[test]
    fn overlapping_contributions_saturate() {
        let mut accum = MixAccumulator::new(1, 1);
        accum.add_sample(0, 0, 1.0, 1.0);
        accum.add_sample(0, 0, 1.0, 1.0);
        assert_eq!(accum.get(0, 0), 1.0);
    }

    proptest! {
        // Mixing is saturating: for any sample values a, b in [MIN, MAX],
        // mix(a, b) stays in [MIN, MAX].
        #[test]
        fn mix_of_any_two_normalized_values_saturates(a in -2.0f32..2.0, b in -2.0f32..2.0) {
            let mut accum = MixAccumulator::new(1, 1);
            accum.add_sample(0, 0, a, 1.0);
            accum.add_sample(0, 0, b, 1.0);
            let mixed = accum.get(0, 0);
            prop_assert!((-1.0..=1.0).contains(&mixed));
        }
    }
}
