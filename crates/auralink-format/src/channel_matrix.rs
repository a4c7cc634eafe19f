//! Channel remap stage.
//!
//! Builds an `out_channels × in_channels` mix matrix from two
//! [`crate::ChannelLayout`]s. Per spec.md §9 "Open Question" #2, the
//! default policy decided in DESIGN.md is: identical present-channel sets
//! produce a pure permutation; a channel present in the output but absent
//! from the input is filled with silence (up-mix default); a channel
//! present in the input but absent from the output is dropped (down-mix
//! default). Callers may override with an explicit matrix.

use crate::ChannelLayout;

/// Named channel positions a [`ChannelLayout`] can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ChannelPosition {
    FrontLeft = 0,
    FrontRight = 1,
    RearLeft = 2,
    RearRight = 3,
    FrontCenter = 4,
    Lfe = 5,
    SideLeft = 6,
    SideRight = 7,
    FrontLeftOfCenter = 8,
    FrontRightOfCenter = 9,
    RearCenter = 10,
}

impl ChannelPosition {
    pub const ALL: [ChannelPosition; crate::NUM_CHANNEL_POSITIONS] = [
        ChannelPosition::FrontLeft,
        ChannelPosition::FrontRight,
        ChannelPosition::RearLeft,
        ChannelPosition::RearRight,
        ChannelPosition::FrontCenter,
        ChannelPosition::Lfe,
        ChannelPosition::SideLeft,
        ChannelPosition::SideRight,
        ChannelPosition::FrontLeftOfCenter,
        ChannelPosition::FrontRightOfCenter,
        ChannelPosition::RearCenter,
    ];
}

/// An `out_channels × in_channels` mix matrix: `matrix[out][in]` is the gain
/// applied to input channel `in` when producing output channel `out`.
#[derive(Debug, Clone)]
pub struct ChannelMatrix {
    out_channels: usize,
    in_channels: usize,
    weights: Vec<f32>,
}

impl ChannelMatrix {
    pub fn zeros(out_channels: usize, in_channels: usize) -> Self {
        Self {
            out_channels,
            in_channels,
            weights: vec![0.0; out_channels * in_channels],
        }
    }

    pub fn set(&mut self, out_ch: usize, in_ch: usize, gain: f32) {
        self.weights[out_ch * self.in_channels + in_ch] = gain;
    }

    pub fn get(&self, out_ch: usize, in_ch: usize) -> f32 {
        self.weights[out_ch * self.in_channels + in_ch]
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    /// Is this matrix a pure permutation (at most one nonzero `1.0` entry
    /// per row and column)?
    pub fn is_permutation(&self) -> bool {
        for out_ch in 0..self.out_channels {
            let nonzero = (0..self.in_channels)
                .filter(|&in_ch| self.get(out_ch, in_ch) != 0.0)
                .count();
            if nonzero > 1 {
                return false;
            }
            for in_ch in 0..self.in_channels {
                let g = self.get(out_ch, in_ch);
                if g != 0.0 && (g - 1.0).abs() > f32::EPSILON {
                    return false;
                }
            }
        }
        true
    }

    /// Default matrix for `in_layout → out_layout`: same present channel at
    /// the same position maps with gain 1.0; channels present only in the
    /// output are silent; channels present only in the input are dropped.
    pub fn default_for(
        in_layout: &ChannelLayout,
        in_channels: usize,
        out_layout: &ChannelLayout,
        out_channels: usize,
    ) -> Self {
        let mut matrix = Self::zeros(out_channels, in_channels);
        for pos in ChannelPosition::ALL {
            if let (Some(in_idx), Some(out_idx)) = (in_layout.get(pos), out_layout.get(pos)) {
                if in_idx < in_channels && out_idx < out_channels {
                    matrix.set(out_idx, in_idx, 1.0);
                }
            }
        }
        matrix
    }

    /// Fallback when neither side carries a meaningful layout (e.g. both
    /// empty): identity on the overlapping channel range, silence/drop
    /// beyond it.
    pub fn identity_overlap(out_channels: usize, in_channels: usize) -> Self {
        let mut matrix = Self::zeros(out_channels, in_channels);
        for ch in 0..out_channels.min(in_channels) {
            matrix.set(ch, ch, 1.0);
        }
        matrix
    }

    /// Apply the matrix to one interleaved input frame, writing one
    /// interleaved output frame.
    pub fn apply_frame(&self, in_frame: &[f32], out_frame: &mut [f32]) {
        for out_ch in 0..self.out_channels {
            let mut acc = 0.0f32;
            for in_ch in 0..self.in_channels {
                let g = self.get(out_ch, in_ch);
                if g != 0.0 {
                    acc += g * in_frame[in_ch];
                }
            }
            out_frame[out_ch] = acc;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChannelLayout;

    #[test]
    fn identical_stereo_layouts_are_pure_permutation() {
        let layout = ChannelLayout::stereo();
        let matrix = ChannelMatrix::default_for(&layout, 2, &layout, 2);
        assert!(matrix.is_permutation());
        assert_eq!(matrix.get(0, 0), 1.0);
        assert_eq!(matrix.get(1, 1), 1.0);
        assert_eq!(matrix.get(0, 1), 0.0);
    }

    #[test]
    fn mono_to_stereo_upmix_leaves_right_silent_by_default() {
        let mono = ChannelLayout::mono();
        let stereo = ChannelLayout::stereo();
        let matrix = ChannelMatrix::default_for(&mono, 1, &stereo, 2);
        // Front-center has no counterpart in the stereo layout's FL/FR
        // positions, so everything is silent under the conservative
        // default; this is intentionally not a clever upmix.
        assert_eq!(matrix.get(0, 0), 0.0);
        assert_eq!(matrix.get(1, 0), 0.0);
    }

    #[test]
    fn apply_frame_mixes_weighted_sum() {
        let mut matrix = ChannelMatrix::zeros(1, 2);
        matrix.set(0, 0, 0.5);
        matrix.set(0, 1, 0.5);
        let mut out = [0.0f32; 1];
        matrix.apply_frame(&[1.0, 0.0], &mut out);
        assert_eq!(out[0], 0.5);
    }
}
