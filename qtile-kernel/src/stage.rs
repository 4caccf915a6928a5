//! Output stage: how an accumulated dot product becomes a stored value.

use qtile_quant::{
    narrow, AffineRequant, ClampRange, FxRequant, Multiplier, Params, Requantize,
};
use qtile_view::Element;

/// The per-operator epilogue applied after accumulation.
#[derive(Debug, Clone, Copy)]
pub enum OutputStage<'a> {
    /// Zero-point corrected accumulator stored as-is.
    Raw {
        in_zero_point: i32,
        weights_zero_point: Params<'a, i16>,
    },
    /// Asymmetric affine requantization into the output's scale.
    Affine {
        params: AffineRequant<'a>,
        clamp: ClampRange,
    },
    /// Fixed-point shift into the output's fractional bits.
    Fixed {
        params: FxRequant,
        clamp: ClampRange,
    },
}

impl<'a> OutputStage<'a> {
    #[inline]
    pub fn in_zero_point(&self) -> i32 {
        match self {
            OutputStage::Raw { in_zero_point, .. } => *in_zero_point,
            OutputStage::Affine { params, .. } => params.in_zero_point,
            OutputStage::Fixed { .. } => 0,
        }
    }

    #[inline]
    pub fn weights_zero_point(&self, channel: usize) -> i32 {
        match self {
            OutputStage::Raw {
                weights_zero_point, ..
            } => weights_zero_point.get(channel) as i32,
            OutputStage::Affine { params, .. } => params.weights_zero_point(channel),
            OutputStage::Fixed { .. } => 0,
        }
    }

    /// Bias element converted into the accumulator's format.
    #[inline]
    pub fn bias_term(&self, raw: i64) -> i64 {
        match self {
            OutputStage::Fixed { params, .. } => params.align_bias(raw),
            _ => raw,
        }
    }

    /// Store `acc` as output element type `O` for output channel `channel`.
    #[inline]
    pub fn finish<O: Element>(&self, channel: usize, acc: i64) -> O {
        match self {
            OutputStage::Raw { .. } => O::saturate(acc),
            OutputStage::Affine { params, clamp } => {
                narrow(acc, params.adjust(channel), params.out_zero_point, *clamp)
            }
            OutputStage::Fixed { params, clamp } => {
                narrow(acc, params.adjust(channel), 0, *clamp)
            }
        }
    }

    /// Multiplier applied to `channel`, identity for raw output.
    pub fn multiplier(&self, channel: usize) -> Multiplier {
        match self {
            OutputStage::Raw { .. } => Multiplier::ONE,
            OutputStage::Affine { params, .. } => params.adjust(channel),
            OutputStage::Fixed { params, .. } => params.adjust(channel),
        }
    }

    /// Restrict per-channel parameters to output channels `[start, start + len)`.
    pub fn slice_channels(&self, start: usize, len: usize) -> Self {
        match *self {
            OutputStage::Raw {
                in_zero_point,
                weights_zero_point,
            } => OutputStage::Raw {
                in_zero_point,
                weights_zero_point: weights_zero_point.slice(start, len),
            },
            OutputStage::Affine { params, clamp } => OutputStage::Affine {
                params: params.slice_channels(start, len),
                clamp,
            },
            fixed @ OutputStage::Fixed { .. } => fixed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qtile_quant::AffineQuant;
    use qtile_view::Run;

    #[test]
    fn test_raw_stage_slices_weight_zero_points() {
        let zps: Vec<u8> = [3i16, -4, 5].iter().flat_map(|v| v.to_le_bytes()).collect();
        let stage = OutputStage::Raw {
            in_zero_point: 2,
            weights_zero_point: Params::PerAxis(Run::new(&zps, 0, 1, 3)),
        };
        assert_eq!(stage.weights_zero_point(1), -4);
        let tile = stage.slice_channels(1, 2);
        assert_eq!(tile.weights_zero_point(0), -4);
        assert_eq!(tile.in_zero_point(), 2);
        assert_eq!(tile.finish::<i32>(0, 1234), 1234);
    }

    #[test]
    fn test_fixed_stage_aligns_bias_and_shifts() {
        let stage = OutputStage::Fixed {
            params: FxRequant::derive(4, 4, 4, 4),
            clamp: ClampRange::FULL,
        };
        assert_eq!(stage.bias_term(3), 3 << 4);
        assert_eq!(stage.finish::<i8>(0, 16 * 5 + 8), 6);
    }

    #[test]
    fn test_affine_stage_applies_output_zero_point() {
        let q = AffineQuant::per_tensor(-5, 16384, 14);
        let w = AffineQuant::per_tensor(0, 16384, 14);
        let params = AffineRequant::derive::<i8, i8, i8>(&q, &w, &q).unwrap();
        let stage = OutputStage::Affine {
            params,
            clamp: ClampRange::new(-128, 0),
        };
        assert_eq!(stage.in_zero_point(), -5);
        assert_eq!(stage.finish::<i8>(0, 10), 0);
        assert_eq!(stage.finish::<i8>(0, -10), -15);
    }
}
