//! Result narrowing: wide accumulator to stored output element.

use num_traits::Bounded;
use qtile_view::Element;

use crate::math::{asr_rnd, shift_to_i64};
use crate::params::Multiplier;

/// Inclusive clamp applied after the output zero point, e.g. fused ReLU bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClampRange {
    pub min: i32,
    pub max: i32,
}

impl ClampRange {
    /// No clamping beyond the storage type bounds.
    pub const FULL: ClampRange = ClampRange {
        min: i32::MIN,
        max: i32::MAX,
    };

    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// Intersection with the bounds of `T`.
    pub fn for_type<T: Element>(&self) -> (i64, i64) {
        let lo = (self.min as i64).max(<T as Bounded>::min_value().widen());
        let hi = (self.max as i64).min(<T as Bounded>::max_value().widen());
        (lo, hi)
    }
}

impl Default for ClampRange {
    fn default() -> Self {
        Self::FULL
    }
}

/// `clamp(round(acc * mul * 2^-shift) + out_zp)` stored as `T`.
///
/// `acc * mul` is formed in 128 bits, so neither a 40-bit accumulator nor a
/// normalized 32-bit multiplier can overflow the product. A single rounding
/// step happens in the shift.
#[inline]
pub fn narrow<T: Element>(acc: i64, m: Multiplier, out_zp: i32, clamp: ClampRange) -> T {
    let scaled = shift_to_i64(acc as i128 * m.mul as i128, m.shift);
    let (lo, hi) = clamp.for_type::<T>();
    let value = scaled.saturating_add(out_zp as i64).clamp(lo, hi);
    T::saturate(value)
}

/// Per-value rescale of a 32-bit value into an 8-bit output.
///
/// `((x − in_bias) · scale) >> shift + out_bias`, shift clamped to `[-63, 63]`.
#[inline]
pub fn rescale_value(x: i32, in_bias: i32, scale: i16, shift: i8, out_bias: i8) -> i8 {
    let shift = (shift as i32).clamp(-63, 63);
    let centered = x.saturating_sub(in_bias) as i64;
    let scaled = asr_rnd(centered * scale as i64, shift);
    i8::saturate(scaled.saturating_add(out_bias as i64))
}
