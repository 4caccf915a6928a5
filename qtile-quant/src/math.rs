//! Saturating fixed-point helpers shared by every quantized kernel.
//!
//! These are generic over the signed primitive integers so the same code
//! serves 32-bit, 40-bit (held in `i64`) and 128-bit intermediate values.

use num_traits::{PrimInt, Signed};

#[inline]
fn bits<T>() -> u32 {
    (std::mem::size_of::<T>() * 8) as u32
}

#[inline]
fn limit<T: PrimInt + Signed>(sign: T) -> T {
    if sign < T::zero() {
        T::min_value()
    } else {
        T::max_value()
    }
}

/// Arithmetic shift right; shifts past the width saturate to the sign.
#[inline]
pub fn asr<T: PrimInt + Signed>(x: T, nbits: u32) -> T {
    x >> nbits.min(bits::<T>() - 1) as usize
}

/// Arithmetic shift left with saturation to the type bounds.
pub fn asl_sat<T: PrimInt + Signed>(x: T, nbits: u32) -> T {
    let width = bits::<T>();
    if nbits > width - 1 {
        return if x.is_zero() { x } else { limit(x) };
    }
    let hi = x >> (width - 1 - nbits) as usize;
    if hi.is_zero() || hi == -T::one() {
        x << nbits as usize
    } else {
        limit(hi)
    }
}

/// Shift right by `nbits` rounding to nearest, ties toward positive infinity.
///
/// The most significant dropped bit is added back to the result, the same
/// as adding half an LSB before the shift. Negative `nbits` shifts left with
/// saturation.
pub fn asr_rnd<T: PrimInt + Signed>(x: T, nbits: i32) -> T {
    if nbits < 0 {
        return asl_sat(x, nbits.unsigned_abs());
    }
    if nbits == 0 {
        return x;
    }
    let n = nbits as u32;
    if n > bits::<T>() - 1 {
        return T::zero();
    }
    let r = x >> n as usize;
    let last_dropped = T::one() << (n - 1) as usize;
    if !(x & last_dropped).is_zero() {
        r.saturating_add(T::one())
    } else {
        r
    }
}

/// Number of redundant sign bits: how far `x` can be shifted left without
/// overflow. Returns `bits - 1` for zero.
pub fn norm<T: PrimInt + Signed>(x: T) -> u32 {
    if x.is_zero() {
        return bits::<T>() - 1;
    }
    let magnitude_bits = if x < T::zero() {
        (!x).leading_zeros()
    } else {
        x.leading_zeros()
    };
    magnitude_bits - 1
}

/// Round-shift an `i128` intermediate and saturate it to `i64`.
#[inline]
pub fn shift_to_i64(x: i128, nbits: i32) -> i64 {
    let v = asr_rnd(x, nbits);
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm_matches_redundant_sign_bits() {
        assert_eq!(norm(0i32), 31);
        assert_eq!(norm(1i32), 30);
        assert_eq!(norm(16384i32), 16);
        assert_eq!(norm(-1i32), 31);
        assert_eq!(norm(-2i32), 30);
        assert_eq!(norm(i32::MAX), 0);
        assert_eq!(norm(i32::MIN), 0);
        assert_eq!(norm(0x4000i16), 0);
        assert_eq!(norm(1i16), 14);
    }

    #[test]
    fn test_asr_rnd_ties_round_up() {
        assert_eq!(asr_rnd(5i32, 1), 3); // 2.5 -> 3
        assert_eq!(asr_rnd(-5i32, 1), -2); // -2.5 -> -2
        assert_eq!(asr_rnd(6i32, 2), 2); // 1.5 -> 2
        assert_eq!(asr_rnd(-6i32, 2), -1); // -1.5 -> -1
        assert_eq!(asr_rnd(-7i32, 2), -2); // -1.75 -> -2
        assert_eq!(asr_rnd(7i32, 0), 7);
        assert_eq!(asr_rnd(7i32, 40), 0);
    }

    #[test]
    fn test_asr_rnd_negative_shift_saturates() {
        assert_eq!(asr_rnd(3i32, -2), 12);
        assert_eq!(asr_rnd(1i32 << 29, -4), i32::MAX);
        assert_eq!(asr_rnd(-(1i32 << 29), -4), i32::MIN);
        assert_eq!(asr_rnd(0i32, -40), 0);
    }

    #[test]
    fn test_asl_sat_and_asr() {
        assert_eq!(asl_sat(200i16, 8), i16::MAX);
        assert_eq!(asl_sat(-200i16, 8), i16::MIN);
        assert_eq!(asl_sat(100i16, 7), 12800);
        assert_eq!(asr(-1i32, 100), -1);
        assert_eq!(asr(1024i32, 3), 128);
    }

    #[test]
    fn test_shift_to_i64_saturates() {
        assert_eq!(shift_to_i64(1i128 << 80, 8), i64::MAX);
        assert_eq!(shift_to_i64(-(1i128 << 80), 8), i64::MIN);
        assert_eq!(shift_to_i64(1000, 3), 125);
    }
}
