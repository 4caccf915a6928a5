//! Compute-primitive abstraction for per-tile kernels.
//!
//! This module defines the [`BackendConfig`] and [`ComputeBackend`] traits,
//! marker structs for each backend, and the [`ActiveBackend`] type alias that
//! serves as the single point of backend selection based on Cargo features.
//!
//! All accumulation wraps in the accumulator type, so the order in which a
//! backend combines partial products does not change the result: every
//! backend is bit-exact with [`Reference`].

use num_traits::{WrappingAdd, WrappingMul, Zero};
use qtile_quant::{Accumulator, MacElement};
use qtile_view::{Element, Run};

/// Static description of a backend.
pub trait BackendConfig {
    /// Name used in logs.
    const NAME: &'static str;

    /// Number of independent partial accumulators the backend keeps.
    const LANES: usize;
}

/// The primitives every kernel is written against.
pub trait ComputeBackend: BackendConfig {
    /// `acc + Σ a[i] * b[i]`.
    ///
    /// # Panics
    /// Panics when the runs have different lengths.
    fn dot<T: MacElement>(acc: T::Acc, a: Run<'_, T>, b: Run<'_, T>) -> T::Acc;

    /// `acc + Σ a[i]`.
    fn sum<T: MacElement>(acc: T::Acc, a: Run<'_, T>) -> T::Acc;

    /// `max(init, max a[i])`.
    fn reduce_max<T: Element>(init: T, a: Run<'_, T>) -> T;
}

#[inline]
fn check_len<T: Element>(a: &Run<'_, T>, b: &Run<'_, T>) {
    assert_eq!(a.len(), b.len(), "dot product over runs of different length");
}

// ---------------------------------------------------------------------------
// Marker structs
// ---------------------------------------------------------------------------

/// Portable scalar loops. The correctness oracle for the other backends.
pub struct Reference;

impl BackendConfig for Reference {
    const NAME: &'static str = "reference";
    const LANES: usize = 1;
}

impl ComputeBackend for Reference {
    #[inline]
    fn dot<T: MacElement>(acc: T::Acc, a: Run<'_, T>, b: Run<'_, T>) -> T::Acc {
        check_len(&a, &b);
        (0..a.len()).fold(acc, |acc, i| qtile_quant::mac(acc, a.get(i), b.get(i)))
    }

    #[inline]
    fn sum<T: MacElement>(acc: T::Acc, a: Run<'_, T>) -> T::Acc {
        a.iter().fold(acc, |acc, x| acc.wrapping_add(&x.to_acc()))
    }

    #[inline]
    fn reduce_max<T: Element>(init: T, a: Run<'_, T>) -> T {
        a.iter().fold(init, |m, x| m.max(x))
    }
}

/// Fixed-point DSP: dual multiply-accumulate, two products per step.
pub struct FixedPointDsp;

impl BackendConfig for FixedPointDsp {
    const NAME: &'static str = "fx-dsp";
    const LANES: usize = 2;
}

impl ComputeBackend for FixedPointDsp {
    fn dot<T: MacElement>(acc: T::Acc, a: Run<'_, T>, b: Run<'_, T>) -> T::Acc {
        check_len(&a, &b);
        let pairs = a.len() / 2;
        let mut acc = acc;
        for p in 0..pairs {
            let (i, j) = (2 * p, 2 * p + 1);
            let lo = a.get(i).to_acc().wrapping_mul(&b.get(i).to_acc());
            let hi = a.get(j).to_acc().wrapping_mul(&b.get(j).to_acc());
            acc = acc.wrapping_add(&lo.wrapping_add(&hi));
        }
        if a.len() % 2 == 1 {
            let k = a.len() - 1;
            acc = qtile_quant::mac(acc, a.get(k), b.get(k));
        }
        acc
    }

    fn sum<T: MacElement>(acc: T::Acc, a: Run<'_, T>) -> T::Acc {
        let mut pair = [T::Acc::zero(); 2];
        for i in 0..a.len() {
            pair[i % 2] = pair[i % 2].wrapping_add(&a.get(i).to_acc());
        }
        acc.wrapping_add(&pair[0].wrapping_add(&pair[1]))
    }

    fn reduce_max<T: Element>(init: T, a: Run<'_, T>) -> T {
        let mut pair = [init; 2];
        for i in 0..a.len() {
            pair[i % 2] = pair[i % 2].max(a.get(i));
        }
        pair[0].max(pair[1])
    }
}

/// Number of lanes of the wide-vector backend.
pub const VECTOR_LANES: usize = 16;

/// Wide-vector DSP: one partial accumulator per lane, reduced at the end.
pub struct WideVectorDsp;

impl BackendConfig for WideVectorDsp {
    const NAME: &'static str = "vector-dsp";
    const LANES: usize = VECTOR_LANES;
}

fn reduce_lanes<A: Accumulator>(mut lanes: [A; VECTOR_LANES]) -> A {
    let mut width = VECTOR_LANES;
    while width > 1 {
        width /= 2;
        for l in 0..width {
            lanes[l] = lanes[l].wrapping_add(&lanes[l + width]);
        }
    }
    lanes[0]
}

impl ComputeBackend for WideVectorDsp {
    fn dot<T: MacElement>(acc: T::Acc, a: Run<'_, T>, b: Run<'_, T>) -> T::Acc {
        check_len(&a, &b);
        let mut lanes = [T::Acc::zero(); VECTOR_LANES];
        for i in 0..a.len() {
            let l = i % VECTOR_LANES;
            lanes[l] = qtile_quant::mac(lanes[l], a.get(i), b.get(i));
        }
        acc.wrapping_add(&reduce_lanes(lanes))
    }

    fn sum<T: MacElement>(acc: T::Acc, a: Run<'_, T>) -> T::Acc {
        let mut lanes = [T::Acc::zero(); VECTOR_LANES];
        for i in 0..a.len() {
            let l = i % VECTOR_LANES;
            lanes[l] = lanes[l].wrapping_add(&a.get(i).to_acc());
        }
        acc.wrapping_add(&reduce_lanes(lanes))
    }

    fn reduce_max<T: Element>(init: T, a: Run<'_, T>) -> T {
        let mut lanes = [init; VECTOR_LANES];
        for i in 0..a.len() {
            let l = i % VECTOR_LANES;
            lanes[l] = lanes[l].max(a.get(i));
        }
        lanes.into_iter().fold(init, |m, x| m.max(x))
    }
}

// ---------------------------------------------------------------------------
// ActiveBackend type alias -- the SINGLE point of backend selection
// ---------------------------------------------------------------------------

/// The active compute backend, selected by Cargo features.
///
/// - `fx-dsp` -> [`FixedPointDsp`]
/// - `vector-dsp` -> [`WideVectorDsp`]
/// - no backend feature -> [`Reference`]
/// - both -> [`Reference`] (placeholder; `compile_error!` fires first)
#[cfg(all(feature = "fx-dsp", not(feature = "vector-dsp")))]
pub type ActiveBackend = FixedPointDsp;

#[cfg(all(feature = "vector-dsp", not(feature = "fx-dsp")))]
pub type ActiveBackend = WideVectorDsp;

#[cfg(not(any(feature = "fx-dsp", feature = "vector-dsp")))]
pub type ActiveBackend = Reference;

/// Placeholder for the invalid feature combination.
///
/// The crate emits `compile_error!` for it (in `lib.rs`), so this alias only
/// suppresses cascading type-resolution errors.
#[cfg(all(feature = "fx-dsp", feature = "vector-dsp"))]
pub type ActiveBackend = Reference;

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn bytes_i8(v: &[i8]) -> Vec<u8> {
        v.iter().map(|&x| x as u8).collect()
    }

    fn bytes_i16(v: &[i16]) -> Vec<u8> {
        v.iter().flat_map(|x| x.to_le_bytes()).collect()
    }

    fn check_agree<B: ComputeBackend>(len: usize, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let a: Vec<i8> = (0..len).map(|_| rng.gen()).collect();
        let b: Vec<i8> = (0..len).map(|_| rng.gen()).collect();
        let (ab, bb) = (bytes_i8(&a), bytes_i8(&b));
        let ra = Run::<i8>::new(&ab, 0, 1, len);
        let rb = Run::<i8>::new(&bb, 0, 1, len);
        assert_eq!(B::dot(7, ra, rb), Reference::dot(7, ra, rb), "{} dot", B::NAME);
        assert_eq!(B::sum(-3, ra), Reference::sum(-3, ra), "{} sum", B::NAME);
        assert_eq!(
            B::reduce_max(i8::MIN, ra),
            Reference::reduce_max(i8::MIN, ra),
            "{} max",
            B::NAME
        );

        let c: Vec<i16> = (0..len).map(|_| rng.gen()).collect();
        let d: Vec<i16> = (0..len).map(|_| rng.gen()).collect();
        let (cb, db) = (bytes_i16(&c), bytes_i16(&d));
        let rc = Run::<i16>::new(&cb, 0, 1, len);
        let rd = Run::<i16>::new(&db, 0, 1, len);
        assert_eq!(B::dot(0, rc, rd), Reference::dot(0, rc, rd), "{} dot16", B::NAME);
    }

    #[test]
    fn test_backends_agree_with_reference() {
        for (seed, len) in [0usize, 1, 2, 15, 16, 17, 100, 257].into_iter().enumerate() {
            check_agree::<FixedPointDsp>(len, seed as u64);
            check_agree::<WideVectorDsp>(len, seed as u64);
        }
    }

    #[test]
    fn test_reference_strided_dot() {
        let a = bytes_i8(&[1, 100, 2, 100, 3]);
        let b = bytes_i8(&[4, 5, 6]);
        let ra = Run::<i8>::new(&a, 0, 2, 3);
        let rb = Run::<i8>::new(&b, 0, 1, 3);
        assert_eq!(Reference::dot(0, ra, rb), 4 + 10 + 18);
        assert_eq!(WideVectorDsp::dot(0, ra, rb), 32);
        assert_eq!(FixedPointDsp::dot(0, ra, rb), 32);
    }

    #[test]
    fn test_wrapping_accumulation_is_order_independent() {
        let a: Vec<i8> = vec![127; 40];
        let bytes = bytes_i8(&a);
        let r = Run::<i8>::new(&bytes, 0, 1, 40);
        let start = i32::MAX - 10;
        let expected = Reference::dot(start, r, r);
        assert_eq!(FixedPointDsp::dot(start, r, r), expected);
        assert_eq!(WideVectorDsp::dot(start, r, r), expected);
    }

    #[test]
    #[should_panic(expected = "different length")]
    fn test_dot_length_mismatch_panics() {
        let a = bytes_i8(&[1, 2]);
        let ra = Run::<i8>::new(&a, 0, 1, 2);
        let rb = Run::<i8>::new(&a, 0, 1, 1);
        let _ = Reference::dot(0, ra, rb);
    }
}
