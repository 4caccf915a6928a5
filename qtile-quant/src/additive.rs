//! Zero-point compensation terms.
//!
//! For affine operands the dot product is evaluated on raw stored values
//! and corrected afterwards:
//!
//! ```text
//! Σ (a_i − za)(b_i − zb) = Σ a_i b_i − za·Σ b_i − zb·Σ a_i + n·za·zb
//! ```
//!
//! Each correction is computed on its own and added into the same
//! accumulator as the raw dot product, together with the bias.

use crate::accum::Accumulator;

/// `−za · Σ b`: contribution of the input zero point.
#[inline]
pub fn input_zp_term<A: Accumulator>(in_zp: i32, weights_sum: A) -> A {
    if in_zp == 0 {
        return A::zero();
    }
    A::zero().wrapping_sub(&<A as From<i32>>::from(in_zp).wrapping_mul(&weights_sum))
}

/// `−zb · Σ a`: contribution of the weight zero point.
#[inline]
pub fn weights_zp_term<A: Accumulator>(weights_zp: i32, input_sum: A) -> A {
    if weights_zp == 0 {
        return A::zero();
    }
    A::zero().wrapping_sub(&<A as From<i32>>::from(weights_zp).wrapping_mul(&input_sum))
}

/// `n · za · zb`: joint zero-point contribution over `n` products.
#[inline]
pub fn joint_zp_term<A: Accumulator>(n: usize, in_zp: i32, weights_zp: i32) -> A {
    if in_zp == 0 || weights_zp == 0 {
        return A::zero();
    }
    A::wrap_from(n as i64)
        .wrapping_mul(&<A as From<i32>>::from(in_zp))
        .wrapping_mul(&<A as From<i32>>::from(weights_zp))
}

/// The four additive terms of one compensated dot product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZeroPointTerms<A> {
    pub input: A,
    pub weights: A,
    pub joint: A,
    pub bias: A,
}

impl<A: Accumulator> ZeroPointTerms<A> {
    /// Terms for `n` products with the given raw sums and zero points.
    pub fn new(
        n: usize,
        in_zp: i32,
        weights_zp: i32,
        input_sum: A,
        weights_sum: A,
        bias: A,
    ) -> Self {
        Self {
            input: input_zp_term(in_zp, weights_sum),
            weights: weights_zp_term(weights_zp, input_sum),
            joint: joint_zp_term(n, in_zp, weights_zp),
            bias,
        }
    }

    /// Sum of all terms.
    #[inline]
    pub fn total(&self) -> A {
        self.input
            .wrapping_add(&self.weights)
            .wrapping_add(&self.joint)
            .wrapping_add(&self.bias)
    }

    /// Raw dot product plus every correction.
    #[inline]
    pub fn apply(&self, raw_dot: A) -> A {
        raw_dot.wrapping_add(&self.total())
    }
}
