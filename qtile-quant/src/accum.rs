//! Accumulator widths for multiply-accumulate chains.
//!
//! 8x8-bit products accumulate in `i32`; 16x16-bit products need the
//! 40-bit accumulator of the DSP targets, held here in an `i64`.
//! Accumulation wraps, so the order in which a backend sums partial
//! products never changes the result.

use num_traits::{PrimInt, Signed, WrappingAdd, WrappingMul, WrappingSub};
use qtile_view::Element;

/// Wide integer register holding partial sums.
pub trait Accumulator:
    PrimInt
    + Signed
    + WrappingAdd
    + WrappingSub
    + WrappingMul
    + From<i16>
    + From<i32>
    + Into<i64>
    + Default
    + std::fmt::Debug
    + Send
    + Sync
    + 'static
{
    /// Truncating conversion from `i64` (wraps like the hardware register).
    fn wrap_from(value: i64) -> Self;
}

impl Accumulator for i32 {
    #[inline]
    fn wrap_from(value: i64) -> Self {
        value as i32
    }
}

impl Accumulator for i64 {
    #[inline]
    fn wrap_from(value: i64) -> Self {
        value
    }
}

/// Element type that takes part in a multiply-accumulate.
pub trait MacElement: Element {
    /// Accumulator wide enough for the worst case of this element width.
    type Acc: Accumulator;

    #[inline]
    fn to_acc(self) -> Self::Acc {
        Self::Acc::wrap_from(self.widen())
    }
}

impl MacElement for i8 {
    type Acc = i32;
}

impl MacElement for i16 {
    type Acc = i64;
}

impl MacElement for i32 {
    type Acc = i64;
}

/// `acc + a * b` in the accumulator domain.
#[inline]
pub fn mac<T: MacElement>(acc: T::Acc, a: T, b: T) -> T::Acc {
    acc.wrapping_add(&a.to_acc().wrapping_mul(&b.to_acc()))
}
