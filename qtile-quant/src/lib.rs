//! Quantization parameter algebra for the qtile runtime.
//!
//! Two representations are supported. Fixed point stores `q = round(x * 2^frac)`
//! and requantizes by shifting. Asymmetric affine stores
//! `q = round(x / (scale * 2^-frac)) + zero_point` and requantizes with an
//! integer multiplier-shift pair derived once per operator and adjusted per
//! output channel.
//!
//! # Example
//!
//! ```rust
//! use qtile_quant::{narrow, AffineQuant, AffineRequant, ClampRange, Requantize};
//!
//! let input = AffineQuant::per_tensor(0, 16384, 15); // 0.5
//! let weights = AffineQuant::per_tensor(0, 16384, 14); // 1.0
//! let output = AffineQuant::per_tensor(3, 16384, 14); // 1.0
//! let p = AffineRequant::derive::<i8, i8, i8>(&input, &weights, &output).unwrap();
//!
//! // Accumulator 40 at input x weight scale 0.5 is 20 at output scale 1.0.
//! let y: i8 = narrow(40, p.adjust(0), p.out_zero_point, ClampRange::FULL);
//! assert_eq!(y, 23);
//! ```

pub mod accum;
pub mod additive;
pub mod math;
pub mod narrow;
pub mod params;

pub use accum::{mac, Accumulator, MacElement};
pub use additive::{input_zp_term, joint_zp_term, weights_zp_term, ZeroPointTerms};
pub use math::{asl_sat, asr, asr_rnd, norm};
pub use narrow::{narrow, rescale_value, ClampRange};
pub use params::{
    AffineQuant, AffineRequant, FxRequant, Multiplier, Params, QuantParams, Requantize,
};

/// Fractional bits kept when dividing the input scale by the output scale.
///
/// Large enough that a 16-bit quotient survives even when the output scale
/// exceeds the input scale by more than four orders of magnitude.
pub const PRE_DIV_SHIFT: i32 = 40;

/// Errors raised while deriving requantization parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantError {
    /// Input or output parameters vary along an axis where one set is required.
    #[error("per-axis quantization is only supported for weights")]
    PerAxisNotAllowed,

    /// A scale mantissa is zero or negative.
    #[error("quantization scale must be positive")]
    NonPositiveScale,

    /// A zero point does not fit the element type it offsets.
    #[error("{name} zero point {value} is out of range for its element type")]
    ZeroPointOutOfRange { name: &'static str, value: i16 },
}

/// Result type for parameter derivation.
pub type Result<T> = std::result::Result<T, QuantError>;
