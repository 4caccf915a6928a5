//! Requantization parameter derivation and per-channel adjustment.
//!
//! Two schemes are supported:
//!
//! - [`FxRequant`]: plain fixed point, a pure shift derived from fractional
//!   bit counts. Adjustment is a no-op.
//! - [`AffineRequant`]: asymmetric 8-bit affine. The input/output scale
//!   ratio is normalized into a 16-bit mantissa at derive time; adjusting
//!   for an output channel folds in that channel's weight scale and
//!   renormalizes the product to fill a 32-bit multiplier.

use qtile_view::{Element, Run, PER_TENSOR_AXIS};

use crate::math::{asr_rnd, norm};
use crate::{QuantError, Result, PRE_DIV_SHIFT};

// ============================================================================
// Parameter arrays
// ============================================================================

/// A quantization parameter that is either uniform or varies along an axis.
#[derive(Debug, Clone, Copy)]
pub enum Params<'a, T> {
    /// One value for the whole tensor.
    Uniform(T),
    /// One value per index along the quantization axis.
    PerAxis(Run<'a, T>),
}

impl<'a, T: Element> Params<'a, T> {
    /// Value for index `i` along the axis (`i` is ignored when uniform).
    #[inline]
    pub fn get(&self, i: usize) -> T {
        match self {
            Params::Uniform(v) => *v,
            Params::PerAxis(run) => run.get(i),
        }
    }

    /// Number of per-axis values, `None` when uniform.
    pub fn len(&self) -> Option<usize> {
        match self {
            Params::Uniform(_) => None,
            Params::PerAxis(run) => Some(run.len()),
        }
    }

    /// Restrict per-axis values to `[start, start + len)`, as a tile does.
    pub fn slice(&self, start: usize, len: usize) -> Self {
        match self {
            Params::Uniform(v) => Params::Uniform(*v),
            Params::PerAxis(run) => Params::PerAxis(run.slice(start, len)),
        }
    }
}

/// Affine quantization of one tensor: `real = scale * 2^-frac * (q - zp)`.
#[derive(Debug, Clone, Copy)]
pub struct AffineQuant<'a> {
    /// Axis the parameters vary along, or [`PER_TENSOR_AXIS`].
    pub axis: i32,
    pub zero_point: Params<'a, i16>,
    pub scale: Params<'a, i16>,
    pub frac_bits: Params<'a, i8>,
}

impl<'a> AffineQuant<'a> {
    /// Per-tensor parameters.
    pub fn per_tensor(zero_point: i16, scale: i16, frac_bits: i8) -> Self {
        Self {
            axis: PER_TENSOR_AXIS,
            zero_point: Params::Uniform(zero_point),
            scale: Params::Uniform(scale),
            frac_bits: Params::Uniform(frac_bits),
        }
    }

    #[inline]
    pub fn is_per_axis(&self) -> bool {
        self.axis >= 0
    }

    /// Real-valued scale of index `i` along the axis.
    pub fn real_scale(&self, i: usize) -> f64 {
        self.scale.get(i) as f64 * (-(self.frac_bits.get(i) as f64)).exp2()
    }

    /// Restrict per-axis parameters to a tile `[start, start + len)`.
    pub fn slice(&self, start: usize, len: usize) -> Self {
        Self {
            axis: self.axis,
            zero_point: self.zero_point.slice(start, len),
            scale: self.scale.slice(start, len),
            frac_bits: self.frac_bits.slice(start, len),
        }
    }
}

// ============================================================================
// Multiplier and the Requantize trait
// ============================================================================

/// Resolved output multiplier: `real ≈ mul * 2^-shift` (positive shift narrows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Multiplier {
    pub mul: i32,
    pub shift: i32,
}

impl Multiplier {
    /// Identity requantization.
    pub const ONE: Multiplier = Multiplier { mul: 1, shift: 0 };

    /// Real value represented by the multiplier.
    pub fn real(&self) -> f64 {
        self.mul as f64 * (-(self.shift as f64)).exp2()
    }
}

/// Per-output-channel resolution of a derived parameter set.
pub trait Requantize {
    /// Effective multiplier for output channel `channel`.
    fn adjust(&self, channel: usize) -> Multiplier;
}

// ============================================================================
// Fixed point
// ============================================================================

/// Fixed-point requantization: shifts derived from fractional bit counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FxRequant {
    /// Left shift aligning the bias with the accumulator.
    pub bias_shift: i32,
    /// Right shift narrowing the accumulator to the output.
    pub out_shift: i32,
}

impl FxRequant {
    /// Derive from the fractional bits of input, weights, bias and output.
    pub fn derive(in_frac: i8, weights_frac: i8, bias_frac: i8, out_frac: i8) -> Self {
        let product_frac = in_frac as i32 + weights_frac as i32;
        Self {
            bias_shift: product_frac - bias_frac as i32,
            out_shift: product_frac - out_frac as i32,
        }
    }

    /// Bias converted to the accumulator's fixed-point format.
    pub fn align_bias(&self, bias: i64) -> i64 {
        asr_rnd(bias, -self.bias_shift)
    }
}

impl Requantize for FxRequant {
    #[inline]
    fn adjust(&self, _channel: usize) -> Multiplier {
        Multiplier {
            mul: 1,
            shift: self.out_shift,
        }
    }
}

// ============================================================================
// Asymmetric affine
// ============================================================================

/// Derived affine requantization for a `input x weights -> output` chain.
#[derive(Debug, Clone, Copy)]
pub struct AffineRequant<'a> {
    pub in_zero_point: i32,
    pub out_zero_point: i32,
    /// Input-to-output scale ratio as a normalized 16-bit mantissa.
    pub scales_ratio: i16,
    /// Shift paired with `scales_ratio`.
    pub ratio_shift: i32,
    weights_axis: i32,
    weights_zero_point: Params<'a, i16>,
    weights_scale: Params<'a, i16>,
    weights_frac: Params<'a, i8>,
}

fn check_zero_point<T: Element>(zp: i16, name: &'static str) -> Result<i32> {
    let v = zp as i64;
    if v < T::min_value().widen() || v > T::max_value().widen() {
        return Err(QuantError::ZeroPointOutOfRange { name, value: zp });
    }
    Ok(zp as i32)
}

/// Normalize a positive ratio held with `frac` fractional bits into a
/// 16-bit mantissa in `[2^14, 2^15)`, returning `(mantissa, shift)`.
fn normalize_to_i16(q: i64, frac: i32) -> (i16, i32) {
    let used_bits = 64 - q.leading_zeros() as i32;
    let mut rshift = used_bits - 15;
    let mut mantissa = asr_rnd(q, rshift);
    if mantissa >= 1 << 15 {
        mantissa >>= 1;
        rshift += 1;
    }
    (mantissa as i16, frac - rshift)
}

impl<'a> AffineRequant<'a> {
    /// Derive for input element type `I`, weights element type `W` and
    /// output element type `O`.
    ///
    /// `input` and `output` must be per-tensor; `weights` may vary along the
    /// output-channel axis. Every weights zero point must fit `W`.
    pub fn derive<I: Element, W: Element, O: Element>(
        input: &AffineQuant<'a>,
        weights: &AffineQuant<'a>,
        output: &AffineQuant<'a>,
    ) -> Result<Self> {
        if input.is_per_axis() || output.is_per_axis() {
            return Err(QuantError::PerAxisNotAllowed);
        }
        let in_scale = input.scale.get(0);
        let out_scale = output.scale.get(0);
        if in_scale <= 0 || out_scale <= 0 {
            return Err(QuantError::NonPositiveScale);
        }
        let in_zero_point = check_zero_point::<I>(input.zero_point.get(0), "input")?;
        let out_zero_point = check_zero_point::<O>(output.zero_point.get(0), "output")?;
        for ch in 0..weights.zero_point.len().unwrap_or(1) {
            check_zero_point::<W>(weights.zero_point.get(ch), "weights")?;
        }

        let q = ((in_scale as i64) << PRE_DIV_SHIFT) / out_scale as i64;
        let (scales_ratio, shift) = normalize_to_i16(q, PRE_DIV_SHIFT);
        let ratio_shift =
            shift + input.frac_bits.get(0) as i32 - output.frac_bits.get(0) as i32;

        Ok(Self {
            in_zero_point,
            out_zero_point,
            scales_ratio,
            ratio_shift,
            weights_axis: weights.axis,
            weights_zero_point: weights.zero_point,
            weights_scale: weights.scale,
            weights_frac: weights.frac_bits,
        })
    }

    #[inline]
    fn channel_index(&self, channel: usize) -> usize {
        if self.weights_axis < 0 {
            0
        } else {
            channel
        }
    }

    /// Weight zero point for output channel `channel`.
    pub fn weights_zero_point(&self, channel: usize) -> i32 {
        self.weights_zero_point.get(self.channel_index(channel)) as i32
    }

    /// Restrict per-channel weight parameters to a tile of output channels.
    pub fn slice_channels(&self, start: usize, len: usize) -> Self {
        if self.weights_axis < 0 {
            return *self;
        }
        Self {
            weights_zero_point: self.weights_zero_point.slice(start, len),
            weights_scale: self.weights_scale.slice(start, len),
            weights_frac: self.weights_frac.slice(start, len),
            ..*self
        }
    }
}

impl Requantize for AffineRequant<'_> {
    fn adjust(&self, channel: usize) -> Multiplier {
        let idx = self.channel_index(channel);
        let mul = self.scales_ratio as i32 * self.weights_scale.get(idx) as i32;
        let shift = self.ratio_shift + self.weights_frac.get(idx) as i32;
        let headroom = norm(mul);
        Multiplier {
            mul: mul << headroom,
            shift: shift + headroom as i32,
        }
    }
}

/// Either scheme, chosen by the element kinds at issue time.
#[derive(Debug, Clone, Copy)]
pub enum QuantParams<'a> {
    Fixed(FxRequant),
    Affine(AffineRequant<'a>),
}

impl Requantize for QuantParams<'_> {
    fn adjust(&self, channel: usize) -> Multiplier {
        match self {
            QuantParams::Fixed(p) => p.adjust(channel),
            QuantParams::Affine(p) => p.adjust(channel),
        }
    }
}
