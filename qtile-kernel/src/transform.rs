//! Elementwise transforms: rescale, clip and table lookup.

use qtile_quant::{rescale_value, Params};
use qtile_view::{Element, TensorView, TensorViewMut};

use crate::util::MultiIndex;

/// Parameters of a 32-bit to 8-bit rescale, per tensor or along `axis`.
#[derive(Debug, Clone, Copy)]
pub struct RescaleParams<'a> {
    /// Axis the parameters vary along, negative for per tensor.
    pub axis: i32,
    pub in_bias: Params<'a, i32>,
    pub scale: Params<'a, i16>,
    pub shift: Params<'a, i8>,
    pub out_bias: Params<'a, i8>,
}

impl<'a> RescaleParams<'a> {
    pub fn per_tensor(in_bias: i32, scale: i16, shift: i8, out_bias: i8) -> Self {
        Self {
            axis: -1,
            in_bias: Params::Uniform(in_bias),
            scale: Params::Uniform(scale),
            shift: Params::Uniform(shift),
            out_bias: Params::Uniform(out_bias),
        }
    }

    /// Restrict per-axis parameters to `[start, start + len)`.
    pub fn slice(&self, start: usize, len: usize) -> Self {
        Self {
            axis: self.axis,
            in_bias: self.in_bias.slice(start, len),
            scale: self.scale.slice(start, len),
            shift: self.shift.slice(start, len),
            out_bias: self.out_bias.slice(start, len),
        }
    }
}

/// `output = ((input − in_bias) · scale) >> shift + out_bias`, per element.
pub fn rescale(input: &TensorView<'_>, output: &mut TensorViewMut<'_>, params: &RescaleParams<'_>) {
    let axis = usize::try_from(params.axis).ok();
    for idx in MultiIndex::new(output.dims()) {
        let i = axis.map_or(0, |a| idx[a]);
        let y = rescale_value(
            input.at::<i32>(idx),
            params.in_bias.get(i),
            params.scale.get(i),
            params.shift.get(i),
            params.out_bias.get(i),
        );
        output.set::<i8>(idx, y);
    }
}

/// Clamp every element into `[min, max]`.
pub fn clip<T: Element>(input: &TensorView<'_>, output: &mut TensorViewMut<'_>, min: T, max: T) {
    for idx in MultiIndex::new(output.dims()) {
        let x = input.at::<T>(idx);
        output.set::<T>(idx, x.max(min).min(max));
    }
}

/// Apply `f` to every element, e.g. a lookup-table activation.
pub fn map<T: Element, F: Fn(T) -> T>(input: &TensorView<'_>, output: &mut TensorViewMut<'_>, f: F) {
    for idx in MultiIndex::new(output.dims()) {
        output.set::<T>(idx, f(input.at::<T>(idx)));
    }
}
