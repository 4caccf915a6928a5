//! Convolution over HWC tiles.
//!
//! Inputs are `[N, H, W, C]`, weights `[KH, KW, Cin, Cout]` (depthwise:
//! `[KH, KW, 1, C]`), bias `[Cout]`. The input tile starts `padding.begin`
//! rows/columns after the receptive field of the first output of the tile;
//! taps that fall into padding are skipped, which for affine operands is the
//! same as reading the input zero point.

use qtile_iter::Window;
use qtile_quant::{Accumulator, MacElement, ZeroPointTerms};
use qtile_view::{
    Element, TensorView, TensorViewMut, BATCH_DIM, CHANNEL_DIM, HEIGHT_DIM, WIDTH_DIM,
};

use crate::backend::ComputeBackend;
use crate::stage::OutputStage;
use crate::util::Taps;

/// Running sums of one output element.
struct DotSums<A> {
    raw: A,
    input: A,
    weights: A,
    products: usize,
}

impl<A: Accumulator> DotSums<A> {
    fn new() -> Self {
        Self {
            raw: A::zero(),
            input: A::zero(),
            weights: A::zero(),
            products: 0,
        }
    }

    #[inline]
    fn add<B: ComputeBackend, T: MacElement<Acc = A>>(
        &mut self,
        a: qtile_view::Run<'_, T>,
        b: qtile_view::Run<'_, T>,
        in_zp: i32,
        weights_zp: i32,
    ) {
        self.raw = B::dot(self.raw, a, b);
        if weights_zp != 0 {
            self.input = B::sum(self.input, a);
        }
        if in_zp != 0 {
            self.weights = B::sum(self.weights, b);
        }
        self.products += a.len();
    }

    #[inline]
    fn finish(self, in_zp: i32, weights_zp: i32, bias: i64) -> i64 {
        ZeroPointTerms::new(
            self.products,
            in_zp,
            weights_zp,
            self.input,
            self.weights,
            A::wrap_from(bias),
        )
        .apply(self.raw)
        .into()
    }
}

#[inline]
fn bias_at(bias: Option<&TensorView<'_>>, stage: &OutputStage<'_>, channel: usize) -> i64 {
    bias.map_or(0, |b| stage.bias_term(b.at_widened([channel, 0, 0, 0])))
}

/// Standard convolution of one tile.
///
/// # Panics
/// Panics when the weight shape does not match the input and output tiles.
pub fn conv2d<B: ComputeBackend, T: MacElement, O: Element>(
    input: &TensorView<'_>,
    weights: &TensorView<'_>,
    bias: Option<&TensorView<'_>>,
    output: &mut TensorViewMut<'_>,
    window: &Window,
    stage: &OutputStage<'_>,
) {
    let [batch, out_h, out_w, out_c] = output.dims();
    let (in_h, in_w, in_c) = (
        input.dim(HEIGHT_DIM),
        input.dim(WIDTH_DIM),
        input.dim(CHANNEL_DIM),
    );
    let (kh, kw) = (weights.dim(0), weights.dim(1));
    assert_eq!(weights.dim(2), in_c, "weights input channels");
    assert_eq!(weights.dim(3), out_c, "weights output channels");
    assert_eq!(input.dim(BATCH_DIM), batch, "batch size");

    let in_zp = stage.in_zero_point();
    for co in 0..out_c {
        let w_zp = stage.weights_zero_point(co);
        let bias = bias_at(bias, stage, co);
        for n in 0..batch {
            for oy in 0..out_h {
                let ty = Taps::new(
                    oy,
                    window.stride[0],
                    window.dilation[0],
                    window.padding.begin[0],
                    kh,
                    in_h,
                );
                for ox in 0..out_w {
                    let tx = Taps::new(
                        ox,
                        window.stride[1],
                        window.dilation[1],
                        window.padding.begin[1],
                        kw,
                        in_w,
                    );
                    let mut sums = DotSums::<T::Acc>::new();
                    for i in 0..ty.count {
                        let (ky, iy) = (ty.first + i, ty.input + i * window.dilation[0].max(1));
                        for j in 0..tx.count {
                            let (kx, ix) =
                                (tx.first + j, tx.input + j * window.dilation[1].max(1));
                            let a = input.run::<T>([n, iy, ix, 0], CHANNEL_DIM, in_c);
                            let b = weights.run::<T>([ky, kx, 0, co], 2, in_c);
                            sums.add::<B, T>(a, b, in_zp, w_zp);
                        }
                    }
                    let value = sums.finish(in_zp, w_zp, bias);
                    output.set::<O>([n, oy, ox, co], stage.finish(co, value));
                }
            }
        }
    }
}

/// Depthwise convolution of one tile: one filter per channel.
///
/// # Panics
/// Panics when the weight shape does not match the input and output tiles.
pub fn depthwise_conv2d<B: ComputeBackend, T: MacElement, O: Element>(
    input: &TensorView<'_>,
    weights: &TensorView<'_>,
    bias: Option<&TensorView<'_>>,
    output: &mut TensorViewMut<'_>,
    window: &Window,
    stage: &OutputStage<'_>,
) {
    let [batch, out_h, out_w, channels] = output.dims();
    let (in_h, in_w) = (input.dim(HEIGHT_DIM), input.dim(WIDTH_DIM));
    let (kh, kw) = (weights.dim(0), weights.dim(1));
    assert_eq!(weights.dim(2), 1, "depthwise weights have one input channel");
    assert_eq!(weights.dim(3), channels, "weights channels");
    assert_eq!(input.dim(CHANNEL_DIM), channels, "input channels");
    let dil_w = window.dilation[1].max(1);

    let in_zp = stage.in_zero_point();
    for c in 0..channels {
        let w_zp = stage.weights_zero_point(c);
        let bias = bias_at(bias, stage, c);
        for n in 0..batch {
            for oy in 0..out_h {
                let ty = Taps::new(
                    oy,
                    window.stride[0],
                    window.dilation[0],
                    window.padding.begin[0],
                    kh,
                    in_h,
                );
                for ox in 0..out_w {
                    let tx = Taps::new(
                        ox,
                        window.stride[1],
                        window.dilation[1],
                        window.padding.begin[1],
                        kw,
                        in_w,
                    );
                    let mut sums = DotSums::<T::Acc>::new();
                    for i in 0..ty.count {
                        let (ky, iy) = (ty.first + i, ty.input + i * window.dilation[0].max(1));
                        let a = input.run_step::<T>([n, iy, tx.input, c], WIDTH_DIM, dil_w, tx.count);
                        let b = weights.run::<T>([ky, tx.first, 0, c], 1, tx.count);
                        sums.add::<B, T>(a, b, in_zp, w_zp);
                    }
                    let value = sums.finish(in_zp, w_zp, bias);
                    output.set::<O>([n, oy, ox, c], stage.finish(c, value));
                }
            }
        }
    }
}
