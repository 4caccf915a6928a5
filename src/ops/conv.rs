use qtile_iter::{AxisRule, Padding, Window};
use qtile_kernel::{conv2d, depthwise_conv2d, ActiveBackend, OutputStage};
use qtile_quant::{AffineQuant, AffineRequant, FxRequant, MacElement};
use qtile_view::{
    Element, ElementKind, MemoryMap, Status, TensorView, TensorViewMut, CHANNEL_DIM, HEIGHT_DIM,
    WIDTH_DIM,
};

use super::{axis_params, check_param_len, check_shape, resolve, resolve_opt, tile_view, tile_view_mut, unsupported};
use crate::codec::QuantRecord;
use crate::error::Result;
use crate::operator::{Operator, TileSchedule};
use crate::record::{ConvRecord, DecodeError, KernelId};

/// Element-kind combinations with a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConvKinds {
    /// sa8 x sa8 -> zero-point corrected sa32 accumulators.
    Raw,
    /// sa8 x sa8 -> requantized sa8.
    Affine,
    Fx8,
    Fx16,
}

fn conv_kinds(r: &ConvRecord) -> Option<ConvKinds> {
    use ElementKind::*;
    let bias = r.bias.map(|b| b.kind);
    match (r.input.kind, r.weights.kind, bias, r.output.kind) {
        (Sa8, Sa8, None | Some(Sa32), Sa32) => Some(ConvKinds::Raw),
        (Sa8, Sa8, None | Some(Sa32), Sa8) => Some(ConvKinds::Affine),
        (Fx8, Fx8, None | Some(Fx8), Fx8) => Some(ConvKinds::Fx8),
        (Fx16, Fx16, None | Some(Fx16), Fx16) => Some(ConvKinds::Fx16),
        _ => None,
    }
}

/// Per-tensor affine parameters of an activation.
fn activation_quant(q: &QuantRecord) -> AffineQuant<'static> {
    AffineQuant {
        axis: q.axis as i32,
        ..AffineQuant::per_tensor(q.zero_point, q.scale, q.frac_bits)
    }
}

fn run_kernel<T: MacElement, O: Element>(
    depthwise: bool,
    input: &TensorView<'_>,
    weights: &TensorView<'_>,
    bias: Option<&TensorView<'_>>,
    output: &mut TensorViewMut<'_>,
    window: &Window,
    stage: &OutputStage<'_>,
) {
    if depthwise {
        depthwise_conv2d::<ActiveBackend, T, O>(input, weights, bias, output, window, stage);
    } else {
        conv2d::<ActiveBackend, T, O>(input, weights, bias, output, window, stage);
    }
}

/// State shared by both convolution operators.
#[derive(Debug, Clone)]
struct ConvCore {
    record: ConvRecord,
    depthwise: bool,
    kinds: Option<ConvKinds>,
    schedule: TileSchedule,
}

impl ConvCore {
    fn new(r: &ConvRecord, depthwise: bool) -> Result<Self> {
        r.input.validate()?;
        r.weights.validate()?;
        r.output.validate()?;
        if let Some(b) = &r.bias {
            b.validate()?;
        }

        let in_dims = r.input.dims();
        let [batch, in_h, in_w, in_c] = in_dims;
        let [kh, kw, _, w_out] = r.weights.dims();
        let out_c = if depthwise { in_c } else { w_out };
        let weights_dims = if depthwise {
            [kh, kw, 1, in_c]
        } else {
            [kh, kw, in_c, out_c]
        };
        check_shape("weights", &r.weights, weights_dims)?;
        let window = r.window;
        let out_dims = [
            batch,
            window.output_dim(0, in_h),
            window.output_dim(1, in_w),
            out_c,
        ];
        check_shape("output", &r.output, out_dims)?;
        if let Some(b) = &r.bias {
            check_shape("bias", b, [out_c, 1, 1, 1])?;
        }

        let wq = &r.weights_quant;
        if wq.is_per_axis() {
            if wq.axis as usize != CHANNEL_DIM {
                return Err(DecodeError::InvalidAxis(wq.axis as i32).into());
            }
            check_param_len("weight zero points", &wq.zero_points, 2, out_c)?;
            check_param_len("weight scales", &wq.scales, 2, out_c)?;
            check_param_len("weight fractional bits", &wq.frac_bits_per_axis, 1, out_c)?;
        }

        let kinds = conv_kinds(r);
        if kinds == Some(ConvKinds::Affine) {
            // per-axis weight zero points live in memory and are checked at issue
            let weights_zp = if wq.is_per_axis() { 0 } else { wq.zero_point };
            AffineRequant::derive::<i8, i8, i8>(
                &activation_quant(&r.input_quant),
                &AffineQuant::per_tensor(weights_zp, 1, 0),
                &activation_quant(&r.output_quant),
            )?;
        }

        let input_channels = if depthwise {
            AxisRule::Follow {
                out_dim: CHANNEL_DIM,
            }
        } else {
            AxisRule::Full
        };
        let mut schedule = TileSchedule::new(out_dims, &r.tiling)?
            .with_input(
                in_dims,
                [
                    AxisRule::Follow { out_dim: 0 },
                    window.halo_rule(0, HEIGHT_DIM),
                    window.halo_rule(1, WIDTH_DIM),
                    input_channels,
                ],
            )?
            .with_input(
                r.weights.dims(),
                [
                    AxisRule::Full,
                    AxisRule::Full,
                    AxisRule::Full,
                    AxisRule::Follow {
                        out_dim: CHANNEL_DIM,
                    },
                ],
            )?;
        if let Some(b) = &r.bias {
            schedule = schedule.with_input(
                b.dims(),
                [
                    AxisRule::Follow {
                        out_dim: CHANNEL_DIM,
                    },
                    AxisRule::Full,
                    AxisRule::Full,
                    AxisRule::Full,
                ],
            )?;
        }
        let schedule = schedule.with_window(window, in_dims);

        tracing::debug!(
            depthwise,
            input = ?in_dims,
            weights = ?r.weights.dims(),
            output = ?out_dims,
            tiles = schedule.tile_count(),
            order = ?schedule.output_iter().cfg().order(),
            "conv operator constructed"
        );
        Ok(Self {
            record: *r,
            depthwise,
            kinds,
            schedule,
        })
    }

    fn issue(&mut self, mem: &mut MemoryMap<'_>) -> std::result::Result<(), Status> {
        let r = &self.record;
        let name = if self.depthwise { "depthwise conv2d" } else { "conv2d" };
        let Some(kinds) = self.kinds else {
            let bias = r.bias.map_or(r.output.kind, |b| b.kind);
            return Err(unsupported(
                name,
                &[r.input.kind, r.weights.kind, bias, r.output.kind],
            ));
        };
        self.schedule.begin_issue();

        let wq = &r.weights_quant;
        let reads = [
            resolve(mem, &r.input)?,
            resolve(mem, &r.weights)?,
            resolve_opt(mem, r.bias.as_ref())?,
            mem.resolve(wq.zero_points, 2)?,
            mem.resolve(wq.scales, 2)?,
            mem.resolve(wq.frac_bits_per_axis, 1)?,
        ];
        let write = resolve(mem, &r.output)?;
        let ([input, weights, bias, zps, scales, fracs], out) = mem.split_io(reads, write)?;

        let out_tile = self.schedule.output_tile();
        let input = tile_view(input, &r.input, &self.schedule.input_tile(0))?;
        let weights = tile_view(weights, &r.weights, &self.schedule.input_tile(1))?;
        let bias = match &r.bias {
            Some(desc) => Some(tile_view(bias, desc, &self.schedule.input_tile(2))?),
            None => None,
        };
        let mut output = tile_view_mut(out, &r.output, &out_tile)?;
        let window = self.schedule.tile_window().unwrap_or(r.window);

        let per_axis = wq.is_per_axis();
        let weights_quant = AffineQuant {
            axis: wq.axis as i32,
            zero_point: axis_params(zps, per_axis, wq.zero_point),
            scale: axis_params(scales, per_axis, wq.scale),
            frac_bits: axis_params(fracs, per_axis, wq.frac_bits),
        };
        let stage = match kinds {
            ConvKinds::Raw => OutputStage::Raw {
                in_zero_point: r.input_quant.zero_point as i32,
                weights_zero_point: weights_quant.zero_point,
            },
            ConvKinds::Affine => OutputStage::Affine {
                params: AffineRequant::derive::<i8, i8, i8>(
                    &activation_quant(&r.input_quant),
                    &weights_quant,
                    &activation_quant(&r.output_quant),
                )
                .map_err(|_| Status::NotSupported)?,
                clamp: r.clamp,
            },
            ConvKinds::Fx8 | ConvKinds::Fx16 => OutputStage::Fixed {
                params: FxRequant::derive(
                    r.input_quant.frac_bits,
                    wq.frac_bits,
                    r.bias_quant.frac_bits,
                    r.output_quant.frac_bits,
                ),
                clamp: r.clamp,
            },
        };
        let stage = stage.slice_channels(out_tile.offset[CHANNEL_DIM], out_tile.size[CHANNEL_DIM]);

        tracing::trace!(
            tile = self.schedule.tile_index(),
            offset = ?out_tile.offset,
            size = ?out_tile.size,
            padding = ?window.padding,
            "{name} issue"
        );
        let bias = bias.as_ref();
        match kinds {
            ConvKinds::Raw => run_kernel::<i8, i32>(
                self.depthwise,
                &input,
                &weights,
                bias,
                &mut output,
                &window,
                &stage,
            ),
            ConvKinds::Affine | ConvKinds::Fx8 => run_kernel::<i8, i8>(
                self.depthwise,
                &input,
                &weights,
                bias,
                &mut output,
                &window,
                &stage,
            ),
            ConvKinds::Fx16 => run_kernel::<i16, i16>(
                self.depthwise,
                &input,
                &weights,
                bias,
                &mut output,
                &window,
                &stage,
            ),
        }
        self.schedule.mark_issued();
        Ok(())
    }
}

/// Convolution over HWC tensors with `[KH, KW, Cin, Cout]` weights.
#[derive(Debug, Clone)]
pub struct Conv2d {
    core: ConvCore,
}

impl Conv2d {
    pub fn from_record(record: &ConvRecord) -> Result<Self> {
        Ok(Self {
            core: ConvCore::new(record, false)?,
        })
    }

    /// Padding applied to the current tile.
    pub fn padding(&self) -> Padding {
        self.core.schedule.padding()
    }
}

decode_constructor!(Conv2d, Conv2d);

impl Operator for Conv2d {
    fn kernel_id(&self) -> KernelId {
        KernelId::Conv2d
    }

    fn schedule(&self) -> &TileSchedule {
        &self.core.schedule
    }

    fn schedule_mut(&mut self) -> &mut TileSchedule {
        &mut self.core.schedule
    }

    fn issue(&mut self, mem: &mut MemoryMap<'_>) -> std::result::Result<(), Status> {
        self.core.issue(mem)
    }
}

/// Depthwise convolution with `[KH, KW, 1, C]` weights.
#[derive(Debug, Clone)]
pub struct DepthwiseConv2d {
    core: ConvCore,
}

impl DepthwiseConv2d {
    pub fn from_record(record: &ConvRecord) -> Result<Self> {
        Ok(Self {
            core: ConvCore::new(record, true)?,
        })
    }

    /// Padding applied to the current tile.
    pub fn padding(&self) -> Padding {
        self.core.schedule.padding()
    }
}

decode_constructor!(DepthwiseConv2d, DwConv2d);

impl Operator for DepthwiseConv2d {
    fn kernel_id(&self) -> KernelId {
        KernelId::DwConv2d
    }

    fn schedule(&self) -> &TileSchedule {
        &self.core.schedule
    }

    fn schedule_mut(&mut self) -> &mut TileSchedule {
        &mut self.core.schedule
    }

    fn issue(&mut self, mem: &mut MemoryMap<'_>) -> std::result::Result<(), Status> {
        self.core.issue(mem)
    }
}
