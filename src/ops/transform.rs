use qtile_iter::AxisRule;
use qtile_kernel::{clip, rescale, RescaleParams};
use qtile_view::{ElementKind, MemoryMap, Run, Status, MAX_RANK};

use super::{buffer_params, check_param_len, check_shape, resolve, tile_view, tile_view_mut, unsupported};
use crate::error::Result;
use crate::operator::{Operator, TileSchedule};
use crate::record::{ClipRecord, DecodeError, KernelId, RescaleRecord};

/// Every input dimension follows the same output dimension.
pub(super) fn elementwise_rules() -> [AxisRule; MAX_RANK] {
    std::array::from_fn(|d| AxisRule::Follow { out_dim: d })
}

/// Narrow sa32 to sa8: `((x - in_bias) * scale) >> shift + out_bias`,
/// rounded and saturated.
#[derive(Debug, Clone)]
pub struct Rescale {
    record: RescaleRecord,
    axis: Option<usize>,
    schedule: TileSchedule,
}

impl Rescale {
    pub fn from_record(r: &RescaleRecord) -> Result<Self> {
        r.input.validate()?;
        r.output.validate()?;
        let dims = r.input.dims();
        check_shape("output", &r.output, dims)?;

        let axis = match usize::try_from(r.axis) {
            Ok(a) if a < r.input.rank() => Some(a),
            Err(_) if r.axis == -1 => None,
            _ => return Err(DecodeError::InvalidAxis(r.axis as i32).into()),
        };
        let n = axis.map_or(1, |a| dims[a]);
        check_param_len("rescale input bias", &r.in_bias, 4, n)?;
        check_param_len("rescale scale", &r.scale, 2, n)?;
        check_param_len("rescale shift", &r.shift, 1, n)?;
        check_param_len("rescale output bias", &r.out_bias, 1, n)?;

        let schedule = TileSchedule::new(dims, &r.tiling)?.with_input(dims, elementwise_rules())?;
        tracing::debug!(
            axis = r.axis,
            dims = ?dims,
            tiles = schedule.tile_count(),
            "rescale constructed"
        );
        Ok(Self {
            record: *r,
            axis,
            schedule,
        })
    }
}

decode_constructor!(Rescale, Rescale);

impl Operator for Rescale {
    fn kernel_id(&self) -> KernelId {
        KernelId::Rescale
    }

    fn schedule(&self) -> &TileSchedule {
        &self.schedule
    }

    fn schedule_mut(&mut self) -> &mut TileSchedule {
        &mut self.schedule
    }

    fn issue(&mut self, mem: &mut MemoryMap<'_>) -> std::result::Result<(), Status> {
        let r = &self.record;
        let kinds = [r.input.kind, r.output.kind];
        if kinds != [ElementKind::Sa32, ElementKind::Sa8] {
            return Err(unsupported("rescale", &kinds));
        }
        self.schedule.begin_issue();

        let reads = [
            resolve(mem, &r.input)?,
            mem.resolve(r.in_bias, 4)?,
            mem.resolve(r.scale, 2)?,
            mem.resolve(r.shift, 1)?,
            mem.resolve(r.out_bias, 1)?,
        ];
        let write = resolve(mem, &r.output)?;
        let ([input, in_bias, scale, shift, out_bias], out) = mem.split_io(reads, write)?;

        let out_tile = self.schedule.output_tile();
        let input = tile_view(input, &r.input, &self.schedule.input_tile(0))?;
        let mut output = tile_view_mut(out, &r.output, &out_tile)?;
        let per_axis = self.axis.is_some();
        let params = RescaleParams {
            axis: r.axis as i32,
            in_bias: buffer_params(in_bias, per_axis),
            scale: buffer_params(scale, per_axis),
            shift: buffer_params(shift, per_axis),
            out_bias: buffer_params(out_bias, per_axis),
        };
        let params = match self.axis {
            Some(a) => params.slice(out_tile.offset[a], out_tile.size[a]),
            None => params,
        };
        tracing::trace!(
            tile = self.schedule.tile_index(),
            offset = ?out_tile.offset,
            size = ?out_tile.size,
            "rescale issue"
        );
        rescale(&input, &mut output, &params);
        self.schedule.mark_issued();
        Ok(())
    }
}

/// Clamp every element into `[min, max]`.
#[derive(Debug, Clone)]
pub struct Clip {
    record: ClipRecord,
    schedule: TileSchedule,
}

impl Clip {
    pub fn from_record(r: &ClipRecord) -> Result<Self> {
        r.input.validate()?;
        r.output.validate()?;
        let dims = r.input.dims();
        check_shape("output", &r.output, dims)?;
        check_param_len("clip bounds", &r.params, r.input.elem_size(), 2)?;
        let schedule = TileSchedule::new(dims, &r.tiling)?.with_input(dims, elementwise_rules())?;
        tracing::debug!(dims = ?dims, tiles = schedule.tile_count(), "clip constructed");
        Ok(Self {
            record: *r,
            schedule,
        })
    }
}

decode_constructor!(Clip, Clip);

impl Operator for Clip {
    fn kernel_id(&self) -> KernelId {
        KernelId::Clip
    }

    fn schedule(&self) -> &TileSchedule {
        &self.schedule
    }

    fn schedule_mut(&mut self) -> &mut TileSchedule {
        &mut self.schedule
    }

    fn issue(&mut self, mem: &mut MemoryMap<'_>) -> std::result::Result<(), Status> {
        let r = &self.record;
        let (in_kind, out_kind) = (r.input.kind, r.output.kind);
        if in_kind != out_kind {
            return Err(Status::TypeMismatch);
        }
        if !matches!(in_kind, ElementKind::Sa8 | ElementKind::Sa32) {
            return Err(unsupported("clip", &[in_kind, out_kind]));
        }
        self.schedule.begin_issue();

        let size = r.input.elem_size();
        let reads = [resolve(mem, &r.input)?, mem.resolve(r.params, size)?];
        let write = resolve(mem, &r.output)?;
        let ([input, bounds], out) = mem.split_io(reads, write)?;

        let out_tile = self.schedule.output_tile();
        let input = tile_view(input, &r.input, &self.schedule.input_tile(0))?;
        let mut output = tile_view_mut(out, &r.output, &out_tile)?;
        tracing::trace!(
            tile = self.schedule.tile_index(),
            offset = ?out_tile.offset,
            size = ?out_tile.size,
            "clip issue"
        );
        if in_kind == ElementKind::Sa8 {
            let b = Run::<i8>::new(bounds, 0, 1, 2);
            clip::<i8>(&input, &mut output, b.get(0), b.get(1));
        } else {
            let b = Run::<i32>::new(bounds, 0, 1, 2);
            clip::<i32>(&input, &mut output, b.get(0), b.get(1));
        }
        self.schedule.mark_issued();
        Ok(())
    }
}
