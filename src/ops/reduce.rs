use qtile_iter::AxisRule;
use qtile_kernel::{reduce_max, reduce_sum, ActiveBackend};
use qtile_view::{ElementKind, MemoryMap, Status, MAX_RANK};

use super::{check_shape, resolve, tile_view, tile_view_mut, unsupported};
use crate::error::Result;
use crate::operator::{Operator, TileSchedule};
use crate::record::{DecodeError, KernelId, ReduceRecord};

#[derive(Debug, Clone)]
struct ReduceCore {
    record: ReduceRecord,
    schedule: TileSchedule,
}

impl ReduceCore {
    fn new(r: &ReduceRecord) -> Result<Self> {
        if r.axis >= r.input.rank() {
            return Err(DecodeError::InvalidAxis(r.axis as i32).into());
        }
        r.input.validate()?;
        r.output.validate()?;
        let in_dims = r.input.dims();
        let mut out_dims = in_dims;
        out_dims[r.axis] = 1;
        check_shape("output", &r.output, out_dims)?;
        let rules: [AxisRule; MAX_RANK] = std::array::from_fn(|d| {
            if d == r.axis {
                AxisRule::Full
            } else {
                AxisRule::Follow { out_dim: d }
            }
        });
        let schedule = TileSchedule::new(out_dims, &r.tiling)?.with_input(in_dims, rules)?;
        tracing::debug!(
            axis = r.axis,
            input = ?in_dims,
            tiles = schedule.tile_count(),
            "reduction constructed"
        );
        Ok(Self {
            record: *r,
            schedule,
        })
    }

    fn issue(&mut self, mem: &mut MemoryMap<'_>, max: bool) -> std::result::Result<(), Status> {
        let r = &self.record;
        let (in_kind, out_kind) = (r.input.kind, r.output.kind);
        if max {
            if in_kind != out_kind {
                return Err(Status::TypeMismatch);
            }
        } else if !matches!(
            (in_kind, out_kind),
            (ElementKind::Sa8 | ElementKind::Sa32, ElementKind::Sa32)
        ) {
            return Err(unsupported("reduce sum", &[in_kind, out_kind]));
        }
        self.schedule.begin_issue();

        let reads = [resolve(mem, &r.input)?];
        let write = resolve(mem, &r.output)?;
        let ([input], out) = mem.split_io(reads, write)?;
        let out_tile = self.schedule.output_tile();
        let input = tile_view(input, &r.input, &self.schedule.input_tile(0))?;
        let mut output = tile_view_mut(out, &r.output, &out_tile)?;
        tracing::trace!(
            tile = self.schedule.tile_index(),
            offset = ?out_tile.offset,
            size = ?out_tile.size,
            "reduce issue"
        );

        type B = ActiveBackend;
        match (max, r.input.elem_size()) {
            (true, 1) => reduce_max::<B, i8>(&input, &mut output, r.axis),
            (true, 2) => reduce_max::<B, i16>(&input, &mut output, r.axis),
            (true, _) => reduce_max::<B, i32>(&input, &mut output, r.axis),
            (false, 1) => reduce_sum::<B, i8, i32>(&input, &mut output, r.axis),
            (false, _) => reduce_sum::<B, i32, i32>(&input, &mut output, r.axis),
        }
        self.schedule.mark_issued();
        Ok(())
    }
}

/// Maximum along one axis, kept with extent 1.
#[derive(Debug, Clone)]
pub struct ReduceMax {
    core: ReduceCore,
}

impl ReduceMax {
    pub fn from_record(record: &ReduceRecord) -> Result<Self> {
        Ok(Self {
            core: ReduceCore::new(record)?,
        })
    }
}

decode_constructor!(ReduceMax, ReduceMax);

impl Operator for ReduceMax {
    fn kernel_id(&self) -> KernelId {
        KernelId::ReduceMax
    }

    fn schedule(&self) -> &TileSchedule {
        &self.core.schedule
    }

    fn schedule_mut(&mut self) -> &mut TileSchedule {
        &mut self.core.schedule
    }

    fn issue(&mut self, mem: &mut MemoryMap<'_>) -> std::result::Result<(), Status> {
        self.core.issue(mem, true)
    }
}

/// Sum along one axis into sa32, kept with extent 1.
#[derive(Debug, Clone)]
pub struct ReduceSum {
    core: ReduceCore,
}

impl ReduceSum {
    pub fn from_record(record: &ReduceRecord) -> Result<Self> {
        Ok(Self {
            core: ReduceCore::new(record)?,
        })
    }
}

decode_constructor!(ReduceSum, ReduceSum);

impl Operator for ReduceSum {
    fn kernel_id(&self) -> KernelId {
        KernelId::ReduceSum
    }

    fn schedule(&self) -> &TileSchedule {
        &self.core.schedule
    }

    fn schedule_mut(&mut self) -> &mut TileSchedule {
        &mut self.core.schedule
    }

    fn issue(&mut self, mem: &mut MemoryMap<'_>) -> std::result::Result<(), Status> {
        self.core.issue(mem, false)
    }
}
