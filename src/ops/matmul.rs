use qtile_iter::AxisRule;
use qtile_kernel::{matmul, ActiveBackend};
use qtile_view::{ElementKind, MemoryMap, Run, Status};

use super::{check_param_len, check_shape, resolve, tile_view, tile_view_mut, unsupported};
use crate::error::Result;
use crate::operator::{Operator, TileSchedule};
use crate::record::{KernelId, MatMulRecord};

/// `[M, K] x [K, N] -> [M, N]` with the operands' zero points removed.
#[derive(Debug, Clone)]
pub struct MatMul {
    record: MatMulRecord,
    schedule: TileSchedule,
}

impl MatMul {
    pub fn from_record(r: &MatMulRecord) -> Result<Self> {
        r.left.validate()?;
        r.right.validate()?;
        r.output.validate()?;
        let [m, k, _, _] = r.left.dims();
        let n = r.right.dim(1);
        check_shape("right", &r.right, [k, n, 1, 1])?;
        check_shape("output", &r.output, [m, n, 1, 1])?;
        check_param_len("matmul zero points", &r.params, 1, 2)?;

        let schedule = TileSchedule::new(r.output.dims(), &r.tiling)?
            .with_input(
                r.left.dims(),
                [
                    AxisRule::Follow { out_dim: 0 },
                    AxisRule::Full,
                    AxisRule::Full,
                    AxisRule::Full,
                ],
            )?
            .with_input(
                r.right.dims(),
                [
                    AxisRule::Full,
                    AxisRule::Follow { out_dim: 1 },
                    AxisRule::Full,
                    AxisRule::Full,
                ],
            )?;
        tracing::debug!(m, k, n, tiles = schedule.tile_count(), "matmul constructed");
        Ok(Self {
            record: *r,
            schedule,
        })
    }
}

decode_constructor!(MatMul, MatMul);

impl Operator for MatMul {
    fn kernel_id(&self) -> KernelId {
        KernelId::MatMul
    }

    fn schedule(&self) -> &TileSchedule {
        &self.schedule
    }

    fn schedule_mut(&mut self) -> &mut TileSchedule {
        &mut self.schedule
    }

    fn issue(&mut self, mem: &mut MemoryMap<'_>) -> std::result::Result<(), Status> {
        let r = &self.record;
        let kinds = [r.left.kind, r.right.kind, r.output.kind];
        if kinds != [ElementKind::Sa8, ElementKind::Sa8, ElementKind::Sa32] {
            return Err(unsupported("matmul", &kinds));
        }
        self.schedule.begin_issue();

        let reads = [
            resolve(mem, &r.left)?,
            resolve(mem, &r.right)?,
            mem.resolve(r.params, 1)?,
        ];
        let write = resolve(mem, &r.output)?;
        let ([left, right, params], out) = mem.split_io(reads, write)?;
        let zero_points = Run::<i8>::new(params, 0, 1, 2);

        let out_tile = self.schedule.output_tile();
        let left = tile_view(left, &r.left, &self.schedule.input_tile(0))?;
        let right = tile_view(right, &r.right, &self.schedule.input_tile(1))?;
        let mut output = tile_view_mut(out, &r.output, &out_tile)?;
        tracing::trace!(
            tile = self.schedule.tile_index(),
            offset = ?out_tile.offset,
            size = ?out_tile.size,
            "matmul issue"
        );
        matmul::<ActiveBackend, i8, i32>(
            &left,
            &right,
            &mut output,
            zero_points.get(0) as i32,
            zero_points.get(1) as i32,
        );
        self.schedule.mark_issued();
        Ok(())
    }
}
