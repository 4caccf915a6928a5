use qtile_kernel::permute;
use qtile_view::{MemoryMap, Status, MAX_RANK};

use super::{check_shape, resolve, tile_view, tile_view_mut};
use crate::error::Result;
use crate::operator::{Operator, TileSchedule};
use crate::record::{KernelId, PermuteRecord};

/// Reorder dimensions: output dimension `d` is input dimension `perm[d]`.
#[derive(Debug, Clone)]
pub struct Permute {
    record: PermuteRecord,
    schedule: TileSchedule,
}

impl Permute {
    pub fn from_record(r: &PermuteRecord) -> Result<Self> {
        r.input.validate()?;
        r.output.validate()?;
        let in_dims = r.input.dims();
        let out_dims: [usize; MAX_RANK] = std::array::from_fn(|d| in_dims[r.perm[d]]);
        check_shape("output", &r.output, out_dims)?;
        let schedule = TileSchedule::new(out_dims, &r.tiling)?.with_permuted_input(in_dims, r.perm)?;
        tracing::debug!(
            perm = ?r.perm,
            input = ?in_dims,
            tiles = schedule.tile_count(),
            "permute constructed"
        );
        Ok(Self {
            record: *r,
            schedule,
        })
    }
}

decode_constructor!(Permute, Permute);

impl Operator for Permute {
    fn kernel_id(&self) -> KernelId {
        KernelId::Permute
    }

    fn schedule(&self) -> &TileSchedule {
        &self.schedule
    }

    fn schedule_mut(&mut self) -> &mut TileSchedule {
        &mut self.schedule
    }

    fn issue(&mut self, mem: &mut MemoryMap<'_>) -> std::result::Result<(), Status> {
        let r = &self.record;
        if r.input.kind != r.output.kind {
            return Err(Status::TypeMismatch);
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
            "permute issue"
        );
        match r.input.elem_size() {
            1 => permute::<i8>(&input, &mut output, r.perm),
            2 => permute::<i16>(&input, &mut output, r.perm),
            _ => permute::<i32>(&input, &mut output, r.perm),
        }
        self.schedule.mark_issued();
        Ok(())
    }
}
