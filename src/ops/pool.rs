use qtile_iter::{AxisRule, Padding};
use qtile_kernel::{max_pool2d, sum_pool2d, ActiveBackend};
use qtile_view::{ElementKind, MemoryMap, Status, CHANNEL_DIM, HEIGHT_DIM, WIDTH_DIM};

use super::{check_shape, resolve, tile_view, tile_view_mut, unsupported};
use crate::error::Result;
use crate::operator::{Operator, TileSchedule};
use crate::record::{KernelId, PoolRecord};

#[derive(Debug, Clone)]
struct PoolCore {
    record: PoolRecord,
    schedule: TileSchedule,
}

impl PoolCore {
    fn new(r: &PoolRecord) -> Result<Self> {
        r.input.validate()?;
        r.output.validate()?;
        let in_dims = r.input.dims();
        let [batch, in_h, in_w, channels] = in_dims;
        let window = r.window;
        let out_dims = [
            batch,
            window.output_dim(0, in_h),
            window.output_dim(1, in_w),
            channels,
        ];
        check_shape("output", &r.output, out_dims)?;
        let schedule = TileSchedule::new(out_dims, &r.tiling)?
            .with_input(
                in_dims,
                [
                    AxisRule::Follow { out_dim: 0 },
                    window.halo_rule(0, HEIGHT_DIM),
                    window.halo_rule(1, WIDTH_DIM),
                    AxisRule::Follow {
                        out_dim: CHANNEL_DIM,
                    },
                ],
            )?
            .with_window(window, in_dims);
        tracing::debug!(
            input = ?in_dims,
            output = ?out_dims,
            kernel = ?window.kernel,
            tiles = schedule.tile_count(),
            "pooling operator constructed"
        );
        Ok(Self {
            record: *r,
            schedule,
        })
    }

    fn issue(
        &mut self,
        mem: &mut MemoryMap<'_>,
        max: bool,
    ) -> std::result::Result<(), Status> {
        let r = &self.record;
        let (in_kind, out_kind) = (r.input.kind, r.output.kind);
        if max {
            match (in_kind, out_kind) {
                (ElementKind::Sa32, _) => {
                    return Err(unsupported("max pool2d", &[in_kind, out_kind]))
                }
                (a, b) if a != b => return Err(Status::TypeMismatch),
                _ => {}
            }
        } else if !matches!(
            (in_kind, out_kind),
            (ElementKind::Sa8 | ElementKind::Fx16, ElementKind::Sa32)
        ) {
            return Err(unsupported("sum pool2d", &[in_kind, out_kind]));
        }
        self.schedule.begin_issue();

        let reads = [resolve(mem, &r.input)?];
        let write = resolve(mem, &r.output)?;
        let ([input], out) = mem.split_io(reads, write)?;
        let out_tile = self.schedule.output_tile();
        let input = tile_view(input, &r.input, &self.schedule.input_tile(0))?;
        let mut output = tile_view_mut(out, &r.output, &out_tile)?;
        let window = self.schedule.tile_window().unwrap_or(r.window);
        tracing::trace!(
            tile = self.schedule.tile_index(),
            offset = ?out_tile.offset,
            size = ?out_tile.size,
            padding = ?window.padding,
            "pool issue"
        );

        type B = ActiveBackend;
        match (max, in_kind) {
            (true, ElementKind::Fx16) => max_pool2d::<B, i16>(&input, &mut output, &window),
            (true, _) => max_pool2d::<B, i8>(&input, &mut output, &window),
            (false, ElementKind::Fx16) => sum_pool2d::<B, i16, i32>(&input, &mut output, &window),
            (false, _) => sum_pool2d::<B, i8, i32>(&input, &mut output, &window),
        }
        self.schedule.mark_issued();
        Ok(())
    }
}

/// Maximum over each window; padded positions never win.
#[derive(Debug, Clone)]
pub struct MaxPool2d {
    core: PoolCore,
}

impl MaxPool2d {
    pub fn from_record(record: &PoolRecord) -> Result<Self> {
        Ok(Self {
            core: PoolCore::new(record)?,
        })
    }

    pub fn padding(&self) -> Padding {
        self.core.schedule.padding()
    }
}

decode_constructor!(MaxPool2d, MaxPool2d);

impl Operator for MaxPool2d {
    fn kernel_id(&self) -> KernelId {
        KernelId::MaxPool2d
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

/// Raw sum over the valid part of each window, stored as sa32.
#[derive(Debug, Clone)]
pub struct SumPool2d {
    core: PoolCore,
}

impl SumPool2d {
    pub fn from_record(record: &PoolRecord) -> Result<Self> {
        Ok(Self {
            core: PoolCore::new(record)?,
        })
    }

    pub fn padding(&self) -> Padding {
        self.core.schedule.padding()
    }
}

decode_constructor!(SumPool2d, SumPool2d);

impl Operator for SumPool2d {
    fn kernel_id(&self) -> KernelId {
        KernelId::SumPool2d
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
