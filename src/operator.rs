//! The operator lifecycle shared by every kernel.
//!
//! An operator is constructed at its first tile. Each tile then goes
//! through `prefetch` (optional), `issue` (the tile is computed and the
//! output tile written) and `update` (every iterator advances and the tile
//! padding is recomputed). There is no terminal state: the caller runs
//! [`Operator::tile_count`] tiles, which [`run_tiles`] does.

use qtile_iter::{AxisRule, IteratorCfg, Padding, Tile, TileIterator, Window};
use qtile_view::{MemoryMap, Status, HEIGHT_DIM, MAX_RANK, WIDTH_DIM};
use smallvec::SmallVec;

use crate::codec::TilingRecord;
use crate::error::Result;
use crate::record::KernelId;

/// Where an operator is in the lifecycle of its current tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Constructed,
    Prefetched,
    Issued,
    Updated,
}

/// Current tile of every tensor of an operator, inputs in record order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoTiles {
    pub inputs: SmallVec<[Tile; 4]>,
    pub output: Tile,
}

/// Tile state of one operator: the output iterator, the iterators derived
/// from it for each input, and the padding of the current tile.
#[derive(Debug, Clone)]
pub struct TileSchedule {
    output: TileIterator,
    inputs: SmallVec<[TileIterator; 4]>,
    window: Option<(Window, [usize; 2])>,
    padding: Padding,
    phase: Phase,
}

impl TileSchedule {
    /// Schedule over an output of extent `dims`, tiled as the record says.
    pub fn new(dims: [usize; MAX_RANK], tiling: &TilingRecord) -> Result<Self> {
        let cfg = if tiling.enabled {
            IteratorCfg::tiled(dims, tiling.tile, tiling.order)?
        } else {
            IteratorCfg::single(dims)
        };
        Ok(Self {
            output: TileIterator::new(dims, cfg),
            inputs: SmallVec::new(),
            window: None,
            padding: Padding::default(),
            phase: Phase::Constructed,
        })
    }

    /// Add an input whose dimensions follow the output by `rules`.
    pub fn with_input(mut self, dims: [usize; MAX_RANK], rules: [AxisRule; MAX_RANK]) -> Result<Self> {
        let cfg = self.output.cfg().derive(dims, rules)?;
        self.inputs.push(TileIterator::new(dims, cfg));
        Ok(self)
    }

    /// Add an input whose dimension `perm[d]` is output dimension `d`.
    pub fn with_permuted_input(
        mut self,
        dims: [usize; MAX_RANK],
        perm: [usize; MAX_RANK],
    ) -> Result<Self> {
        let cfg = self.output.cfg().permuted(perm)?;
        self.inputs.push(TileIterator::new(dims, cfg));
        Ok(self)
    }

    /// Recompute spatial padding per tile for a sliding window over an
    /// input of extent `in_dims`.
    pub fn with_window(mut self, window: Window, in_dims: [usize; MAX_RANK]) -> Self {
        self.window = Some((window, [in_dims[HEIGHT_DIM], in_dims[WIDTH_DIM]]));
        self.padding = self.tile_padding();
        self
    }

    fn tile_padding(&self) -> Padding {
        let Some((window, in_total)) = &self.window else {
            return Padding::default();
        };
        let t = self.output.tile();
        window.tile_padding(
            [t.offset[HEIGHT_DIM], t.offset[WIDTH_DIM]],
            [t.size[HEIGHT_DIM], t.size[WIDTH_DIM]],
            *in_total,
        )
    }

    #[inline]
    pub fn output_tile(&self) -> Tile {
        self.output.tile()
    }

    #[inline]
    pub fn input_tile(&self, i: usize) -> Tile {
        self.inputs[i].tile()
    }

    /// Padding of the current tile.
    #[inline]
    pub fn padding(&self) -> Padding {
        self.padding
    }

    /// The configured window with the current tile's padding.
    pub fn tile_window(&self) -> Option<Window> {
        self.window.map(|(w, _)| Window {
            padding: self.padding,
            ..w
        })
    }

    pub fn output_iter(&self) -> &TileIterator {
        &self.output
    }

    pub fn tile_index(&self) -> usize {
        self.output.tile_index()
    }

    pub fn tile_count(&self) -> usize {
        self.output.tile_count()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn io_tiles(&self) -> IoTiles {
        IoTiles {
            inputs: self.inputs.iter().map(TileIterator::tile).collect(),
            output: self.output.tile(),
        }
    }

    pub(crate) fn mark_prefetched(&mut self) {
        if self.phase != Phase::Issued {
            self.phase = Phase::Prefetched;
        }
    }

    /// # Panics
    /// Panics when the current tile was already issued.
    pub(crate) fn begin_issue(&self) {
        assert!(
            self.phase != Phase::Issued,
            "tile {} issued twice without update",
            self.tile_index()
        );
    }

    pub(crate) fn mark_issued(&mut self) {
        self.phase = Phase::Issued;
    }

    /// Move every iterator to the next tile and recompute its padding.
    ///
    /// # Panics
    /// Panics when the current tile has not been issued.
    pub fn advance(&mut self) {
        assert_eq!(
            self.phase,
            Phase::Issued,
            "update of tile {} before issue",
            self.tile_index()
        );
        self.output.next();
        for it in self.inputs.iter_mut() {
            it.next();
        }
        self.padding = self.tile_padding();
        self.phase = Phase::Updated;
        let t = self.output.tile();
        tracing::trace!(
            tile = self.tile_index(),
            offset = ?t.offset,
            size = ?t.size,
            padding = ?self.padding,
            "advanced"
        );
    }
}

/// One operator state machine.
///
/// `issue` must be called at most once per tile, and `update` must follow
/// it before the next `issue`; both misuses panic. Operators are not
/// reentrant; distinct operators over disjoint memory may run in parallel.
pub trait Operator {
    fn kernel_id(&self) -> KernelId;

    fn schedule(&self) -> &TileSchedule;

    fn schedule_mut(&mut self) -> &mut TileSchedule;

    /// Compute the current tile and write the output tile.
    ///
    /// Returns [`Status::NotSupported`] for element kinds the operator has
    /// no kernel for, [`Status::TypeMismatch`] when tensors that must share
    /// a kind do not, and the memory-map statuses when a buffer does not
    /// resolve. On error the output tile is unspecified.
    fn issue(&mut self, mem: &mut MemoryMap<'_>) -> std::result::Result<(), Status>;

    /// Hook for starting the transfer of the current tile into fast memory.
    fn prefetch(&mut self, _mem: &MemoryMap<'_>) -> std::result::Result<(), Status> {
        self.schedule_mut().mark_prefetched();
        Ok(())
    }

    /// Advance to the next tile.
    fn update(&mut self) {
        self.schedule_mut().advance();
    }

    /// Sizes and absolute offsets of the current tile of every tensor.
    fn io_sizes_and_offsets(&self) -> IoTiles {
        self.schedule().io_tiles()
    }

    fn tile_count(&self) -> usize {
        self.schedule().tile_count()
    }
}

/// Run every tile of `op` and return the number of tiles processed.
pub fn run_tiles(op: &mut dyn Operator, mem: &mut MemoryMap<'_>) -> std::result::Result<usize, Status> {
    let count = op.tile_count();
    for _ in 0..count {
        op.prefetch(mem)?;
        op.issue(mem)?;
        op.update();
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv_schedule(tile_h: usize) -> TileSchedule {
        let window = Window {
            kernel: [3, 3],
            stride: [1, 1],
            dilation: [1, 1],
            padding: Padding::uniform(1),
        };
        let dims = [1, 10, 10, 1];
        TileSchedule::new(dims, &TilingRecord::row_major([1, tile_h, 10, 1]))
            .unwrap()
            .with_input(
                dims,
                [
                    AxisRule::Follow { out_dim: 0 },
                    window.halo_rule(0, 1),
                    window.halo_rule(1, 2),
                    AxisRule::Full,
                ],
            )
            .unwrap()
            .with_window(window, dims)
    }

    #[test]
    fn test_schedule_recomputes_padding_per_tile() {
        let mut s = conv_schedule(4);
        assert_eq!(s.tile_count(), 3);
        let mut seen = Vec::new();
        for _ in 0..3 {
            s.begin_issue();
            seen.push((s.output_tile().size[1], s.padding().begin[0], s.padding().end[0]));
            s.mark_issued();
            s.advance();
        }
        assert_eq!(seen, vec![(4, 1, 0), (4, 0, 0), (2, 0, 1)]);
        assert_eq!(s.tile_index(), 0);
    }

    #[test]
    fn test_input_tiles_cover_receptive_field() {
        let mut s = conv_schedule(4);
        let mut inputs = Vec::new();
        for _ in 0..3 {
            let t = s.input_tile(0);
            inputs.push((t.offset[1], t.size[1]));
            s.mark_issued();
            s.advance();
        }
        assert_eq!(inputs, vec![(0, 5), (3, 6), (7, 3)]);
    }

    #[test]
    fn test_window_keeps_geometry() {
        let s = conv_schedule(4);
        let w = s.tile_window().unwrap();
        assert_eq!(w.kernel, [3, 3]);
        assert_eq!(w.padding.begin, [1, 1]);
        assert_eq!(w.padding.end, [0, 1]);
    }

    #[test]
    #[should_panic(expected = "before issue")]
    fn test_update_before_issue_panics() {
        let mut s = conv_schedule(4);
        s.advance();
    }

    #[test]
    #[should_panic(expected = "issued twice")]
    fn test_double_issue_panics() {
        let mut s = conv_schedule(4);
        s.begin_issue();
        s.mark_issued();
        s.begin_issue();
    }

    #[test]
    fn test_untiled_schedule_is_one_tile() {
        let s = TileSchedule::new([2, 3, 4, 5], &TilingRecord::DISABLED).unwrap();
        assert_eq!(s.tile_count(), 1);
        assert_eq!(s.io_tiles().output, Tile::whole([2, 3, 4, 5]));
        assert_eq!(s.phase(), Phase::Constructed);
    }
}
