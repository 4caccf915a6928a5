//! Odometer over the tiles of one tensor.

use qtile_view::MAX_RANK;

use crate::cfg::IteratorCfg;

/// Absolute position and extent of one tile, per tensor dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tile {
    pub offset: [usize; MAX_RANK],
    pub size: [usize; MAX_RANK],
}

impl Tile {
    /// Tile covering the whole of `dims`.
    pub fn whole(dims: [usize; MAX_RANK]) -> Self {
        Self {
            offset: [0; MAX_RANK],
            size: dims,
        }
    }

    pub fn num_elements(&self) -> usize {
        self.size.iter().product()
    }
}

/// Walks the tiles of a tensor of extent `dims` as configured by an
/// [`IteratorCfg`], innermost loop fastest.
///
/// The iterator only tracks positions; it never touches tensor memory.
/// Positions produced by halo increments may start before the tensor or
/// run past its end; [`TileIterator::tile`] clips them to the tensor.
#[derive(Debug, Clone)]
pub struct TileIterator {
    cfg: IteratorCfg,
    dims: [usize; MAX_RANK],
    pos: [i64; MAX_RANK],
    idx: [usize; MAX_RANK],
}

impl TileIterator {
    pub fn new(dims: [usize; MAX_RANK], cfg: IteratorCfg) -> Self {
        Self {
            cfg,
            dims,
            pos: [0; MAX_RANK],
            idx: [0; MAX_RANK],
        }
    }

    /// Iterator producing a single tile over the whole tensor.
    pub fn single(dims: [usize; MAX_RANK]) -> Self {
        Self::new(dims, IteratorCfg::single(dims))
    }

    #[inline]
    pub fn cfg(&self) -> &IteratorCfg {
        &self.cfg
    }

    #[inline]
    pub fn dims(&self) -> [usize; MAX_RANK] {
        self.dims
    }

    /// Back to the first tile.
    pub fn reset(&mut self) {
        self.pos = [0; MAX_RANK];
        self.idx = [0; MAX_RANK];
    }

    /// Advance to the next tile.
    ///
    /// The innermost loop moves first; a loop that finishes returns to its
    /// start and carries into the next outer loop. Returns `true` when the
    /// outermost loop wraps, i.e. every tile has been visited and the
    /// iterator is back at the first tile.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        for s in (0..MAX_RANK).rev() {
            let axis = &self.cfg.slots()[s];
            self.pos[s] += axis.inc_at(self.idx[s]);
            if self.idx[s] + 1 >= axis.count {
                self.idx[s] = 0;
            } else {
                self.idx[s] += 1;
                return false;
            }
        }
        true
    }

    /// Jump to the tile with row-major linear index `tile` over the loops.
    ///
    /// # Panics
    /// Panics when `tile >= tile_count()`.
    pub fn seek(&mut self, tile: usize) {
        assert!(tile < self.tile_count(), "tile {tile} out of range");
        let mut rest = tile;
        for s in (0..MAX_RANK).rev() {
            let axis = &self.cfg.slots()[s];
            self.idx[s] = rest % axis.count;
            self.pos[s] = axis.pos_at(self.idx[s]);
            rest /= axis.count;
        }
    }

    /// Row-major linear index of the current tile over the loops.
    pub fn tile_index(&self) -> usize {
        self.cfg
            .slots()
            .iter()
            .zip(self.idx.iter())
            .fold(0, |acc, (axis, &i)| acc * axis.count + i)
    }

    /// Loop index of the current tile along tensor dimension `dim`.
    pub fn index(&self, dim: usize) -> usize {
        self.idx[self.cfg.slot_of(dim)]
    }

    pub fn tile_count(&self) -> usize {
        self.cfg.tile_count()
    }

    /// Whether the current tile touches the true start of `dim`.
    pub fn is_first_tile(&self, dim: usize) -> bool {
        self.index(dim) == 0
    }

    /// Whether the current tile touches the true end of `dim`.
    pub fn is_last_tile(&self, dim: usize) -> bool {
        let s = self.cfg.slot_of(dim);
        self.idx[s] + 1 == self.cfg.slots()[s].count
    }

    /// Current tile, clipped to the tensor.
    pub fn tile(&self) -> Tile {
        let mut tile = Tile::default();
        for (s, axis) in self.cfg.slots().iter().enumerate() {
            let extent = self.dims[axis.dim] as i64;
            let start = self.pos[s].clamp(0, extent);
            let end = (self.pos[s] + axis.size_at(self.idx[s]) as i64).clamp(start, extent);
            tile.offset[axis.dim] = start as usize;
            tile.size[axis.dim] = (end - start) as usize;
        }
        tile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::AxisRule;
    use proptest::prelude::*;

    #[test]
    fn test_odometer_visits_every_tile_once_in_row_major_order() {
        let cfg = IteratorCfg::tiled([10, 7, 5, 1], [4, 3, 5, 1], IteratorCfg::ROW_MAJOR).unwrap();
        let mut it = TileIterator::new([10, 7, 5, 1], cfg);
        assert_eq!(it.tile_count(), 9);

        let mut visited = Vec::new();
        loop {
            let t = it.tile();
            visited.push((t.offset[0], t.offset[1], t.size[0], t.size[1]));
            if it.next() {
                break;
            }
        }
        let expected = vec![
            (0, 0, 4, 3),
            (0, 3, 4, 3),
            (0, 6, 4, 1),
            (4, 0, 4, 3),
            (4, 3, 4, 3),
            (4, 6, 4, 1),
            (8, 0, 2, 3),
            (8, 3, 2, 3),
            (8, 6, 2, 1),
        ];
        assert_eq!(visited, expected);
        // Wrapped back to the origin.
        assert_eq!(it.tile(), Tile { offset: [0; 4], size: [4, 3, 5, 1] });
    }

    #[test]
    fn test_custom_order_moves_outer_dim_fastest() {
        let cfg = IteratorCfg::tiled([4, 4, 1, 1], [2, 2, 1, 1], [1, 0, 2, 3]).unwrap();
        let mut it = TileIterator::new([4, 4, 1, 1], cfg);
        let mut offsets = Vec::new();
        loop {
            let t = it.tile();
            offsets.push((t.offset[0], t.offset[1]));
            if it.next() {
                break;
            }
        }
        assert_eq!(offsets, vec![(0, 0), (2, 0), (0, 2), (2, 2)]);
    }

    #[test]
    fn test_first_and_last_flags() {
        let cfg = IteratorCfg::tiled([1, 10, 4, 1], [1, 4, 4, 1], IteratorCfg::ROW_MAJOR).unwrap();
        let mut it = TileIterator::new([1, 10, 4, 1], cfg);
        let mut flags = Vec::new();
        loop {
            flags.push((it.is_first_tile(1), it.is_last_tile(1), it.is_last_tile(2)));
            if it.next() {
                break;
            }
        }
        assert_eq!(
            flags,
            vec![(true, false, true), (false, false, true), (false, true, true)]
        );
    }

    #[test]
    fn test_seek_matches_sequential_walk() {
        let cfg = IteratorCfg::tiled([5, 9, 2, 3], [2, 4, 1, 2], [2, 0, 3, 1]).unwrap();
        let mut seq = TileIterator::new([5, 9, 2, 3], cfg);
        let mut jump = seq.clone();
        for i in 0..seq.tile_count() {
            jump.seek(i);
            assert_eq!(jump.tile(), seq.tile(), "tile {i}");
            assert_eq!(seq.tile_index(), i);
            seq.next();
        }
    }

    proptest! {
        #[test]
        fn tiles_cover_tensor_exactly_once(
            dims in prop::array::uniform4(1usize..7),
            tile in prop::array::uniform4(1usize..5),
            rotate in 0usize..4,
        ) {
            let mut order = IteratorCfg::ROW_MAJOR;
            order.rotate_left(rotate);
            let cfg = IteratorCfg::tiled(dims, tile, order).unwrap();
            let mut it = TileIterator::new(dims, cfg);
            let mut hits = vec![0u32; dims.iter().product()];
            let mut visited = 0;
            loop {
                let t = it.tile();
                for a in 0..t.size[0] {
                    for b in 0..t.size[1] {
                        for c in 0..t.size[2] {
                            for d in 0..t.size[3] {
                                let i = [t.offset[0] + a, t.offset[1] + b, t.offset[2] + c, t.offset[3] + d];
                                hits[((i[0] * dims[1] + i[1]) * dims[2] + i[2]) * dims[3] + i[3]] += 1;
                            }
                        }
                    }
                }
                visited += 1;
                if it.next() {
                    break;
                }
            }
            prop_assert_eq!(visited, it.tile_count());
            prop_assert!(hits.iter().all(|&h| h == 1));
        }
    }

    #[test]
    fn test_halo_tiles_are_clipped() {
        let out_cfg = IteratorCfg::tiled([1, 10, 1, 1], [1, 4, 1, 1], IteratorCfg::ROW_MAJOR).unwrap();
        let rules = [
            AxisRule::Follow { out_dim: 0 },
            AxisRule::Halo { out_dim: 1, kernel: 3, stride: 1, pre_pad: 1 },
            AxisRule::Follow { out_dim: 2 },
            AxisRule::Follow { out_dim: 3 },
        ];
        let in_cfg = out_cfg.derive([1, 10, 1, 1], rules).unwrap();
        let mut it = TileIterator::new([1, 10, 1, 1], in_cfg);
        let mut rows = Vec::new();
        loop {
            let t = it.tile();
            rows.push((t.offset[1], t.size[1]));
            if it.next() {
                break;
            }
        }
        assert_eq!(rows, vec![(0, 5), (3, 6), (7, 3)]);
    }
}
