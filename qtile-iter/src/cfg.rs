//! Per-axis iteration geometry.
//!
//! An [`IteratorCfg`] has one [`AxisCfg`] slot per tensor dimension, listed
//! from the outermost to the innermost loop. Each slot records how many
//! tiles the dimension is split into and how the tile position moves on
//! the first, middle and last advance. Sizes are described the same way.
//! When a tile is both first and last (a single tile), the last values win.

use qtile_view::MAX_RANK;

use crate::{IterError, Result};

/// Geometry of one loop of the odometer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisCfg {
    /// Tensor dimension the loop walks.
    pub dim: usize,
    /// Number of tiles along the dimension.
    pub count: usize,
    /// Position change after the first tile.
    pub first_inc: i64,
    /// Position change after a middle tile.
    pub inc: i64,
    /// Position change after the last tile (returns to the start).
    pub last_inc: i64,
    pub first_size: usize,
    pub size: usize,
    pub last_size: usize,
}

impl AxisCfg {
    /// A loop that covers the whole of `extent` in one tile.
    pub fn whole(dim: usize, extent: usize) -> Self {
        Self {
            dim,
            count: 1,
            first_inc: 0,
            inc: 0,
            last_inc: 0,
            first_size: extent,
            size: extent,
            last_size: extent,
        }
    }

    /// Split `extent` into tiles of `tile` elements.
    pub fn tiled(dim: usize, extent: usize, tile: usize) -> Self {
        let count = extent.div_ceil(tile).max(1);
        let step = tile as i64;
        Self {
            dim,
            count,
            first_inc: step,
            inc: step,
            last_inc: step * (1 - count as i64),
            first_size: tile,
            size: tile,
            last_size: (extent.max(1) - 1) % tile + 1,
        }
    }

    /// Stay on the whole of `extent` for each of `count` tiles.
    pub fn pinned(dim: usize, extent: usize, count: usize) -> Self {
        Self {
            count,
            ..Self::whole(dim, extent)
        }
    }

    /// Size of the tile with loop index `idx`.
    #[inline]
    pub fn size_at(&self, idx: usize) -> usize {
        if idx + 1 == self.count {
            self.last_size
        } else if idx == 0 {
            self.first_size
        } else {
            self.size
        }
    }

    /// Increment applied when leaving the tile with loop index `idx`.
    #[inline]
    pub fn inc_at(&self, idx: usize) -> i64 {
        if idx + 1 == self.count {
            self.last_inc
        } else if idx == 0 {
            self.first_inc
        } else {
            self.inc
        }
    }

    /// Position of the tile with loop index `idx`, relative to the origin.
    pub fn pos_at(&self, idx: usize) -> i64 {
        match idx {
            0 => 0,
            k => self.first_inc + (k as i64 - 1) * self.inc,
        }
    }
}

/// How one dimension of a derived tensor follows the output iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisRule {
    /// Same tiles as output dimension `out_dim`.
    Follow { out_dim: usize },
    /// The whole dimension for every tile.
    Full,
    /// Receptive field of output dimension `out_dim` through a sliding window.
    Halo {
        out_dim: usize,
        /// Effective (dilated) kernel extent.
        kernel: usize,
        stride: usize,
        /// Padding before the first element.
        pre_pad: usize,
    },
}

/// Tiling of a whole tensor: one [`AxisCfg`] per dimension, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IteratorCfg {
    slots: [AxisCfg; MAX_RANK],
}

fn check_order(order: [usize; MAX_RANK]) -> Result<()> {
    let mut seen = 0u32;
    for &d in &order {
        if d >= MAX_RANK || seen & (1 << d) != 0 {
            return Err(IterError::InvalidOrder(order));
        }
        seen |= 1 << d;
    }
    Ok(())
}

impl IteratorCfg {
    /// Default order: dimension 0 outermost, dimension 3 innermost.
    pub const ROW_MAJOR: [usize; MAX_RANK] = [0, 1, 2, 3];

    /// One tile covering the whole tensor.
    pub fn single(dims: [usize; MAX_RANK]) -> Self {
        Self {
            slots: std::array::from_fn(|i| AxisCfg::whole(i, dims[i])),
        }
    }

    /// Split every dimension into tiles of `tile[d]`, looping in `order`.
    pub fn tiled(
        dims: [usize; MAX_RANK],
        tile: [usize; MAX_RANK],
        order: [usize; MAX_RANK],
    ) -> Result<Self> {
        check_order(order)?;
        if let Some(d) = (0..MAX_RANK).find(|&d| tile[d] == 0) {
            return Err(IterError::ZeroTileSize(d));
        }
        Ok(Self {
            slots: order.map(|d| AxisCfg::tiled(d, dims[d], tile[d].min(dims[d].max(1)))),
        })
    }

    /// Build from explicit slots, outermost first.
    pub fn from_slots(slots: [AxisCfg; MAX_RANK]) -> Result<Self> {
        check_order(slots.map(|s| s.dim))?;
        if let Some(s) = slots.iter().find(|s| s.count == 0) {
            return Err(IterError::ZeroTileCount(s.dim));
        }
        Ok(Self { slots })
    }

    /// Derive the iterator of another tensor of this operator.
    ///
    /// `rules[d]` says how dimension `d` of that tensor (extent `dims[d]`)
    /// follows this iterator. Every loop keeps its count so that all
    /// iterators of an operator advance in lockstep; a loop over an output
    /// dimension no rule refers to walks one of the [`AxisRule::Full`]
    /// dimensions with zero increments.
    pub fn derive(&self, dims: [usize; MAX_RANK], rules: [AxisRule; MAX_RANK]) -> Result<Self> {
        let mut claimed = [false; MAX_RANK];
        let mut mapped: [Option<usize>; MAX_RANK] = [None; MAX_RANK];
        for (d, rule) in rules.iter().enumerate() {
            let out_dim = match *rule {
                AxisRule::Follow { out_dim } | AxisRule::Halo { out_dim, .. } => out_dim,
                AxisRule::Full => continue,
            };
            if out_dim >= MAX_RANK || claimed[out_dim] {
                return Err(IterError::InvalidRule(d));
            }
            claimed[out_dim] = true;
            mapped[out_dim] = Some(d);
        }
        let mut full_dims = (0..MAX_RANK).filter(|&d| rules[d] == AxisRule::Full);

        let mut slots = self.slots;
        for (slot, out) in slots.iter_mut().zip(self.slots.iter()) {
            *slot = match mapped[out.dim] {
                Some(d) => match rules[d] {
                    AxisRule::Halo {
                        kernel,
                        stride,
                        pre_pad,
                        ..
                    } => halo(out, d, dims[d], kernel, stride, pre_pad),
                    _ => AxisCfg { dim: d, ..*out },
                },
                None => {
                    let d = full_dims.next().ok_or(IterError::InvalidRule(out.dim))?;
                    AxisCfg::pinned(d, dims[d], out.count)
                }
            };
        }
        Self::from_slots(slots)
    }

    /// Relabel dimensions: loop over `d` becomes a loop over `perm[d]`.
    pub fn permuted(&self, perm: [usize; MAX_RANK]) -> Result<Self> {
        check_order(perm)?;
        Ok(Self {
            slots: self.slots.map(|s| AxisCfg {
                dim: perm[s.dim],
                ..s
            }),
        })
    }

    /// Slots, outermost first.
    #[inline]
    pub fn slots(&self) -> &[AxisCfg; MAX_RANK] {
        &self.slots
    }

    /// Loop order as tensor dimensions, outermost first.
    pub fn order(&self) -> [usize; MAX_RANK] {
        self.slots.map(|s| s.dim)
    }

    /// Slot index of tensor dimension `dim`.
    pub fn slot_of(&self, dim: usize) -> usize {
        self.slots
            .iter()
            .position(|s| s.dim == dim)
            .unwrap_or(MAX_RANK - 1)
    }

    /// Tile count along tensor dimension `dim`.
    pub fn count(&self, dim: usize) -> usize {
        self.slots[self.slot_of(dim)].count
    }

    /// Total number of tiles: the product of the per-loop counts.
    pub fn tile_count(&self) -> usize {
        self.slots.iter().map(|s| s.count).product()
    }
}

fn halo(
    out: &AxisCfg,
    dim: usize,
    extent: usize,
    kernel: usize,
    stride: usize,
    pre_pad: usize,
) -> AxisCfg {
    let stride = stride as i64;
    let pre_pad = pre_pad as i64;
    let count = out.count;
    let inc = out.inc * stride;
    let last_inc = if count > 1 {
        inc * (1 - count as i64) + pre_pad
    } else {
        0
    };
    let size = (out.size.max(1) as i64 - 1) * stride + kernel as i64;
    AxisCfg {
        dim,
        count,
        first_inc: inc - pre_pad,
        inc,
        last_inc,
        first_size: (size - pre_pad).max(0) as usize,
        size: size as usize,
        last_size: (extent as i64 + last_inc).max(0) as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiled_axis() {
        let a = AxisCfg::tiled(1, 10, 4);
        assert_eq!(a.count, 3);
        assert_eq!(a.last_size, 2);
        assert_eq!(a.last_inc, -8);
        assert_eq!((a.size_at(0), a.size_at(1), a.size_at(2)), (4, 4, 2));
        assert_eq!((a.pos_at(0), a.pos_at(1), a.pos_at(2)), (0, 4, 8));

        let even = AxisCfg::tiled(0, 8, 4);
        assert_eq!(even.last_size, 4);
    }

    #[test]
    fn test_tile_larger_than_extent_is_one_tile() {
        let cfg = IteratorCfg::tiled([1, 3, 5, 2], [1, 8, 2, 8], IteratorCfg::ROW_MAJOR).unwrap();
        assert_eq!(cfg.tile_count(), 3);
        assert_eq!(cfg.slots()[1].last_size, 3);
        assert_eq!(cfg.slots()[0].count, 1);
    }

    #[test]
    fn test_tiled_rejects_bad_input() {
        assert_eq!(
            IteratorCfg::tiled([2, 2, 2, 2], [1, 0, 1, 1], IteratorCfg::ROW_MAJOR),
            Err(IterError::ZeroTileSize(1))
        );
        assert!(matches!(
            IteratorCfg::tiled([2, 2, 2, 2], [1, 1, 1, 1], [0, 1, 1, 3]),
            Err(IterError::InvalidOrder(_))
        ));
    }

    #[test]
    fn test_halo_derivation() {
        // 10 output rows in tiles of 4, 3x3 kernel, stride 1, pad 1.
        let out = IteratorCfg::tiled([1, 10, 10, 1], [1, 4, 10, 1], IteratorCfg::ROW_MAJOR).unwrap();
        let rules = [
            AxisRule::Follow { out_dim: 0 },
            AxisRule::Halo { out_dim: 1, kernel: 3, stride: 1, pre_pad: 1 },
            AxisRule::Halo { out_dim: 2, kernel: 3, stride: 1, pre_pad: 1 },
            AxisRule::Full,
        ];
        let input = out.derive([1, 10, 10, 1], rules).unwrap();
        let h = input.slots()[1];
        assert_eq!(h.count, 3);
        assert_eq!(h.size, 6);
        assert_eq!(h.first_size, 5);
        assert_eq!((h.pos_at(1), h.pos_at(2)), (3, 7));
        assert_eq!(h.last_size, 3);
        assert_eq!(h.pos_at(2) + h.last_inc, 0);

        let w = input.slots()[2];
        assert_eq!(w.count, 1);
        assert_eq!(w.last_size, 10);
    }

    #[test]
    fn test_derive_pins_unmapped_loops() {
        let out = IteratorCfg::tiled([1, 6, 6, 8], [1, 2, 6, 4], IteratorCfg::ROW_MAJOR).unwrap();
        // Weights [KH, KW, Cin, Cout]: only Cout follows the output.
        let rules = [
            AxisRule::Full,
            AxisRule::Full,
            AxisRule::Full,
            AxisRule::Follow { out_dim: 3 },
        ];
        let w = out.derive([3, 3, 5, 8], rules).unwrap();
        assert_eq!(w.tile_count(), out.tile_count());
        assert_eq!(w.order(), [0, 1, 2, 3]);
        let kh = w.slots()[1];
        assert_eq!((kh.dim, kh.count, kh.inc, kh.size), (1, 3, 0, 3));
        assert_eq!(w.slots()[3].size, 4);
    }

    #[test]
    fn test_derive_rejects_duplicate_rule() {
        let out = IteratorCfg::single([2, 2, 2, 2]);
        let rules = [
            AxisRule::Follow { out_dim: 1 },
            AxisRule::Follow { out_dim: 1 },
            AxisRule::Full,
            AxisRule::Full,
        ];
        assert_eq!(out.derive([2, 2, 2, 2], rules), Err(IterError::InvalidRule(1)));
    }

    #[test]
    fn test_permuted_relabels_dims() {
        let cfg = IteratorCfg::tiled([2, 3, 4, 5], [1, 3, 2, 5], IteratorCfg::ROW_MAJOR).unwrap();
        let p = cfg.permuted([3, 2, 1, 0]).unwrap();
        assert_eq!(p.order(), [3, 2, 1, 0]);
        assert_eq!(p.count(1), cfg.count(2));
    }
}
