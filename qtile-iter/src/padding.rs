//! Sliding-window geometry and per-tile padding.
//!
//! Padding belongs to the true edges of a tensor. For a tile the amount
//! is re-derived from the tile's absolute output position, so the result
//! does not depend on which tiles were processed before it.

use crate::cfg::AxisRule;

/// Padding per spatial dimension, `[height, width]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    pub begin: [usize; 2],
    pub end: [usize; 2],
}

impl Padding {
    pub fn uniform(p: usize) -> Self {
        Self {
            begin: [p; 2],
            end: [p; 2],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.begin == [0; 2] && self.end == [0; 2]
    }
}

/// Kernel window of a spatial operator over two dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub kernel: [usize; 2],
    pub stride: [usize; 2],
    pub dilation: [usize; 2],
    pub padding: Padding,
}

impl Window {
    /// Extent of the dilated kernel along spatial dimension `i`.
    #[inline]
    pub fn effective_kernel(&self, i: usize) -> usize {
        (self.kernel[i].max(1) - 1) * self.dilation[i].max(1) + 1
    }

    /// Output extent for an input extent of `in_dim` along spatial dimension `i`.
    pub fn output_dim(&self, i: usize, in_dim: usize) -> usize {
        let padded = in_dim + self.padding.begin[i] + self.padding.end[i];
        let k = self.effective_kernel(i);
        if padded < k {
            0
        } else {
            (padded - k) / self.stride[i].max(1) + 1
        }
    }

    /// Rule deriving the input tiles of spatial dimension `i` from output
    /// dimension `out_dim`.
    pub fn halo_rule(&self, i: usize, out_dim: usize) -> AxisRule {
        AxisRule::Halo {
            out_dim,
            kernel: self.effective_kernel(i),
            stride: self.stride[i].max(1),
            pre_pad: self.padding.begin[i],
        }
    }

    /// First input coordinate read for output coordinate `o` along `i`
    /// (negative inside the leading padding).
    #[inline]
    pub fn input_start(&self, i: usize, o: usize) -> i64 {
        (o * self.stride[i].max(1)) as i64 - self.padding.begin[i] as i64
    }

    /// Padding applied to an output tile at absolute `offset` of `size`
    /// elements, for an input of `in_total` elements per dimension.
    ///
    /// A non-first tile gets begin padding only when its receptive field
    /// still reaches into the leading padding. A non-last tile gets end
    /// padding only when its receptive field reaches past the input end.
    pub fn tile_padding(
        &self,
        offset: [usize; 2],
        size: [usize; 2],
        in_total: [usize; 2],
    ) -> Padding {
        let mut pad = Padding::default();
        for i in 0..2 {
            if size[i] == 0 {
                continue;
            }
            let first = self.input_start(i, offset[i]);
            let last = self.input_start(i, offset[i] + size[i] - 1)
                + self.effective_kernel(i) as i64;
            pad.begin[i] = (-first).clamp(0, self.padding.begin[i] as i64) as usize;
            pad.end[i] = (last - in_total[i] as i64).clamp(0, self.padding.end[i] as i64) as usize;
        }
        pad
    }
}
