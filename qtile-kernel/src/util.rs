//! Shared helpers for the tile kernels.

use qtile_view::MAX_RANK;

/// Invert a permutation: if perm[i] = j, then result[j] = i.
pub fn invert_perm(perm: [usize; MAX_RANK]) -> [usize; MAX_RANK] {
    let mut inv = [0usize; MAX_RANK];
    for (i, &p) in perm.iter().enumerate() {
        inv[p] = i;
    }
    inv
}

/// Iterator over four-dimensional index tuples within given dimensions.
///
/// Iterates in row-major order (last index varies fastest).
pub struct MultiIndex {
    dims: [usize; MAX_RANK],
    current: [usize; MAX_RANK],
    remaining: usize,
}

impl MultiIndex {
    pub fn new(dims: [usize; MAX_RANK]) -> Self {
        Self {
            dims,
            current: [0; MAX_RANK],
            remaining: dims.iter().product(),
        }
    }
}

impl Iterator for MultiIndex {
    type Item = [usize; MAX_RANK];

    fn next(&mut self) -> Option<[usize; MAX_RANK]> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.current;
        self.remaining -= 1;
        for i in (0..MAX_RANK).rev() {
            self.current[i] += 1;
            if self.current[i] < self.dims[i] {
                break;
            }
            self.current[i] = 0;
        }
        Some(item)
    }
}

/// Kernel taps of one output coordinate that land inside the input tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Taps {
    /// First valid kernel index.
    pub first: usize,
    /// Number of valid kernel indices.
    pub count: usize,
    /// Input coordinate of the first valid tap.
    pub input: usize,
}

impl Taps {
    /// Taps of output coordinate `o` for a kernel of `kernel` taps spaced
    /// `dilation` apart, moving `stride` per output and starting
    /// `pad_begin` before the input tile of `extent` elements.
    pub fn new(
        o: usize,
        stride: usize,
        dilation: usize,
        pad_begin: usize,
        kernel: usize,
        extent: usize,
    ) -> Self {
        let d = dilation.max(1) as i64;
        let base = (o * stride.max(1)) as i64 - pad_begin as i64;
        let first = if base < 0 { (-base + d - 1) / d } else { 0 };
        let end = if (extent as i64) > base {
            ((extent as i64 - base + d - 1) / d).min(kernel as i64)
        } else {
            0
        };
        let count = (end - first).max(0) as usize;
        Self {
            first: first as usize,
            count,
            input: (base + first * d).max(0) as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
