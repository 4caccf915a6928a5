//! Tensor descriptors: geometry plus an unresolved buffer reference.

use crate::element::ElementKind;
use crate::memory::BufferDesc;
use crate::{Result, ViewError, MAX_RANK};

// ============================================================================
// Validation helpers
// ============================================================================

/// Validate that all addressed element offsets stay within `[0, len)`.
fn validate_bounds(len: usize, dims: &[usize], strides: &[isize], offset: isize) -> Result<()> {
    // Empty tensor - no access needed
    if dims.iter().any(|&d| d == 0) {
        return Ok(());
    }
    let mut min_offset = offset;
    let mut max_offset = offset;
    for (&dim, &stride) in dims.iter().zip(strides.iter()) {
        if dim > 1 {
            let end = stride
                .checked_mul(dim as isize - 1)
                .ok_or(ViewError::OffsetOverflow)?;
            if end >= 0 {
                max_offset = max_offset
                    .checked_add(end)
                    .ok_or(ViewError::OffsetOverflow)?;
            } else {
                min_offset = min_offset
                    .checked_add(end)
                    .ok_or(ViewError::OffsetOverflow)?;
            }
        }
    }
    if min_offset < 0 || max_offset < 0 {
        return Err(ViewError::OffsetOverflow);
    }
    if max_offset as usize >= len {
        return Err(ViewError::BufferTooSmall {
            needed: max_offset as usize + 1,
            available: len,
        });
    }
    Ok(())
}

/// Compute row-major element strides (last index varies fastest).
pub fn row_major_strides(dims: &[usize]) -> [i32; MAX_RANK] {
    let mut strides = [1i32; MAX_RANK];
    let rank = dims.len().min(MAX_RANK);
    for i in (0..rank.saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1] as i32;
    }
    strides
}

// ============================================================================
// TensorDesc
// ============================================================================

/// Geometry and storage of a tensor of rank 1 to 4.
///
/// Dimensions past `rank` have extent 1. `offset` is the element offset
/// of index `[0, 0, 0, 0]` from the start of `buffer`; tiling changes
/// `shape` and `offset` while `stride`, `kind` and `buffer` stay fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorDesc {
    pub buffer: BufferDesc,
    pub kind: ElementKind,
    pub rank: u8,
    pub shape: [u32; MAX_RANK],
    pub stride: [i32; MAX_RANK],
    pub offset: u32,
}

impl TensorDesc {
    /// Create and validate a descriptor.
    pub fn new(
        kind: ElementKind,
        shape: &[usize],
        stride: &[i32],
        buffer: BufferDesc,
    ) -> Result<Self> {
        if shape.is_empty() || shape.len() > MAX_RANK || stride.len() != shape.len() {
            return Err(ViewError::InvalidRank(shape.len()));
        }
        let mut dims = [1u32; MAX_RANK];
        let mut strides = [1i32; MAX_RANK];
        for (i, (&d, &s)) in shape.iter().zip(stride.iter()).enumerate() {
            dims[i] = u32::try_from(d).map_err(|_| ViewError::OffsetOverflow)?;
            strides[i] = s;
        }
        let desc = Self {
            buffer,
            kind,
            rank: shape.len() as u8,
            shape: dims,
            stride: strides,
            offset: 0,
        };
        desc.validate()?;
        Ok(desc)
    }

    /// Create a dense row-major descriptor.
    pub fn row_major(kind: ElementKind, shape: &[usize], buffer: BufferDesc) -> Result<Self> {
        let strides = row_major_strides(shape);
        Self::new(kind, shape, &strides[..shape.len().min(MAX_RANK)], buffer)
    }

    /// Check rank, buffer capacity and that every addressed element is in bounds.
    pub fn validate(&self) -> Result<()> {
        let rank = self.rank as usize;
        if rank == 0 || rank > MAX_RANK {
            return Err(ViewError::InvalidRank(rank));
        }
        let elem = self.kind.size();
        let len = self.buffer.len as usize;
        let needed = self.num_elements() * elem;
        if needed > len {
            return Err(ViewError::BufferTooSmall {
                needed,
                available: len,
            });
        }
        validate_bounds(len / elem, &self.dims(), &self.strides(), self.offset as isize)
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank as usize
    }

    #[inline]
    pub fn dim(&self, i: usize) -> usize {
        self.shape[i] as usize
    }

    #[inline]
    pub fn elem_size(&self) -> usize {
        self.kind.size()
    }

    /// All four extents as `usize`.
    pub fn dims(&self) -> [usize; MAX_RANK] {
        self.shape.map(|d| d as usize)
    }

    /// All four element strides as `isize`.
    pub fn strides(&self) -> [isize; MAX_RANK] {
        self.stride.map(|s| s as isize)
    }

    /// Number of addressed elements.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().map(|&d| d as usize).product()
    }

    /// Whether the descriptor refers to an absent optional tensor.
    #[inline]
    pub fn is_absent(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Element offset of `idx` relative to the buffer start.
    pub fn offset_of(&self, idx: [usize; MAX_RANK]) -> isize {
        let mut off = self.offset as isize;
        for d in 0..MAX_RANK {
            off += idx[d] as isize * self.stride[d] as isize;
        }
        off
    }

    /// Descriptor of the sub-block `[pos, pos + size)`.
    ///
    /// Only shape and offset change; stride, kind and buffer are kept.
    pub fn slice(&self, pos: [usize; MAX_RANK], size: [usize; MAX_RANK]) -> Result<Self> {
        for d in 0..MAX_RANK {
            let extent = self.shape[d] as usize;
            if pos[d] + size[d] > extent {
                return Err(ViewError::SliceOutOfRange {
                    dim: d,
                    pos: pos[d],
                    size: size[d],
                    extent,
                });
            }
        }
        let offset = self.offset_of(pos);
        let offset = u32::try_from(offset).map_err(|_| ViewError::OffsetOverflow)?;
        let mut out = *self;
        out.offset = offset;
        out.shape = size.map(|s| s as u32);
        Ok(out)
    }
}
