//! Element kinds, memory-bank addressing and strided tensor views.
//!
//! This crate is the leaf of the qtile workspace. Every tensor an operator
//! touches is described by a [`TensorDesc`] (rank, shape, per-dimension
//! element strides, element kind, buffer reference) and resolved against a
//! [`MemoryMap`] into a borrowed [`TensorView`] or [`TensorViewMut`].
//!
//! # Dependency graph
//!
//! ```text
//! qtile-view  -> qtile-quant
//! qtile-view  -> qtile-iter
//! qtile-quant + qtile-iter -> qtile-kernel -> qtile-rt
//! ```
//!
//! # Example
//!
//! ```rust
//! use qtile_view::{BufferDesc, ElementKind, MemoryMap, TensorDesc, TensorView};
//!
//! let mut bank = vec![0u8; 64];
//! bank[5] = 7;
//! let mut mem = MemoryMap::new();
//! let id = mem.add_bank(0x1000, &mut bank);
//!
//! let desc = TensorDesc::row_major(ElementKind::Sa8, &[2, 4], BufferDesc::new(id, 0, 8)).unwrap();
//! let buf = mem.resolve(desc.buffer, desc.elem_size()).unwrap();
//! let view = TensorView::new(mem.bytes(buf), &desc).unwrap();
//! assert_eq!(view.at::<i8>([1, 1, 0, 0]), 7);
//! ```

pub mod desc;
pub mod element;
pub mod memory;
pub mod view;

pub use desc::{row_major_strides, TensorDesc};
pub use element::{Element, ElementKind};
pub use memory::{BankId, BufferDesc, BufferRef, MemoryMap};
pub use view::{Run, TensorView, TensorViewMut};

// ============================================================================
// Constants
// ============================================================================

/// Highest tensor rank the runtime addresses.
pub const MAX_RANK: usize = 4;

/// Quantization axis value meaning "one parameter set for the whole tensor".
pub const PER_TENSOR_AXIS: i32 = -1;

/// Batch dimension of an HWC activation tensor.
pub const BATCH_DIM: usize = 0;
/// Height dimension of an HWC activation tensor.
pub const HEIGHT_DIM: usize = 1;
/// Width dimension of an HWC activation tensor.
pub const WIDTH_DIM: usize = 2;
/// Channel dimension of an HWC activation tensor.
pub const CHANNEL_DIM: usize = 3;

// ============================================================================
// Status codes
// ============================================================================

/// Result codes returned by fallible runtime entry points.
///
/// Success is `Ok(())`; the variants below are the failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Status {
    /// The element-kind combination has no implementation.
    #[error("element kind combination is not supported")]
    NotSupported,

    /// Tensors that must share an element kind do not.
    #[error("element kind mismatch")]
    TypeMismatch,

    /// A buffer address is not a multiple of its element size.
    #[error("buffer address is misaligned for its element size")]
    Misalignment,

    /// A buffer references a bank that does not exist, or does not fit in it.
    #[error("buffer does not fit the referenced memory bank")]
    MemBankMismatch,
}

impl Status {
    /// Stable numeric code (`0` is reserved for ok).
    pub fn code(self) -> u32 {
        match self {
            Status::NotSupported => 1,
            Status::TypeMismatch => 2,
            Status::Misalignment => 3,
            Status::MemBankMismatch => 4,
        }
    }
}

/// Numeric code of a whole result: `0` for ok, [`Status::code`] otherwise.
pub fn status_code(result: &std::result::Result<(), Status>) -> u32 {
    match result {
        Ok(()) => 0,
        Err(status) => status.code(),
    }
}

// ============================================================================
// Error types
// ============================================================================

/// Errors raised while validating tensor descriptors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewError {
    /// Rank outside `1..=MAX_RANK`.
    #[error("invalid rank {0} (expected 1..={MAX_RANK})")]
    InvalidRank(usize),

    /// The shape addresses more bytes than the buffer declares.
    #[error("tensor needs {needed} bytes but its buffer holds {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Integer overflow or negative offset while computing element offsets.
    #[error("offset overflow while computing element position")]
    OffsetOverflow,

    /// Sub-view extends past the parent view along `dim`.
    #[error("slice [{pos}, {pos}+{size}) out of range for dim {dim} of size {extent}")]
    SliceOutOfRange {
        dim: usize,
        pos: usize,
        size: usize,
        extent: usize,
    },

    /// The element kind byte is not one of the known kinds.
    #[error("unknown element kind tag {0}")]
    UnknownElementKind(u8),

    /// Memory-map resolution failed.
    #[error(transparent)]
    Status(#[from] Status),
}

/// Result type for descriptor validation.
pub type Result<T> = std::result::Result<T, ViewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(status_code(&Ok(())), 0);
        assert_eq!(status_code(&Err(Status::NotSupported)), 1);
        assert_eq!(status_code(&Err(Status::TypeMismatch)), 2);
        assert_eq!(status_code(&Err(Status::Misalignment)), 3);
        assert_eq!(status_code(&Err(Status::MemBankMismatch)), 4);
    }

    #[test]
    fn test_status_wraps_into_view_error() {
        let err: ViewError = Status::Misalignment.into();
        assert_eq!(err, ViewError::Status(Status::Misalignment));
        assert_eq!(err.to_string(), Status::Misalignment.to_string());
    }
}
