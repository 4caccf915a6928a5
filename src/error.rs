use qtile_iter::IterError;
use qtile_quant::QuantError;
use qtile_view::ViewError;

use crate::record::DecodeError;

/// Errors raised while constructing an operator from its record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    View(#[from] ViewError),

    #[error(transparent)]
    Iter(#[from] IterError),

    #[error(transparent)]
    Quant(#[from] QuantError),

    /// Tensor extents that do not fit together.
    #[error("{tensor} has shape {found:?}, expected {expected:?}")]
    Geometry {
        tensor: &'static str,
        expected: [usize; 4],
        found: [usize; 4],
    },

    /// A parameter buffer holding the wrong number of entries.
    #[error("{name} holds {found} entries, expected {expected}")]
    ParamCount {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("lookup table needs at least 2 samples, got {0}")]
    LutTooShort(usize),

    /// The record names a table the registry does not hold.
    #[error("lookup table {0} is not loaded")]
    UnknownLut(u32),
}

/// Result type for operator construction.
pub type Result<T> = std::result::Result<T, ConfigError>;
