//! Tile iteration for the qtile runtime.
//!
//! An operator splits its output tensor into tiles with an [`IteratorCfg`]
//! and derives the iterators of its other tensors from it with
//! [`IteratorCfg::derive`]. All iterators of one operator share loop counts
//! and advance together, one [`TileIterator::next`] per tile.
//!
//! For sliding-window operators the input tiles overlap (the halo) and the
//! padding of each tile is recomputed by [`Window::tile_padding`].
//!
//! # Example
//!
//! ```rust
//! use qtile_iter::{IteratorCfg, TileIterator};
//!
//! let dims = [1, 10, 10, 1];
//! let cfg = IteratorCfg::tiled(dims, [1, 4, 10, 1], IteratorCfg::ROW_MAJOR).unwrap();
//! let mut it = TileIterator::new(dims, cfg);
//! let mut heights = Vec::new();
//! loop {
//!     heights.push(it.tile().size[1]);
//!     if it.next() {
//!         break;
//!     }
//! }
//! assert_eq!(heights, vec![4, 4, 2]);
//! ```

pub mod cfg;
pub mod iterator;
pub mod padding;

pub use cfg::{AxisCfg, AxisRule, IteratorCfg};
pub use iterator::{Tile, TileIterator};
pub use padding::{Padding, Window};

use qtile_view::MAX_RANK;

/// Errors raised while building iterator configurations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IterError {
    /// A tile size of zero along a dimension.
    #[error("tile size of dimension {0} is zero")]
    ZeroTileSize(usize),

    /// A loop with no tiles.
    #[error("tile count of dimension {0} is zero")]
    ZeroTileCount(usize),

    /// The loop order is not a permutation of the dimensions.
    #[error("invalid iteration order {0:?}")]
    InvalidOrder([usize; MAX_RANK]),

    /// A derivation rule names an output dimension that is out of range or
    /// already taken.
    #[error("invalid derivation rule for dimension {0}")]
    InvalidRule(usize),
}

/// Result type for iterator configuration.
pub type Result<T> = std::result::Result<T, IterError>;
