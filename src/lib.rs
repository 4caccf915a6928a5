//! Tiled quantized tensor operators for memory-constrained DSP cores.
//!
//! An operator is built from its binary configuration record and then
//! driven one output tile at a time. Each tile moves through the same
//! lifecycle: an optional `prefetch`, one `issue` that computes the tile
//! into the caller's memory banks, and an `update` that advances every
//! iterator and recomputes the tile padding. Tensors never need to fit in
//! local memory as a whole.
//!
//! # Core Types
//!
//! - [`OpRecord`] and the per-operator record types: the decoded
//!   configuration, with [`OpRecord::encode`] producing the same byte layout
//! - [`Operator`]: the tile lifecycle shared by every operator, with
//!   [`TileSchedule`] holding the iterators and [`IoTiles`] exposing the
//!   current tile of every tensor to an external scheduler
//! - [`Conv2d`], [`DepthwiseConv2d`], [`MaxPool2d`], [`SumPool2d`],
//!   [`MatMul`], [`Permute`], [`ReduceMax`], [`ReduceSum`], [`Rescale`],
//!   [`Clip`], [`TableLookup`]: the operators
//! - [`LutRegistry`]: read-only lookup tables owned by a loaded model and
//!   lent to table lookups built with [`build_with_luts`]
//!
//! The compute backend is chosen at build time with the `fx-dsp` and
//! `vector-dsp` features; without either the portable reference backend
//! runs. All backends produce the same bits.
//!
//! # Example
//!
//! ```rust
//! use qtile_rt::{
//!     build, run_tiles, BankId, BufferDesc, ElementKind, MemoryMap, OpRecord,
//!     PermuteRecord, TensorDesc, TilingRecord,
//! };
//!
//! // [2, 3] -> [3, 2] transpose, one output row per tile
//! let input = TensorDesc::row_major(ElementKind::Sa8, &[2, 3], BufferDesc::new(BankId(0), 0, 6)).unwrap();
//! let output = TensorDesc::row_major(ElementKind::Sa8, &[3, 2], BufferDesc::new(BankId(0), 8, 6)).unwrap();
//! let record = OpRecord::Permute(PermuteRecord {
//!     input,
//!     output,
//!     perm: [1, 0, 2, 3],
//!     tiling: TilingRecord::row_major([1, 2, 1, 1]),
//! })
//! .encode();
//!
//! let mut bank = vec![0u8; 16];
//! bank[..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
//! let mut mem = MemoryMap::new();
//! mem.add_bank(0, &mut bank);
//!
//! let mut op = build(&record).unwrap();
//! assert_eq!(run_tiles(op.as_mut(), &mut mem), Ok(3));
//! drop(mem);
//! assert_eq!(&bank[8..14], &[1, 4, 2, 5, 3, 6]);
//! ```

mod codec;
pub mod error;
pub mod lut;
pub mod operator;
pub mod ops;
pub mod record;

pub use codec::{QuantRecord, TilingRecord};
pub use error::{ConfigError, Result};
pub use lut::{Lut, LutId, LutRegistry};
pub use operator::{run_tiles, IoTiles, Operator, Phase, TileSchedule};
pub use ops::{
    build, build_with_luts, Clip, Conv2d, DepthwiseConv2d, MatMul, MaxPool2d, Permute, ReduceMax,
    ReduceSum, Rescale, SumPool2d, TableLookup,
};
pub use record::{
    ClipRecord, ConvRecord, DecodeError, KernelId, MatMulRecord, OpRecord, PermuteRecord,
    PoolRecord, ReduceRecord, RescaleRecord, TableRecord, HEADER_SIZE,
};

pub use qtile_iter::{Padding, Tile, Window};
pub use qtile_quant::ClampRange;
pub use qtile_view::{
    status_code, BankId, BufferDesc, ElementKind, MemoryMap, Status, TensorDesc, MAX_RANK,
};
