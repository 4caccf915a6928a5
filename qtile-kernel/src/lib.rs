//! Per-tile compute primitives for the qtile runtime.
//!
//! Each kernel processes exactly one tile: borrowed input views, a mutable
//! output view, and the resolved quantization stage. Kernels are generic
//! over a [`ComputeBackend`]; operators call them with [`ActiveBackend`],
//! chosen by Cargo features:
//!
//! - default: [`Reference`]
//! - `fx-dsp`: [`FixedPointDsp`]
//! - `vector-dsp`: [`WideVectorDsp`]
//!
//! All backends produce bit-identical results.

#[cfg(all(feature = "fx-dsp", feature = "vector-dsp"))]
compile_error!("Features `fx-dsp` and `vector-dsp` are mutually exclusive. Use one or the other.");

pub mod backend;
pub mod conv;
pub mod matmul;
pub mod permute;
pub mod pool;
pub mod reduce;
pub mod stage;
pub mod transform;
pub mod util;

pub use backend::{
    ActiveBackend, BackendConfig, ComputeBackend, FixedPointDsp, Reference, WideVectorDsp,
    VECTOR_LANES,
};
pub use conv::{conv2d, depthwise_conv2d};
pub use matmul::matmul;
pub use permute::permute;
pub use pool::{max_pool2d, sum_pool2d};
pub use reduce::{reduce_max, reduce_sum};
pub use stage::OutputStage;
pub use transform::{clip, map, rescale, RescaleParams};
