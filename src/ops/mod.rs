//! The operators and the helpers they share.

/// `new(record: &[u8])` for an operator built from `OpRecord::$variant`.
macro_rules! decode_constructor {
    ($op:ident, $variant:ident) => {
        impl $op {
            /// Decode `record` and construct the operator.
            pub fn new(record: &[u8]) -> $crate::error::Result<Self> {
                use $crate::record::{DecodeError, KernelId, OpRecord};
                match OpRecord::decode_as(record, KernelId::$variant)? {
                    OpRecord::$variant(r) => Self::from_record(&r),
                    other => Err(DecodeError::KernelMismatch {
                        expected: KernelId::$variant,
                        found: other.kernel_id(),
                    }
                    .into()),
                }
            }
        }
    };
}

mod conv;
mod matmul;
mod permute;
mod pool;
mod reduce;
mod table;
mod transform;

pub use conv::{Conv2d, DepthwiseConv2d};
pub use matmul::MatMul;
pub use permute::Permute;
pub use pool::{MaxPool2d, SumPool2d};
pub use reduce::{ReduceMax, ReduceSum};
pub use table::TableLookup;
pub use transform::{Clip, Rescale};

use qtile_iter::Tile;
use qtile_kernel::{ActiveBackend, BackendConfig};
use qtile_quant::Params;
use qtile_view::{
    BufferDesc, BufferRef, Element, ElementKind, MemoryMap, Run, Status, TensorDesc, TensorView,
    TensorViewMut, ViewError,
};

use crate::error::{ConfigError, Result};
use crate::lut::LutRegistry;
use crate::operator::Operator;
use crate::record::OpRecord;

/// Construct the operator a record describes.
///
/// Table lookups need their tables; build those with [`build_with_luts`].
pub fn build(record: &[u8]) -> Result<Box<dyn Operator>> {
    construct(OpRecord::decode(record)?, None)
}

/// Construct the operator a record describes, binding lookup tables from
/// `luts`. The operator borrows the registry for as long as it lives.
pub fn build_with_luts<'l>(
    record: &[u8],
    luts: &'l LutRegistry,
) -> Result<Box<dyn Operator + 'l>> {
    construct(OpRecord::decode(record)?, Some(luts))
}

fn construct<'l>(
    record: OpRecord,
    luts: Option<&'l LutRegistry>,
) -> Result<Box<dyn Operator + 'l>> {
    tracing::debug!(
        kernel = ?record.kernel_id(),
        backend = <ActiveBackend as BackendConfig>::NAME,
        "building operator"
    );
    Ok(match record {
        OpRecord::Conv2d(r) => Box::new(Conv2d::from_record(&r)?),
        OpRecord::DwConv2d(r) => Box::new(DepthwiseConv2d::from_record(&r)?),
        OpRecord::MaxPool2d(r) => Box::new(MaxPool2d::from_record(&r)?),
        OpRecord::SumPool2d(r) => Box::new(SumPool2d::from_record(&r)?),
        OpRecord::MatMul(r) => Box::new(MatMul::from_record(&r)?),
        OpRecord::Permute(r) => Box::new(Permute::from_record(&r)?),
        OpRecord::ReduceMax(r) => Box::new(ReduceMax::from_record(&r)?),
        OpRecord::ReduceSum(r) => Box::new(ReduceSum::from_record(&r)?),
        OpRecord::Rescale(r) => Box::new(Rescale::from_record(&r)?),
        OpRecord::Clip(r) => Box::new(Clip::from_record(&r)?),
        OpRecord::TableBuiltin(r) => {
            let luts = luts.ok_or(ConfigError::UnknownLut(r.table.raw()))?;
            Box::new(TableLookup::from_record(&r, luts)?)
        }
    })
}

// ============================================================================
// Construction checks
// ============================================================================

fn check_shape(tensor: &'static str, desc: &TensorDesc, expected: [usize; 4]) -> Result<()> {
    if desc.dims() != expected {
        return Err(ConfigError::Geometry {
            tensor,
            expected,
            found: desc.dims(),
        });
    }
    Ok(())
}

/// A parameter buffer must hold exactly `expected` elements of `elem_size`.
fn check_param_len(
    name: &'static str,
    buffer: &BufferDesc,
    elem_size: usize,
    expected: usize,
) -> Result<()> {
    let found = buffer.len as usize / elem_size;
    if found != expected || buffer.len as usize % elem_size != 0 {
        return Err(ConfigError::ParamCount {
            name,
            expected,
            found,
        });
    }
    Ok(())
}

// ============================================================================
// Issue-time helpers
// ============================================================================

fn view_status(err: ViewError) -> Status {
    match err {
        ViewError::Status(s) => s,
        _ => Status::MemBankMismatch,
    }
}

#[inline]
fn resolve(mem: &MemoryMap<'_>, desc: &TensorDesc) -> std::result::Result<BufferRef, Status> {
    mem.resolve(desc.buffer, desc.elem_size())
}

#[inline]
fn resolve_opt(
    mem: &MemoryMap<'_>,
    desc: Option<&TensorDesc>,
) -> std::result::Result<BufferRef, Status> {
    desc.map_or(Ok(BufferRef::EMPTY), |d| resolve(mem, d))
}

/// Read-only view of the current tile of a tensor.
fn tile_view<'a>(
    bytes: &'a [u8],
    desc: &TensorDesc,
    tile: &Tile,
) -> std::result::Result<TensorView<'a>, Status> {
    TensorView::new(bytes, desc)
        .and_then(|v| v.subview(tile.offset, tile.size))
        .map_err(view_status)
}

/// Writable view of the current output tile.
fn tile_view_mut<'a>(
    bytes: &'a mut [u8],
    desc: &TensorDesc,
    tile: &Tile,
) -> std::result::Result<TensorViewMut<'a>, Status> {
    TensorViewMut::new(bytes, desc)
        .and_then(|v| v.into_subview(tile.offset, tile.size))
        .map_err(view_status)
}

/// Quantization parameter: the per-axis array when `per_axis`, otherwise
/// the inline per-tensor value.
fn axis_params<T: Element>(bytes: &[u8], per_axis: bool, inline: T) -> Params<'_, T> {
    if per_axis {
        Params::PerAxis(Run::new(bytes, 0, 1, bytes.len() / T::SIZE))
    } else {
        Params::Uniform(inline)
    }
}

/// Encoded parameter array: per axis, or its single entry.
fn buffer_params<T: Element>(bytes: &[u8], per_axis: bool) -> Params<'_, T> {
    let run = Run::new(bytes, 0, 1, bytes.len() / T::SIZE);
    if per_axis {
        Params::PerAxis(run)
    } else {
        Params::Uniform(run.get(0))
    }
}

fn unsupported(op: &'static str, kinds: &[ElementKind]) -> Status {
    tracing::warn!("{op}: no kernel for element kinds {kinds:?}");
    Status::NotSupported
}
