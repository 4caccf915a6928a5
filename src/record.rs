//! Operator configuration records.
//!
//! A record is the byte blob an offline compiler emits for one operator.
//! Every record starts with an 8-byte header:
//!
//! ```text
//! kernel tag u32 | total size u32
//! ```
//!
//! followed by a fixed, per-kernel payload built from the sections in
//! [`crate::codec`]. [`OpRecord::decode`] checks the declared size against
//! the provided bytes and against the expected size for the tag before
//! interpreting any payload byte. [`OpRecord::encode`] produces exactly the
//! layout `decode` accepts.

use qtile_iter::Window;
use qtile_quant::ClampRange;
use qtile_view::{BufferDesc, TensorDesc, MAX_RANK};

use crate::codec::{
    QuantRecord, RecordReader, RecordWriter, TilingRecord, BUFFER_SIZE, CLAMP_SIZE, QUANT_SIZE,
    TENSOR_SIZE, TILING_SIZE, WINDOW_SIZE,
};
use crate::lut::LutId;

/// Size of the record header.
pub const HEADER_SIZE: usize = 8;

pub const CONV_RECORD_SIZE: usize =
    HEADER_SIZE + 4 * TENSOR_SIZE + 4 * QUANT_SIZE + WINDOW_SIZE + CLAMP_SIZE + TILING_SIZE;
pub const POOL_RECORD_SIZE: usize = HEADER_SIZE + 2 * TENSOR_SIZE + 4 + WINDOW_SIZE + TILING_SIZE;
pub const MATMUL_RECORD_SIZE: usize = HEADER_SIZE + 3 * TENSOR_SIZE + BUFFER_SIZE + TILING_SIZE;
pub const PERMUTE_RECORD_SIZE: usize = HEADER_SIZE + 2 * TENSOR_SIZE + 4 + TILING_SIZE;
pub const REDUCE_RECORD_SIZE: usize = HEADER_SIZE + 2 * TENSOR_SIZE + 4 + TILING_SIZE;
pub const RESCALE_RECORD_SIZE: usize =
    HEADER_SIZE + 2 * TENSOR_SIZE + 4 + 4 * BUFFER_SIZE + TILING_SIZE;
pub const CLIP_RECORD_SIZE: usize = HEADER_SIZE + 2 * TENSOR_SIZE + BUFFER_SIZE + TILING_SIZE;
pub const TABLE_RECORD_SIZE: usize = HEADER_SIZE + 2 * TENSOR_SIZE + 8 + TILING_SIZE;

// ============================================================================
// Kernel ids
// ============================================================================

/// Kernel type tag carried in the record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum KernelId {
    Invalid = 0,
    Nop = 1,
    Conv2d = 2,
    Prelu = 3,
    Move = 4,
    DwConv2d = 5,
    MaxPool2d = 6,
    FullyConnected = 7,
    SumPool2d = 8,
    Add = 9,
    Sub = 10,
    Mul = 11,
    Max = 12,
    Min = 13,
    Rescale = 14,
    Clip = 15,
    ReduceMax = 16,
    TransConv2d = 17,
    Permute = 18,
    ReduceSum = 19,
    ArgMax = 20,
    TableBuiltin = 21,
    MatMul = 22,
    MoveBroadcast = 23,
    ResizeBilinear = 24,
}

impl KernelId {
    const ALL: [KernelId; 25] = [
        KernelId::Invalid,
        KernelId::Nop,
        KernelId::Conv2d,
        KernelId::Prelu,
        KernelId::Move,
        KernelId::DwConv2d,
        KernelId::MaxPool2d,
        KernelId::FullyConnected,
        KernelId::SumPool2d,
        KernelId::Add,
        KernelId::Sub,
        KernelId::Mul,
        KernelId::Max,
        KernelId::Min,
        KernelId::Rescale,
        KernelId::Clip,
        KernelId::ReduceMax,
        KernelId::TransConv2d,
        KernelId::Permute,
        KernelId::ReduceSum,
        KernelId::ArgMax,
        KernelId::TableBuiltin,
        KernelId::MatMul,
        KernelId::MoveBroadcast,
        KernelId::ResizeBilinear,
    ];

    #[inline]
    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Result<Self, DecodeError> {
        Self::ALL
            .get(tag as usize)
            .copied()
            .ok_or(DecodeError::UnknownKernel(tag))
    }

    /// Record size for kernels this runtime implements.
    pub fn record_size(self) -> Option<usize> {
        match self {
            KernelId::Conv2d | KernelId::DwConv2d => Some(CONV_RECORD_SIZE),
            KernelId::MaxPool2d | KernelId::SumPool2d => Some(POOL_RECORD_SIZE),
            KernelId::MatMul => Some(MATMUL_RECORD_SIZE),
            KernelId::Permute => Some(PERMUTE_RECORD_SIZE),
            KernelId::ReduceMax | KernelId::ReduceSum => Some(REDUCE_RECORD_SIZE),
            KernelId::Rescale => Some(RESCALE_RECORD_SIZE),
            KernelId::Clip => Some(CLIP_RECORD_SIZE),
            KernelId::TableBuiltin => Some(TABLE_RECORD_SIZE),
            _ => None,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while decoding a configuration record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("record truncated: needs {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// The header's size field disagrees with the bytes provided.
    #[error("record declares {declared} bytes but {actual} were provided")]
    SizeMismatch { declared: usize, actual: usize },

    /// The header's size field disagrees with the layout of its kernel.
    #[error("{kernel:?} record declares {declared} bytes, expected {expected}")]
    UnexpectedSize {
        kernel: KernelId,
        declared: usize,
        expected: usize,
    },

    #[error("unknown kernel tag {0}")]
    UnknownKernel(u32),

    /// A known kernel without an implementation in this runtime.
    #[error("kernel {0:?} has no record layout")]
    UnsupportedKernel(KernelId),

    /// The record is valid but for another operator.
    #[error("expected a {expected:?} record, found {found:?}")]
    KernelMismatch { expected: KernelId, found: KernelId },

    #[error("unknown element kind tag {0}")]
    UnknownElementKind(u8),

    #[error("rank {0} exceeds {MAX_RANK}")]
    InvalidRank(u8),

    #[error("{0:?} is not a permutation of 0..{MAX_RANK}")]
    InvalidPermutation([usize; MAX_RANK]),

    #[error("axis {0} out of range")]
    InvalidAxis(i32),

    #[error("required tensor `{0}` is absent")]
    MissingTensor(&'static str),
}

// ============================================================================
// Per-operator records
// ============================================================================

/// Convolution and depthwise convolution.
///
/// Weights are `[KH, KW, Cin, Cout]` for convolution and `[KH, KW, 1, C]`
/// for depthwise; the window's kernel extent is taken from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvRecord {
    pub input: TensorDesc,
    pub weights: TensorDesc,
    pub bias: Option<TensorDesc>,
    pub output: TensorDesc,
    pub input_quant: QuantRecord,
    pub weights_quant: QuantRecord,
    pub bias_quant: QuantRecord,
    pub output_quant: QuantRecord,
    pub window: Window,
    pub clamp: ClampRange,
    pub tiling: TilingRecord,
}

/// Max and sum pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolRecord {
    pub input: TensorDesc,
    pub output: TensorDesc,
    pub window: Window,
    pub tiling: TilingRecord,
}

/// Matrix multiply; `params` holds the two zero points as `i8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatMulRecord {
    pub left: TensorDesc,
    pub right: TensorDesc,
    pub output: TensorDesc,
    pub params: BufferDesc,
    pub tiling: TilingRecord,
}

/// Output dimension `d` is input dimension `perm[d]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermuteRecord {
    pub input: TensorDesc,
    pub output: TensorDesc,
    pub perm: [usize; MAX_RANK],
    pub tiling: TilingRecord,
}

/// Reduction along `axis`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReduceRecord {
    pub input: TensorDesc,
    pub output: TensorDesc,
    pub axis: usize,
    pub tiling: TilingRecord,
}

/// 32-bit to 8-bit rescale; each buffer holds one value per index along
/// `axis`, or a single value when `axis` is negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescaleRecord {
    pub input: TensorDesc,
    pub output: TensorDesc,
    pub axis: i8,
    pub in_bias: BufferDesc,
    pub scale: BufferDesc,
    pub shift: BufferDesc,
    pub out_bias: BufferDesc,
    pub tiling: TilingRecord,
}

/// Clamp; `params` holds `[min, max]` in the tensor's element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipRecord {
    pub input: TensorDesc,
    pub output: TensorDesc,
    pub params: BufferDesc,
    pub tiling: TilingRecord,
}

/// Activation through a lookup table held in a [`crate::LutRegistry`];
/// the input carries `in_frac_bits` fractional bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRecord {
    pub input: TensorDesc,
    pub output: TensorDesc,
    pub table: LutId,
    pub in_frac_bits: i8,
    pub tiling: TilingRecord,
}

/// A decoded configuration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpRecord {
    Conv2d(ConvRecord),
    DwConv2d(ConvRecord),
    MaxPool2d(PoolRecord),
    SumPool2d(PoolRecord),
    MatMul(MatMulRecord),
    Permute(PermuteRecord),
    ReduceMax(ReduceRecord),
    ReduceSum(ReduceRecord),
    Rescale(RescaleRecord),
    Clip(ClipRecord),
    TableBuiltin(TableRecord),
}

fn check_perm(perm: [usize; MAX_RANK]) -> Result<(), DecodeError> {
    let mut seen = [false; MAX_RANK];
    for &p in &perm {
        if p >= MAX_RANK || seen[p] {
            return Err(DecodeError::InvalidPermutation(perm));
        }
        seen[p] = true;
    }
    Ok(())
}

fn read_u8x4(r: &mut RecordReader<'_>) -> Result<[usize; MAX_RANK], DecodeError> {
    let mut out = [0usize; MAX_RANK];
    for o in out.iter_mut() {
        *o = r.u8()? as usize;
    }
    Ok(out)
}

impl OpRecord {
    pub fn kernel_id(&self) -> KernelId {
        match self {
            OpRecord::Conv2d(_) => KernelId::Conv2d,
            OpRecord::DwConv2d(_) => KernelId::DwConv2d,
            OpRecord::MaxPool2d(_) => KernelId::MaxPool2d,
            OpRecord::SumPool2d(_) => KernelId::SumPool2d,
            OpRecord::MatMul(_) => KernelId::MatMul,
            OpRecord::Permute(_) => KernelId::Permute,
            OpRecord::ReduceMax(_) => KernelId::ReduceMax,
            OpRecord::ReduceSum(_) => KernelId::ReduceSum,
            OpRecord::Rescale(_) => KernelId::Rescale,
            OpRecord::Clip(_) => KernelId::Clip,
            OpRecord::TableBuiltin(_) => KernelId::TableBuiltin,
        }
    }

    /// Decode a record, validating its header first.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = RecordReader::new(data);
        let kernel = KernelId::from_tag(r.u32()?)?;
        let declared = r.u32()? as usize;
        if declared != data.len() {
            return Err(DecodeError::SizeMismatch {
                declared,
                actual: data.len(),
            });
        }
        let expected = kernel
            .record_size()
            .ok_or(DecodeError::UnsupportedKernel(kernel))?;
        if declared != expected {
            return Err(DecodeError::UnexpectedSize {
                kernel,
                declared,
                expected,
            });
        }

        let record = match kernel {
            KernelId::Conv2d | KernelId::DwConv2d => {
                let input = r.required_tensor("input")?;
                let weights = r.required_tensor("weights")?;
                let bias = r.tensor()?;
                let output = r.required_tensor("output")?;
                let input_quant = r.quant()?;
                let weights_quant = r.quant()?;
                let bias_quant = r.quant()?;
                let output_quant = r.quant()?;
                let window = r.window([weights.dim(0), weights.dim(1)])?;
                let conv = ConvRecord {
                    input,
                    weights,
                    bias,
                    output,
                    input_quant,
                    weights_quant,
                    bias_quant,
                    output_quant,
                    window,
                    clamp: r.clamp()?,
                    tiling: r.tiling()?,
                };
                if kernel == KernelId::Conv2d {
                    OpRecord::Conv2d(conv)
                } else {
                    OpRecord::DwConv2d(conv)
                }
            }
            KernelId::MaxPool2d | KernelId::SumPool2d => {
                let input = r.required_tensor("input")?;
                let output = r.required_tensor("output")?;
                let kernel_hw = [r.u16()? as usize, r.u16()? as usize];
                let pool = PoolRecord {
                    input,
                    output,
                    window: r.window(kernel_hw)?,
                    tiling: r.tiling()?,
                };
                if kernel == KernelId::MaxPool2d {
                    OpRecord::MaxPool2d(pool)
                } else {
                    OpRecord::SumPool2d(pool)
                }
            }
            KernelId::MatMul => OpRecord::MatMul(MatMulRecord {
                left: r.required_tensor("left")?,
                right: r.required_tensor("right")?,
                output: r.required_tensor("output")?,
                params: r.buffer()?,
                tiling: r.tiling()?,
            }),
            KernelId::Permute => {
                let input = r.required_tensor("input")?;
                let output = r.required_tensor("output")?;
                let perm = read_u8x4(&mut r)?;
                check_perm(perm)?;
                OpRecord::Permute(PermuteRecord {
                    input,
                    output,
                    perm,
                    tiling: r.tiling()?,
                })
            }
            KernelId::ReduceMax | KernelId::ReduceSum => {
                let input = r.required_tensor("input")?;
                let output = r.required_tensor("output")?;
                let axis = r.u8()? as usize;
                r.skip(3)?;
                if axis >= input.rank() {
                    return Err(DecodeError::InvalidAxis(axis as i32));
                }
                let reduce = ReduceRecord {
                    input,
                    output,
                    axis,
                    tiling: r.tiling()?,
                };
                if kernel == KernelId::ReduceMax {
                    OpRecord::ReduceMax(reduce)
                } else {
                    OpRecord::ReduceSum(reduce)
                }
            }
            KernelId::Rescale => {
                let input = r.required_tensor("input")?;
                let output = r.required_tensor("output")?;
                let axis = r.i8()?;
                r.skip(3)?;
                if axis < -1 || axis as i32 >= input.rank() as i32 {
                    return Err(DecodeError::InvalidAxis(axis as i32));
                }
                OpRecord::Rescale(RescaleRecord {
                    input,
                    output,
                    axis,
                    in_bias: r.buffer()?,
                    scale: r.buffer()?,
                    shift: r.buffer()?,
                    out_bias: r.buffer()?,
                    tiling: r.tiling()?,
                })
            }
            KernelId::Clip => OpRecord::Clip(ClipRecord {
                input: r.required_tensor("input")?,
                output: r.required_tensor("output")?,
                params: r.buffer()?,
                tiling: r.tiling()?,
            }),
            KernelId::TableBuiltin => {
                let input = r.required_tensor("input")?;
                let output = r.required_tensor("output")?;
                let table = LutId::from_raw(r.u32()?);
                let in_frac_bits = r.i8()?;
                r.skip(3)?;
                OpRecord::TableBuiltin(TableRecord {
                    input,
                    output,
                    table,
                    in_frac_bits,
                    tiling: r.tiling()?,
                })
            }
            other => return Err(DecodeError::UnsupportedKernel(other)),
        };
        debug_assert_eq!(r.position(), expected);
        Ok(record)
    }

    /// Decode a record that must be of kind `expected`.
    pub fn decode_as(data: &[u8], expected: KernelId) -> Result<Self, DecodeError> {
        if data.len() >= 4 {
            let found = KernelId::from_tag(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))?;
            if found != expected {
                return Err(DecodeError::KernelMismatch { expected, found });
            }
        }
        Self::decode(data)
    }

    /// Serialize into the layout [`OpRecord::decode`] accepts.
    pub fn encode(&self) -> Vec<u8> {
        let kernel = self.kernel_id();
        let size = kernel.record_size().unwrap_or(HEADER_SIZE);
        let mut w = RecordWriter::with_capacity(size);
        w.u32(kernel.tag());
        w.u32(size as u32);
        match self {
            OpRecord::Conv2d(c) | OpRecord::DwConv2d(c) => {
                w.tensor(Some(&c.input));
                w.tensor(Some(&c.weights));
                w.tensor(c.bias.as_ref());
                w.tensor(Some(&c.output));
                w.quant(&c.input_quant);
                w.quant(&c.weights_quant);
                w.quant(&c.bias_quant);
                w.quant(&c.output_quant);
                w.window(&c.window);
                w.clamp(&c.clamp);
                w.tiling(&c.tiling);
            }
            OpRecord::MaxPool2d(p) | OpRecord::SumPool2d(p) => {
                w.tensor(Some(&p.input));
                w.tensor(Some(&p.output));
                w.u16(p.window.kernel[0] as u16);
                w.u16(p.window.kernel[1] as u16);
                w.window(&p.window);
                w.tiling(&p.tiling);
            }
            OpRecord::MatMul(m) => {
                w.tensor(Some(&m.left));
                w.tensor(Some(&m.right));
                w.tensor(Some(&m.output));
                w.buffer(&m.params);
                w.tiling(&m.tiling);
            }
            OpRecord::Permute(p) => {
                w.tensor(Some(&p.input));
                w.tensor(Some(&p.output));
                for &d in &p.perm {
                    w.u8(d as u8);
                }
                w.tiling(&p.tiling);
            }
            OpRecord::ReduceMax(p) | OpRecord::ReduceSum(p) => {
                w.tensor(Some(&p.input));
                w.tensor(Some(&p.output));
                w.u8(p.axis as u8);
                w.zeros(3);
                w.tiling(&p.tiling);
            }
            OpRecord::Rescale(p) => {
                w.tensor(Some(&p.input));
                w.tensor(Some(&p.output));
                w.i8(p.axis);
                w.zeros(3);
                w.buffer(&p.in_bias);
                w.buffer(&p.scale);
                w.buffer(&p.shift);
                w.buffer(&p.out_bias);
                w.tiling(&p.tiling);
            }
            OpRecord::Clip(p) => {
                w.tensor(Some(&p.input));
                w.tensor(Some(&p.output));
                w.buffer(&p.params);
                w.tiling(&p.tiling);
            }
            OpRecord::TableBuiltin(p) => {
                w.tensor(Some(&p.input));
                w.tensor(Some(&p.output));
                w.u32(p.table.raw());
                w.i8(p.in_frac_bits);
                w.zeros(3);
                w.tiling(&p.tiling);
            }
        }
        debug_assert_eq!(w.len(), size);
        w.into_bytes()
    }
}
