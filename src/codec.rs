//! Little-endian reader/writer and the sections shared by all records.
//!
//! Section layouts (all integers little-endian):
//!
//! ```text
//! tensor  (44): bank u8 | kind u8 | rank u8 | reserved u8 | offset u32 | len u32
//!               | shape u32 x4 | stride i32 x4
//! buffer  (12): bank u8 | reserved u8 x3 | offset u32 | len u32
//! quant   (44): axis i8 | frac_bits i8 | zero_point i16 | scale i16 | reserved u16
//!               | zero_points buffer | scales buffer | frac_bits buffer
//! window  (16): stride u16 x2 | dilation u16 x2 | pad_begin u16 x2 | pad_end u16 x2
//! clamp    (8): min i32 | max i32
//! tiling  (24): enabled u8 | reserved u8 x3 | order u8 x4 | tile u32 x4
//! ```
//!
//! A tensor section with rank 0 encodes an absent optional tensor.

use qtile_iter::{Padding, Window};
use qtile_quant::ClampRange;
use qtile_view::{BankId, BufferDesc, ElementKind, TensorDesc, MAX_RANK};

use crate::record::DecodeError;

pub const TENSOR_SIZE: usize = 44;
pub const BUFFER_SIZE: usize = 12;
pub const QUANT_SIZE: usize = 8 + 3 * BUFFER_SIZE;
pub const WINDOW_SIZE: usize = 16;
pub const CLAMP_SIZE: usize = 8;
pub const TILING_SIZE: usize = 24;

// ============================================================================
// Reader / writer
// ============================================================================

/// Cursor over a record's bytes.
pub(crate) struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos + N;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(DecodeError::Truncated {
                needed: end,
                available: self.data.len(),
            })?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        if self.pos + n > self.data.len() {
            return Err(DecodeError::Truncated {
                needed: self.pos + n,
                available: self.data.len(),
            });
        }
        self.pos += n;
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.take::<1>()?[0] as i8)
    }

    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub fn i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_le_bytes(self.take()?))
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    pub fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn u16x2(&mut self) -> Result<[usize; 2], DecodeError> {
        Ok([self.u16()? as usize, self.u16()? as usize])
    }

    pub fn buffer(&mut self) -> Result<BufferDesc, DecodeError> {
        let bank = BankId(self.u8()?);
        self.skip(3)?;
        let offset = self.u32()?;
        let len = self.u32()?;
        Ok(BufferDesc::new(bank, offset, len))
    }

    /// Tensor section; `None` when the rank byte is 0.
    pub fn tensor(&mut self) -> Result<Option<TensorDesc>, DecodeError> {
        let bank = BankId(self.u8()?);
        let kind_tag = self.u8()?;
        let rank = self.u8()?;
        self.skip(1)?;
        let offset = self.u32()?;
        let len = self.u32()?;
        let mut shape = [1u32; MAX_RANK];
        for s in shape.iter_mut() {
            *s = self.u32()?;
        }
        let mut stride = [0i32; MAX_RANK];
        for s in stride.iter_mut() {
            *s = self.i32()?;
        }
        if rank == 0 {
            return Ok(None);
        }
        if rank as usize > MAX_RANK {
            return Err(DecodeError::InvalidRank(rank));
        }
        let kind = ElementKind::from_tag(kind_tag)
            .map_err(|_| DecodeError::UnknownElementKind(kind_tag))?;
        shape.iter_mut().skip(rank as usize).for_each(|s| *s = 1);
        Ok(Some(TensorDesc {
            buffer: BufferDesc::new(bank, offset, len),
            kind,
            rank,
            shape,
            stride,
            offset: 0,
        }))
    }

    /// Tensor section that must be present.
    pub fn required_tensor(&mut self, name: &'static str) -> Result<TensorDesc, DecodeError> {
        self.tensor()?.ok_or(DecodeError::MissingTensor(name))
    }

    pub fn quant(&mut self) -> Result<QuantRecord, DecodeError> {
        let axis = self.i8()?;
        let frac_bits = self.i8()?;
        let zero_point = self.i16()?;
        let scale = self.i16()?;
        self.skip(2)?;
        Ok(QuantRecord {
            axis,
            frac_bits,
            zero_point,
            scale,
            zero_points: self.buffer()?,
            scales: self.buffer()?,
            frac_bits_per_axis: self.buffer()?,
        })
    }

    /// Window section without the kernel extent, which comes from elsewhere.
    pub fn window(&mut self, kernel: [usize; 2]) -> Result<Window, DecodeError> {
        let stride = self.u16x2()?;
        let dilation = self.u16x2()?;
        let begin = self.u16x2()?;
        let end = self.u16x2()?;
        Ok(Window {
            kernel,
            stride,
            dilation,
            padding: Padding { begin, end },
        })
    }

    pub fn clamp(&mut self) -> Result<ClampRange, DecodeError> {
        Ok(ClampRange::new(self.i32()?, self.i32()?))
    }

    pub fn tiling(&mut self) -> Result<TilingRecord, DecodeError> {
        let enabled = self.u8()? != 0;
        self.skip(3)?;
        let mut order = [0usize; MAX_RANK];
        for o in order.iter_mut() {
            *o = self.u8()? as usize;
        }
        let mut tile = [0usize; MAX_RANK];
        for t in tile.iter_mut() {
            *t = self.u32()? as usize;
        }
        Ok(TilingRecord {
            enabled,
            order,
            tile,
        })
    }
}

/// Append-only little-endian byte sink.
#[derive(Debug, Default)]
pub(crate) struct RecordWriter {
    buf: Vec<u8>,
}

impl RecordWriter {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            buf: Vec::with_capacity(n),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u16x2(&mut self, v: [usize; 2]) {
        self.u16(v[0] as u16);
        self.u16(v[1] as u16);
    }

    pub fn buffer(&mut self, b: &BufferDesc) {
        self.u8(b.bank.0);
        self.zeros(3);
        self.u32(b.offset);
        self.u32(b.len);
    }

    pub fn tensor(&mut self, t: Option<&TensorDesc>) {
        let Some(t) = t else {
            self.zeros(TENSOR_SIZE);
            return;
        };
        self.u8(t.buffer.bank.0);
        self.u8(t.kind.tag());
        self.u8(t.rank);
        self.zeros(1);
        self.u32(t.buffer.offset);
        self.u32(t.buffer.len);
        for &s in &t.shape {
            self.u32(s);
        }
        for &s in &t.stride {
            self.i32(s);
        }
    }

    pub fn quant(&mut self, q: &QuantRecord) {
        self.i8(q.axis);
        self.i8(q.frac_bits);
        self.i16(q.zero_point);
        self.i16(q.scale);
        self.zeros(2);
        self.buffer(&q.zero_points);
        self.buffer(&q.scales);
        self.buffer(&q.frac_bits_per_axis);
    }

    pub fn window(&mut self, w: &Window) {
        self.u16x2(w.stride);
        self.u16x2(w.dilation);
        self.u16x2(w.padding.begin);
        self.u16x2(w.padding.end);
    }

    pub fn clamp(&mut self, c: &ClampRange) {
        self.i32(c.min);
        self.i32(c.max);
    }

    pub fn tiling(&mut self, t: &TilingRecord) {
        self.u8(t.enabled as u8);
        self.zeros(3);
        for &o in &t.order {
            self.u8(o as u8);
        }
        for &s in &t.tile {
            self.u32(s as u32);
        }
    }
}

// ============================================================================
// Shared sections
// ============================================================================

/// Quantization of one tensor.
///
/// Per-tensor values are stored inline. When `axis >= 0` the three buffers
/// hold one entry per index along `axis` (`i16`, `i16`, `i8`) and the
/// inline values are ignored. Fixed-point tensors only use `frac_bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantRecord {
    pub axis: i8,
    pub frac_bits: i8,
    pub zero_point: i16,
    pub scale: i16,
    pub zero_points: BufferDesc,
    pub scales: BufferDesc,
    pub frac_bits_per_axis: BufferDesc,
}

impl QuantRecord {
    /// Per-tensor affine parameters.
    pub fn affine(zero_point: i16, scale: i16, frac_bits: i8) -> Self {
        Self {
            axis: -1,
            frac_bits,
            zero_point,
            scale,
            zero_points: BufferDesc::EMPTY,
            scales: BufferDesc::EMPTY,
            frac_bits_per_axis: BufferDesc::EMPTY,
        }
    }

    /// Fixed-point tensor with `frac_bits` fractional bits.
    pub fn fixed(frac_bits: i8) -> Self {
        Self::affine(0, 1, frac_bits)
    }

    /// Per-axis affine parameters living in the given buffers.
    pub fn per_axis(
        axis: i8,
        zero_points: BufferDesc,
        scales: BufferDesc,
        frac_bits: BufferDesc,
    ) -> Self {
        Self {
            axis,
            frac_bits: 0,
            zero_point: 0,
            scale: 1,
            zero_points,
            scales,
            frac_bits_per_axis: frac_bits,
        }
    }

    #[inline]
    pub fn is_per_axis(&self) -> bool {
        self.axis >= 0
    }
}

impl Default for QuantRecord {
    /// Per-tensor, zero point 0, scale 1, no fractional bits.
    fn default() -> Self {
        Self::affine(0, 1, 0)
    }
}

/// Tiling section: whether the output is tiled, the loop order and the
/// output tile size per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingRecord {
    pub enabled: bool,
    /// Dimensions from outermost to innermost loop.
    pub order: [usize; MAX_RANK],
    pub tile: [usize; MAX_RANK],
}

impl TilingRecord {
    /// One tile covering every tensor.
    pub const DISABLED: TilingRecord = TilingRecord {
        enabled: false,
        order: [0, 1, 2, 3],
        tile: [0; MAX_RANK],
    };

    /// Row-major loops over tiles of `tile`.
    pub fn row_major(tile: [usize; MAX_RANK]) -> Self {
        Self {
            enabled: true,
            order: [0, 1, 2, 3],
            tile,
        }
    }
}

impl Default for TilingRecord {
    fn default() -> Self {
        Self::DISABLED
    }
}
