//! Borrowed strided views over resolved bank bytes.
//!
//! - [`TensorView`]: read-only view
//! - [`TensorViewMut`]: read-write view
//! - [`Run`]: one strided line of elements, the unit compute primitives consume
//!
//! Element access is by element type `T`; asking for a `T` whose size differs
//! from the view's element size is a programming error and panics.

use std::marker::PhantomData;

use crate::desc::TensorDesc;
use crate::element::{Element, ElementKind};
use crate::{Result, ViewError, MAX_RANK};

#[inline]
fn check_elem<T: Element>(kind: ElementKind) {
    assert_eq!(
        T::SIZE,
        kind.size(),
        "element type of size {} requested from a {:?} view",
        T::SIZE,
        kind
    );
}

#[inline]
fn load<T: Element>(data: &[u8], elem_offset: isize) -> T {
    let start = elem_offset as usize * T::SIZE;
    bytemuck::pod_read_unaligned(&data[start..start + T::SIZE])
}

#[inline]
fn store<T: Element>(data: &mut [u8], elem_offset: isize, value: T) {
    let start = elem_offset as usize * T::SIZE;
    data[start..start + T::SIZE].copy_from_slice(bytemuck::bytes_of(&value));
}

fn check_len(data_len: usize, desc: &TensorDesc) -> Result<()> {
    if data_len != desc.buffer.len as usize {
        return Err(ViewError::BufferTooSmall {
            needed: desc.buffer.len as usize,
            available: data_len,
        });
    }
    desc.validate()
}

// ============================================================================
// Run
// ============================================================================

/// A line of `len` elements starting at `start` with element stride `stride`.
#[derive(Clone, Copy)]
pub struct Run<'a, T> {
    data: &'a [u8],
    start: isize,
    stride: isize,
    len: usize,
    _elem: PhantomData<T>,
}

impl<T> std::fmt::Debug for Run<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("start", &self.start)
            .field("stride", &self.stride)
            .field("len", &self.len)
            .finish()
    }
}

impl<'a, T: Element> Run<'a, T> {
    /// Run over a raw little-endian element slice.
    pub fn new(data: &'a [u8], start: isize, stride: isize, len: usize) -> Self {
        Self {
            data,
            start,
            stride,
            len,
            _elem: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn stride(&self) -> isize {
        self.stride
    }

    #[inline]
    pub fn is_contiguous(&self) -> bool {
        self.stride == 1 || self.len <= 1
    }

    /// `i`-th element of the run.
    #[inline]
    pub fn get(&self, i: usize) -> T {
        assert!(i < self.len, "run index {i} out of range {}", self.len);
        load(self.data, self.start + i as isize * self.stride)
    }

    /// Sub-run of `len` elements starting at element `start`.
    pub fn slice(&self, start: usize, len: usize) -> Self {
        assert!(
            start + len <= self.len,
            "run slice [{start}, {}) out of range {}",
            start + len,
            self.len
        );
        Self {
            start: self.start + start as isize * self.stride,
            len,
            ..*self
        }
    }

    /// Contiguous bytes of the run, when `stride == 1`.
    pub fn contiguous_bytes(&self) -> Option<&'a [u8]> {
        if !self.is_contiguous() {
            return None;
        }
        let start = self.start as usize * T::SIZE;
        Some(&self.data[start..start + self.len * T::SIZE])
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }
}

// ============================================================================
// TensorView
// ============================================================================

/// Read-only strided view of a tensor in a bank.
#[derive(Clone, Copy)]
pub struct TensorView<'a> {
    data: &'a [u8],
    desc: TensorDesc,
}

impl std::fmt::Debug for TensorView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorView")
            .field("kind", &self.desc.kind)
            .field("shape", &self.desc.shape)
            .field("stride", &self.desc.stride)
            .field("offset", &self.desc.offset)
            .finish()
    }
}

impl<'a> TensorView<'a> {
    /// Create a view over the bytes of `desc.buffer`.
    pub fn new(data: &'a [u8], desc: &TensorDesc) -> Result<Self> {
        check_len(data.len(), desc)?;
        Ok(Self { data, desc: *desc })
    }

    #[inline]
    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    #[inline]
    pub fn kind(&self) -> ElementKind {
        self.desc.kind
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.desc.rank()
    }

    #[inline]
    pub fn dim(&self, i: usize) -> usize {
        self.desc.dim(i)
    }

    #[inline]
    pub fn stride(&self, i: usize) -> isize {
        self.desc.stride[i] as isize
    }

    #[inline]
    pub fn dims(&self) -> [usize; MAX_RANK] {
        self.desc.dims()
    }

    #[inline]
    pub fn num_elements(&self) -> usize {
        self.desc.num_elements()
    }

    /// Element at memory offset `linear_index` from the view origin.
    #[inline]
    pub fn read<T: Element>(&self, linear_index: isize) -> T {
        check_elem::<T>(self.desc.kind);
        load(self.data, self.desc.offset as isize + linear_index)
    }

    /// Element at a four-dimensional index.
    #[inline]
    pub fn at<T: Element>(&self, idx: [usize; MAX_RANK]) -> T {
        check_elem::<T>(self.desc.kind);
        load(self.data, self.desc.offset_of(idx))
    }

    /// Line of `len` elements starting at `idx` and walking along `dim`.
    pub fn run<T: Element>(&self, idx: [usize; MAX_RANK], dim: usize, len: usize) -> Run<'a, T> {
        check_elem::<T>(self.desc.kind);
        Run::new(
            self.data,
            self.desc.offset_of(idx),
            self.desc.stride[dim] as isize,
            len,
        )
    }

    /// Line of `len` elements along `dim`, taking every `step`-th element.
    pub fn run_step<T: Element>(
        &self,
        idx: [usize; MAX_RANK],
        dim: usize,
        step: usize,
        len: usize,
    ) -> Run<'a, T> {
        check_elem::<T>(self.desc.kind);
        Run::new(
            self.data,
            self.desc.offset_of(idx),
            self.desc.stride[dim] as isize * step as isize,
            len,
        )
    }

    /// Element at `idx` widened to `i64`, whatever the element width.
    pub fn at_widened(&self, idx: [usize; MAX_RANK]) -> i64 {
        match self.desc.kind.size() {
            1 => self.at::<i8>(idx).widen(),
            2 => self.at::<i16>(idx).widen(),
            _ => self.at::<i32>(idx).widen(),
        }
    }

    /// View of the sub-block `[pos, pos + size)`.
    pub fn subview(&self, pos: [usize; MAX_RANK], size: [usize; MAX_RANK]) -> Result<Self> {
        Ok(Self {
            data: self.data,
            desc: self.desc.slice(pos, size)?,
        })
    }
}

// ============================================================================
// TensorViewMut
// ============================================================================

/// Read-write strided view of a tensor in a bank.
pub struct TensorViewMut<'a> {
    data: &'a mut [u8],
    desc: TensorDesc,
}

impl std::fmt::Debug for TensorViewMut<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorViewMut")
            .field("kind", &self.desc.kind)
            .field("shape", &self.desc.shape)
            .field("stride", &self.desc.stride)
            .field("offset", &self.desc.offset)
            .finish()
    }
}

impl<'a> TensorViewMut<'a> {
    /// Create a mutable view over the bytes of `desc.buffer`.
    pub fn new(data: &'a mut [u8], desc: &TensorDesc) -> Result<Self> {
        check_len(data.len(), desc)?;
        Ok(Self { data, desc: *desc })
    }

    #[inline]
    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    #[inline]
    pub fn kind(&self) -> ElementKind {
        self.desc.kind
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.desc.rank()
    }

    #[inline]
    pub fn dim(&self, i: usize) -> usize {
        self.desc.dim(i)
    }

    #[inline]
    pub fn stride(&self, i: usize) -> isize {
        self.desc.stride[i] as isize
    }

    #[inline]
    pub fn dims(&self) -> [usize; MAX_RANK] {
        self.desc.dims()
    }

    /// Element at memory offset `linear_index` from the view origin.
    #[inline]
    pub fn read<T: Element>(&self, linear_index: isize) -> T {
        check_elem::<T>(self.desc.kind);
        load(self.data, self.desc.offset as isize + linear_index)
    }

    /// Store at memory offset `linear_index` from the view origin.
    #[inline]
    pub fn write<T: Element>(&mut self, linear_index: isize, value: T) {
        check_elem::<T>(self.desc.kind);
        store(self.data, self.desc.offset as isize + linear_index, value);
    }

    #[inline]
    pub fn at<T: Element>(&self, idx: [usize; MAX_RANK]) -> T {
        check_elem::<T>(self.desc.kind);
        load(self.data, self.desc.offset_of(idx))
    }

    /// Store at a four-dimensional index.
    #[inline]
    pub fn set<T: Element>(&mut self, idx: [usize; MAX_RANK], value: T) {
        check_elem::<T>(self.desc.kind);
        let off = self.desc.offset_of(idx);
        store(self.data, off, value);
    }

    /// Reborrow as a read-only view.
    pub fn as_view(&self) -> TensorView<'_> {
        TensorView {
            data: &*self.data,
            desc: self.desc,
        }
    }

    /// Consume the view, keeping only the sub-block `[pos, pos + size)`.
    pub fn into_subview(self, pos: [usize; MAX_RANK], size: [usize; MAX_RANK]) -> Result<Self> {
        let desc = self.desc.slice(pos, size)?;
        Ok(Self {
            data: self.data,
            desc,
        })
    }

    /// Mutable view of the sub-block `[pos, pos + size)`.
    pub fn subview_mut(
        &mut self,
        pos: [usize; MAX_RANK],
        size: [usize; MAX_RANK],
    ) -> Result<TensorViewMut<'_>> {
        let desc = self.desc.slice(pos, size)?;
        Ok(TensorViewMut {
            data: &mut *self.data,
            desc,
        })
    }
}
