//! Multi-bank memory map.
//!
//! Addresses are `(bank id, byte offset)` pairs. A [`BufferDesc`] is the
//! unresolved form carried by configuration records; [`MemoryMap::resolve`]
//! checks it against the bank table and yields a [`BufferRef`] whose bytes
//! can then be borrowed. Nothing ever computes an address across a bank
//! boundary.

use crate::Status;

/// Index of a memory bank in a [`MemoryMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BankId(pub u8);

/// Unresolved buffer reference: bank, byte offset and byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferDesc {
    pub bank: BankId,
    pub offset: u32,
    pub len: u32,
}

impl BufferDesc {
    /// Zero-length buffer, used for absent optional tensors.
    pub const EMPTY: BufferDesc = BufferDesc {
        bank: BankId(0),
        offset: 0,
        len: 0,
    };

    pub fn new(bank: BankId, offset: u32, len: u32) -> Self {
        Self { bank, offset, len }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A buffer that has been checked against a [`MemoryMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRef {
    bank: usize,
    start: usize,
    len: usize,
}

impl BufferRef {
    /// Zero-length buffer standing for an absent tensor or parameter array.
    pub const EMPTY: BufferRef = BufferRef {
        bank: 0,
        start: 0,
        len: 0,
    };

    #[inline]
    pub fn bank(&self) -> BankId {
        BankId(self.bank as u8)
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
    fn end(&self) -> usize {
        self.start + self.len
    }

    fn overlaps(&self, other: &BufferRef) -> bool {
        self.bank == other.bank
            && !self.is_empty()
            && !other.is_empty()
            && self.start < other.end()
            && other.start < self.end()
    }
}

struct MemoryBank<'m> {
    base: u64,
    data: &'m mut [u8],
}

/// Table of physical memory banks, borrowed from the caller.
///
/// The map never allocates tensor storage; every bank is a caller-owned
/// byte slice paired with the base address it has on the target.
#[derive(Default)]
pub struct MemoryMap<'m> {
    banks: Vec<MemoryBank<'m>>,
}

impl std::fmt::Debug for MemoryMap<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.banks.iter().map(|b| (b.base, b.data.len())))
            .finish()
    }
}

impl<'m> MemoryMap<'m> {
    pub fn new() -> Self {
        Self { banks: Vec::new() }
    }

    /// Register a bank at target address `base` and return its id.
    ///
    /// # Panics
    /// Panics when more than 256 banks are registered.
    pub fn add_bank(&mut self, base: u64, data: &'m mut [u8]) -> BankId {
        assert!(self.banks.len() < 256, "bank table is full");
        self.banks.push(MemoryBank { base, data });
        BankId((self.banks.len() - 1) as u8)
    }

    #[inline]
    pub fn num_banks(&self) -> usize {
        self.banks.len()
    }

    /// Target base address of a bank.
    pub fn base(&self, id: BankId) -> Option<u64> {
        self.banks.get(id.0 as usize).map(|b| b.base)
    }

    /// Byte length of a bank.
    pub fn bank_len(&self, id: BankId) -> Option<usize> {
        self.banks.get(id.0 as usize).map(|b| b.data.len())
    }

    /// Check a buffer against the bank table.
    ///
    /// Fails with [`Status::MemBankMismatch`] when the bank does not exist or
    /// the buffer runs past its end, and with [`Status::Misalignment`] when
    /// `bank_base + offset` or the length is not a multiple of `elem_size`.
    /// A zero-length buffer resolves to [`BufferRef::EMPTY`] without a bank.
    pub fn resolve(&self, desc: BufferDesc, elem_size: usize) -> Result<BufferRef, Status> {
        if desc.is_empty() {
            return Ok(BufferRef::EMPTY);
        }
        let bank = self
            .banks
            .get(desc.bank.0 as usize)
            .ok_or(Status::MemBankMismatch)?;
        let start = desc.offset as usize;
        let len = desc.len as usize;
        let end = start.checked_add(len).ok_or(Status::MemBankMismatch)?;
        if end > bank.data.len() {
            return Err(Status::MemBankMismatch);
        }
        if elem_size > 1 {
            let address = bank.base.wrapping_add(desc.offset as u64);
            if address % elem_size as u64 != 0 || len % elem_size != 0 {
                return Err(Status::Misalignment);
            }
        }
        Ok(BufferRef {
            bank: desc.bank.0 as usize,
            start,
            len,
        })
    }

    /// Borrow the bytes of a resolved buffer.
    pub fn bytes(&self, buf: BufferRef) -> &[u8] {
        &self.banks[buf.bank].data[buf.start..buf.end()]
    }

    /// Borrow the bytes of a resolved buffer mutably.
    pub fn bytes_mut(&mut self, buf: BufferRef) -> &mut [u8] {
        let end = buf.end();
        &mut self.banks[buf.bank].data[buf.start..end]
    }

    /// Borrow several read-only buffers together with one writable buffer.
    ///
    /// Read buffers may share banks with each other and with the output, but
    /// must not overlap the output bytes; an overlap is reported as
    /// [`Status::MemBankMismatch`].
    pub fn split_io<const N: usize>(
        &mut self,
        reads: [BufferRef; N],
        write: BufferRef,
    ) -> Result<([&[u8]; N], &mut [u8]), Status> {
        if reads.iter().any(|r| r.overlaps(&write)) {
            return Err(Status::MemBankMismatch);
        }
        let mut inputs: [&[u8]; N] = [&[]; N];
        let mut output: Option<&mut [u8]> = None;

        for (id, bank) in self.banks.iter_mut().enumerate() {
            let data: &mut [u8] = &mut *bank.data;
            if id == write.bank {
                let (before, rest) = data.split_at_mut(write.start);
                let (out, after) = rest.split_at_mut(write.len);
                let before: &[u8] = before;
                let after: &[u8] = after;
                for (slot, r) in inputs.iter_mut().zip(reads.iter()) {
                    if r.bank != id || r.is_empty() {
                        continue;
                    }
                    *slot = if r.end() <= write.start {
                        &before[r.start..r.end()]
                    } else {
                        let shift = write.end();
                        &after[r.start - shift..r.end() - shift]
                    };
                }
                output = Some(out);
            } else {
                let data: &[u8] = data;
                for (slot, r) in inputs.iter_mut().zip(reads.iter()) {
                    if r.bank == id && !r.is_empty() {
                        *slot = &data[r.start..r.end()];
                    }
                }
            }
        }

        let output = output.ok_or(Status::MemBankMismatch)?;
        Ok((inputs, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_checks_bank_and_bounds() {
        let mut a = vec![0u8; 32];
        let mut mem = MemoryMap::new();
        let id = mem.add_bank(0x100, &mut a);

        assert!(mem.resolve(BufferDesc::new(id, 0, 32), 1).is_ok());
        assert_eq!(
            mem.resolve(BufferDesc::new(id, 16, 17), 1),
            Err(Status::MemBankMismatch)
        );
        assert_eq!(
            mem.resolve(BufferDesc::new(BankId(3), 0, 4), 1),
            Err(Status::MemBankMismatch)
        );
    }

    #[test]
    fn test_resolve_checks_alignment_against_base() {
        let mut a = vec![0u8; 32];
        let mut mem = MemoryMap::new();
        let id = mem.add_bank(0x102, &mut a);

        // 0x102 + 2 is 4-byte aligned, 0x102 + 0 is not.
        assert!(mem.resolve(BufferDesc::new(id, 2, 8), 4).is_ok());
        assert_eq!(
            mem.resolve(BufferDesc::new(id, 0, 8), 4),
            Err(Status::Misalignment)
        );
        assert_eq!(
            mem.resolve(BufferDesc::new(id, 2, 6), 4),
            Err(Status::Misalignment)
        );
    }

    #[test]
    fn test_split_io_same_bank() {
        let mut a: Vec<u8> = (0..16).collect();
        let mut mem = MemoryMap::new();
        let id = mem.add_bank(0, &mut a);
        let r0 = mem.resolve(BufferDesc::new(id, 0, 4), 1).unwrap();
        let r1 = mem.resolve(BufferDesc::new(id, 12, 4), 1).unwrap();
        let w = mem.resolve(BufferDesc::new(id, 4, 8), 1).unwrap();

        let ([x, y], out) = mem.split_io([r0, r1], w).unwrap();
        assert_eq!(x, &[0, 1, 2, 3]);
        assert_eq!(y, &[12, 13, 14, 15]);
        out.copy_from_slice(&[9; 8]);
        assert_eq!(&a[4..12], &[9; 8]);
    }

    #[test]
    fn test_split_io_across_banks() {
        let mut a = vec![1u8; 4];
        let mut b = vec![2u8; 4];
        let mut mem = MemoryMap::new();
        let ia = mem.add_bank(0, &mut a);
        let ib = mem.add_bank(0x1000, &mut b);
        let r = mem.resolve(BufferDesc::new(ia, 0, 4), 1).unwrap();
        let w = mem.resolve(BufferDesc::new(ib, 0, 4), 1).unwrap();
        let ([x], out) = mem.split_io([r], w).unwrap();
        out[0] = x[0] + 10;
        assert_eq!(b[0], 11);
    }

    #[test]
    fn test_empty_buffer_needs_no_bank() {
        let mem = MemoryMap::new();
        let r = mem.resolve(BufferDesc::EMPTY, 4).unwrap();
        assert_eq!(r, BufferRef::EMPTY);
        assert!(r.is_empty());
    }

    #[test]
    fn test_split_io_rejects_overlap() {
        let mut a = vec![0u8; 16];
        let mut mem = MemoryMap::new();
        let id = mem.add_bank(0, &mut a);
        let r = mem.resolve(BufferDesc::new(id, 0, 8), 1).unwrap();
        let w = mem.resolve(BufferDesc::new(id, 4, 8), 1).unwrap();
        assert_eq!(mem.split_io([r], w).err(), Some(Status::MemBankMismatch));
    }
}
