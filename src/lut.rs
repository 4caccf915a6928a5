//! Read-only activation lookup tables and the registry that owns them.
//!
//! Tables are loaded together with a model and lent to whatever needs them
//! by shared reference. Dropping the registry (or calling
//! [`LutRegistry::clear`]) releases every table.

use std::collections::HashMap;

use qtile_quant::{asl_sat, asr, asr_rnd};
use qtile_view::Element;

use crate::error::{ConfigError, Result};

/// Largest shift applied to an fx16 lookup argument in one step.
const MAX_FX16_SHIFT: i32 = 15;

/// Handle of a table inside a [`LutRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LutId(u32);

impl LutId {
    /// Handle as encoded in configuration records.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Sampled approximation of a nonlinear function in fixed point.
///
/// Sample `i` holds the function value at `(i - offset) * 2^-frac_bits`,
/// in `out_frac_bits` fractional bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lut {
    samples: Vec<i16>,
    offset: i32,
    frac_bits: i8,
    out_frac_bits: i8,
}

impl Lut {
    pub fn new(samples: Vec<i16>, offset: i32, frac_bits: i8, out_frac_bits: i8) -> Result<Self> {
        if samples.len() < 2 {
            return Err(ConfigError::LutTooShort(samples.len()));
        }
        Ok(Self {
            samples,
            offset,
            frac_bits,
            out_frac_bits,
        })
    }

    #[inline]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    #[inline]
    pub fn offset(&self) -> i32 {
        self.offset
    }

    /// Fractional bits of the table's input grid.
    #[inline]
    pub fn frac_bits(&self) -> i8 {
        self.frac_bits
    }

    /// Fractional bits of the stored samples.
    #[inline]
    pub fn out_frac_bits(&self) -> i8 {
        self.out_frac_bits
    }

    /// Look up an fx16 value with `in_frac_bits` fractional bits.
    ///
    /// When the input is finer than the table grid the two neighbouring
    /// samples are linearly interpolated; otherwise the nearest lower sample
    /// is returned. The sample index saturates at both ends of the table.
    pub fn lookup_fx16(&self, x: i16, in_frac_bits: i8) -> i16 {
        let last = self.samples.len() as i64 - 1;
        let offset = self.offset as i64;
        let shift = in_frac_bits as i32 - self.frac_bits as i32;
        if shift > 0 {
            let preshift = (shift - MAX_FX16_SHIFT).max(0) as u32;
            let shift = shift.min(MAX_FX16_SHIFT);
            let x = asr(x as i64, preshift);
            let idx = (x >> shift).saturating_add(offset).clamp(0, last - 1) as usize;
            let frac = x & ((1 << shift) - 1);
            let lo = self.samples[idx] as i64;
            let hi = self.samples[idx + 1] as i64;
            let step = asr_rnd((lo - hi) * frac, shift);
            i16::saturate(lo - step)
        } else {
            let scaled = asl_sat(x as i64, shift.unsigned_abs());
            let idx = scaled.saturating_add(offset).clamp(0, last) as usize;
            self.samples[idx]
        }
    }
}

/// Owner of the lookup tables of a loaded model.
#[derive(Debug, Default)]
pub struct LutRegistry {
    tables: HashMap<LutId, Lut>,
    next: u32,
}

impl LutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a table and return its handle.
    pub fn load(&mut self, lut: Lut) -> LutId {
        let id = LutId(self.next);
        self.next += 1;
        tracing::debug!(id = id.0, samples = lut.samples.len(), "lut loaded");
        self.tables.insert(id, lut);
        id
    }

    pub fn get(&self, id: LutId) -> Option<&Lut> {
        self.tables.get(&id)
    }

    /// Remove a table, handing it back to the caller.
    pub fn unload(&mut self, id: LutId) -> Option<Lut> {
        self.tables.remove(&id)
    }

    /// Drop every table. Handles issued before stay invalid afterwards.
    pub fn clear(&mut self) {
        tracing::debug!(tables = self.tables.len(), "lut registry cleared");
        self.tables.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
