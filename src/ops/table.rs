use qtile_kernel::map;
use qtile_view::{ElementKind, MemoryMap, Status};

use super::transform::elementwise_rules;
use super::{check_shape, resolve, tile_view, tile_view_mut, unsupported};
use crate::error::{ConfigError, Result};
use crate::lut::{Lut, LutRegistry};
use crate::operator::{Operator, TileSchedule};
use crate::record::{DecodeError, KernelId, OpRecord, TableRecord};

/// fx16 activation through a lookup table borrowed from a [`LutRegistry`].
///
/// Results carry the table's output fractional bits.
#[derive(Debug, Clone)]
pub struct TableLookup<'l> {
    record: TableRecord,
    lut: &'l Lut,
    schedule: TileSchedule,
}

impl<'l> TableLookup<'l> {
    /// Decode `record` and bind the table it names from `luts`.
    pub fn new(record: &[u8], luts: &'l LutRegistry) -> Result<Self> {
        match OpRecord::decode_as(record, KernelId::TableBuiltin)? {
            OpRecord::TableBuiltin(r) => Self::from_record(&r, luts),
            other => Err(DecodeError::KernelMismatch {
                expected: KernelId::TableBuiltin,
                found: other.kernel_id(),
            }
            .into()),
        }
    }

    pub fn from_record(r: &TableRecord, luts: &'l LutRegistry) -> Result<Self> {
        r.input.validate()?;
        r.output.validate()?;
        let dims = r.input.dims();
        check_shape("output", &r.output, dims)?;
        let lut = luts
            .get(r.table)
            .ok_or(ConfigError::UnknownLut(r.table.raw()))?;
        let schedule = TileSchedule::new(dims, &r.tiling)?.with_input(dims, elementwise_rules())?;
        tracing::debug!(
            table = r.table.raw(),
            samples = lut.samples().len(),
            dims = ?dims,
            tiles = schedule.tile_count(),
            "table lookup constructed"
        );
        Ok(Self {
            record: *r,
            lut,
            schedule,
        })
    }

    pub fn lut(&self) -> &'l Lut {
        self.lut
    }
}

impl Operator for TableLookup<'_> {
    fn kernel_id(&self) -> KernelId {
        KernelId::TableBuiltin
    }

    fn schedule(&self) -> &TileSchedule {
        &self.schedule
    }

    fn schedule_mut(&mut self) -> &mut TileSchedule {
        &mut self.schedule
    }

    fn issue(&mut self, mem: &mut MemoryMap<'_>) -> std::result::Result<(), Status> {
        let r = &self.record;
        let kinds = [r.input.kind, r.output.kind];
        if kinds != [ElementKind::Fx16, ElementKind::Fx16] {
            return Err(unsupported("table lookup", &kinds));
        }
        self.schedule.begin_issue();

        let reads = [resolve(mem, &r.input)?];
        let write = resolve(mem, &r.output)?;
        let ([input], out) = mem.split_io(reads, write)?;

        let out_tile = self.schedule.output_tile();
        let input = tile_view(input, &r.input, &self.schedule.input_tile(0))?;
        let mut output = tile_view_mut(out, &r.output, &out_tile)?;
        tracing::trace!(
            tile = self.schedule.tile_index(),
            offset = ?out_tile.offset,
            size = ?out_tile.size,
            "table lookup issue"
        );
        let (lut, in_frac_bits) = (self.lut, r.in_frac_bits);
        map::<i16, _>(&input, &mut output, |x| lut.lookup_fx16(x, in_frac_bits));
        self.schedule.mark_issued();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TilingRecord;
    use crate::lut::LutId;
    use qtile_view::{BankId, BufferDesc, TensorDesc};

    fn tensor(kind: ElementKind, dims: [usize; 4], offset: u32) -> TensorDesc {
        let len = dims.iter().product::<usize>() * kind.size();
        TensorDesc::row_major(kind, &dims, BufferDesc::new(BankId(0), offset, len as u32)).unwrap()
    }

    fn record(table: LutId) -> TableRecord {
        TableRecord {
            input: tensor(ElementKind::Fx16, [1, 1, 4, 1], 0),
            output: tensor(ElementKind::Fx16, [1, 1, 4, 1], 8),
            table,
            in_frac_bits: 1,
            tiling: TilingRecord::DISABLED,
        }
    }

    #[test]
    fn test_missing_table_fails_construction() {
        let luts = LutRegistry::new();
        let err = TableLookup::from_record(&record(LutId::from_raw(4)), &luts).unwrap_err();
        assert_eq!(err, ConfigError::UnknownLut(4));
    }

    #[test]
    fn test_binds_loaded_table() {
        let mut luts = LutRegistry::new();
        let id = luts.load(Lut::new(vec![0, 100, 200], 0, 0, 7).unwrap());
        let op = TableLookup::from_record(&record(id), &luts).unwrap();
        assert_eq!(op.lut().out_frac_bits(), 7);
        assert_eq!(op.tile_count(), 1);
    }
}
