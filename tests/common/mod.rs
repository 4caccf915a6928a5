#![allow(dead_code)]

use qtile_rt::{
    run_tiles, BankId, BufferDesc, ElementKind, MemoryMap, Operator, Status, TensorDesc,
};
use qtile_view::Element;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

/// Route operator logs to the test harness; `RUST_LOG` overrides the level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// One memory bank carved into 4-byte aligned buffers.
#[derive(Debug, Default)]
pub struct Arena {
    pub bytes: Vec<u8>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    fn reserve(&mut self, len: usize) -> BufferDesc {
        let offset = (self.bytes.len() + 3) & !3;
        self.bytes.resize(offset + len, 0);
        BufferDesc::new(BankId(0), offset as u32, len as u32)
    }

    /// Zero-filled row-major tensor.
    pub fn tensor(&mut self, kind: ElementKind, shape: &[usize]) -> TensorDesc {
        let len = shape.iter().product::<usize>() * kind.size();
        let buffer = self.reserve(len);
        TensorDesc::row_major(kind, shape, buffer).unwrap()
    }

    /// Row-major tensor holding `values`.
    pub fn tensor_with<T: Element>(
        &mut self,
        kind: ElementKind,
        shape: &[usize],
        values: &[T],
    ) -> TensorDesc {
        assert_eq!(kind.size(), T::SIZE);
        assert_eq!(values.len(), shape.iter().product::<usize>());
        let desc = self.tensor(kind, shape);
        self.fill(desc.buffer, values);
        desc
    }

    /// Row-major tensor of random values in `lo..=hi`.
    pub fn random_tensor<T: Element>(
        &mut self,
        kind: ElementKind,
        shape: &[usize],
        lo: i32,
        hi: i32,
        rng: &mut StdRng,
    ) -> TensorDesc {
        let n = shape.iter().product::<usize>();
        let values: Vec<T> = (0..n)
            .map(|_| T::saturate(rng.gen_range(lo..=hi) as i64))
            .collect();
        self.tensor_with(kind, shape, &values)
    }

    /// Parameter buffer holding `values`.
    pub fn buffer<T: Element>(&mut self, values: &[T]) -> BufferDesc {
        let buffer = self.reserve(values.len() * T::SIZE);
        self.fill(buffer, values);
        buffer
    }

    fn fill<T: Element>(&mut self, buffer: BufferDesc, values: &[T]) {
        let start = buffer.offset as usize;
        for (i, v) in values.iter().enumerate() {
            let at = start + i * T::SIZE;
            self.bytes[at..at + T::SIZE].copy_from_slice(bytemuck::bytes_of(v));
        }
    }

    /// Contents of a dense tensor in row-major order.
    pub fn read<T: Element>(&self, desc: &TensorDesc) -> Vec<T> {
        let start = desc.buffer.offset as usize;
        (0..desc.num_elements())
            .map(|i| {
                let at = start + i * T::SIZE;
                bytemuck::pod_read_unaligned(&self.bytes[at..at + T::SIZE])
            })
            .collect()
    }

    /// Bytes of a tensor's buffer.
    pub fn raw(&self, desc: &TensorDesc) -> &[u8] {
        let start = desc.buffer.offset as usize;
        &self.bytes[start..start + desc.buffer.len as usize]
    }

    /// Overwrite a tensor with a sentinel so stale results cannot pass.
    pub fn poison(&mut self, desc: &TensorDesc) {
        let start = desc.buffer.offset as usize;
        let end = start + desc.buffer.len as usize;
        self.bytes[start..end].fill(0x5a);
    }

    /// Drive every tile of `op` over this arena.
    pub fn run(&mut self, op: &mut dyn Operator) -> Result<usize, Status> {
        let mut mem = MemoryMap::new();
        mem.add_bank(0, &mut self.bytes);
        run_tiles(op, &mut mem)
    }

    /// Issue the current tile only.
    pub fn issue(&mut self, op: &mut dyn Operator) -> Result<(), Status> {
        let mut mem = MemoryMap::new();
        mem.add_bank(0, &mut self.bytes);
        op.issue(&mut mem)
    }
}
