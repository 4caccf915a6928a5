//! Record decoding failures and issue-time statuses.

mod common;

use common::{init_tracing, Arena};
use qtile_rt::{
    build, status_code, ClipRecord, ConfigError, DecodeError, ElementKind, KernelId, MatMul,
    MatMulRecord, MaxPool2d, OpRecord, Padding, Permute, PermuteRecord, PoolRecord, QuantRecord,
    ReduceRecord, ReduceSum, RescaleRecord, Status, TilingRecord, Window, HEADER_SIZE,
};

fn pool_record(arena: &mut Arena, in_kind: ElementKind, out_kind: ElementKind) -> OpRecord {
    let input = arena.tensor(in_kind, &[1, 4, 4, 1]);
    let output = arena.tensor(out_kind, &[1, 2, 2, 1]);
    OpRecord::MaxPool2d(PoolRecord {
        input,
        output,
        window: Window {
            kernel: [2, 2],
            stride: [2, 2],
            dilation: [1, 1],
            padding: Padding::default(),
        },
        tiling: TilingRecord::DISABLED,
    })
}

#[test]
fn test_every_record_round_trips_through_build() {
    let mut arena = Arena::new();
    let t = |a: &mut Arena, k, s: &[usize]| a.tensor(k, s);
    let records = [
        pool_record(&mut arena, ElementKind::Sa8, ElementKind::Sa8),
        OpRecord::Permute(PermuteRecord {
            input: t(&mut arena, ElementKind::Sa8, &[2, 3]),
            output: t(&mut arena, ElementKind::Sa8, &[3, 2]),
            perm: [1, 0, 2, 3],
            tiling: TilingRecord::DISABLED,
        }),
        OpRecord::ReduceSum(ReduceRecord {
            input: t(&mut arena, ElementKind::Sa8, &[2, 3]),
            output: t(&mut arena, ElementKind::Sa32, &[2, 1]),
            axis: 1,
            tiling: TilingRecord::DISABLED,
        }),
        OpRecord::Clip(ClipRecord {
            input: t(&mut arena, ElementKind::Sa8, &[4]),
            output: t(&mut arena, ElementKind::Sa8, &[4]),
            params: arena.buffer::<i8>(&[-3, 3]),
            tiling: TilingRecord::DISABLED,
        }),
    ];
    for record in records {
        let bytes = record.encode();
        assert_eq!(bytes.len(), record.kernel_id().record_size().unwrap());
        assert_eq!(OpRecord::decode(&bytes).unwrap(), record);
        let op = build(&bytes).unwrap();
        assert_eq!(op.kernel_id(), record.kernel_id());
    }
}

#[test]
fn test_declared_size_must_match_bytes() {
    let mut arena = Arena::new();
    let mut bytes = pool_record(&mut arena, ElementKind::Sa8, ElementKind::Sa8).encode();
    bytes.push(0);
    assert!(matches!(
        build(&bytes),
        Err(ConfigError::Decode(DecodeError::SizeMismatch { .. }))
    ));
}

#[test]
fn test_declared_size_must_match_kernel() {
    let mut arena = Arena::new();
    let mut bytes = pool_record(&mut arena, ElementKind::Sa8, ElementKind::Sa8).encode();
    bytes.extend_from_slice(&[0; 4]);
    let size = bytes.len() as u32;
    bytes[4..8].copy_from_slice(&size.to_le_bytes());
    assert!(matches!(
        build(&bytes),
        Err(ConfigError::Decode(DecodeError::UnexpectedSize {
            kernel: KernelId::MaxPool2d,
            ..
        }))
    ));
}

#[test]
fn test_short_record_is_truncated() {
    assert!(matches!(
        OpRecord::decode(&[2, 0, 0]),
        Err(DecodeError::Truncated { .. })
    ));
    let header_only = [2u8, 0, 0, 0, HEADER_SIZE as u8, 0, 0, 0];
    assert!(OpRecord::decode(&header_only).is_err());
}

#[test]
fn test_unknown_tag_is_rejected() {
    let mut bytes = [0u8; HEADER_SIZE];
    bytes[0] = 99;
    bytes[4] = HEADER_SIZE as u8;
    assert_eq!(OpRecord::decode(&bytes), Err(DecodeError::UnknownKernel(99)));
}

#[test]
fn test_operator_rejects_foreign_record() {
    let mut arena = Arena::new();
    let bytes = pool_record(&mut arena, ElementKind::Sa8, ElementKind::Sa8).encode();
    assert!(matches!(
        Permute::new(&bytes),
        Err(ConfigError::Decode(DecodeError::KernelMismatch {
            expected: KernelId::Permute,
            found: KernelId::MaxPool2d,
        }))
    ));
}

#[test]
fn test_geometry_mismatch_fails_construction() {
    let mut arena = Arena::new();
    let record = OpRecord::MatMul(MatMulRecord {
        left: arena.tensor(ElementKind::Sa8, &[2, 3]),
        right: arena.tensor(ElementKind::Sa8, &[4, 2]),
        output: arena.tensor(ElementKind::Sa32, &[2, 2]),
        params: arena.buffer::<i8>(&[0, 0]),
        tiling: TilingRecord::DISABLED,
    });
    assert!(matches!(
        MatMul::new(&record.encode()),
        Err(ConfigError::Geometry { tensor: "right", .. })
    ));
}

#[test]
fn test_rescale_axis_beyond_rank() {
    let mut arena = Arena::new();
    let record = OpRecord::Rescale(RescaleRecord {
        input: arena.tensor(ElementKind::Sa32, &[2, 2]),
        output: arena.tensor(ElementKind::Sa8, &[2, 2]),
        axis: 2,
        in_bias: arena.buffer::<i32>(&[0]),
        scale: arena.buffer::<i16>(&[1]),
        shift: arena.buffer::<i8>(&[0]),
        out_bias: arena.buffer::<i8>(&[0]),
        tiling: TilingRecord::DISABLED,
    });
    assert_eq!(
        OpRecord::decode(&record.encode()),
        Err(DecodeError::InvalidAxis(2))
    );
}

#[test]
fn test_affine_conv_rejects_bad_output_zero_point() {
    use qtile_rt::{ClampRange, ConvRecord};
    let mut arena = Arena::new();
    let record = OpRecord::Conv2d(ConvRecord {
        input: arena.tensor(ElementKind::Sa8, &[1, 3, 3, 1]),
        weights: arena.tensor(ElementKind::Sa8, &[3, 3, 1, 1]),
        bias: None,
        output: arena.tensor(ElementKind::Sa8, &[1, 1, 1, 1]),
        input_quant: QuantRecord::affine(0, 100, 0),
        weights_quant: QuantRecord::default(),
        bias_quant: QuantRecord::default(),
        output_quant: QuantRecord::affine(300, 100, 0),
        window: Window {
            kernel: [3, 3],
            stride: [1, 1],
            dilation: [1, 1],
            padding: Padding::default(),
        },
        clamp: ClampRange::FULL,
        tiling: TilingRecord::DISABLED,
    });
    assert!(matches!(build(&record.encode()), Err(ConfigError::Quant(_))));
}

#[test]
fn test_affine_conv_rejects_weights_zero_point_outside_sa8() {
    use qtile_quant::QuantError;
    use qtile_rt::{ClampRange, ConvRecord};
    let mut arena = Arena::new();
    let conv = |weights_zp: i16, arena: &mut Arena| {
        OpRecord::Conv2d(ConvRecord {
            input: arena.tensor(ElementKind::Sa8, &[1, 3, 3, 1]),
            weights: arena.tensor(ElementKind::Sa8, &[3, 3, 1, 1]),
            bias: None,
            output: arena.tensor(ElementKind::Sa8, &[1, 1, 1, 1]),
            input_quant: QuantRecord::affine(0, 100, 0),
            weights_quant: QuantRecord::affine(weights_zp, 16384, 14),
            bias_quant: QuantRecord::default(),
            output_quant: QuantRecord::affine(0, 100, 0),
            window: Window {
                kernel: [3, 3],
                stride: [1, 1],
                dilation: [1, 1],
                padding: Padding::default(),
            },
            clamp: ClampRange::FULL,
            tiling: TilingRecord::DISABLED,
        })
        .encode()
    };
    assert_eq!(
        build(&conv(128, &mut arena)).err(),
        Some(ConfigError::Quant(QuantError::ZeroPointOutOfRange {
            name: "weights",
            value: 128
        }))
    );
    assert!(build(&conv(-128, &mut arena)).is_ok());
}

#[test]
fn test_unsupported_kinds_report_not_supported() {
    init_tracing();
    let mut arena = Arena::new();
    let record = pool_record(&mut arena, ElementKind::Sa32, ElementKind::Sa32);
    let mut pool = MaxPool2d::new(&record.encode()).unwrap();
    let status = arena.issue(&mut pool);
    assert_eq!(status, Err(Status::NotSupported));
    assert_eq!(status_code(&status), 1);

    let record = OpRecord::ReduceSum(ReduceRecord {
        input: arena.tensor(ElementKind::Fx16, &[2, 3]),
        output: arena.tensor(ElementKind::Sa32, &[2, 1]),
        axis: 1,
        tiling: TilingRecord::DISABLED,
    });
    let mut reduce = ReduceSum::new(&record.encode()).unwrap();
    assert_eq!(arena.issue(&mut reduce), Err(Status::NotSupported));
}

#[test]
fn test_kind_mismatch_reports_type_mismatch() {
    let mut arena = Arena::new();
    let record = pool_record(&mut arena, ElementKind::Sa8, ElementKind::Fx8);
    let mut pool = MaxPool2d::new(&record.encode()).unwrap();
    let status = arena.issue(&mut pool);
    assert_eq!(status, Err(Status::TypeMismatch));
    assert_eq!(status_code(&status), 2);
}

#[test]
fn test_buffer_outside_bank_reports_mismatch() {
    let mut arena = Arena::new();
    let record = pool_record(&mut arena, ElementKind::Sa8, ElementKind::Sa8);
    let mut pool = MaxPool2d::new(&record.encode()).unwrap();
    // the bank is shorter than the buffers the record names
    arena.bytes.truncate(4);
    assert_eq!(arena.issue(&mut pool), Err(Status::MemBankMismatch));
}

#[test]
fn test_misaligned_buffer_reports_misalignment() {
    let mut arena = Arena::new();
    let mut record = OpRecord::Clip(ClipRecord {
        input: arena.tensor(ElementKind::Sa32, &[2]),
        output: arena.tensor(ElementKind::Sa32, &[2]),
        params: arena.buffer::<i32>(&[0, 1]),
        tiling: TilingRecord::DISABLED,
    });
    if let OpRecord::Clip(c) = &mut record {
        c.input.buffer.offset += 2;
    }
    arena.bytes.extend_from_slice(&[0; 8]);
    let mut op = build(&record.encode()).unwrap();
    assert_eq!(arena.issue(op.as_mut()), Err(Status::Misalignment));
}
