//! Every compute backend produces the same bits as the reference loops.

mod common;

use common::{rng, Arena};
use qtile_kernel::{
    conv2d, matmul, reduce_max, sum_pool2d, ComputeBackend, FixedPointDsp, OutputStage, Reference,
    WideVectorDsp,
};
use qtile_quant::{AffineQuant, AffineRequant, ClampRange};
use qtile_rt::{ElementKind, Padding, TensorDesc, Window};
use qtile_view::{TensorView, TensorViewMut};

fn view<'a>(arena: &'a Arena, desc: &TensorDesc) -> TensorView<'a> {
    TensorView::new(arena.raw(desc), desc).unwrap()
}

/// Run `kernel` into a fresh output buffer shaped like `out`.
fn with_output<F>(out: &TensorDesc, kernel: F) -> Vec<u8>
where
    F: FnOnce(&mut TensorViewMut<'_>),
{
    let mut local = *out;
    local.buffer.offset = 0;
    let mut bytes = vec![0u8; out.buffer.len as usize];
    let mut output = TensorViewMut::new(&mut bytes, &local).unwrap();
    kernel(&mut output);
    bytes
}

struct ConvData {
    arena: Arena,
    input: TensorDesc,
    weights: TensorDesc,
    bias: TensorDesc,
    output: TensorDesc,
}

fn conv_data() -> ConvData {
    let mut arena = Arena::new();
    let mut r = rng(41);
    // long enough channel runs to exercise every lane of the vector backend
    let input = arena.random_tensor::<i8>(ElementKind::Sa8, &[1, 6, 6, 37], -128, 127, &mut r);
    let weights = arena.random_tensor::<i8>(ElementKind::Sa8, &[3, 3, 37, 5], -128, 127, &mut r);
    let bias = arena.random_tensor::<i32>(ElementKind::Sa32, &[5], -10_000, 10_000, &mut r);
    let output = arena.tensor(ElementKind::Sa8, &[1, 6, 6, 5]);
    ConvData {
        arena,
        input,
        weights,
        bias,
        output,
    }
}

fn run_conv<B: ComputeBackend>(d: &ConvData) -> Vec<u8> {
    let window = Window {
        kernel: [3, 3],
        stride: [1, 1],
        dilation: [1, 1],
        padding: Padding::uniform(1),
    };
    let params = AffineRequant::derive::<i8, i8, i8>(
        &AffineQuant::per_tensor(-7, 18000, 14),
        &AffineQuant::per_tensor(3, 16384, 15),
        &AffineQuant::per_tensor(2, 30000, 8),
    )
    .unwrap();
    let stage = OutputStage::Affine {
        params,
        clamp: ClampRange::new(-100, 120),
    };
    let input = view(&d.arena, &d.input);
    let weights = view(&d.arena, &d.weights);
    let bias = view(&d.arena, &d.bias);
    with_output(&d.output, |out| {
        conv2d::<B, i8, i8>(&input, &weights, Some(&bias), out, &window, &stage)
    })
}

#[test]
fn test_conv2d_backends_agree() {
    let data = conv_data();
    let reference = run_conv::<Reference>(&data);
    assert_eq!(run_conv::<FixedPointDsp>(&data), reference);
    assert_eq!(run_conv::<WideVectorDsp>(&data), reference);
    assert!(reference.iter().any(|&b| b != reference[0]));
}

#[test]
fn test_matmul_backends_agree() {
    let mut arena = Arena::new();
    let mut r = rng(43);
    let left = arena.random_tensor::<i8>(ElementKind::Sa8, &[4, 50], -128, 127, &mut r);
    let right = arena.random_tensor::<i8>(ElementKind::Sa8, &[50, 3], -128, 127, &mut r);
    let output = arena.tensor(ElementKind::Sa32, &[4, 3]);
    let run = |f: fn(&TensorView<'_>, &TensorView<'_>, &mut TensorViewMut<'_>, i32, i32)| {
        let (l, rt) = (view(&arena, &left), view(&arena, &right));
        with_output(&output, |out| f(&l, &rt, out, 17, -9))
    };
    let reference = run(matmul::<Reference, i8, i32>);
    assert_eq!(run(matmul::<FixedPointDsp, i8, i32>), reference);
    assert_eq!(run(matmul::<WideVectorDsp, i8, i32>), reference);
}

#[test]
fn test_pool_and_reduce_backends_agree() {
    let mut arena = Arena::new();
    let mut r = rng(47);
    let input = arena.random_tensor::<i16>(ElementKind::Fx16, &[1, 8, 8, 20], -32768, 32767, &mut r);
    let pooled = arena.tensor(ElementKind::Sa32, &[1, 4, 4, 20]);
    let reduced = arena.tensor(ElementKind::Fx16, &[1, 8, 8, 1]);
    let window = Window {
        kernel: [3, 3],
        stride: [2, 2],
        dilation: [1, 1],
        padding: Padding {
            begin: [1, 1],
            end: [0, 0],
        },
    };
    let x = view(&arena, &input);

    let pool = |f: fn(&TensorView<'_>, &mut TensorViewMut<'_>, &Window)| {
        with_output(&pooled, |out| f(&x, out, &window))
    };
    let reference = pool(sum_pool2d::<Reference, i16, i32>);
    assert_eq!(pool(sum_pool2d::<FixedPointDsp, i16, i32>), reference);
    assert_eq!(pool(sum_pool2d::<WideVectorDsp, i16, i32>), reference);

    let reduce = |f: fn(&TensorView<'_>, &mut TensorViewMut<'_>, usize)| {
        with_output(&reduced, |out| f(&x, out, 3))
    };
    let reference = reduce(reduce_max::<Reference, i16>);
    assert_eq!(reduce(reduce_max::<FixedPointDsp, i16>), reference);
    assert_eq!(reduce(reduce_max::<WideVectorDsp, i16>), reference);
}
