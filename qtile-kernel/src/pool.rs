//! Max and sum pooling over HWC tiles.

use qtile_iter::Window;
use num_traits::Zero;
use qtile_quant::MacElement;
use qtile_view::{Element, TensorView, TensorViewMut, CHANNEL_DIM, HEIGHT_DIM, WIDTH_DIM};

use crate::backend::ComputeBackend;
use crate::util::Taps;

fn window_taps(window: &Window, oy: usize, ox: usize, in_h: usize, in_w: usize) -> (Taps, Taps) {
    let ty = Taps::new(
        oy,
        window.stride[0],
        window.dilation[0],
        window.padding.begin[0],
        window.kernel[0],
        in_h,
    );
    let tx = Taps::new(
        ox,
        window.stride[1],
        window.dilation[1],
        window.padding.begin[1],
        window.kernel[1],
        in_w,
    );
    (ty, tx)
}

/// Maximum over each window. Padded positions never win; a window that
/// lies entirely in padding yields the element type's minimum.
pub fn max_pool2d<B: ComputeBackend, T: Element>(
    input: &TensorView<'_>,
    output: &mut TensorViewMut<'_>,
    window: &Window,
) {
    let [batch, out_h, out_w, channels] = output.dims();
    let (in_h, in_w) = (input.dim(HEIGHT_DIM), input.dim(WIDTH_DIM));
    assert_eq!(input.dim(CHANNEL_DIM), channels, "pooling keeps channels");
    let (dil_h, dil_w) = (window.dilation[0].max(1), window.dilation[1].max(1));

    for n in 0..batch {
        for oy in 0..out_h {
            for ox in 0..out_w {
                let (ty, tx) = window_taps(window, oy, ox, in_h, in_w);
                for c in 0..channels {
                    let mut m = T::min_value();
                    for i in 0..ty.count {
                        let row = input.run_step::<T>(
                            [n, ty.input + i * dil_h, tx.input, c],
                            WIDTH_DIM,
                            dil_w,
                            tx.count,
                        );
                        m = B::reduce_max(m, row);
                    }
                    output.set::<T>([n, oy, ox, c], m);
                }
            }
        }
    }
}

/// Raw sum of the stored values in each window (padding contributes nothing).
pub fn sum_pool2d<B: ComputeBackend, T: MacElement, O: Element>(
    input: &TensorView<'_>,
    output: &mut TensorViewMut<'_>,
    window: &Window,
) {
    let [batch, out_h, out_w, channels] = output.dims();
    let (in_h, in_w) = (input.dim(HEIGHT_DIM), input.dim(WIDTH_DIM));
    assert_eq!(input.dim(CHANNEL_DIM), channels, "pooling keeps channels");
    let (dil_h, dil_w) = (window.dilation[0].max(1), window.dilation[1].max(1));

    for n in 0..batch {
        for oy in 0..out_h {
            for ox in 0..out_w {
                let (ty, tx) = window_taps(window, oy, ox, in_h, in_w);
                for c in 0..channels {
                    let mut acc = T::Acc::zero();
                    for i in 0..ty.count {
                        let row = input.run_step::<T>(
                            [n, ty.input + i * dil_h, tx.input, c],
                            WIDTH_DIM,
                            dil_w,
                            tx.count,
                        );
                        acc = B::sum(acc, row);
                    }
                    output.set::<O>([n, oy, ox, c], O::saturate(acc.into()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Reference, WideVectorDsp};
    use qtile_iter::Padding;
    use qtile_view::{BankId, BufferDesc, ElementKind, TensorDesc};

    fn desc(kind: ElementKind, shape: &[usize]) -> TensorDesc {
        let len = shape.iter().product::<usize>() * kind.size();
        TensorDesc::row_major(kind, shape, BufferDesc::new(BankId(0), 0, len as u32)).unwrap()
    }

    fn pool_window(k: usize, stride: usize, pad: usize) -> Window {
        Window {
            kernel: [k, k],
            stride: [stride, stride],
            dilation: [1, 1],
            padding: Padding::uniform(pad),
        }
    }

    #[test]
    fn test_max_pool_padding_never_wins() {
        let vals: Vec<i8> = vec![-100, -50, -70, -90];
        let bytes: Vec<u8> = vals.iter().map(|&v| v as u8).collect();
        let in_d = desc(ElementKind::Sa8, &[1, 2, 2, 1]);
        let out_d = desc(ElementKind::Sa8, &[1, 2, 2, 1]);
        let mut out_b = vec![0u8; 4];
        let input = TensorView::new(&bytes, &in_d).unwrap();
        let mut output = TensorViewMut::new(&mut out_b, &out_d).unwrap();
        // 2x2 window, stride 1, pad 1 at begin only.
        let w = Window {
            padding: Padding {
                begin: [1, 1],
                end: [0, 0],
            },
            ..pool_window(2, 1, 0)
        };
        max_pool2d::<Reference, i8>(&input, &mut output, &w);
        let got: Vec<i8> = out_b.iter().map(|&b| b as i8).collect();
        assert_eq!(got, vec![-100, -50, -70, -50]);
    }

    #[test]
    fn test_max_pool_i16_strided() {
        let vals: Vec<i16> = (0..16).map(|i| (i * 37 % 17) as i16 * 100 - 800).collect();
        let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_le_bytes()).collect();
        let in_d = desc(ElementKind::Fx16, &[1, 4, 4, 1]);
        let out_d = desc(ElementKind::Fx16, &[1, 2, 2, 1]);
        let mut out_b = vec![0u8; 8];
        let input = TensorView::new(&bytes, &in_d).unwrap();
        let mut output = TensorViewMut::new(&mut out_b, &out_d).unwrap();
        max_pool2d::<WideVectorDsp, i16>(&input, &mut output, &pool_window(2, 2, 0));
        for oy in 0..2 {
            for ox in 0..2 {
                let expected = (0..2)
                    .flat_map(|dy| (0..2).map(move |dx| (dy, dx)))
                    .map(|(dy, dx)| vals[(oy * 2 + dy) * 4 + ox * 2 + dx])
                    .max()
                    .unwrap();
                assert_eq!(output.at::<i16>([0, oy, ox, 0]), expected);
            }
        }
    }

    #[test]
    fn test_sum_pool_counts_valid_taps() {
        let bytes = vec![1u8; 9];
        let in_d = desc(ElementKind::Sa8, &[1, 3, 3, 1]);
        let out_d = desc(ElementKind::Sa32, &[1, 3, 3, 1]);
        let mut out_b = vec![0u8; 36];
        let input = TensorView::new(&bytes, &in_d).unwrap();
        let mut output = TensorViewMut::new(&mut out_b, &out_d).unwrap();
        sum_pool2d::<Reference, i8, i32>(&input, &mut output, &pool_window(3, 1, 1));
        let got: Vec<i32> = (0..9).map(|i| output.read::<i32>(i)).collect();
        assert_eq!(got, vec![4, 6, 4, 6, 9, 6, 4, 6, 4]);
    }
}
