//! Reductions along one axis; the reduced axis is kept with extent 1.

use num_traits::Zero;
use qtile_quant::MacElement;
use qtile_view::{Element, TensorView, TensorViewMut, MAX_RANK};

use crate::backend::ComputeBackend;
use crate::util::MultiIndex;

fn check_shapes(input: &TensorView<'_>, output: &TensorViewMut<'_>, axis: usize) {
    assert!(axis < MAX_RANK, "reduce axis {axis} out of range");
    assert_eq!(output.dim(axis), 1, "reduced axis is kept with extent 1");
    for d in (0..MAX_RANK).filter(|&d| d != axis) {
        assert_eq!(output.dim(d), input.dim(d), "extent of dim {d}");
    }
}

/// Maximum along `axis`.
pub fn reduce_max<B: ComputeBackend, T: Element>(
    input: &TensorView<'_>,
    output: &mut TensorViewMut<'_>,
    axis: usize,
) {
    check_shapes(input, output, axis);
    let len = input.dim(axis);
    for idx in MultiIndex::new(output.dims()) {
        let line = input.run::<T>(idx, axis, len);
        output.set::<T>(idx, B::reduce_max(T::min_value(), line));
    }
}

/// Raw sum of the stored values along `axis`, saturated into `O`.
pub fn reduce_sum<B: ComputeBackend, T: MacElement, O: Element>(
    input: &TensorView<'_>,
    output: &mut TensorViewMut<'_>,
    axis: usize,
) {
    check_shapes(input, output, axis);
    let len = input.dim(axis);
    for idx in MultiIndex::new(output.dims()) {
        let line = input.run::<T>(idx, axis, len);
        let acc = B::sum(T::Acc::zero(), line);
        output.set::<O>(idx, O::saturate(acc.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Reference, WideVectorDsp};
    use qtile_view::{BankId, BufferDesc, ElementKind, TensorDesc};

    fn desc(kind: ElementKind, shape: &[usize]) -> TensorDesc {
        let len = shape.iter().product::<usize>() * kind.size();
        TensorDesc::row_major(kind, shape, BufferDesc::new(BankId(0), 0, len as u32)).unwrap()
    }

    #[test]
    fn test_reduce_max_middle_axis() {
        let vals: Vec<i16> = vec![1, 9, 3, -4, 5, 6, 7, -8, 2, 10, -11, 0];
        let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_le_bytes()).collect();
        let in_d = desc(ElementKind::Fx16, &[2, 3, 2]);
        let out_d = desc(ElementKind::Fx16, &[2, 1, 2]);
        let mut out = vec![0u8; 8];
        let input = TensorView::new(&bytes, &in_d).unwrap();
        let mut output = TensorViewMut::new(&mut out, &out_d).unwrap();
        reduce_max::<WideVectorDsp, i16>(&input, &mut output, 1);
        let got: Vec<i16> = (0..4).map(|i| output.read::<i16>(i)).collect();
        assert_eq!(got, vec![5, 9, 7, 10]);
    }

    #[test]
    fn test_reduce_sum_widens_i8() {
        let bytes = vec![100u8; 8]; // eight times 100
        let in_d = desc(ElementKind::Sa8, &[1, 8]);
        let out_d = desc(ElementKind::Sa32, &[1, 1]);
        let mut out = vec![0u8; 4];
        let input = TensorView::new(&bytes, &in_d).unwrap();
        let mut output = TensorViewMut::new(&mut out, &out_d).unwrap();
        reduce_sum::<Reference, i8, i32>(&input, &mut output, 1);
        assert_eq!(output.read::<i32>(0), 800);
    }

    #[test]
    fn test_reduce_sum_i32_saturates() {
        let bytes: Vec<u8> = [i32::MAX, 5].iter().flat_map(|v| v.to_le_bytes()).collect();
        let in_d = desc(ElementKind::Sa32, &[2]);
        let out_d = desc(ElementKind::Sa32, &[1]);
        let mut out = vec![0u8; 4];
        let input = TensorView::new(&bytes, &in_d).unwrap();
        let mut output = TensorViewMut::new(&mut out, &out_d).unwrap();
        reduce_sum::<Reference, i32, i32>(&input, &mut output, 0);
        assert_eq!(output.read::<i32>(0), i32::MAX);
    }
}
