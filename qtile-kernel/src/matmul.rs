//! Matrix multiply of `[M, K] x [K, N]` tiles with zero-point correction.

use num_traits::Zero;
use qtile_quant::{MacElement, ZeroPointTerms};
use qtile_view::{Element, TensorView, TensorViewMut};

use crate::backend::ComputeBackend;

/// `out[m, n] = Σ_k (left[m, k] − left_zp)(right[k, n] − right_zp)`.
///
/// # Panics
/// Panics when the inner dimensions differ or the output tile does not
/// match the operand tiles.
pub fn matmul<B: ComputeBackend, T: MacElement, O: Element>(
    left: &TensorView<'_>,
    right: &TensorView<'_>,
    output: &mut TensorViewMut<'_>,
    left_zp: i32,
    right_zp: i32,
) {
    let (m_len, k_len) = (left.dim(0), left.dim(1));
    let n_len = right.dim(1);
    assert_eq!(right.dim(0), k_len, "inner dimensions differ");
    assert_eq!(output.dim(0), m_len, "output rows");
    assert_eq!(output.dim(1), n_len, "output columns");

    for n in 0..n_len {
        let col = right.run::<T>([0, n, 0, 0], 0, k_len);
        let col_sum = if left_zp != 0 {
            B::sum(T::Acc::zero(), col)
        } else {
            T::Acc::zero()
        };
        for m in 0..m_len {
            let row = left.run::<T>([m, 0, 0, 0], 1, k_len);
            let raw = B::dot(T::Acc::zero(), row, col);
            let row_sum = if right_zp != 0 {
                B::sum(T::Acc::zero(), row)
            } else {
                T::Acc::zero()
            };
            let terms =
                ZeroPointTerms::new(k_len, left_zp, right_zp, row_sum, col_sum, T::Acc::zero());
            output.set::<O>([m, n, 0, 0], O::saturate(terms.apply(raw).into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FixedPointDsp, Reference};
    use qtile_view::{BankId, BufferDesc, ElementKind, TensorDesc};

    fn desc(kind: ElementKind, shape: &[usize]) -> TensorDesc {
        let len = shape.iter().product::<usize>() * kind.size();
        TensorDesc::row_major(kind, shape, BufferDesc::new(BankId(0), 0, len as u32)).unwrap()
    }

    #[test]
    fn test_matmul_2x2_with_zero_points() {
        // left - 5 = [[-4, -3], [-2, -1]], right + 3 = [[8, 9], [10, 11]]
        let left: Vec<u8> = [1i8, 2, 3, 4].iter().map(|&v| v as u8).collect();
        let right: Vec<u8> = [5i8, 6, 7, 8].iter().map(|&v| v as u8).collect();
        let l_d = desc(ElementKind::Sa8, &[2, 2]);
        let r_d = desc(ElementKind::Sa8, &[2, 2]);
        let o_d = desc(ElementKind::Sa32, &[2, 2]);
        let mut out = vec![0u8; 16];
        let l = TensorView::new(&left, &l_d).unwrap();
        let r = TensorView::new(&right, &r_d).unwrap();
        let mut o = TensorViewMut::new(&mut out, &o_d).unwrap();
        matmul::<Reference, i8, i32>(&l, &r, &mut o, 5, -3);
        let got: Vec<i32> = (0..4).map(|i| o.read::<i32>(i)).collect();
        assert_eq!(got, vec![-62, -69, -26, -29]);
    }

    #[test]
    fn test_matmul_backend_agreement_on_transposed_right() {
        let k = 19;
        let left: Vec<u8> = (0..3 * k).map(|i| (i * 11 % 251) as u8).collect();
        let right: Vec<u8> = (0..k * 2).map(|i| (i * 29 % 253) as u8).collect();
        let l_d = desc(ElementKind::Sa8, &[3, k]);
        // Column-major right operand.
        let r_d = TensorDesc::new(
            ElementKind::Sa8,
            &[k, 2],
            &[1, k as i32],
            BufferDesc::new(BankId(0), 0, (k * 2) as u32),
        )
        .unwrap();
        let o_d = desc(ElementKind::Sa32, &[3, 2]);
        let l = TensorView::new(&left, &l_d).unwrap();
        let r = TensorView::new(&right, &r_d).unwrap();
        let mut out_a = vec![0u8; 24];
        let mut out_b = vec![0u8; 24];
        matmul::<Reference, i8, i32>(&l, &r, &mut TensorViewMut::new(&mut out_a, &o_d).unwrap(), -7, 12);
        matmul::<FixedPointDsp, i8, i32>(&l, &r, &mut TensorViewMut::new(&mut out_b, &o_d).unwrap(), -7, 12);
        assert_eq!(out_a, out_b);
    }
}
