//! Dimension permutation of a tile.

use qtile_view::{Element, TensorView, TensorViewMut, MAX_RANK};

use crate::util::MultiIndex;

/// `output[i] = input[j]` with `j[perm[d]] = i[d]`: output dimension `d`
/// is input dimension `perm[d]`.
///
/// # Panics
/// Panics when the output tile is not the permuted input tile.
pub fn permute<T: Element>(
    input: &TensorView<'_>,
    output: &mut TensorViewMut<'_>,
    perm: [usize; MAX_RANK],
) {
    let out_dims = output.dims();
    for d in 0..MAX_RANK {
        assert_eq!(out_dims[d], input.dim(perm[d]), "permuted extent of dim {d}");
    }
    for idx in MultiIndex::new(out_dims) {
        let mut src = [0usize; MAX_RANK];
        for d in 0..MAX_RANK {
            src[perm[d]] = idx[d];
        }
        output.set::<T>(idx, input.at::<T>(src));
    }
}
