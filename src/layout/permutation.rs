use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::{Error, Result};

/// Channel-last activations to channel-first
pub const NHWC_TO_NCHW: [usize; 4] = [0, 3, 1, 2];
/// Channel-first activations back to channel-last
pub const NCHW_TO_NHWC: [usize; 4] = [0, 2, 3, 1];
/// Convolution filters `[O, kH, kW, I]` to `[O, I, kH, kW]`
pub const OHWI_TO_OIHW: [usize; 4] = [0, 3, 1, 2];
/// Depthwise filters `[1, kH, kW, C*M]` to `[C*M, 1, kH, kW]`
pub const IHWO_TO_OIHW: [usize; 4] = [3, 0, 1, 2];

/// Where the channel dimension of a 4-D activation lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum DataLayout {
    /// `[N, C, H, W]`
    ChannelFirst,
    /// `[N, H, W, C]`
    ChannelLast,
}

/// Check that `order` is a permutation of `0..rank`
pub fn validate_permutation(order: &[usize], rank: usize) -> Result<()> {
    if order.len() != rank {
        return Err(Error::InvalidModel(format!(
            "Transpose order must have the same length as tensor rank. Got {} axes for rank {}",
            order.len(),
            rank
        )));
    }

    let mut seen = vec![false; rank];
    for &axis in order {
        if axis >= rank {
            return Err(Error::InvalidModel(format!(
                "Transpose axis {} out of bounds for tensor of rank {}",
                axis, rank
            )));
        }
        if seen[axis] {
            return Err(Error::InvalidModel(format!("Duplicate axis {} in transpose order", axis)));
        }
        seen[axis] = true;
    }

    Ok(())
}

/// Shape after transposing with `order`; output dim `i` is input dim `order[i]`
pub fn permute_shape(shape: &[usize], order: &[usize]) -> Result<Vec<usize>> {
    validate_permutation(order, shape.len())?;
    Ok(order.iter().map(|&axis| shape[axis]).collect())
}

/// Physically transpose an array into a new standard-layout array
pub fn permute_array<T: Clone>(array: &ArrayD<T>, order: &[usize]) -> Result<ArrayD<T>> {
    validate_permutation(order, array.ndim())?;
    Ok(array
        .view()
        .permuted_axes(order.to_vec())
        .as_standard_layout()
        .into_owned())
}

/// A dimension can be broadcast if it's 1 or equal to the target
pub fn can_broadcast(from_shape: &[usize], to_shape: &[usize]) -> bool {
    if from_shape.len() > to_shape.len() {
        return false;
    }

    let offset = to_shape.len() - from_shape.len();
    from_shape
        .iter()
        .enumerate()
        .all(|(i, &dim)| dim == 1 || dim == to_shape[i + offset])
}

/// Result shape of NumPy-style broadcasting, or `None` if incompatible
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut shape = vec![0; rank];

    for i in 0..rank {
        // Align from the trailing dimension
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        shape[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }

    Some(shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_layout_permutations_are_inverse() {
        let nhwc = vec![1, 7, 5, 3];
        let nchw = permute_shape(&nhwc, &NHWC_TO_NCHW).unwrap();
        assert_eq!(nchw, vec![1, 3, 7, 5]);
        assert_eq!(permute_shape(&nchw, &NCHW_TO_NHWC).unwrap(), nhwc);
    }

    #[test]
    fn test_filter_permutations() {
        // [O, kH, kW, I]
        assert_eq!(permute_shape(&[8, 3, 3, 4], &OHWI_TO_OIHW).unwrap(), vec![8, 4, 3, 3]);
        // [1, kH, kW, C*M]
        assert_eq!(permute_shape(&[1, 3, 3, 6], &IHWO_TO_OIHW).unwrap(), vec![6, 1, 3, 3]);
    }

    #[test]
    fn test_invalid_permutations() {
        assert!(permute_shape(&[1, 2, 3], &[0, 1]).is_err());
        assert!(permute_shape(&[1, 2], &[0, 0]).is_err());
        assert!(permute_shape(&[1, 2], &[0, 2]).is_err());
    }

    #[test]
    fn test_permute_array() {
        let array = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![1, 2, 3, 4, 5, 6]).unwrap();
        let transposed = permute_array(&array, &[1, 0]).unwrap();
        assert_eq!(transposed.shape(), &[3, 2]);
        assert_eq!(transposed.iter().cloned().collect::<Vec<_>>(), vec![1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_broadcasting() {
        assert_eq!(broadcast_shapes(&[1, 4], &[1, 4]), Some(vec![1, 4]));
        assert_eq!(broadcast_shapes(&[2, 1, 4], &[3, 1]), Some(vec![2, 3, 4]));
        assert_eq!(broadcast_shapes(&[4], &[]), Some(vec![4]));
        assert_eq!(broadcast_shapes(&[2, 4], &[3, 4]), None);

        assert!(can_broadcast(&[1, 4], &[3, 4]));
        assert!(!can_broadcast(&[2, 4], &[4]));
    }
}
