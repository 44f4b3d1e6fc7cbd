use crate::error::{Error, Result};
use crate::model::PaddingScheme;

/// Padding of one spatial axis resolved from an implicit scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImplicitPadding {
    pub output_size: usize,
    pub head: usize,
    pub tail: usize,
}

/// Resolve an implicit padding scheme for one spatial axis.
///
/// For SAME the output is `ceil(in / stride)` and the total padding is split
/// with the smaller half at the head. VALID never pads.
pub fn implicit_padding(
    scheme: PaddingScheme,
    input_size: usize,
    stride: usize,
    filter_size: usize,
    dilation: usize,
) -> Result<ImplicitPadding> {
    if stride == 0 || dilation == 0 {
        return Err(Error::InvalidModel(format!(
            "stride ({}) and dilation ({}) must be positive",
            stride, dilation
        )));
    }

    let effective_filter = (filter_size.max(1) - 1) * dilation + 1;

    match scheme {
        PaddingScheme::Same => {
            let output_size = (input_size + stride - 1) / stride;
            let needed = (output_size.max(1) - 1) * stride + effective_filter;
            let total = needed.saturating_sub(input_size);
            let head = total / 2;
            Ok(ImplicitPadding {
                output_size,
                head,
                tail: total - head,
            })
        }
        PaddingScheme::Valid => {
            let output_size = if input_size >= effective_filter {
                (input_size - effective_filter) / stride + 1
            } else {
                0
            };
            Ok(ImplicitPadding {
                output_size,
                head: 0,
                tail: 0,
            })
        }
    }
}

/// Output size of a convolution along one axis with explicit padding
pub fn conv_output_size(
    input_size: usize,
    pad_begin: usize,
    pad_end: usize,
    filter_size: usize,
    stride: usize,
    dilation: usize,
) -> Option<usize> {
    let padded = input_size + pad_begin + pad_end;
    let effective_filter = (filter_size.checked_sub(1)?) * dilation + 1;
    if stride == 0 || padded < effective_filter {
        return None;
    }
    Some((padded - effective_filter) / stride + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_padding() {
        let padding = implicit_padding(PaddingScheme::Same, 7, 2, 3, 1).unwrap();
        assert_eq!(padding, ImplicitPadding { output_size: 4, head: 1, tail: 1 });

        // Odd total puts the extra element at the tail
        let padding = implicit_padding(PaddingScheme::Same, 6, 1, 4, 1).unwrap();
        assert_eq!(padding, ImplicitPadding { output_size: 6, head: 1, tail: 2 });

        // Large strides never need negative padding
        let padding = implicit_padding(PaddingScheme::Same, 8, 4, 1, 1).unwrap();
        assert_eq!(padding, ImplicitPadding { output_size: 2, head: 0, tail: 0 });
    }

    #[test]
    fn test_valid_padding() {
        let padding = implicit_padding(PaddingScheme::Valid, 7, 2, 3, 1).unwrap();
        assert_eq!(padding, ImplicitPadding { output_size: 3, head: 0, tail: 0 });
    }

    #[test]
    fn test_zero_stride_rejected() {
        assert!(implicit_padding(PaddingScheme::Same, 7, 0, 3, 1).is_err());
    }

    #[test]
    fn test_conv_output_size() {
        assert_eq!(conv_output_size(7, 1, 1, 3, 2, 1), Some(4));
        assert_eq!(conv_output_size(5, 0, 0, 3, 1, 2), Some(1));
        assert_eq!(conv_output_size(2, 0, 0, 3, 1, 1), None);
    }
}
