pub mod padding;
pub mod permutation;

pub use padding::{implicit_padding, conv_output_size, ImplicitPadding};
pub use permutation::{
    DataLayout,
    NHWC_TO_NCHW,
    NCHW_TO_NHWC,
    OHWI_TO_OIHW,
    IHWO_TO_OIHW,
    broadcast_shapes,
    can_broadcast,
    permute_array,
    permute_shape,
};
