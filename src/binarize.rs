use burn::tensor::{backend::Backend, Tensor};

use crate::error::{Error, Result};

/// Maps every element to `h` when it is non-negative and to `-h` otherwise.
///
/// The output has the shape of the input and holds exactly the two values `{-h, +h}`
/// (one of them may be absent). Zero is treated as non-negative. Applying the function
/// twice with the same `h` gives the same tensor.
///
/// No gradient flows through the result, see [binarize_ste] for the trainable variant.
pub fn binarize<B: Backend, const D: usize>(tensor: Tensor<B, D>, h: f64) -> Tensor<B, D> {
    let non_negative = tensor.clone().greater_equal_elem(0.0);

    tensor.ones_like().mul_scalar(-h).mask_fill(non_negative, h)
}

/// Binarization with a straight-through estimator.
///
/// The forward pass returns `binarize(tensor, h)`. The backward pass treats the quantizer as the
/// identity inside `[-h, h]`, bounds included, and blocks the gradient outside.
pub fn binarize_ste<B: Backend, const D: usize>(tensor: Tensor<B, D>, h: f64) -> Tensor<B, D> {
    let inside = tensor.clone().abs().lower_equal_elem(h).float();
    let binarized = binarize(tensor.clone(), h);

    binarized + (tensor.clone() - tensor.detach()) * inside
}

/// Binary activation, `binarize_ste` with a unit scale.
///
/// Outputs `-1` or `+1`, gradients pass through where `|x| <= 1`.
pub fn binary_tanh<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<B, D> {
    binarize_ste(tensor, 1.0)
}

/// Checks that `h` can be used as a binarization scale.
pub fn check_scale(h: f64) -> Result<f64> {
    if h.is_finite() && h > 0.0 {
        Ok(h)
    } else {
        Err(Error::InvalidScale(h))
    }
}
