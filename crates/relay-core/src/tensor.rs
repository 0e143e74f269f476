//! The tensor type passed between the codec and the pipeline stages.
//!
//! A tensor is a dense, row-major, dynamic-rank array of `f32` values.  The
//! leading axis is always the batch axis; the relay only ever uses a batch of
//! one.

use ndarray::{ArrayD, IxDyn};

/// Dense dynamic-rank `f32` array.
///
/// This is a type alias rather than a newtype so pipeline stages can use the
/// full `ndarray` API (`dot`, `mapv`, `into_shape_with_order`, ...) directly.
pub type Tensor = ArrayD<f32>;

/// Builds a tensor of the given shape filled with `value`.
///
/// # Examples
///
/// ```rust
/// use relay_core::tensor::filled;
///
/// let t = filled(&[1, 3, 2, 2], 0.5);
/// assert_eq!(t.shape(), &[1, 3, 2, 2]);
/// assert!(t.iter().all(|&v| v == 0.5));
/// ```
pub fn filled(shape: &[usize], value: f32) -> Tensor {
    ArrayD::from_elem(IxDyn(shape), value)
}

/// Returns a compact `[a, b, c]` rendering of a shape for log and error text.
pub fn shape_string(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("[{}]", dims.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_has_requested_shape_and_value() {
        let t = filled(&[2, 3], -1.0);
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.len(), 6);
        assert!(t.iter().all(|&v| v == -1.0));
    }

    #[test]
    fn test_shape_string_formats_dimensions() {
        assert_eq!(shape_string(&[1, 3, 64, 64]), "[1, 3, 64, 64]");
        assert_eq!(shape_string(&[]), "[]");
    }
}
