//! Payload codec: wire payloads ↔ tensors, pixel tensors → data-URI JPEG.
//!
//! Two independent conversions live here:
//!
//! ```text
//! inbound:  JSON array (flat or nested)  ──decode_latent──►  Tensor [1, ..shape]
//! outbound: Tensor [1, C, H, W]          ──encode_image───►  "data:image/jpeg;base64,..."
//! ```
//!
//! # Pixel quantisation
//!
//! Pixel tensors hold intensities in `[0, 1]`.  Values are clamped to that
//! range first, then scaled to `0..=255` and *truncated* (not rounded), so
//! `0.5` becomes `127` and only an exact `1.0` (or anything above) becomes
//! `255`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, RgbImage};
use ndarray::{ArrayD, Axis, IxDyn};
use serde_json::Value;
use thiserror::Error;

use crate::tensor::{shape_string, Tensor};

/// Scheme marker prepended to every encoded image.
pub const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// JPEG quality used when the caller has no preference.
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Errors produced by the payload codec.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    /// The inbound payload is not a rectangular numeric array of the
    /// expected shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The pixel tensor is not `[1, C, H, W]` or `[C, H, W]` with 1 or 3
    /// channels.
    #[error("unsupported image tensor shape {0}")]
    UnsupportedImageShape(String),

    /// The JPEG encoder rejected the pixel buffer.
    #[error("image encoding failed: {0}")]
    ImageEncoding(String),
}

// ── Inbound: payload → tensor ─────────────────────────────────────────────────

/// Interprets a JSON payload as a latent tensor with a leading batch axis.
///
/// `payload` must be a JSON array, optionally nested, whose leaves are all
/// numbers and whose sub-arrays at each depth share one length.  Integers are
/// accepted and converted to `f32`.
///
/// When `expected` is `Some`, the inferred per-sample shape must equal it
/// exactly; the batch axis is not part of `expected`.
///
/// # Errors
///
/// Returns [`CodecError::MalformedPayload`] if the payload is not an array,
/// contains a non-numeric leaf, is ragged, or has the wrong shape.
///
/// # Examples
///
/// ```rust
/// use relay_core::codec::decode_latent;
/// use serde_json::json;
///
/// let t = decode_latent(&json!([[1, 2], [3, 4]]), Some(&[2, 2])).unwrap();
/// assert_eq!(t.shape(), &[1, 2, 2]);
/// ```
pub fn decode_latent(payload: &Value, expected: Option<&[usize]>) -> Result<Tensor, CodecError> {
    if !payload.is_array() {
        return Err(CodecError::MalformedPayload(format!(
            "expected a JSON array, got {}",
            json_kind(payload)
        )));
    }

    let shape = infer_shape(payload);
    let mut values = Vec::with_capacity(shape.iter().product());
    flatten_into(payload, &shape, 0, &mut values)?;

    if let Some(expected) = expected {
        if shape.as_slice() != expected {
            return Err(CodecError::MalformedPayload(format!(
                "payload shape {} does not match expected {}",
                shape_string(&shape),
                shape_string(expected)
            )));
        }
    }

    let mut batched = Vec::with_capacity(shape.len() + 1);
    batched.push(1);
    batched.extend_from_slice(&shape);

    ArrayD::from_shape_vec(IxDyn(&batched), values)
        .map_err(|e| CodecError::MalformedPayload(e.to_string()))
}

/// Follows the first element at every depth to find the candidate shape.
fn infer_shape(payload: &Value) -> Vec<usize> {
    let mut shape = Vec::new();
    let mut current = payload;
    while let Value::Array(items) = current {
        shape.push(items.len());
        match items.first() {
            Some(first) => current = first,
            None => break,
        }
    }
    shape
}

/// Walks the payload depth-first, checking it against `shape`.
fn flatten_into(
    value: &Value,
    shape: &[usize],
    depth: usize,
    out: &mut Vec<f32>,
) -> Result<(), CodecError> {
    if depth == shape.len() {
        let number = value.as_f64().ok_or_else(|| {
            CodecError::MalformedPayload(format!(
                "expected a number at depth {depth}, got {}",
                json_kind(value)
            ))
        })?;
        out.push(number as f32);
        return Ok(());
    }

    match value {
        Value::Array(items) if items.len() == shape[depth] => {
            for item in items {
                flatten_into(item, shape, depth + 1, out)?;
            }
            Ok(())
        }
        Value::Array(items) => Err(CodecError::MalformedPayload(format!(
            "ragged array at depth {depth}: expected {} elements, got {}",
            shape[depth],
            items.len()
        ))),
        other => Err(CodecError::MalformedPayload(format!(
            "expected an array at depth {depth}, got {}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Outbound: tensor → pixels → JPEG ──────────────────────────────────────────

/// An 8-bit, height-width-channel pixel buffer ready for compression.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    /// 1 (grayscale) or 3 (RGB).
    pub channels: u8,
    /// `height * width * channels` bytes in row-major HWC order.
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Returns the bytes of the pixel at (`x`, `y`).
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let c = self.channels as usize;
        let start = (y as usize * self.width as usize + x as usize) * c;
        &self.data[start..start + c]
    }

    /// Compresses the buffer as a baseline JPEG at the given quality (1-100).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ImageEncoding`] if the encoder fails.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, CodecError> {
        let image = match self.channels {
            1 => GrayImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageLuma8),
            _ => RgbImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageRgb8),
        }
        .ok_or_else(|| {
            CodecError::ImageEncoding(format!(
                "buffer of {} bytes does not fit {}x{}x{}",
                self.data.len(),
                self.width,
                self.height,
                self.channels
            ))
        })?;

        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality)
            .encode_image(&image)
            .map_err(|e| CodecError::ImageEncoding(e.to_string()))?;
        Ok(bytes)
    }
}

/// Converts a `[1, C, H, W]` or `[C, H, W]` intensity tensor into 8-bit HWC
/// pixels.
///
/// Values are clamped to `[0, 1]` and scaled by truncation.  NaN maps to 0.
///
/// # Errors
///
/// Returns [`CodecError::UnsupportedImageShape`] for any other shape, for a
/// channel count other than 1 or 3, or for an empty image.
pub fn to_pixels(pixels: &Tensor) -> Result<PixelBuffer, CodecError> {
    let unsupported = || CodecError::UnsupportedImageShape(shape_string(pixels.shape()));

    let chw = match pixels.ndim() {
        4 if pixels.shape()[0] == 1 => pixels.index_axis(Axis(0), 0),
        3 => pixels.view(),
        _ => return Err(unsupported()),
    };

    let (channels, height, width) = (chw.shape()[0], chw.shape()[1], chw.shape()[2]);
    if !(channels == 1 || channels == 3) || height == 0 || width == 0 {
        return Err(unsupported());
    }

    let hwc = chw.permuted_axes(vec![1, 2, 0]);
    let data: Vec<u8> = hwc.iter().map(|&v| quantize(v)).collect();

    Ok(PixelBuffer {
        width: u32::try_from(width).map_err(|_| unsupported())?,
        height: u32::try_from(height).map_err(|_| unsupported())?,
        channels: channels as u8,
        data,
    })
}

/// Encodes a pixel tensor as a `data:image/jpeg;base64,...` string.
///
/// Deterministic for identical input and quality.
///
/// # Errors
///
/// Propagates [`to_pixels`] and [`PixelBuffer::to_jpeg`] failures.
pub fn encode_image(pixels: &Tensor, quality: u8) -> Result<String, CodecError> {
    let jpeg = to_pixels(pixels)?.to_jpeg(quality)?;
    Ok(format!("{DATA_URI_PREFIX}{}", STANDARD.encode(jpeg)))
}

fn quantize(value: f32) -> u8 {
    // `as` saturates and maps NaN to 0.
    (value.clamp(0.0, 1.0) * 255.0) as u8
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::filled;
    use serde_json::json;

    // ── decode_latent ─────────────────────────────────────────────────────────

    #[test]
    fn test_decode_flat_payload_adds_batch_axis() {
        // Arrange
        let payload = json!([0.1, 0.2, 0.3]);

        // Act
        let t = decode_latent(&payload, None).unwrap();

        // Assert
        assert_eq!(t.shape(), &[1, 3]);
        assert!((t[[0, 1]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_decode_nested_payload_keeps_row_major_order() {
        let payload = json!([[1, 2, 3], [4, 5, 6]]);
        let t = decode_latent(&payload, Some(&[2, 3])).unwrap();

        assert_eq!(t.shape(), &[1, 2, 3]);
        assert_eq!(t[[0, 1, 0]], 4.0);
        assert_eq!(t[[0, 0, 2]], 3.0);
    }

    #[test]
    fn test_decode_integers_become_floats() {
        let t = decode_latent(&json!([1, -2, 3]), None).unwrap();
        assert_eq!(t.iter().copied().collect::<Vec<_>>(), vec![1.0, -2.0, 3.0]);
    }

    #[test]
    fn test_decode_rejects_scalar_payload() {
        let result = decode_latent(&json!(3.5), None);
        assert!(matches!(result, Err(CodecError::MalformedPayload(_))));
    }

    #[test]
    fn test_decode_rejects_string_leaf() {
        let result = decode_latent(&json!([0.1, "x", 0.3]), None);
        assert!(matches!(result, Err(CodecError::MalformedPayload(_))));
    }

    #[test]
    fn test_decode_rejects_ragged_rows() {
        let result = decode_latent(&json!([[1, 2], [3]]), None);
        match result {
            Err(CodecError::MalformedPayload(msg)) => assert!(msg.contains("ragged")),
            other => panic!("expected ragged error, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_mixed_depth() {
        let result = decode_latent(&json!([1, [2]]), None);
        assert!(matches!(result, Err(CodecError::MalformedPayload(_))));
    }

    #[test]
    fn test_decode_rejects_wrong_rank_against_expected_shape() {
        // Arrange: encoder expects a flat vector of 4, client sent 2x2
        let payload = json!([[0.0, 0.0], [0.0, 0.0]]);

        // Act
        let result = decode_latent(&payload, Some(&[4]));

        // Assert
        match result {
            Err(CodecError::MalformedPayload(msg)) => {
                assert!(msg.contains("[2, 2]"));
                assert!(msg.contains("[4]"));
            }
            other => panic!("expected shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_wrong_length_against_expected_shape() {
        let result = decode_latent(&json!([0.0, 0.0, 0.0]), Some(&[4]));
        assert!(matches!(result, Err(CodecError::MalformedPayload(_))));
    }

    #[test]
    fn test_decode_empty_array_has_zero_length_axis() {
        let t = decode_latent(&json!([]), None).unwrap();
        assert_eq!(t.shape(), &[1, 0]);
    }

    // ── to_pixels ─────────────────────────────────────────────────────────────

    #[test]
    fn test_to_pixels_clamps_out_of_range_values() {
        // Arrange: 1x3x1x2 image; first pixel all -1.0, second pixel all 2.0
        let mut t = filled(&[1, 3, 1, 2], 0.0);
        for c in 0..3 {
            t[[0, c, 0, 0]] = -1.0;
            t[[0, c, 0, 1]] = 2.0;
        }

        // Act
        let buf = to_pixels(&t).unwrap();

        // Assert
        assert_eq!(buf.pixel(0, 0), &[0, 0, 0]);
        assert_eq!(buf.pixel(1, 0), &[255, 255, 255]);
    }

    #[test]
    fn test_to_pixels_truncates_instead_of_rounding() {
        let t = filled(&[1, 1, 1, 1], 0.5);
        let buf = to_pixels(&t).unwrap();
        assert_eq!(buf.data, vec![127]);
    }

    #[test]
    fn test_to_pixels_reorders_channels_last() {
        // Arrange: R=1, G=0, B=0.5 everywhere on a 2x2 image
        let mut t = filled(&[1, 3, 2, 2], 0.0);
        t.index_axis_mut(Axis(1), 0).fill(1.0);
        t.index_axis_mut(Axis(1), 2).fill(0.5);

        // Act
        let buf = to_pixels(&t).unwrap();

        // Assert
        assert_eq!((buf.width, buf.height, buf.channels), (2, 2, 3));
        assert_eq!(buf.data.len(), 12);
        assert_eq!(buf.pixel(1, 1), &[255, 0, 127]);
    }

    #[test]
    fn test_to_pixels_accepts_unbatched_tensor() {
        let buf = to_pixels(&filled(&[3, 4, 5], 1.0)).unwrap();
        assert_eq!((buf.width, buf.height), (5, 4));
    }

    #[test]
    fn test_to_pixels_accepts_grayscale() {
        let buf = to_pixels(&filled(&[1, 1, 2, 2], 1.0)).unwrap();
        assert_eq!(buf.channels, 1);
        assert_eq!(buf.data, vec![255; 4]);
    }

    #[test]
    fn test_to_pixels_maps_nan_to_zero() {
        let buf = to_pixels(&filled(&[1, 1, 1, 1], f32::NAN)).unwrap();
        assert_eq!(buf.data, vec![0]);
    }

    #[test]
    fn test_to_pixels_rejects_bad_shapes() {
        for shape in [&[1, 2, 4, 4][..], &[2, 3, 4, 4][..], &[3, 4][..], &[1, 3, 0, 4][..]] {
            let result = to_pixels(&filled(shape, 0.0));
            assert!(
                matches!(result, Err(CodecError::UnsupportedImageShape(_))),
                "shape {shape:?} must be rejected"
            );
        }
    }

    // ── encode_image ──────────────────────────────────────────────────────────

    #[test]
    fn test_encode_image_has_data_uri_prefix_and_jpeg_magic() {
        // Act
        let uri = encode_image(&filled(&[1, 3, 8, 8], 0.25), DEFAULT_JPEG_QUALITY).unwrap();

        // Assert
        let body = uri.strip_prefix(DATA_URI_PREFIX).expect("prefix");
        let bytes = STANDARD.decode(body).expect("valid base64");
        assert_eq!(&bytes[..2], &[0xFF, 0xD8], "JPEG start-of-image marker");
    }

    #[test]
    fn test_encode_image_is_deterministic() {
        let t = filled(&[1, 3, 16, 16], 0.6);
        let a = encode_image(&t, 80).unwrap();
        let b = encode_image(&t, 80).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_encode_image_propagates_shape_error() {
        let result = encode_image(&filled(&[1, 4, 2, 2], 0.0), DEFAULT_JPEG_QUALITY);
        assert!(matches!(result, Err(CodecError::UnsupportedImageShape(_))));
    }
}
