//! Integration tests for the image half of the payload codec.
//!
//! These tests go through the public API only: build a pixel tensor, encode it
//! to a data URI, then decode the JPEG back with the `image` crate and inspect
//! the pixels.  JPEG is lossy, so solid colours are checked with a small
//! tolerance; the clamping test inspects the pre-compression pixel buffer
//! where the values are exact.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, RgbImage};
use relay_core::codec::DEFAULT_JPEG_QUALITY;
use relay_core::tensor::filled;
use relay_core::{decode_latent, encode_image, reference_pipeline, to_pixels, ModelConfig, DATA_URI_PREFIX};
use serde_json::json;

/// Decodes a data-URI JPEG string back into an RGB image.
fn decode_data_uri(uri: &str) -> RgbImage {
    let body = uri
        .strip_prefix(DATA_URI_PREFIX)
        .expect("data URI prefix must be present");
    let bytes = STANDARD.decode(body).expect("body must be valid base64");
    image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg)
        .expect("body must be a decodable JPEG")
        .to_rgb8()
}

#[test]
fn test_all_zeros_encodes_to_solid_black() {
    // Arrange
    let pixels = filled(&[1, 3, 16, 16], 0.0);

    // Act
    let image = decode_data_uri(&encode_image(&pixels, DEFAULT_JPEG_QUALITY).unwrap());

    // Assert
    assert_eq!(image.dimensions(), (16, 16));
    assert!(
        image.pixels().all(|p| p.0.iter().all(|&c| c <= 2)),
        "every pixel must be (near) black"
    );
}

#[test]
fn test_all_ones_encodes_to_solid_white() {
    let pixels = filled(&[1, 3, 16, 16], 1.0);

    let image = decode_data_uri(&encode_image(&pixels, DEFAULT_JPEG_QUALITY).unwrap());

    assert!(
        image.pixels().all(|p| p.0.iter().all(|&c| c >= 253)),
        "every pixel must be (near) white"
    );
}

#[test]
fn test_values_above_one_encode_as_white() {
    // Pre-clamp values far above 1.0 must not wrap around to dark pixels.
    let pixels = filled(&[1, 3, 8, 8], 4.0);

    let image = decode_data_uri(&encode_image(&pixels, DEFAULT_JPEG_QUALITY).unwrap());

    assert!(image.pixels().all(|p| p.0.iter().all(|&c| c >= 253)));
}

#[test]
fn test_out_of_range_values_are_clamped_before_encoding() {
    // Arrange: -1.0 in the top-left pixel, 2.0 in the bottom-right pixel
    let mut pixels = filled(&[1, 3, 4, 4], 0.5);
    for c in 0..3 {
        pixels[[0, c, 0, 0]] = -1.0;
        pixels[[0, c, 3, 3]] = 2.0;
    }

    // Act
    let buffer = to_pixels(&pixels).unwrap();

    // Assert
    assert_eq!(buffer.pixel(0, 0), &[0, 0, 0]);
    assert_eq!(buffer.pixel(3, 3), &[255, 255, 255]);
    assert_eq!(buffer.pixel(1, 1), &[127, 127, 127]);
}

#[test]
fn test_grayscale_tensor_encodes_to_decodable_jpeg() {
    let pixels = filled(&[1, 1, 10, 12], 1.0);

    let image = decode_data_uri(&encode_image(&pixels, DEFAULT_JPEG_QUALITY).unwrap());

    assert_eq!(image.dimensions(), (12, 10));
}

#[test]
fn test_latent_through_reference_pipeline_to_image() {
    // Arrange: a latent vector matching the reference encoder's input
    let config = ModelConfig {
        latent_dim: 4,
        embed_dim: 8,
        image_height: 12,
        image_width: 20,
        seed: 1,
    };
    let pipeline = reference_pipeline(&config);
    let latent = decode_latent(&json!([0.1, 0.2, 0.3, 0.4]), pipeline.input_shape()).unwrap();

    // Act
    let rendered = pipeline.run(&latent).unwrap();
    let image = decode_data_uri(&encode_image(&rendered, 90).unwrap());

    // Assert
    assert_eq!(image.dimensions(), (20, 12));
}
