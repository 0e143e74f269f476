//! # relay-core
//!
//! Shared library for the latent relay containing the tensor type, the
//! payload codec, and the transform pipeline abstraction.
//!
//! This crate has zero dependencies on sockets, async runtimes, or process
//! setup.  The relay server depends on it; so can any other front-end that
//! wants to turn latent vectors into images.
//!
//! # Architecture overview
//!
//! A client sends a latent vector as a JSON array.  The relay turns it into an
//! image in three steps:
//!
//! ```text
//! JSON array ──decode_latent──► Tensor [1, ..]
//!            ──Pipeline::run──► Tensor [1, C, H, W]   (encoder, then decoder)
//!            ──encode_image───► "data:image/jpeg;base64,..."
//! ```
//!
//! - **`tensor`** – The in-memory representation (`ndarray::ArrayD<f32>`).
//! - **`codec`** – Conversion between wire payloads and tensors, and between
//!   pixel tensors and data-URI JPEG strings.
//! - **`pipeline`** – The [`Stage`] trait and the two-stage [`Pipeline`].
//! - **`reference`** – Deterministic stand-in stages so the relay can run
//!   without a trained model plugged in.

pub mod codec;
pub mod pipeline;
pub mod reference;
pub mod tensor;

// Re-export the most-used items at the crate root so callers can write
// `relay_core::Pipeline` instead of `relay_core::pipeline::Pipeline`.
pub use codec::{decode_latent, encode_image, to_pixels, CodecError, PixelBuffer, DATA_URI_PREFIX};
pub use pipeline::{FnStage, Pipeline, Stage, TransformError};
pub use reference::{reference_pipeline, ModelConfig};
pub use tensor::Tensor;
