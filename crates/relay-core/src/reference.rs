//! Deterministic reference stages.
//!
//! The relay treats its encoder and decoder as black boxes supplied by a
//! separately trained component.  These two stages stand in for that component
//! so the server can be run and exercised end to end without model files:
//!
//! - [`WaveformEncoder`]: `[B, latent_dim] -> tanh(x·W + b) -> [B, embed_dim]`
//! - [`ImageDecoder`]: `[B, embed_dim] -> sigmoid(z·W + b) -> [B, 3, H, W]`
//!
//! Weights are drawn uniformly from `±1/sqrt(fan_in)` using a seeded
//! [`StdRng`], so the same [`ModelConfig`] always produces the same images.

use ndarray::{Array1, Array2, Ix2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::pipeline::{Pipeline, Stage, TransformError};
use crate::tensor::{shape_string, Tensor};

/// Number of colour channels produced by [`ImageDecoder`].
pub const IMAGE_CHANNELS: usize = 3;

/// Dimensions and seed of the reference pipeline.
///
/// Every field has a default, so a partial `[model]` TOML table is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Length of the latent vector clients must send.
    pub latent_dim: usize,
    /// Width of the intermediate embedding.
    pub embed_dim: usize,
    /// Output image height in pixels.
    pub image_height: usize,
    /// Output image width in pixels.
    pub image_width: usize,
    /// Seed for weight initialisation.
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            latent_dim: 128,
            embed_dim: 64,
            image_height: 64,
            image_width: 64,
            seed: 42,
        }
    }
}

/// Builds the reference encoder/decoder pair described by `config`.
///
/// The returned pipeline declares `[latent_dim]` as its input shape, so
/// payloads of any other shape are rejected by the codec before inference.
pub fn reference_pipeline(config: &ModelConfig) -> Pipeline {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let encoder = WaveformEncoder::new(config.latent_dim, config.embed_dim, &mut rng);
    let decoder = ImageDecoder::new(
        config.embed_dim,
        config.image_height,
        config.image_width,
        &mut rng,
    );
    Pipeline::new(encoder, decoder).with_input_shape(vec![config.latent_dim])
}

fn uniform_matrix(rows: usize, cols: usize, rng: &mut StdRng) -> Array2<f32> {
    let bound = 1.0 / (rows.max(1) as f32).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-bound..=bound))
}

fn uniform_vector(len: usize, fan_in: usize, rng: &mut StdRng) -> Array1<f32> {
    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
    Array1::from_shape_fn(len, |_| rng.gen_range(-bound..=bound))
}

/// Views a `[B, width]` tensor as a matrix, or explains why it is not one.
fn as_matrix<'a>(
    stage: &str,
    input: &'a Tensor,
    width: usize,
) -> Result<ndarray::ArrayView2<'a, f32>, TransformError> {
    if input.ndim() != 2 || input.shape()[1] != width {
        return Err(TransformError::new(
            stage,
            format!(
                "expected input [batch, {width}], got {}",
                shape_string(input.shape())
            ),
        ));
    }
    input
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| TransformError::new(stage, e.to_string()))
}

// ── Encoder ───────────────────────────────────────────────────────────────────

/// Single dense layer with `tanh` activation.
pub struct WaveformEncoder {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl WaveformEncoder {
    pub fn new(latent_dim: usize, embed_dim: usize, rng: &mut StdRng) -> Self {
        Self {
            weights: uniform_matrix(latent_dim, embed_dim, rng),
            bias: uniform_vector(embed_dim, latent_dim, rng),
        }
    }

    fn latent_dim(&self) -> usize {
        self.weights.nrows()
    }
}

impl Stage for WaveformEncoder {
    fn name(&self) -> &str {
        "waveform_encoder"
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, TransformError> {
        let x = as_matrix(self.name(), input, self.latent_dim())?;
        let z = (x.dot(&self.weights) + &self.bias).mapv(f32::tanh);
        Ok(z.into_dyn())
    }
}

// ── Decoder ───────────────────────────────────────────────────────────────────

/// Single dense layer with `sigmoid` activation, reshaped to CHW.
pub struct ImageDecoder {
    weights: Array2<f32>,
    bias: Array1<f32>,
    height: usize,
    width: usize,
}

impl ImageDecoder {
    pub fn new(embed_dim: usize, height: usize, width: usize, rng: &mut StdRng) -> Self {
        let out = IMAGE_CHANNELS * height * width;
        Self {
            weights: uniform_matrix(embed_dim, out, rng),
            bias: uniform_vector(out, embed_dim, rng),
            height,
            width,
        }
    }
}

impl Stage for ImageDecoder {
    fn name(&self) -> &str {
        "image_decoder"
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, TransformError> {
        let z = as_matrix(self.name(), input, self.weights.nrows())?;
        let batch = z.nrows();
        let flat = (z.dot(&self.weights) + &self.bias).mapv(|v| 1.0 / (1.0 + (-v).exp()));
        let image = flat
            .into_shape_with_order((batch, IMAGE_CHANNELS, self.height, self.width))
            .map_err(|e| TransformError::new(self.name(), e.to_string()))?;
        Ok(image.into_dyn())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
