//! The two-stage transform pipeline: encoder, then decoder.
//!
//! Stages are black boxes supplied at startup.  The relay only ever calls
//! [`Pipeline::run`], which is `decode(encode(input))`.
//!
//! # Sharing
//!
//! A `Pipeline` is built once and wrapped in an `Arc` by the server, so every
//! session reads the same parameters.  [`Stage`] therefore requires
//! `Send + Sync` and takes `&self`: stages must not mutate shared state
//! during inference.

use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::tensor::{shape_string, Tensor};

/// Failure raised by a pipeline stage during inference.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{stage} stage failed: {message}")]
pub struct TransformError {
    /// Name of the stage that failed (see [`Stage::name`]).
    pub stage: String,
    /// Human-readable description of the failure.
    pub message: String,
}

impl TransformError {
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// One black-box transformation `Tensor -> Tensor`.
#[cfg_attr(test, mockall::automock)]
pub trait Stage: Send + Sync {
    /// Short name used in logs and in [`TransformError::stage`].
    fn name(&self) -> &str;

    /// Runs the stage on a batched input tensor.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] when the input cannot be processed (wrong
    /// shape, numerical failure, backend error).
    fn forward(&self, input: &Tensor) -> Result<Tensor, TransformError>;
}

/// Adapts a closure into a [`Stage`].
///
/// # Examples
///
/// ```rust
/// use relay_core::{FnStage, Stage, Tensor, TransformError};
/// use relay_core::tensor::filled;
///
/// let double = FnStage::new("double", |t: &Tensor| -> Result<Tensor, TransformError> {
///     Ok(t.mapv(|v| v * 2.0))
/// });
/// let out = double.forward(&filled(&[1, 2], 1.5)).unwrap();
/// assert!(out.iter().all(|&v| v == 3.0));
/// ```
pub struct FnStage<F> {
    name: String,
    f: F,
}

impl<F> FnStage<F>
where
    F: Fn(&Tensor) -> Result<Tensor, TransformError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Stage for FnStage<F>
where
    F: Fn(&Tensor) -> Result<Tensor, TransformError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, TransformError> {
        (self.f)(input)
    }
}

/// Encoder and decoder composed sequentially.
pub struct Pipeline {
    encoder: Box<dyn Stage>,
    decoder: Box<dyn Stage>,
    /// Per-sample input shape the encoder expects, without the batch axis.
    input_shape: Option<Vec<usize>>,
}

impl Pipeline {
    /// Builds a pipeline with no declared input shape.
    ///
    /// Without a declared shape, any rectangular payload is handed to the
    /// encoder and shape problems surface as [`TransformError`]s instead of
    /// malformed-payload errors.
    pub fn new(encoder: impl Stage + 'static, decoder: impl Stage + 'static) -> Self {
        Self {
            encoder: Box::new(encoder),
            decoder: Box::new(decoder),
            input_shape: None,
        }
    }

    /// Declares the per-sample shape the encoder accepts.
    pub fn with_input_shape(mut self, shape: Vec<usize>) -> Self {
        self.input_shape = Some(shape);
        self
    }

    pub fn input_shape(&self) -> Option<&[usize]> {
        self.input_shape.as_deref()
    }

    /// Runs the encoder stage only.
    pub fn encode(&self, input: &Tensor) -> Result<Tensor, TransformError> {
        self.encoder.forward(input)
    }

    /// Runs the decoder stage only.
    pub fn decode(&self, embedding: &Tensor) -> Result<Tensor, TransformError> {
        self.decoder.forward(embedding)
    }

    /// Runs `decode(encode(input))`.
    ///
    /// # Errors
    ///
    /// Returns the first [`TransformError`] raised by either stage; the
    /// decoder is not called when the encoder fails.
    pub fn run(&self, input: &Tensor) -> Result<Tensor, TransformError> {
        let embedding = self.encode(input)?;
        debug!(
            "{}: {} -> {}",
            self.encoder.name(),
            shape_string(input.shape()),
            shape_string(embedding.shape())
        );
        let output = self.decode(&embedding)?;
        debug!(
            "{}: {} -> {}",
            self.decoder.name(),
            shape_string(embedding.shape()),
            shape_string(output.shape())
        );
        Ok(output)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("encoder", &self.encoder.name())
            .field("decoder", &self.decoder.name())
            .field("input_shape", &self.input_shape)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
