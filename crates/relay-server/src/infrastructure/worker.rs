//! Bounded pool for running the transform pipeline off the async runtime.
//!
//! Encoder and decoder calls are CPU-bound, so each one runs on tokio's
//! blocking thread pool via `spawn_blocking`.  A [`Semaphore`] caps how many
//! run at once; sessions beyond that wait for a permit instead of piling up
//! blocking threads.  The permit moves into the blocking closure, so it is
//! only released when the computation really ends, even after a timeout.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{encode_image, Pipeline, Tensor};
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::application::relay_service::{RenderError, Renderer};

/// Shared renderer backed by a fixed number of blocking workers.
pub struct InferencePool {
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    jpeg_quality: u8,
}

impl InferencePool {
    /// Creates a pool that runs at most `workers` pipeline calls at a time.
    ///
    /// `workers` is clamped to at least 1.
    pub fn new(pipeline: Arc<Pipeline>, workers: usize, timeout: Duration, jpeg_quality: u8) -> Self {
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
            jpeg_quality,
        }
    }

    /// Number of workers currently idle.
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl Renderer for InferencePool {
    fn input_shape(&self) -> Option<&[usize]> {
        self.pipeline.input_shape()
    }

    async fn render(&self, latent: Tensor) -> Result<String, RenderError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| RenderError::Unavailable)?;

        let pipeline = Arc::clone(&self.pipeline);
        let quality = self.jpeg_quality;
        let job = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let rendered = pipeline.run(&latent)?;
            Ok::<_, RenderError>(encode_image(&rendered, quality)?)
        });

        match timeout(self.timeout, job).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                let reason = join_failure(join_err);
                error!("pipeline worker failed: {reason}");
                Err(RenderError::Panicked(reason))
            }
            Err(_) => {
                debug!("pipeline call abandoned after {:?}", self.timeout);
                Err(RenderError::Timeout(self.timeout))
            }
        }
    }
}

fn join_failure(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        "worker task cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
