//! Per-message dispatch for the relay loop.
//!
//! [`RelayService::handle_text`] takes one inbound text frame and decides what,
//! if anything, goes back to the client:
//!
//! ```text
//! text ──parse──► InboundFrame { message, session_id }
//!   WaveformLatent ──decode_latent──► Tensor ──Renderer──► data URI ──► ReconstructedImage
//!   Unrecognized   ──policy──► nothing | Error(unsupported_type)
//! ```
//!
//! Errors returned from `handle_text` are connection-fatal; the
//! infrastructure layer closes the socket when it sees one.  Recoverable
//! outcomes (per the configured policies) come back as `Ok(Some(Error{..}))`.
//!
//! Rendering itself is behind the [`Renderer`] trait so this module stays
//! free of thread pools and timers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{decode_latent, CodecError, Tensor, TransformError};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::registry::SessionId;
use crate::domain::config::{TransformErrorPolicy, UnknownMessagePolicy};
use crate::domain::messages::{ErrorCode, InboundFrame, InboundMessage, OutboundMessage};

// ── Error types ───────────────────────────────────────────────────────────────

/// Why a latent could not be turned into an image.
///
/// Every variant counts as a transform failure for
/// [`TransformErrorPolicy`] purposes.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The encoder or decoder returned an error.
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// The decoder output could not be turned into a JPEG.
    #[error("rendered tensor could not be encoded: {0}")]
    Encoding(#[from] CodecError),

    /// The pipeline call did not finish within the configured bound.
    #[error("pipeline call exceeded {0:?}")]
    Timeout(Duration),

    /// A stage panicked.
    #[error("pipeline call panicked: {0}")]
    Panicked(String),

    /// The worker pool is shutting down.
    #[error("inference workers unavailable")]
    Unavailable,
}

/// Connection-fatal failures while handling one message.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The frame is not a JSON object with a string `type`, or a known type
    /// is missing a required field.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The `payload` is not a numeric tensor of the expected shape.
    #[error(transparent)]
    MalformedPayload(CodecError),

    /// Rendering failed and the policy is [`TransformErrorPolicy::Close`].
    #[error("transform failed: {0}")]
    Transform(#[source] RenderError),
}

// ── Renderer seam ─────────────────────────────────────────────────────────────

/// Turns a batched latent tensor into a data-URI JPEG string.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Per-sample input shape the pipeline expects, if it declares one.
    fn input_shape(&self) -> Option<&[usize]>;

    /// Runs encoder, decoder, and image encoding for one latent.
    async fn render(&self, latent: Tensor) -> Result<String, RenderError>;
}

// ── Service ───────────────────────────────────────────────────────────────────

/// Stateless message handler shared by every session.
pub struct RelayService {
    renderer: Arc<dyn Renderer>,
    unknown_messages: UnknownMessagePolicy,
    transform_errors: TransformErrorPolicy,
}

impl RelayService {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        unknown_messages: UnknownMessagePolicy,
        transform_errors: TransformErrorPolicy,
    ) -> Self {
        Self {
            renderer,
            unknown_messages,
            transform_errors,
        }
    }

    /// Handles one inbound text frame.
    ///
    /// Returns `Ok(None)` when nothing should be sent back.
    ///
    /// # Errors
    ///
    /// Any [`RelayError`] means the connection must be closed.
    pub async fn handle_text(
        &self,
        session: SessionId,
        text: &str,
    ) -> Result<Option<OutboundMessage>, RelayError> {
        let frame = InboundFrame::parse(text).map_err(|e| RelayError::Protocol(e.to_string()))?;

        match frame.message {
            InboundMessage::WaveformLatent {
                session_id,
                payload,
            } => self.handle_latent(session, session_id, &payload).await.map(Some),
            InboundMessage::Unrecognized => Ok(self.handle_unrecognized(session, frame.session_id)),
        }
    }

    async fn handle_latent(
        &self,
        session: SessionId,
        session_id: Value,
        payload: &Value,
    ) -> Result<OutboundMessage, RelayError> {
        let latent = decode_latent(payload, self.renderer.input_shape())
            .map_err(RelayError::MalformedPayload)?;
        debug!("session {session}: waveform_latent {:?}", latent.shape());

        match self.renderer.render(latent).await {
            Ok(image_base64) => Ok(OutboundMessage::ReconstructedImage {
                session_id,
                image_base64,
            }),
            Err(e) => match self.transform_errors {
                TransformErrorPolicy::Close => Err(RelayError::Transform(e)),
                TransformErrorPolicy::Report => {
                    warn!("session {session}: reporting transform failure: {e}");
                    Ok(OutboundMessage::Error {
                        session_id,
                        code: ErrorCode::TransformFailed,
                        message: e.to_string(),
                    })
                }
            },
        }
    }

    fn handle_unrecognized(&self, session: SessionId, session_id: Value) -> Option<OutboundMessage> {
        match self.unknown_messages {
            UnknownMessagePolicy::Ignore => {
                debug!("session {session}: ignoring unrecognized message type");
                None
            }
            UnknownMessagePolicy::Reject => Some(OutboundMessage::Error {
                session_id,
                code: ErrorCode::UnsupportedType,
                message: "unsupported message type".to_string(),
            }),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
