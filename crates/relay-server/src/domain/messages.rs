//! JSON message types for the client-facing WebSocket protocol.
//!
//! # Message flow
//!
//! ```text
//! Client → Relay: JSON text frame → InboundMessage
//! Relay → Client: OutboundMessage → JSON text frame
//! ```
//!
//! # JSON discriminant
//!
//! Every message is a JSON object with a `"type"` field that identifies the
//! variant; the remaining fields sit next to it:
//!
//! ```json
//! {"type":"waveform_latent","session_id":"abc123","payload":[0.1,0.2,0.3]}
//! {"type":"reconstructed_image","session_id":"abc123","image_base64":"data:image/jpeg;base64,..."}
//! ```
//!
//! Serde's `#[serde(tag = "type")]` attribute handles this automatically.
//! Inbound messages with any other `type` string deserialize to
//! [`InboundMessage::Unrecognized`] rather than failing, so newer clients can
//! talk to this relay.
//!
//! # Correlation token
//!
//! `session_id` belongs to the client.  It is kept as raw JSON and echoed back
//! unchanged, whether it is a string, a number, or anything else.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Client → Relay ────────────────────────────────────────────────────────────

/// All messages a client can send to the relay.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// A latent vector to render.
    #[serde(rename = "waveform_latent")]
    WaveformLatent {
        /// Client-chosen correlation token, echoed back verbatim.
        session_id: Value,
        /// Flat or nested numeric array.  Kept as raw JSON here; the codec
        /// decides whether it is a usable tensor.
        payload: Value,
    },

    /// Any other `type` value.  Its `session_id` survives on [`InboundFrame`].
    #[serde(other)]
    Unrecognized,
}

/// One parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub message: InboundMessage,
    /// The frame's top-level `session_id`, or `null` when it has none.  Kept
    /// separately because [`InboundMessage::Unrecognized`] drops every field.
    pub session_id: Value,
}

impl InboundFrame {
    /// Parses a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the text is not JSON, is not an
    /// object with a string `type`, or lacks a field its type requires.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_str(text)?;
        let message = InboundMessage::deserialize(&raw)?;
        let session_id = raw.get("session_id").cloned().unwrap_or(Value::Null);
        Ok(Self {
            message,
            session_id,
        })
    }
}

// ── Relay → Client ────────────────────────────────────────────────────────────

/// All messages the relay sends to a client.
///
/// `Error` is only ever sent when an opt-in policy asks for it (see
/// [`crate::domain::config::UnknownMessagePolicy::Reject`] and
/// [`crate::domain::config::TransformErrorPolicy::Report`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// The rendered image for one `waveform_latent` request.
    ReconstructedImage {
        session_id: Value,
        /// `data:image/jpeg;base64,...`
        image_base64: String,
    },

    /// A request could not be served; the connection stays open.
    Error {
        /// The inbound `session_id`, or `null` when the request carried none.
        session_id: Value,
        code: ErrorCode,
        /// Human-readable description (for logging; not meant for end users).
        message: String,
    },
}

/// Machine-readable reason carried by [`OutboundMessage::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The inbound `type` is not handled by this relay.
    UnsupportedType,
    /// The encoder, decoder, or image encoder failed or timed out.
    TransformFailed,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
