//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! It is assembled in `main.rs` from defaults, an optional TOML file, and CLI
//! flags, validated once, and then shared read-only across session tasks.
//!
//! The two policy enums make the relay's tolerance explicit:
//!
//! - [`UnknownMessagePolicy`]: what to do with messages whose `type` the
//!   relay does not handle.
//! - [`TransformErrorPolicy`]: whether a failed pipeline call costs the
//!   client its connection.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use relay_core::codec::DEFAULT_JPEG_QUALITY;
use relay_core::ModelConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the relay does with a message of an unrecognised `type`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownMessagePolicy {
    /// Drop the message without a reply; the connection stays open.
    #[default]
    Ignore,
    /// Reply with an `error` message (`unsupported_type`); the connection
    /// stays open.
    Reject,
}

/// What the relay does when the encoder or decoder fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformErrorPolicy {
    /// Close the connection without explanation.
    #[default]
    Close,
    /// Reply with an `error` message (`transform_failed`) and keep the
    /// connection open.
    Report,
}

impl fmt::Display for UnknownMessagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ignore => "ignore",
            Self::Reject => "reject",
        })
    }
}

impl FromStr for UnknownMessagePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown policy '{other}' (expected ignore|reject)")),
        }
    }
}

impl fmt::Display for TransformErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Close => "close",
            Self::Report => "report",
        })
    }
}

impl FromStr for TransformErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "close" => Ok(Self::Close),
            "report" => Ok(Self::Report),
            other => Err(format!("unknown policy '{other}' (expected close|report)")),
        }
    }
}

/// A configuration value that cannot be used.
#[derive(Debug, Error, PartialEq)]
pub enum InvalidConfig {
    #[error("inference_workers must be at least 1")]
    NoWorkers,

    #[error("max_sessions must be at least 1 when set")]
    ZeroSessionLimit,

    #[error("jpeg_quality must be in 1..=100, got {0}")]
    JpegQuality(u8),

    #[error("transform_timeout must be non-zero")]
    ZeroTimeout,

    #[error("handshake_timeout must be non-zero")]
    ZeroHandshakeTimeout,

    #[error("model dimension '{0}' must be non-zero")]
    ZeroModelDimension(&'static str),

    #[error("model dimension '{0}' is {1}, above the JPEG limit of {max}", max = MAX_IMAGE_SIDE)]
    ImageTooLarge(&'static str, usize),
}

/// Largest image side a JPEG can carry.
pub const MAX_IMAGE_SIDE: usize = u16::MAX as usize;

/// All runtime configuration for the relay.
///
/// # Example
///
/// ```rust
/// use relay_server::domain::RelayConfig;
///
/// let cfg = RelayConfig::default();
/// assert_eq!(cfg.port, 8766);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Host name or IP address to listen on.  Host names are resolved at
    /// bind time.
    pub host: String,

    /// TCP port of the WebSocket endpoint.  `0` picks an ephemeral port.
    pub port: u16,

    /// Maximum number of concurrently registered sessions.  `None` means
    /// unbounded.
    pub max_sessions: Option<usize>,

    /// Number of pipeline calls allowed to run at once across all sessions.
    pub inference_workers: usize,

    /// Upper bound on one pipeline call (encoder + decoder + JPEG encoding).
    pub transform_timeout: Duration,

    /// How long a new TCP connection may take to complete the WebSocket
    /// upgrade before it is dropped.
    pub handshake_timeout: Duration,

    /// JPEG quality for rendered images (1-100).
    pub jpeg_quality: u8,

    pub unknown_messages: UnknownMessagePolicy,

    pub transform_errors: TransformErrorPolicy,

    /// Dimensions of the reference pipeline built at startup.
    pub model: ModelConfig,
}

impl Default for RelayConfig {
    /// | Field             | Default     |
    /// |-------------------|-------------|
    /// | host              | `localhost` |
    /// | port              | `8766`      |
    /// | max_sessions      | unbounded   |
    /// | inference_workers | 4           |
    /// | transform_timeout | 30 seconds  |
    /// | handshake_timeout | 10 seconds  |
    /// | jpeg_quality      | 75          |
    /// | unknown_messages  | `ignore`    |
    /// | transform_errors  | `close`     |
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8766,
            max_sessions: None,
            inference_workers: 4,
            transform_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            unknown_messages: UnknownMessagePolicy::default(),
            transform_errors: TransformErrorPolicy::default(),
            model: ModelConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Checks every field that has a restricted range.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvalidConfig`] found.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.inference_workers == 0 {
            return Err(InvalidConfig::NoWorkers);
        }
        if self.max_sessions == Some(0) {
            return Err(InvalidConfig::ZeroSessionLimit);
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(InvalidConfig::JpegQuality(self.jpeg_quality));
        }
        if self.transform_timeout.is_zero() {
            return Err(InvalidConfig::ZeroTimeout);
        }
        if self.handshake_timeout.is_zero() {
            return Err(InvalidConfig::ZeroHandshakeTimeout);
        }
        let dims = [
            ("latent_dim", self.model.latent_dim),
            ("embed_dim", self.model.embed_dim),
            ("image_height", self.model.image_height),
            ("image_width", self.model.image_width),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(InvalidConfig::ZeroModelDimension(name));
            }
        }
        // Bounding both sides also keeps `3 * height * width` from overflowing.
        let sides = [
            ("image_height", self.model.image_height),
            ("image_width", self.model.image_width),
        ];
        for (name, value) in sides {
            if value > MAX_IMAGE_SIDE {
                return Err(InvalidConfig::ImageTooLarge(name, value));
            }
        }
        Ok(())
    }

    /// Returns `host:port` for log messages.
    pub fn listen_label(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
