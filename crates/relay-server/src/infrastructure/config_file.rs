//! Optional TOML configuration file.
//!
//! Every key is optional; anything left out keeps the value it already had
//! (the built-in default, unless something earlier set it).  Command-line
//! flags and environment variables are applied after the file, so they win.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8766
//! max_sessions = 64
//! inference_workers = 4
//! transform_timeout_secs = 30
//! handshake_timeout_secs = 10
//! jpeg_quality = 75
//!
//! [policy]
//! unknown_messages = "ignore"   # or "reject"
//! transform_errors = "close"    # or "report"
//!
//! [model]
//! latent_dim = 128
//! embed_dim = 64
//! image_height = 64
//! image_width = 64
//! seed = 42
//! ```
//!
//! Unknown keys in `[server]` and `[policy]` are rejected so typos do not go
//! unnoticed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_core::ModelConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::{RelayConfig, TransformErrorPolicy, UnknownMessagePolicy};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── File schema ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerSection,
    pub policy: PolicySection,
    /// A present `[model]` table replaces the whole model config; missing
    /// keys inside it take the model defaults.
    pub model: Option<ModelConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_sessions: Option<usize>,
    pub inference_workers: Option<usize>,
    pub transform_timeout_secs: Option<u64>,
    pub handshake_timeout_secs: Option<u64>,
    pub jpeg_quality: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicySection {
    pub unknown_messages: Option<UnknownMessagePolicy>,
    pub transform_errors: Option<TransformErrorPolicy>,
}

impl ConfigFile {
    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read (including when
    /// it does not exist) and [`ConfigError::Parse`] if the TOML is malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed or has
    /// unknown keys.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Overwrites every field of `config` that this file sets.
    pub fn apply_to(&self, config: &mut RelayConfig) {
        let server = &self.server;
        if let Some(host) = &server.host {
            config.host = host.clone();
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if server.max_sessions.is_some() {
            config.max_sessions = server.max_sessions;
        }
        if let Some(workers) = server.inference_workers {
            config.inference_workers = workers;
        }
        if let Some(secs) = server.transform_timeout_secs {
            config.transform_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = server.handshake_timeout_secs {
            config.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(quality) = server.jpeg_quality {
            config.jpeg_quality = quality;
        }

        if let Some(policy) = self.policy.unknown_messages {
            config.unknown_messages = policy;
        }
        if let Some(policy) = self.policy.transform_errors {
            config.transform_errors = policy;
        }

        if let Some(model) = &self.model {
            config.model = model.clone();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
