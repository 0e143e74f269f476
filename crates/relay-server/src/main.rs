//! Latent relay: entry point.
//!
//! This binary listens for WebSocket clients that send latent vectors
//! (`waveform_latent` messages), renders each one through the encoder and
//! decoder, and sends the result back as a base64 JPEG data URI
//! (`reconstructed_image`).
//!
//! # Usage
//!
//! ```text
//! relay-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>                 Optional TOML configuration file
//!   --host <HOST>                   Listen host [default: localhost]
//!   --port <PORT>                   Listen port [default: 8766]
//!   --max-sessions <N>              Session limit [default: unbounded]
//!   --workers <N>                   Concurrent pipeline calls [default: 4]
//!   --transform-timeout <SECS>      Bound on one pipeline call [default: 30]
//!   --handshake-timeout <SECS>      Bound on the WebSocket upgrade [default: 10]
//!   --jpeg-quality <1-100>          JPEG quality [default: 75]
//!   --unknown-messages <POLICY>     ignore | reject [default: ignore]
//!   --transform-errors <POLICY>     close | report [default: close]
//! ```
//!
//! # Precedence
//!
//! Built-in defaults, then the `--config` file, then flags.  Every flag can
//! also be given as an environment variable; an explicit flag beats its
//! variable.
//!
//! | Variable                  | Flag                  |
//! |---------------------------|-----------------------|
//! | `RELAY_CONFIG`            | `--config`            |
//! | `RELAY_HOST`              | `--host`              |
//! | `RELAY_PORT`              | `--port`              |
//! | `RELAY_MAX_SESSIONS`      | `--max-sessions`      |
//! | `RELAY_WORKERS`           | `--workers`           |
//! | `RELAY_TRANSFORM_TIMEOUT` | `--transform-timeout` |
//! | `RELAY_HANDSHAKE_TIMEOUT` | `--handshake-timeout` |
//! | `RELAY_JPEG_QUALITY`      | `--jpeg-quality`      |
//! | `RELAY_UNKNOWN_MESSAGES`  | `--unknown-messages`  |
//! | `RELAY_TRANSFORM_ERRORS`  | `--transform-errors`  |
//!
//! Log verbosity comes from `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relay_core::reference_pipeline;
use relay_server::domain::{RelayConfig, TransformErrorPolicy, UnknownMessagePolicy};
use relay_server::infrastructure::{run_server, ConfigFile};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket relay that renders latent vectors into JPEG images.
///
/// Every option is optional; anything left out falls back to the config file
/// (if given) and then to the built-in default.
#[derive(Debug, Parser)]
#[command(
    name = "relay-server",
    about = "WebSocket relay that renders latent vectors into JPEG images",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Host name or IP address to listen on.
    #[arg(long, env = "RELAY_HOST")]
    host: Option<String>,

    /// TCP port for the WebSocket endpoint (`0` picks a free port).
    #[arg(long, env = "RELAY_PORT")]
    port: Option<u16>,

    /// Maximum number of simultaneous sessions.
    #[arg(long, env = "RELAY_MAX_SESSIONS")]
    max_sessions: Option<usize>,

    /// Number of pipeline calls allowed to run at once.
    #[arg(long, env = "RELAY_WORKERS")]
    workers: Option<usize>,

    /// Upper bound on one pipeline call, in seconds.
    #[arg(long, env = "RELAY_TRANSFORM_TIMEOUT")]
    transform_timeout: Option<u64>,

    /// Time a new connection gets to finish the WebSocket upgrade, in seconds.
    #[arg(long, env = "RELAY_HANDSHAKE_TIMEOUT")]
    handshake_timeout: Option<u64>,

    /// JPEG quality of rendered images (1-100).
    #[arg(long, env = "RELAY_JPEG_QUALITY")]
    jpeg_quality: Option<u8>,

    /// What to do with messages of an unknown type: ignore | reject.
    #[arg(long, env = "RELAY_UNKNOWN_MESSAGES")]
    unknown_messages: Option<UnknownMessagePolicy>,

    /// What to do when the pipeline fails: close | report.
    #[arg(long, env = "RELAY_TRANSFORM_ERRORS")]
    transform_errors: Option<TransformErrorPolicy>,
}

impl Cli {
    /// Layers defaults, the config file, and CLI values into a validated
    /// [`RelayConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the resulting configuration is invalid.
    fn into_relay_config(self) -> anyhow::Result<RelayConfig> {
        let mut config = RelayConfig::default();

        if let Some(path) = &self.config {
            ConfigFile::load(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?
                .apply_to(&mut config);
        }

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.max_sessions.is_some() {
            config.max_sessions = self.max_sessions;
        }
        if let Some(workers) = self.workers {
            config.inference_workers = workers;
        }
        if let Some(secs) = self.transform_timeout {
            config.transform_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.handshake_timeout {
            config.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(quality) = self.jpeg_quality {
            config.jpeg_quality = quality;
        }
        if let Some(policy) = self.unknown_messages {
            config.unknown_messages = policy;
        }
        if let Some(policy) = self.transform_errors {
            config.transform_errors = policy;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// 1. `tracing_subscriber` is initialised from `RUST_LOG` (default `info`).
/// 2. CLI arguments, env vars, and the optional config file become a
///    [`RelayConfig`].
/// 3. The reference pipeline is built from `config.model`.
/// 4. A Ctrl+C handler clears a shared `AtomicBool`.
/// 5. [`run_server`] accepts clients until that flag is cleared.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_relay_config()?;

    info!(
        "latent relay starting on {} (workers={}, max_sessions={}, unknown_messages={}, transform_errors={})",
        config.listen_label(),
        config.inference_workers,
        config
            .max_sessions
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string()),
        config.unknown_messages,
        config.transform_errors,
    );

    let pipeline = Arc::new(reference_pipeline(&config.model));
    info!("pipeline ready: {pipeline:?}");

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, pipeline, running).await?;

    info!("latent relay stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["relay-server"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_no_arguments_yields_defaults() {
        // Arrange
        let cli = cli(&[]);

        // Act
        let config = cli.into_relay_config().unwrap();

        // Assert
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_port_override() {
        let config = cli(&["--port", "9999"]).into_relay_config().unwrap();
        assert_eq!(config.port, 9999);
    }

    #[test]
    fn test_host_override() {
        let config = cli(&["--host", "0.0.0.0"]).into_relay_config().unwrap();
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_worker_and_timeout_overrides() {
        let config = cli(&["--workers", "2", "--transform-timeout", "7"])
            .into_relay_config()
            .unwrap();
        assert_eq!(config.inference_workers, 2);
        assert_eq!(config.transform_timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_handshake_timeout_override() {
        let config = cli(&["--handshake-timeout", "3"]).into_relay_config().unwrap();
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_zero_handshake_timeout_is_rejected() {
        let result = cli(&["--handshake-timeout", "0"]).into_relay_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_policy_flags_parse() {
        let config = cli(&["--unknown-messages", "reject", "--transform-errors", "report"])
            .into_relay_config()
            .unwrap();
        assert_eq!(config.unknown_messages, UnknownMessagePolicy::Reject);
        assert_eq!(config.transform_errors, TransformErrorPolicy::Report);
    }

    #[test]
    fn test_unknown_policy_value_is_a_parse_error() {
        let result = Cli::try_parse_from(["relay-server", "--transform-errors", "retry"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let result = cli(&["--workers", "0"]).into_relay_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_out_of_range_jpeg_quality_is_rejected() {
        let result = cli(&["--jpeg-quality", "0"]).into_relay_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let result = cli(&["--config", "/nonexistent/relay.toml"]).into_relay_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        // Arrange: file sets port and quality; the flag overrides only the port
        let path = std::env::temp_dir().join(format!("relay-cli-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[server]\nport = 7000\njpeg_quality = 50\n").unwrap();
        let path_arg = path.to_string_lossy().into_owned();

        // Act
        let result = cli(&["--config", &path_arg, "--port", "7001"]).into_relay_config();
        let _ = std::fs::remove_file(&path);

        // Assert
        let config = result.unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.jpeg_quality, 50);
    }
}
