//! relay-server library crate.
//!
//! A WebSocket relay that turns latent vectors into JPEG images.  Clients
//! send `waveform_latent` messages; the relay runs them through an encoder
//! and a decoder and answers with a `reconstructed_image` carrying a
//! base64 data URI.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Client (JSON over WebSocket)
//!         ↕
//! [relay-server]
//!   ├── domain/           Pure types: JSON message enums, RelayConfig, policies
//!   ├── application/      Message dispatch, session registry, Renderer trait
//!   └── infrastructure/
//!         ├── ws_server/  Accept loop and per-session relay loop (tokio-tungstenite)
//!         ├── worker/     Bounded blocking pool that runs the pipeline
//!         └── config_file/ Optional TOML configuration
//!         ↕
//! [relay-core]            Tensor codec and encoder/decoder pipeline
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `relay-core` only.
//! - `infrastructure` depends on all other layers plus `tokio` and `tungstenite`.

/// Domain layer: pure types (no I/O).
pub mod domain;

/// Application layer: per-message dispatch and session tracking.
pub mod application;

/// Infrastructure layer: WebSocket server, worker pool, config file.
pub mod infrastructure;
