//! Infrastructure layer for relay-server.
//!
//! Everything that touches the outside world lives here: the TCP listener
//! and WebSocket sessions, the blocking worker pool that runs the pipeline,
//! and reading the optional TOML configuration file.
//!
//! # What does NOT belong here?
//!
//! - Message dispatch and policy decisions (that is the application layer)
//! - Message type definitions (that is the domain layer)

pub mod config_file;
pub mod worker;
pub mod ws_server;

pub use config_file::{ConfigError, ConfigFile};
pub use worker::InferencePool;
pub use ws_server::{run_server, RelayServer};
