//! Domain layer for relay-server.
//!
//! Pure types with no I/O: the JSON wire messages and the relay
//! configuration.  Nothing in here touches `tokio`, sockets, or the file
//! system, so everything can be tested in isolation.

pub mod config;
pub mod messages;

pub use config::{InvalidConfig, RelayConfig, TransformErrorPolicy, UnknownMessagePolicy};
pub use messages::{ErrorCode, InboundFrame, InboundMessage, OutboundMessage};
