//! Application layer for relay-server.
//!
//! The application layer decides *what* happens to each message, but
//! delegates *how* a latent is rendered to the infrastructure layer through
//! the [`Renderer`] trait.
//!
//! # Responsibilities
//!
//! - Dispatching inbound JSON messages and applying the configured policies
//! - Tracking live sessions in the [`SessionRegistry`]
//! - Defining the `RelayError` and `RenderError` types
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or WebSocket framing (that is infrastructure)
//! - Thread pools, timeouts, and task spawning (also infrastructure)

pub mod registry;
pub mod relay_service;

pub use registry::{RegistryError, SessionGuard, SessionId, SessionInfo, SessionRegistry};
pub use relay_service::{RelayError, RelayService, RenderError, Renderer};
