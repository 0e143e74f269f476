//! WebSocket server: accept loop and per-session relay loop.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured host and port.
//! 2. Accepting incoming TCP connections.
//! 3. Upgrading each connection to a WebSocket session.
//! 4. Registering the session (or refusing it when the registry is full).
//! 5. Running the relay loop: one inbound frame at a time, at most one reply
//!    per frame, replies in request order.
//! 6. Closing the socket on fatal errors and deregistering on every exit path.
//! 7. Stopping the accept loop when the `running` flag is cleared.
//!
//! # Concurrency
//!
//! Each session runs in its own Tokio task.  A session awaits each pipeline
//! call before reading its next frame, which keeps its replies ordered, while
//! other sessions keep making progress on other runtime threads.  The heavy
//! work itself is bounded by the [`InferencePool`].
//!
//! # Close codes
//!
//! | Situation                              | Close code            |
//! |----------------------------------------|-----------------------|
//! | protocol error, malformed payload      | 1011 (internal error) |
//! | transform failure under `close` policy | 1011 (internal error) |
//! | `max_sessions` reached                 | 1013 (try again)      |
//!
//! A peer that resets the connection, or disappears while a reply is being
//! sent, gets no close frame: the session just ends and is deregistered.
//! A connection that does not finish the WebSocket upgrade within
//! `handshake_timeout` is dropped without ever being registered.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use relay_core::Pipeline;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message as WsMessage,
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::application::{RelayError, RelayService, SessionId, SessionRegistry};
use crate::domain::config::RelayConfig;
use crate::infrastructure::worker::InferencePool;

/// How long one `accept()` may block before the shutdown flag is re-checked.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

type WsStream = WebSocketStream<TcpStream>;

/// State shared by every session task.
struct RelayState {
    service: RelayService,
    registry: Arc<SessionRegistry>,
    handshake_timeout: Duration,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// A bound, not yet running, relay server.
///
/// Binding and running are separate steps so callers (and tests) can learn
/// the actual port when the configured port is `0`.
pub struct RelayServer {
    listener: TcpListener,
    state: Arc<RelayState>,
}

impl RelayServer {
    /// Binds the listener and builds the shared session state.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be resolved or the port cannot be
    /// bound.
    pub async fn bind(config: &RelayConfig, pipeline: Arc<Pipeline>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .with_context(|| {
                format!(
                    "failed to bind WebSocket listener on {}",
                    config.listen_label()
                )
            })?;

        let pool = InferencePool::new(
            pipeline,
            config.inference_workers,
            config.transform_timeout,
            config.jpeg_quality,
        );
        let service = RelayService::new(
            Arc::new(pool),
            config.unknown_messages,
            config.transform_errors,
        );

        Ok(Self {
            listener,
            state: Arc::new(RelayState {
                service,
                registry: Arc::new(SessionRegistry::new(config.max_sessions)),
                handshake_timeout: config.handshake_timeout,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the live session registry.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.state.registry)
    }

    /// Runs the accept loop until `running` is set to `false`.
    ///
    /// Sessions already in progress are not interrupted by shutdown; they end
    /// when their client disconnects or the runtime is dropped.
    pub async fn run(self, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        match self.listener.local_addr() {
            Ok(addr) => info!("latent relay listening on ws://{addr}"),
            Err(e) => warn!("latent relay listening (address unavailable: {e})"),
        }

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            // A short timeout keeps the loop responsive to the shutdown flag
            // even when nobody is connecting.
            match timeout(ACCEPT_POLL_INTERVAL, self.listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    debug!("new connection from {peer_addr}");
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        handle_connection(stream, peer_addr, state).await;
                    });
                }
                Ok(Err(e)) => {
                    // Transient (e.g. out of file descriptors); keep serving.
                    error!("accept error: {e}");
                }
                Err(_) => {}
            }
        }

        Ok(())
    }
}

/// Binds according to `config` and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(
    config: RelayConfig,
    pipeline: Arc<Pipeline>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    RelayServer::bind(&config, pipeline).await?.run(running).await
}

// ── Per-session handler ───────────────────────────────────────────────────────

/// Entry point of each session task: runs [`run_session`] and logs the outcome.
async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, state: Arc<RelayState>) {
    match run_session(stream, peer_addr, &state).await {
        Ok(()) => info!("session {peer_addr} closed normally"),
        Err(e) => warn!("session {peer_addr} closed with error: {e:#}"),
    }
}

/// Full lifecycle of one connection: handshake, registration, relay loop,
/// close.
///
/// The [`SessionGuard`](crate::application::SessionGuard) returned by the
/// registry lives for the whole relay loop, so deregistration happens on
/// every return path and also if the task is cancelled.
async fn run_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: &RelayState,
) -> anyhow::Result<()> {
    // ── Step 1: Complete the WebSocket handshake ───────────────────────────────
    let mut ws = timeout(state.handshake_timeout, accept_async(stream))
        .await
        .with_context(|| {
            format!(
                "WebSocket handshake with {peer_addr} timed out after {:?}",
                state.handshake_timeout
            )
        })?
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    // ── Step 2: Register the session (or refuse it) ───────────────────────────
    let guard = match state.registry.add(peer_addr) {
        Ok(guard) => guard,
        Err(e) => {
            close_with(&mut ws, CloseCode::Again, "session limit reached").await;
            return Err(e).with_context(|| format!("refusing {peer_addr}"));
        }
    };
    let session = guard.id();
    info!(
        "session {session} opened for {peer_addr} ({} active)",
        state.registry.len()
    );

    // ── Step 3: Relay frames until the client leaves ──────────────────────────
    let outcome = relay_loop(&mut ws, session, &state.service).await;

    // ── Step 4: Close on fatal error and deregister ───────────────────────────
    if outcome.is_err() {
        close_with(&mut ws, CloseCode::Error, "").await;
    }

    drop(guard);
    debug!("session {session} deregistered");
    outcome
}

/// Reads frames until the client goes away or a fatal error occurs.
async fn relay_loop(ws: &mut WsStream, session: SessionId, service: &RelayService) -> anyhow::Result<()> {
    while let Some(frame) = ws.next().await {
        // ── Step 1: Read the next frame ───────────────────────────────────────
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) if is_disconnect(&e) => {
                debug!("session {session}: client went away ({e})");
                return Ok(());
            }
            Err(e) => return Err(e).context("WebSocket read failed"),
        };

        // ── Step 2: Extract the JSON text ─────────────────────────────────────
        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Binary(bytes) => String::from_utf8(bytes).map_err(|e| {
                RelayError::Protocol(format!("binary frame is not valid UTF-8: {e}"))
            })?,
            WsMessage::Close(_) => {
                debug!("session {session}: close frame received");
                return Ok(());
            }
            other => {
                debug!("session {session}: skipping {} frame", frame_kind(&other));
                continue;
            }
        };

        // ── Step 3: Dispatch and send the reply, if any ───────────────────────
        let Some(reply) = service.handle_text(session, &text).await? else {
            continue;
        };
        let json = serde_json::to_string(&reply).context("failed to serialize reply")?;
        match ws.send(WsMessage::Text(json)).await {
            Ok(()) => {}
            Err(e) if is_disconnect(&e) => {
                debug!("session {session}: reply not delivered, client went away ({e})");
                return Ok(());
            }
            Err(e) => return Err(e).context("WebSocket send failed"),
        }
    }

    debug!("session {session}: stream ended");
    Ok(())
}

async fn close_with(ws: &mut WsStream, code: CloseCode, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!("close frame not delivered: {e}");
    }
}

// ── Helper ────────────────────────────────────────────────────────────────────

/// `true` for errors that mean the peer is gone rather than misbehaving.
///
/// These end the session normally; there is nobody left to send a close
/// frame to.
fn is_disconnect(e: &WsError) -> bool {
    matches!(
        e,
        WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Protocol(_) | WsError::Io(_)
    )
}

/// Short name of a WebSocket frame kind, for log messages.
fn frame_kind(frame: &WsMessage) -> &'static str {
    match frame {
        WsMessage::Text(_) => "text",
        WsMessage::Binary(_) => "binary",
        WsMessage::Ping(_) => "ping",
        WsMessage::Pong(_) => "pong",
        WsMessage::Close(_) => "close",
        WsMessage::Frame(_) => "raw",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
