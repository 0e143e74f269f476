//! Session registry: the set of currently connected clients.
//!
//! Each WebSocket connection registers itself once after the handshake and is
//! removed when its relay loop ends.  Removal is tied to a [`SessionGuard`]
//! whose `Drop` impl deregisters the session, so the registry stays
//! consistent on every exit path, including task cancellation and panics.
//!
//! # Lifecycle
//!
//! ```text
//! handshake ok ──add()──► SessionGuard ──(relay loop)──► guard dropped ──► removed
//!                 │
//!                 └── Err(Full) when max_sessions is reached: never registered
//! ```
//!
//! The registry is the only mutable state shared between sessions, and each
//! session only ever touches its own entry.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

/// Server-side identifier of one connection.
///
/// Not to be confused with the client-supplied `session_id` correlation token
/// inside messages, which the relay never interprets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Registry entry for one live session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer_addr: SocketAddr,
    pub connected_at: Instant,
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    /// The configured `max_sessions` limit is reached.
    #[error("session limit of {limit} reached")]
    Full { limit: usize },
}

/// Thread-safe set of live sessions.
///
/// Shared as `Arc<SessionRegistry>` between the accept loop and every session
/// task.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionInfo>>,
    max_sessions: Option<usize>,
}

impl SessionRegistry {
    /// Creates an empty registry.  `max_sessions = None` means unbounded.
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Registers a new session for `peer_addr`.
    ///
    /// The session stays registered for as long as the returned guard lives.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Full`] when `max_sessions` sessions are
    /// already registered.
    pub fn add(self: &Arc<Self>, peer_addr: SocketAddr) -> Result<SessionGuard, RegistryError> {
        let mut sessions = self.lock();
        if let Some(limit) = self.max_sessions {
            if sessions.len() >= limit {
                return Err(RegistryError::Full { limit });
            }
        }

        let id = SessionId::new();
        sessions.insert(
            id,
            SessionInfo {
                id,
                peer_addr,
                connected_at: Instant::now(),
            },
        );

        Ok(SessionGuard {
            id,
            registry: Arc::clone(self),
        })
    }

    /// Removes a session.  Idempotent: returns `false` if it was not present.
    pub fn remove(&self, id: SessionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns a copy of every live entry, in no particular order.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.lock().values().cloned().collect()
    }

    pub fn max_sessions(&self) -> Option<usize> {
        self.max_sessions
    }

    // A panic while holding the lock cannot leave the map half-updated, so a
    // poisoned mutex is still safe to use.
    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SessionInfo>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped registry membership.  Dropping the guard deregisters the session.
#[derive(Debug)]
pub struct SessionGuard {
    id: SessionId,
    registry: Arc<SessionRegistry>,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_add_registers_session() {
        // Arrange
        let registry = Arc::new(SessionRegistry::new(None));

        // Act
        let guard = registry.add(addr(5000)).unwrap();

        // Assert
        assert!(registry.contains(guard.id()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].peer_addr, addr(5000));
    }

    #[test]
    fn test_dropping_guard_deregisters_session() {
        let registry = Arc::new(SessionRegistry::new(None));
        let guard = registry.add(addr(5000)).unwrap();
        let id = guard.id();

        drop(guard);

        assert!(!registry.contains(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = Arc::new(SessionRegistry::new(None));
        let guard = registry.add(addr(5000)).unwrap();
        let id = guard.id();

        assert!(registry.remove(id), "first removal finds the session");
        assert!(!registry.remove(id), "second removal is a no-op");

        // The guard's own removal on drop must not panic or disturb others.
        let other = registry.add(addr(5001)).unwrap();
        drop(guard);
        assert!(registry.contains(other.id()));
    }

    #[test]
    fn test_each_session_gets_a_distinct_id() {
        let registry = Arc::new(SessionRegistry::new(None));
        let a = registry.add(addr(5000)).unwrap();
        let b = registry.add(addr(5000)).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_add_fails_when_full() {
        // Arrange
        let registry = Arc::new(SessionRegistry::new(Some(2)));
        let _a = registry.add(addr(1)).unwrap();
        let _b = registry.add(addr(2)).unwrap();

        // Act
        let result = registry.add(addr(3));

        // Assert
        assert_eq!(result.unwrap_err(), RegistryError::Full { limit: 2 });
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_capacity_is_freed_when_session_ends() {
        let registry = Arc::new(SessionRegistry::new(Some(1)));
        let first = registry.add(addr(1)).unwrap();
        assert!(registry.add(addr(2)).is_err());

        drop(first);

        assert!(registry.add(addr(2)).is_ok());
    }

    #[test]
    fn test_guard_removes_session_when_thread_panics() {
        let registry = Arc::new(SessionRegistry::new(None));
        let r = Arc::clone(&registry);

        let result = thread::spawn(move || {
            let _guard = r.add(addr(9)).unwrap();
            panic!("session task blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(registry.is_empty(), "guard must deregister during unwinding");
    }

    #[test]
    fn test_concurrent_sessions_leave_registry_empty() {
        // Arrange
        let registry = Arc::new(SessionRegistry::new(None));

        // Act: many threads register and deregister concurrently
        let handles: Vec<_> = (0..16u16)
            .map(|i| {
                let r = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let guard = r.add(addr(6000 + i)).unwrap();
                        assert!(r.contains(guard.id()));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread panicked");
        }

        // Assert
        assert!(registry.is_empty());
    }

    #[test]
    fn test_session_id_display_is_uuid() {
        let id = SessionId::new();
        assert_eq!(id.to_string().len(), 36);
    }
}
