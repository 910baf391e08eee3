//! Connection identity registry
//!
//! Associates every live connection with a session identifier generated at
//! connect time. The entry lives from the connect event until the close event
//! has been fully dispatched.

use std::fmt;

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ConnectionId, WsConnection};
use crate::ws::{DispatchError, DispatchResult};

/// Opaque, process-unique identifier of a connection's session
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

/// Concurrent map of live connections to their session identifiers
///
/// Sharded, so operations on distinct connections do not contend.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, SessionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Generate and store a fresh session identifier for a connection
    pub fn register(&self, connection: &WsConnection) -> SessionId {
        let session_id = SessionId::new();
        if let Some(previous) = self.sessions.insert(connection.id(), session_id) {
            warn!(
                connection = %connection.id(),
                %previous,
                "Connection registered twice, replacing its session id"
            );
        }
        debug!(connection = %connection.id(), %session_id, "Session registered");
        session_id
    }

    /// Look up the session identifier of a registered connection
    pub fn lookup(&self, connection: &WsConnection) -> DispatchResult<SessionId> {
        self.sessions
            .get(&connection.id())
            .map(|entry| *entry.value())
            .ok_or(DispatchError::UnknownConnection(connection.id()))
    }

    /// Forget a connection; removing an absent connection is a no-op
    pub fn remove(&self, connection: &WsConnection) -> Option<SessionId> {
        let removed = self.sessions.remove(&connection.id()).map(|(_, id)| id);
        if let Some(session_id) = removed {
            debug!(connection = %connection.id(), %session_id, "Session removed");
        }
        removed
    }

    pub fn contains(&self, connection: &WsConnection) -> bool {
        self.sessions.contains_key(&connection.id())
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn connection() -> WsConnection {
        let (tx, _rx) = mpsc::unbounded_channel();
        WsConnection::new("/room/5", tx)
    }

    #[test]
    fn test_lookup_after_register() {
        let registry = SessionRegistry::new();
        let conn = connection();
        let id = registry.register(&conn);

        assert_eq!(registry.lookup(&conn).unwrap(), id);
        assert_eq!(registry.lookup(&conn.clone()).unwrap(), id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_unknown_connection() {
        let registry = SessionRegistry::new();
        let conn = connection();
        let result = registry.lookup(&conn);
        assert!(matches!(result, Err(DispatchError::UnknownConnection(id)) if id == conn.id()));
    }

    #[test]
    fn test_lookup_fails_after_remove() {
        let registry = SessionRegistry::new();
        let conn = connection();
        let id = registry.register(&conn);

        assert_eq!(registry.remove(&conn), Some(id));
        assert!(matches!(
            registry.lookup(&conn),
            Err(DispatchError::UnknownConnection(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let conn = connection();
        registry.register(&conn);

        assert!(registry.remove(&conn).is_some());
        assert!(registry.remove(&conn).is_none());
        assert!(registry.remove(&connection()).is_none());
    }

    #[test]
    fn test_reregister_replaces_id() {
        let registry = SessionRegistry::new();
        let conn = connection();
        let first = registry.register(&conn);
        let second = registry.register(&conn);

        assert_ne!(first, second);
        assert_eq!(registry.lookup(&conn).unwrap(), second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_registration_is_race_free() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 250;

        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..PER_THREAD)
                        .map(|_| {
                            let conn = connection();
                            let id = registry.register(&conn);
                            (conn, id)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let registered: Vec<_> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();

        let unique: HashSet<_> = registered.iter().map(|(_, id)| *id).collect();
        assert_eq!(unique.len(), THREADS * PER_THREAD);
        assert_eq!(registry.len(), THREADS * PER_THREAD);
        for (conn, id) in &registered {
            assert_eq!(registry.lookup(conn).unwrap(), *id);
        }
    }
}
