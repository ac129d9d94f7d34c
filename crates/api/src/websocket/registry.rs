//! Presence registry
//!
//! Maps each identity to the set of its live connections. An identity is
//! online while its set is non-empty; the entry is removed (not left empty)
//! when the last connection goes away. Every online/offline transition is
//! broadcast to all live connections as a full `presence-roster`.
//!
//! The registry is owned by `AppState`: created at server start, dropped at
//! shutdown, and reachable only through these methods.

use std::collections::HashMap;
use std::sync::Arc;

use parley_shared::{ServerEvent, UserId};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::{push_all, Connection, PushReport};

type Entries = HashMap<UserId, HashMap<Uuid, Arc<Connection>>>;

/// Process-scoped registry of live connections
#[derive(Default)]
pub struct PresenceRegistry {
    entries: RwLock<Entries>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a connection.
    ///
    /// If the identity had no live connections, the new roster is broadcast
    /// to everyone (including this connection). Otherwise only this
    /// connection receives the current roster.
    pub async fn register(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut entries = self.entries.write().await;

        let sessions = entries.entry(conn.user_id).or_default();
        let came_online = sessions.is_empty();
        sessions.insert(conn.session_id, Arc::clone(&conn));
        let user_connections = sessions.len();

        tracing::info!(
            session_id = %conn.session_id,
            user_id = %conn.user_id,
            user_connections,
            online_users = entries.len(),
            "WebSocket connection registered"
        );

        // Broadcast while holding the lock so rosters reach every
        // connection in the order the transitions happened.
        let roster = roster_event(&entries);
        if came_online {
            broadcast(&entries, &roster);
        } else {
            let _ = conn.send(roster);
        }

        conn
    }

    /// Remove a connection. Returns true if its identity went offline.
    pub async fn unregister(&self, user_id: UserId, session_id: Uuid) -> bool {
        let mut entries = self.entries.write().await;

        let Some(sessions) = entries.get_mut(&user_id) else {
            return false;
        };
        if sessions.remove(&session_id).is_none() {
            return false;
        }
        let remaining = sessions.len();

        tracing::info!(
            session_id = %session_id,
            user_id = %user_id,
            remaining_connections = remaining,
            "WebSocket connection unregistered"
        );

        if remaining > 0 {
            return false;
        }

        entries.remove(&user_id);
        let roster = roster_event(&entries);
        broadcast(&entries, &roster);

        tracing::info!(user_id = %user_id, online_users = entries.len(), "User went offline");
        true
    }

    /// Live connections of `user_id`; empty when offline
    pub async fn lookup(&self, user_id: UserId) -> Vec<Arc<Connection>> {
        let entries = self.entries.read().await;
        entries
            .get(&user_id)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Push an event to every live connection of `user_id`
    pub async fn push_to(&self, user_id: UserId, event: &ServerEvent) -> PushReport {
        let conns = self.lookup(user_id).await;
        push_all(&conns, event)
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.entries.read().await.contains_key(&user_id)
    }

    /// Sorted list of online identities
    pub async fn roster(&self) -> Vec<UserId> {
        let entries = self.entries.read().await;
        sorted_roster(&entries)
    }

    /// Get statistics about the registry
    pub async fn get_stats(&self) -> RegistryStats {
        let entries = self.entries.read().await;
        RegistryStats {
            online_users: entries.len(),
            active_connections: entries.values().map(HashMap::len).sum(),
        }
    }
}

fn sorted_roster(entries: &Entries) -> Vec<UserId> {
    let mut online: Vec<UserId> = entries.keys().copied().collect();
    online.sort();
    online
}

fn roster_event(entries: &Entries) -> ServerEvent {
    ServerEvent::PresenceRoster {
        online_users: sorted_roster(entries),
    }
}

fn broadcast(entries: &Entries, event: &ServerEvent) {
    let conns: Vec<Arc<Connection>> = entries
        .values()
        .flat_map(|sessions| sessions.values().cloned())
        .collect();
    let report = push_all(&conns, event);

    tracing::debug!(
        recipients = report.delivered,
        failed = report.failed,
        "Broadcast presence roster"
    );
}

/// Statistics about live connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of identities with at least one connection
    pub online_users: usize,
    /// Number of live connections
    pub active_connections: usize,
}
