pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;
pub mod rooms;

use axum::extract::ws::Message;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of a live WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A live connection: its id, the user it authenticated as, and the channel
/// feeding its writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: String,
    sender: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(user_id: &str, sender: ConnectionSender) -> Self {
        Self {
            id: ConnectionId::next(),
            user_id: user_id.to_string(),
            sender,
        }
    }

    /// Queue a frame for this connection. Returns false if the writer is gone.
    pub fn send(&self, msg: Message) -> bool {
        self.sender.send(msg).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Connection registry: tracks all active WebSocket connections per user.
/// A user can have multiple concurrent connections (multiple devices/tabs).
///
/// Both maps are sharded, so connects and disconnects of unrelated users
/// never contend on one lock. No method holds guards on both maps at once.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    /// user_id -> connections registered under it
    by_user: Arc<DashMap<String, Vec<ConnectionHandle>>>,
    /// connection -> user ids it was registered under
    by_connection: Arc<DashMap<ConnectionId, HashSet<String>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a connection with a user id.
    /// Registering the same pair again is a no-op; returns true if it was new.
    pub fn register(&self, user_id: &str, handle: &ConnectionHandle) -> bool {
        let added = {
            let mut connections = self.by_user.entry(user_id.to_string()).or_default();
            if connections.iter().any(|c| c.id == handle.id) {
                false
            } else {
                connections.push(handle.clone());
                true
            }
        };

        if added {
            self.by_connection
                .entry(handle.id)
                .or_default()
                .insert(user_id.to_string());
        }

        tracing::debug!(
            user_id = %user_id,
            connection = %handle.id,
            added,
            "Connection registered"
        );
        added
    }

    /// Live connections for a user, for directed pushes.
    pub fn connections_for(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.by_user
            .get(user_id)
            .map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|c| !c.is_closed())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        !self.connections_for(user_id).is_empty()
    }

    /// Remove a connection from every user mapping it was registered under.
    /// Returns the user ids it was removed from.
    pub fn unregister(&self, connection: ConnectionId) -> Vec<String> {
        let users: Vec<String> = self
            .by_connection
            .remove(&connection)
            .map(|(_, users)| users.into_iter().collect())
            .unwrap_or_default();

        for user_id in &users {
            if let Some(mut connections) = self.by_user.get_mut(user_id) {
                connections.retain(|c| c.id != connection);
            }
            // Drop the user entry once the last connection is gone
            self.by_user.remove_if(user_id, |_, connections| connections.is_empty());
        }

        tracing::debug!(
            connection = %connection,
            users = users.len(),
            "Connection unregistered"
        );
        users
    }

    /// Number of users with at least one registered connection.
    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }
}
