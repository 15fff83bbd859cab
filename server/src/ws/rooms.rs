//! Room membership: which connections currently view which conversation.
//!
//! Membership is per connection, not per user. Two tabs of the same user on
//! the same conversation are two members and both receive every push.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use wanderchat_shared::ConversationId;

use super::{ConnectionHandle, ConnectionId};

/// In-memory room membership manager.
///
/// Keyed by conversation id in a sharded DashMap so unrelated rooms never
/// serialize on each other, plus a reverse index used to tear down every
/// membership of a closing connection.
#[derive(Debug, Clone, Default)]
pub struct RoomMembership {
    /// conversation_id -> members
    rooms: Arc<DashMap<ConversationId, HashMap<ConnectionId, ConnectionHandle>>>,
    /// connection -> rooms it has joined
    joined: Arc<DashMap<ConnectionId, HashSet<ConversationId>>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room. Joining twice is the same as joining once.
    /// Returns true if the connection was not a member before.
    pub fn join(&self, conversation_id: &ConversationId, handle: &ConnectionHandle) -> bool {
        let added = self
            .rooms
            .entry(conversation_id.clone())
            .or_default()
            .insert(handle.id, handle.clone())
            .is_none();

        self.joined
            .entry(handle.id)
            .or_default()
            .insert(conversation_id.clone());

        added
    }

    /// Remove a connection from a room. No-op if it was not a member.
    pub fn leave(&self, conversation_id: &ConversationId, connection: ConnectionId) -> bool {
        let removed = self
            .rooms
            .get_mut(conversation_id)
            .map(|mut members| members.remove(&connection).is_some())
            .unwrap_or(false);

        // Clean up empty rooms
        self.rooms
            .remove_if(conversation_id, |_, members| members.is_empty());

        if let Some(mut rooms) = self.joined.get_mut(&connection) {
            rooms.remove(conversation_id);
        }
        self.joined.remove_if(&connection, |_, rooms| rooms.is_empty());

        removed
    }

    /// Current members of a room, for broadcast.
    pub fn members_of(&self, conversation_id: &ConversationId) -> Vec<ConnectionHandle> {
        self.rooms
            .get(conversation_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, conversation_id: &ConversationId, connection: ConnectionId) -> bool {
        self.rooms
            .get(conversation_id)
            .map(|members| members.contains_key(&connection))
            .unwrap_or(false)
    }

    pub fn rooms_of(&self, connection: ConnectionId) -> Vec<ConversationId> {
        self.joined
            .get(&connection)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a connection from every room it joined.
    /// Called when the connection is destroyed; returns the rooms it left.
    pub fn leave_all(&self, connection: ConnectionId) -> Vec<ConversationId> {
        let rooms: Vec<ConversationId> = self
            .joined
            .remove(&connection)
            .map(|(_, rooms)| rooms.into_iter().collect())
            .unwrap_or_default();

        for conversation_id in &rooms {
            if let Some(mut members) = self.rooms.get_mut(conversation_id) {
                members.remove(&connection);
            }
            self.rooms
                .remove_if(conversation_id, |_, members| members.is_empty());
        }

        rooms
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
