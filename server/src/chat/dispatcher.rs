//! Realtime dispatcher: turns accepted store operations into room pushes.
//!
//! Delivery is best-effort and at most once per connection. A connection
//! that was not in the room when an event left never sees it and must rely
//! on its next history fetch.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use wanderchat_shared::{ConversationId, DeletedMessage, Message, MessageNotification, ServerEvent};

use crate::ws::broadcast::{broadcast_to_room, send_to_connections};
use crate::ws::rooms::RoomMembership;
use crate::ws::ConnectionRegistry;

/// Per-conversation async lock.
///
/// Held across "accept in the store" and "emit the event" so that, within
/// one conversation, events leave in the order operations were accepted.
/// Different conversations never wait on each other.
#[derive(Debug, Clone, Default)]
pub struct RoomSequencer {
    locks: Arc<DashMap<ConversationId, Arc<Mutex<()>>>>,
}

/// Exclusive turn on one conversation. Releases (and prunes the lock if
/// nobody else is waiting) on drop.
pub struct RoomTurn {
    guard: Option<OwnedMutexGuard<()>>,
    conversation_id: ConversationId,
    locks: Arc<DashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl RoomSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn turn(&self, conversation_id: &ConversationId) -> RoomTurn {
        let lock = self
            .locks
            .entry(conversation_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        RoomTurn {
            guard: Some(lock.lock_owned().await),
            conversation_id: conversation_id.clone(),
            locks: self.locks.clone(),
        }
    }

    /// Number of conversations with a live lock.
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for RoomTurn {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map itself still references the lock: nobody is waiting
        self.locks
            .remove_if(&self.conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Pushes chat events to room members.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    connections: ConnectionRegistry,
    rooms: RoomMembership,
    preview_chars: usize,
}

impl Dispatcher {
    pub fn new(connections: ConnectionRegistry, rooms: RoomMembership, preview_chars: usize) -> Self {
        Self {
            connections,
            rooms,
            preview_chars,
        }
    }

    /// Emit `newMessage` to the room, then notify the receiver's connections
    /// that are not viewing the conversation. Returns the number of room
    /// members the event was queued for.
    pub fn message_created(&self, message: &Message) -> usize {
        let conversation_id = &message.conversation_id;
        let delivered = broadcast_to_room(
            &self.rooms,
            conversation_id,
            &ServerEvent::NewMessage(message.clone()),
        );

        if let Some(receiver_id) = conversation_id.peer_of(message.sender.id()) {
            let outside: Vec<_> = self
                .connections
                .connections_for(receiver_id)
                .into_iter()
                .filter(|handle| !self.rooms.is_member(conversation_id, handle.id))
                .collect();

            if !outside.is_empty() {
                let notification = ServerEvent::MessageNotification(MessageNotification {
                    conversation_id: conversation_id.clone(),
                    message_id: message.id.clone(),
                    sender_name: message.sender.name().to_string(),
                    preview: preview(&message.body, self.preview_chars),
                });
                send_to_connections(&outside, &notification);
            }
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            delivered,
            "newMessage dispatched"
        );
        delivered
    }

    /// Emit `messageDeleted` to the room.
    pub fn message_deleted(&self, deleted: &DeletedMessage) -> usize {
        let delivered = broadcast_to_room(
            &self.rooms,
            &deleted.conversation_id,
            &ServerEvent::MessageDeleted(deleted.clone()),
        );

        tracing::debug!(
            conversation_id = %deleted.conversation_id,
            message_id = %deleted.message_id,
            delivered,
            "messageDeleted dispatched"
        );
        delivered
    }
}

/// First `max_chars` characters of a body, with an ellipsis if cut.
fn preview(body: &str, max_chars: usize) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}
