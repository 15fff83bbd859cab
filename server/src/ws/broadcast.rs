use axum::extract::ws::Message;
use wanderchat_shared::{ConversationId, ServerEvent};

use super::rooms::RoomMembership;
use super::ConnectionHandle;

/// Encode an event as a text frame. Encoding happens once per push,
/// the frame is cloned per recipient.
fn encode(event: &ServerEvent) -> Option<Message> {
    match event.to_frame() {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode server event");
            None
        }
    }
}

/// Send an event to a single connection.
pub fn send_event(handle: &ConnectionHandle, event: &ServerEvent) -> bool {
    encode(event).map(|msg| handle.send(msg)).unwrap_or(false)
}

/// Send an event to every given connection. Returns how many accepted it.
pub fn send_to_connections(connections: &[ConnectionHandle], event: &ServerEvent) -> usize {
    let Some(msg) = encode(event) else {
        return 0;
    };
    connections
        .iter()
        .filter(|handle| handle.send(msg.clone()))
        .count()
}

/// Send an event to every connection currently in a room.
pub fn broadcast_to_room(
    rooms: &RoomMembership,
    conversation_id: &ConversationId,
    event: &ServerEvent,
) -> usize {
    send_to_connections(&rooms.members_of(conversation_id), event)
}
