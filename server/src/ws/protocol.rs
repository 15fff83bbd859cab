use wanderchat_shared::{ChatError, ClientEvent, ConversationId, ServerEvent};

use crate::state::AppState;
use crate::ws::broadcast::send_event;
use crate::ws::ConnectionHandle;

/// Handle an incoming text frame.
/// Decodes the client event, dispatches it, and acknowledges where the
/// protocol calls for it. Failures are answered with an `error` event on this
/// connection only.
pub fn handle_text_frame(text: &str, handle: &ConnectionHandle, state: &AppState) {
    let event = match ClientEvent::from_frame(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                connection = %handle.id,
                user_id = %handle.user_id,
                error = %e,
                "Failed to decode client event"
            );
            send_error(handle, ChatError::Validation("malformed event frame".to_string()));
            return;
        }
    };

    let result = match event {
        ClientEvent::RegisterUser(user_id) => register_user(&user_id, handle, state),
        ClientEvent::JoinRoom(room) => join_room(&room, handle, state),
        ClientEvent::LeaveRoom(room) => leave_room(&room, handle, state),
    };

    if let Err(err) = result {
        send_error(handle, err);
    }
}

/// Bind the connection to its user. The claimed id must be the one the
/// connection authenticated as.
fn register_user(user_id: &str, handle: &ConnectionHandle, state: &AppState) -> Result<(), ChatError> {
    if user_id != handle.user_id {
        tracing::warn!(
            connection = %handle.id,
            user_id = %handle.user_id,
            claimed = %user_id,
            "registerUser with foreign user id"
        );
        return Err(ChatError::Auth(
            "registerUser must use the authenticated user id".to_string(),
        ));
    }

    if state.connections.register(user_id, handle) {
        tracing::debug!(connection = %handle.id, user_id = %user_id, "User registered");
    }
    send_event(handle, &ServerEvent::Registered(user_id.to_string()));
    Ok(())
}

fn join_room(room: &str, handle: &ConnectionHandle, state: &AppState) -> Result<(), ChatError> {
    let conversation_id = ConversationId::parse(room)?;
    if !conversation_id.includes(&handle.user_id) {
        return Err(ChatError::NotAuthorized(
            "not a participant of this conversation".to_string(),
        ));
    }

    if state.rooms.join(&conversation_id, handle) {
        tracing::debug!(
            connection = %handle.id,
            conversation_id = %conversation_id,
            joined = state.rooms.rooms_of(handle.id).len(),
            "Joined room"
        );
    }
    send_event(handle, &ServerEvent::RoomJoined(conversation_id));
    Ok(())
}

fn leave_room(room: &str, handle: &ConnectionHandle, state: &AppState) -> Result<(), ChatError> {
    let conversation_id = ConversationId::parse(room)?;
    if state.rooms.leave(&conversation_id, handle.id) {
        tracing::debug!(
            connection = %handle.id,
            conversation_id = %conversation_id,
            "Left room"
        );
    }
    Ok(())
}

/// Send an `error` event back to the connection that caused it.
fn send_error(handle: &ConnectionHandle, err: ChatError) {
    send_event(handle, &ServerEvent::Error(err.to_body()));
}
