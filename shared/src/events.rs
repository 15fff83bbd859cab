//! Realtime channel events.
//!
//! Every WebSocket text frame carries one event encoded as
//! `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::conversation::ConversationId;
use crate::error::ErrorBody;
use crate::models::{DeletedMessage, Message};

/// Events sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Bind this connection to the authenticated user id.
    RegisterUser(String),
    /// Start receiving pushes for a conversation.
    JoinRoom(String),
    /// Stop receiving pushes for a conversation. Never acknowledged.
    LeaveRoom(String),
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    NewMessage(Message),
    MessageDeleted(DeletedMessage),
    /// Directed to a receiver that has no surface open on the conversation.
    MessageNotification(MessageNotification),
    Registered(String),
    RoomJoined(ConversationId),
    Error(ErrorBody),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNotification {
    pub conversation_id: ConversationId,
    pub message_id: String,
    pub sender_name: String,
    pub preview: String,
}

impl ClientEvent {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_frame(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ServerEvent {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_frame(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
