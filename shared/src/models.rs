//! Chat data model shared by server and client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::conversation::ConversationId;
use crate::error::ChatError;

/// Reserved prefix of client-generated temporary message ids.
/// Server ids are UUIDs and can never start with it.
pub const TEMP_ID_PREFIX: &str = "temp-";

pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Account role, owned by the auth subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Traveler,
    Guide,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Traveler => "traveler",
            Self::Guide => "guide",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "traveler" => Ok(Self::Traveler),
            "guide" => Ok(Self::Guide),
            other => Err(ChatError::Validation(format!("unknown role: {}", other))),
        }
    }
}

/// Authenticated identity handed to the chat core. Read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl UserIdentity {
    /// Denormalized snapshot stored with every message this user sends.
    pub fn to_sender(&self) -> Sender {
        Sender::new(
            self.role,
            SenderProfile {
                id: self.id.clone(),
                name: self.name.clone(),
                email: self.email.clone(),
                avatar: self.avatar_url.clone(),
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Sender snapshot embedded in a message, tagged by role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Sender {
    Traveler(SenderProfile),
    Guide(SenderProfile),
}

impl Sender {
    pub fn new(role: Role, profile: SenderProfile) -> Self {
        match role {
            Role::Traveler => Self::Traveler(profile),
            Role::Guide => Self::Guide(profile),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Traveler(_) => Role::Traveler,
            Self::Guide(_) => Role::Guide,
        }
    }

    pub fn profile(&self) -> &SenderProfile {
        match self {
            Self::Traveler(p) | Self::Guide(p) => p,
        }
    }

    pub fn id(&self) -> &str {
        &self.profile().id
    }

    pub fn name(&self) -> &str {
        &self.profile().name
    }

    pub fn email(&self) -> &str {
        &self.profile().email
    }

    pub fn avatar(&self) -> Option<&str> {
        self.profile().avatar.as_deref()
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub body: String,
    pub sender: Sender,
    pub conversation_id: ConversationId,
    pub created_at: DateTime<Utc>,
    /// Per-conversation acceptance order assigned by the store.
    pub sequence: u64,
    /// Correlation id of the optimistic entry this message confirms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

/// POST /api/messages body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub receiver_id: String,
    pub body: String,
    pub sender_role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

/// Payload of the `messageDeleted` event and of a successful DELETE response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedMessage {
    pub message_id: String,
    pub conversation_id: ConversationId,
}

/// GET /api/conversations/with/{peer_id} response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationLookup {
    pub conversation_id: ConversationId,
}
