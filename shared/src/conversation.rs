//! Conversation identity.
//!
//! A conversation is never stored on its own. Both participants derive the
//! same id by sorting their two user ids and joining them with [`SEPARATOR`],
//! so no lookup table is needed to find the shared room.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ChatError;

/// Fixed separator between the two participant ids.
pub const SEPARATOR: char = '_';

/// Stable identifier of a one-to-one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

/// Derive the conversation id for two participants. Order independent.
///
/// Fails with `ChatError::Validation` when either id is blank, contains the
/// separator, or when both ids are the same user.
pub fn resolve(a: &str, b: &str) -> Result<ConversationId, ChatError> {
    validate_participant(a)?;
    validate_participant(b)?;

    if a == b {
        return Err(ChatError::Validation(
            "a conversation needs two distinct participants".to_string(),
        ));
    }

    // Lexicographically smaller id always comes first
    let (first, second) = if a < b { (a, b) } else { (b, a) };
    Ok(ConversationId(format!("{}{}{}", first, SEPARATOR, second)))
}

fn validate_participant(id: &str) -> Result<(), ChatError> {
    if id.trim().is_empty() {
        return Err(ChatError::Validation(
            "participant id must not be empty".to_string(),
        ));
    }
    if id.contains(SEPARATOR) {
        return Err(ChatError::Validation(format!(
            "participant id must not contain '{}'",
            SEPARATOR
        )));
    }
    Ok(())
}

impl ConversationId {
    /// Parse an id received from the outside world (path segment, socket event).
    /// Only ids that [`resolve`] could have produced are accepted.
    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        let (a, b) = raw
            .split_once(SEPARATOR)
            .ok_or_else(|| ChatError::Validation(format!("malformed conversation id: {}", raw)))?;
        let resolved = resolve(a, b)?;
        if resolved.0 != raw {
            return Err(ChatError::Validation(format!(
                "conversation id is not in canonical order: {}",
                raw
            )));
        }
        Ok(resolved)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two participant ids, smaller first.
    pub fn participants(&self) -> (&str, &str) {
        // Construction guarantees exactly one separator
        self.0
            .split_once(SEPARATOR)
            .unwrap_or((self.0.as_str(), ""))
    }

    pub fn includes(&self, user_id: &str) -> bool {
        let (a, b) = self.participants();
        a == user_id || b == user_id
    }

    /// The participant that is not `user_id`, if `user_id` takes part at all.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        let (a, b) = self.participants();
        if a == user_id {
            Some(b)
        } else if b == user_id {
            Some(a)
        } else {
            None
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConversationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
