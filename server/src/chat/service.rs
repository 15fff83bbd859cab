//! Chat operations: the store calls plus their realtime side effects.
//!
//! Every mutation of a conversation takes that conversation's turn from the
//! [`RoomSequencer`] before touching the store and keeps it until the event
//! has been queued for every room member.

use wanderchat_shared::{
    resolve, ChatError, ConversationId, DeletedMessage, Message, UserIdentity,
};

use super::dispatcher::{Dispatcher, RoomSequencer};
use super::store::MessageStore;

#[derive(Clone)]
pub struct ChatService {
    store: MessageStore,
    dispatcher: Dispatcher,
    sequencer: RoomSequencer,
}

/// Run a store call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ChatError>
where
    F: FnOnce() -> Result<T, ChatError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ChatError::Internal(format!("store task failed: {}", e)))?
}

impl ChatService {
    pub fn new(store: MessageStore, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            dispatcher,
            sequencer: RoomSequencer::new(),
        }
    }

    /// Persist a message from `sender` to `receiver_id` and push it to the room.
    pub async fn send(
        &self,
        sender: &UserIdentity,
        receiver_id: &str,
        body: String,
        client_ref: Option<String>,
    ) -> Result<Message, ChatError> {
        let conversation_id = resolve(&sender.id, receiver_id)?;
        let _turn = self.sequencer.turn(&conversation_id).await;

        let store = self.store.clone();
        let snapshot = sender.to_sender();
        let cid = conversation_id.clone();
        let message = blocking(move || store.append(&cid, &snapshot, &body, client_ref.as_deref())).await?;

        self.dispatcher.message_created(&message);

        tracing::info!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            sender_id = %sender.id,
            sequence = message.sequence,
            "Message accepted"
        );
        Ok(message)
    }

    /// Full history of a conversation, oldest first. Only participants may read it.
    pub async fn history(
        &self,
        requester_id: &str,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ChatError> {
        if !conversation_id.includes(requester_id) {
            return Err(ChatError::NotAuthorized(
                "not a participant of this conversation".to_string(),
            ));
        }

        let store = self.store.clone();
        let cid = conversation_id.clone();
        blocking(move || store.list_by_conversation(&cid)).await
    }

    /// Delete a message on behalf of its sender and push the deletion to the room.
    pub async fn delete(
        &self,
        requester_id: &str,
        message_id: &str,
    ) -> Result<DeletedMessage, ChatError> {
        // Find the room first so the removal runs in that room's turn
        let store = self.store.clone();
        let mid = message_id.to_string();
        let existing = blocking(move || store.get(&mid)).await?;
        if existing.sender.id() != requester_id {
            return Err(ChatError::NotAuthorized(
                "only the sender can delete a message".to_string(),
            ));
        }

        let _turn = self.sequencer.turn(&existing.conversation_id).await;

        let store = self.store.clone();
        let mid = message_id.to_string();
        let rid = requester_id.to_string();
        let conversation_id = blocking(move || store.remove(&mid, &rid)).await?;

        let deleted = DeletedMessage {
            message_id: message_id.to_string(),
            conversation_id,
        };
        self.dispatcher.message_deleted(&deleted);

        tracing::info!(
            conversation_id = %deleted.conversation_id,
            message_id = %deleted.message_id,
            "Message deleted"
        );
        Ok(deleted)
    }
}
