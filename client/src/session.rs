//! Per-surface chat session.
//!
//! A [`ChatSession`] owns the message list one chat surface renders and walks
//! the `Closed -> Opening -> Active -> Closed` lifecycle. It performs no I/O:
//! the driver runs the join, fetch, send and delete calls and feeds their
//! results back together with the [`Epoch`] they were started under, so
//! results from an earlier opening are dropped instead of rendered.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use wanderchat_shared::models::{is_temporary_id, TEMP_ID_PREFIX};
use wanderchat_shared::{
    resolve, ChatError, ConversationId, DeletedMessage, Message, UserIdentity,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Active,
}

/// Generation counter of a session. Bumped on every `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Epoch(u64);

/// An optimistic send awaiting its persistence result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub epoch: Epoch,
    pub temp_id: String,
    pub receiver_id: String,
    /// Body exactly as typed, handed back if the send fails.
    pub body: String,
}

/// An optimistic removal awaiting its persistence result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelete {
    pub epoch: Epoch,
    pub message: Message,
    /// Position the entry occupied before removal.
    pub index: usize,
}

/// What the driver has to do after a send result was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The optimistic entry now shows the confirmed message.
    Confirmed,
    /// The entry was removed; holds the body as typed for restoring the input.
    Failed(String),
    /// The entry was deleted while the send was in flight. The persisted
    /// copy must be removed with this delete.
    Retract(PendingDelete),
    /// The result belongs to another opening or to a closed surface.
    Ignored,
}

#[derive(Debug)]
pub struct ChatSession {
    me: UserIdentity,
    peer_id: String,
    conversation_id: ConversationId,
    state: SessionState,
    epoch: Epoch,
    messages: Vec<Message>,
    /// Pushes that arrived while the history fetch was in flight.
    early_messages: Vec<Message>,
    early_deletions: HashSet<String>,
    /// Sends deleted before they were confirmed. Survives reopening so the
    /// confirmed copy is still retracted.
    retractions: Retractions,
    last_error: Option<ChatError>,
}

impl ChatSession {
    pub fn new(me: UserIdentity, peer_id: &str) -> Result<Self, ChatError> {
        let conversation_id = resolve(&me.id, peer_id)?;
        Ok(Self {
            me,
            peer_id: peer_id.to_string(),
            conversation_id,
            state: SessionState::Closed,
            epoch: Epoch(0),
            messages: Vec::new(),
            early_messages: Vec::new(),
            early_deletions: HashSet::new(),
            retractions: Retractions::default(),
            last_error: None,
        })
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_error(&self) -> Option<&ChatError> {
        self.last_error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<ChatError> {
        self.last_error.take()
    }

    /// Number of optimistic entries still waiting for confirmation.
    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| is_temporary_id(&m.id)).count()
    }

    /// Closed -> Opening. The caller joins the room and fetches history
    /// concurrently, then reports the fetch through [`apply_history`].
    ///
    /// [`apply_history`]: ChatSession::apply_history
    pub fn open(&mut self) -> Result<Epoch, ChatError> {
        if self.state != SessionState::Closed {
            return Err(ChatError::Validation(format!(
                "conversation {} is already open",
                self.conversation_id
            )));
        }

        self.epoch = Epoch(self.epoch.0 + 1);
        self.state = SessionState::Opening;
        self.last_error = None;
        self.early_messages.clear();
        self.early_deletions.clear();
        // Sends from an earlier opening will never be confirmed here
        self.messages.retain(|m| !is_temporary_id(&m.id));

        tracing::debug!(
            conversation_id = %self.conversation_id,
            epoch = self.epoch.0,
            "Session opening"
        );
        Ok(self.epoch)
    }

    /// Opening -> Active on success, Opening -> Closed on failure.
    /// Returns false when the result belongs to another opening and was ignored.
    pub fn apply_history(&mut self, epoch: Epoch, result: Result<Vec<Message>, ChatError>) -> bool {
        if !self.is_current(epoch) || self.state != SessionState::Opening {
            return false;
        }

        let early_messages = std::mem::take(&mut self.early_messages);
        let early_deletions = std::mem::take(&mut self.early_deletions);

        match result {
            Ok(history) => {
                let pending: Vec<Message> = self
                    .messages
                    .drain(..)
                    .filter(|m| is_temporary_id(&m.id))
                    .collect();

                // History is authoritative; sends begun during the fetch stay after it
                self.messages = history;
                self.messages.retain(|m| !self.retractions.covers(m));
                self.messages.extend(pending);
                for message in early_messages {
                    self.merge(message);
                }
                self.messages.retain(|m| !early_deletions.contains(&m.id));
                self.state = SessionState::Active;

                tracing::debug!(
                    conversation_id = %self.conversation_id,
                    messages = self.messages.len(),
                    "Session active"
                );
            }
            Err(err) => {
                tracing::warn!(
                    conversation_id = %self.conversation_id,
                    error = %err,
                    "History fetch failed"
                );
                self.messages.clear();
                self.last_error = Some(err);
                self.state = SessionState::Closed;
            }
        }
        true
    }

    /// Apply a `newMessage` push. Returns true if the list changed.
    pub fn on_message_created(&mut self, message: Message) -> bool {
        if message.conversation_id != self.conversation_id {
            return false;
        }
        match self.state {
            SessionState::Closed => false,
            SessionState::Opening => {
                self.early_deletions.remove(&message.id);
                self.early_messages.push(message);
                true
            }
            SessionState::Active => self.merge(message),
        }
    }

    /// Apply a `messageDeleted` push. Returns true if the list changed.
    pub fn on_message_deleted(&mut self, deleted: &DeletedMessage) -> bool {
        if deleted.conversation_id != self.conversation_id {
            return false;
        }
        self.retractions.confirmed.remove(&deleted.message_id);
        if self.state == SessionState::Closed {
            return false;
        }
        if self.state == SessionState::Opening {
            self.early_messages.retain(|m| m.id != deleted.message_id);
            self.early_deletions.insert(deleted.message_id.clone());
        }

        let before = self.messages.len();
        self.messages.retain(|m| m.id != deleted.message_id);
        self.messages.len() != before
    }

    /// Insert an optimistic entry for `body` and describe the send to perform.
    pub fn begin_send(&mut self, body: &str) -> Result<PendingSend, ChatError> {
        if self.state == SessionState::Closed {
            return Err(ChatError::Validation("conversation is not open".to_string()));
        }
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Err(ChatError::Validation("message body must not be empty".to_string()));
        }

        let temp_id = format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4());
        self.messages.push(Message {
            id: temp_id.clone(),
            body: trimmed.to_string(),
            sender: self.me.to_sender(),
            conversation_id: self.conversation_id.clone(),
            created_at: Utc::now(),
            sequence: 0,
            client_ref: Some(temp_id.clone()),
        });

        Ok(PendingSend {
            epoch: self.epoch,
            temp_id,
            receiver_id: self.peer_id.clone(),
            body: body.to_string(),
        })
    }

    /// Reconcile a send result with the optimistic entry.
    ///
    /// On failure the entry is removed and the error recorded. A send whose
    /// entry was deleted while in flight is never rendered; if it was
    /// persisted anyway the outcome asks for its removal, even after the
    /// surface was reopened or closed.
    pub fn complete_send(
        &mut self,
        pending: &PendingSend,
        result: Result<Message, ChatError>,
    ) -> SendOutcome {
        if let Some(index) = self.retractions.pending.remove(&pending.temp_id) {
            return match result {
                Ok(confirmed) => {
                    self.messages.retain(|m| m.id != confirmed.id);
                    self.retractions.confirmed.insert(confirmed.id.clone());
                    SendOutcome::Retract(PendingDelete {
                        epoch: self.epoch,
                        message: confirmed,
                        index,
                    })
                }
                Err(_) => SendOutcome::Ignored,
            };
        }
        if !self.is_current(pending.epoch) || self.state == SessionState::Closed {
            return SendOutcome::Ignored;
        }

        let temp_index = self.messages.iter().position(|m| m.id == pending.temp_id);
        match result {
            Ok(confirmed) => {
                let already_present = self.messages.iter().any(|m| m.id == confirmed.id);
                match temp_index {
                    Some(index) if !already_present => self.messages[index] = confirmed,
                    Some(index) => {
                        self.messages.remove(index);
                    }
                    // The push got here first and superseded the entry
                    None if !already_present => self.messages.push(confirmed),
                    None => {}
                }
                SendOutcome::Confirmed
            }
            Err(err) => {
                if let Some(index) = temp_index {
                    self.messages.remove(index);
                }
                tracing::warn!(
                    conversation_id = %self.conversation_id,
                    error = %err,
                    "Send failed"
                );
                self.last_error = Some(err);
                SendOutcome::Failed(pending.body.clone())
            }
        }
    }

    /// Remove an entry optimistically.
    ///
    /// `Ok(None)` means nothing has to be sent now: the entry was a pending
    /// optimistic send. It is dropped at once and its confirmation comes
    /// back from [`complete_send`] as [`SendOutcome::Retract`].
    ///
    /// [`complete_send`]: ChatSession::complete_send
    pub fn begin_delete(&mut self, message_id: &str) -> Result<Option<PendingDelete>, ChatError> {
        if self.state != SessionState::Active {
            return Err(ChatError::Validation("conversation is not open".to_string()));
        }
        let index = self
            .messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| ChatError::NotFound(format!("message {} is not in this conversation", message_id)))?;

        let message = self.messages.remove(index);
        if is_temporary_id(&message.id) {
            self.retractions.pending.insert(message.id, index);
            return Ok(None);
        }
        if message.sender.id() != self.me.id {
            self.messages.insert(index, message);
            return Err(ChatError::NotAuthorized(
                "only the sender can delete a message".to_string(),
            ));
        }

        Ok(Some(PendingDelete {
            epoch: self.epoch,
            message,
            index,
        }))
    }

    /// Reconcile a delete result. A failed delete puts the entry back where it was.
    pub fn complete_delete(&mut self, pending: PendingDelete, result: Result<(), ChatError>) {
        if result.is_err() {
            self.retractions.confirmed.remove(&pending.message.id);
        }
        if !self.is_current(pending.epoch) || self.state == SessionState::Closed {
            return;
        }
        if let Err(err) = result {
            if !self.messages.iter().any(|m| m.id == pending.message.id) {
                let index = pending.index.min(self.messages.len());
                self.messages.insert(index, pending.message);
            }
            tracing::warn!(
                conversation_id = %self.conversation_id,
                error = %err,
                "Delete failed"
            );
            self.last_error = Some(err);
        }
    }

    /// Opening/Active -> Closed. Returns the room to leave, if any.
    /// The list stays as it is until the next open replaces it.
    pub fn close(&mut self) -> Option<ConversationId> {
        if self.state == SessionState::Closed {
            return None;
        }
        self.state = SessionState::Closed;
        self.early_messages.clear();
        self.early_deletions.clear();
        Some(self.conversation_id.clone())
    }

    fn is_current(&self, epoch: Epoch) -> bool {
        epoch == self.epoch
    }


    /// Merge a confirmed message into the list.
    ///
    /// The optimistic entry it confirms is found by correlation id, or by
    /// body and sender when the message carries none. That entry is removed
    /// and the message is appended unless its id is already listed.
    fn merge(&mut self, incoming: Message) -> bool {
        if self.retractions.covers(&incoming) {
            return false;
        }
        let optimistic = match incoming.client_ref.as_deref() {
            Some(client_ref) => self
                .messages
                .iter()
                .position(|m| is_temporary_id(&m.id) && m.id == client_ref),
            None => self.messages.iter().position(|m| {
                is_temporary_id(&m.id)
                    && m.body == incoming.body
                    && m.sender.id() == incoming.sender.id()
            }),
        };

        let mut changed = false;
        if let Some(index) = optimistic {
            self.messages.remove(index);
            changed = true;
        }
        if !self.messages.iter().any(|m| m.id == incoming.id) {
            self.messages.push(incoming);
            changed = true;
        }
        changed
    }
}

/// Sends the user deleted before the server confirmed them.
#[derive(Debug, Default)]
struct Retractions {
    /// Temp id -> list position, while the send is in flight.
    pending: HashMap<String, usize>,
    /// Server ids of confirmed copies whose removal is not yet acknowledged.
    confirmed: HashSet<String>,
}

impl Retractions {
    /// Whether `message` is the server copy of a retracted send.
    fn covers(&self, message: &Message) -> bool {
        self.confirmed.contains(&message.id)
            || message
                .client_ref
                .as_deref()
                .is_some_and(|client_ref| self.pending.contains_key(client_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wanderchat_shared::Role;

    fn ana() -> UserIdentity {
        UserIdentity {
            id: "traveler-1".to_string(),
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            role: Role::Traveler,
            avatar_url: None,
        }
    }

    fn marta() -> UserIdentity {
        UserIdentity {
            id: "guide-1".to_string(),
            name: "Marta".to_string(),
            email: "marta@example.com".to_string(),
            role: Role::Guide,
            avatar_url: None,
        }
    }

    fn confirmed(from: &UserIdentity, sequence: u64, body: &str, client_ref: Option<&str>) -> Message {
        Message {
            id: format!("msg-{}", sequence),
            body: body.to_string(),
            sender: from.to_sender(),
            conversation_id: resolve("traveler-1", "guide-1").unwrap(),
            created_at: Utc::now() + Duration::milliseconds(sequence as i64),
            sequence,
            client_ref: client_ref.map(str::to_string),
        }
    }

    fn active_session(history: Vec<Message>) -> ChatSession {
        let mut session = ChatSession::new(ana(), "guide-1").unwrap();
        let epoch = session.open().unwrap();
        assert!(session.apply_history(epoch, Ok(history)));
        session
    }

    fn ids(session: &ChatSession) -> Vec<String> {
        session.messages().iter().map(|m| m.id.clone()).collect()
    }

    fn assert_no_duplicate_ids(session: &ChatSession) {
        let mut seen = HashSet::new();
        for m in session.messages() {
            assert!(seen.insert(m.id.clone()), "duplicate id {}", m.id);
        }
    }

    #[test]
    fn test_open_lifecycle() {
        let mut session = ChatSession::new(ana(), "guide-1").unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.conversation_id().as_str(), "guide-1_traveler-1");

        let epoch = session.open().unwrap();
        assert_eq!(session.state(), SessionState::Opening);
        assert!(session.open().is_err());

        session.apply_history(epoch, Ok(vec![confirmed(&marta(), 1, "Hi", None)]));
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(ids(&session), vec!["msg-1"]);

        assert_eq!(session.close(), Some(resolve("guide-1", "traveler-1").unwrap()));
        assert_eq!(session.close(), None);
        // List kept until the next open
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn test_self_chat_session_is_rejected() {
        assert!(matches!(
            ChatSession::new(ana(), "traveler-1"),
            Err(ChatError::Validation(_))
        ));
    }

    #[test]
    fn test_failed_history_empties_list_and_closes() {
        let mut session = active_session(vec![confirmed(&marta(), 1, "Hi", None)]);
        session.close();

        let epoch = session.open().unwrap();
        session.apply_history(epoch, Err(ChatError::Network("connection refused".into())));

        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.messages().is_empty());
        assert!(matches!(session.take_error(), Some(ChatError::Network(_))));
    }

    #[test]
    fn test_stale_history_is_ignored() {
        let mut session = ChatSession::new(ana(), "guide-1").unwrap();
        let first = session.open().unwrap();
        session.close();
        let second = session.open().unwrap();

        assert!(!session.apply_history(first, Ok(vec![confirmed(&marta(), 1, "old", None)])));
        assert_eq!(session.state(), SessionState::Opening);
        assert!(session.messages().is_empty());

        assert!(session.apply_history(second, Ok(vec![])));
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn test_history_after_close_is_not_rendered() {
        let mut session = ChatSession::new(ana(), "guide-1").unwrap();
        let epoch = session.open().unwrap();
        session.close();

        assert!(!session.apply_history(epoch, Ok(vec![confirmed(&marta(), 1, "late", None)])));
        assert!(session.messages().is_empty());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_push_then_confirm_keeps_one_entry() {
        let mut session = active_session(vec![]);
        let pending = session.begin_send("Hello").unwrap();
        assert_eq!(session.pending_count(), 1);
        assert!(session.messages()[0].id.starts_with(TEMP_ID_PREFIX));

        let server_copy = confirmed(&ana(), 1, "Hello", Some(&pending.temp_id));
        assert!(session.on_message_created(server_copy.clone()));
        assert_eq!(ids(&session), vec!["msg-1"]);

        assert_eq!(session.complete_send(&pending, Ok(server_copy)), SendOutcome::Confirmed);
        assert_eq!(ids(&session), vec!["msg-1"]);
        assert_eq!(session.pending_count(), 0);
    }

    #[test]
    fn test_confirm_then_push_keeps_one_entry() {
        let mut session = active_session(vec![confirmed(&marta(), 1, "Hi", None)]);
        let pending = session.begin_send("Hello").unwrap();

        let server_copy = confirmed(&ana(), 2, "Hello", Some(&pending.temp_id));
        session.complete_send(&pending, Ok(server_copy.clone()));
        assert_eq!(ids(&session), vec!["msg-1", "msg-2"]);

        assert!(!session.on_message_created(server_copy));
        assert_eq!(ids(&session), vec!["msg-1", "msg-2"]);
    }

    #[test]
    fn test_confirmation_replaces_temp_entry_in_place() {
        let mut session = active_session(vec![]);
        let first = session.begin_send("one").unwrap();
        let _second = session.begin_send("two").unwrap();

        session.complete_send(&first, Ok(confirmed(&ana(), 1, "one", Some(&first.temp_id))));
        assert_eq!(session.messages()[0].id, "msg-1");
        assert!(session.messages()[1].id.starts_with(TEMP_ID_PREFIX));
    }

    #[test]
    fn test_identical_bodies_reconcile_by_correlation_id() {
        let mut session = active_session(vec![]);
        let first = session.begin_send("ok").unwrap();
        let second = session.begin_send("ok").unwrap();

        session.on_message_created(confirmed(&ana(), 1, "ok", Some(&second.temp_id)));

        // The second optimistic entry was confirmed, the first is still pending
        assert_eq!(session.pending_count(), 1);
        assert!(session.messages().iter().any(|m| m.id == first.temp_id));
        assert!(!session.messages().iter().any(|m| m.id == second.temp_id));
    }

    #[test]
    fn test_body_and_sender_fallback_without_correlation_id() {
        let mut session = active_session(vec![]);
        session.begin_send("Hello").unwrap();

        // Same body from the peer does not confirm our entry
        session.on_message_created(confirmed(&marta(), 1, "Hello", None));
        assert_eq!(session.pending_count(), 1);

        session.on_message_created(confirmed(&ana(), 2, "Hello", None));
        assert_eq!(session.pending_count(), 0);
        assert_eq!(ids(&session), vec!["msg-1", "msg-2"]);
    }

    #[test]
    fn test_message_from_another_tab_does_not_touch_local_pending() {
        let mut session = active_session(vec![]);
        session.begin_send("from this tab").unwrap();

        session.on_message_created(confirmed(&ana(), 1, "from this tab", Some("temp-other-tab")));
        assert_eq!(session.pending_count(), 1);
        assert_eq!(session.messages().len(), 2);
    }

    #[test]
    fn test_failed_send_removes_entry_and_returns_body() {
        let mut session = active_session(vec![confirmed(&marta(), 1, "Hi", None)]);
        let pending = session.begin_send("  Hello there ").unwrap();

        let outcome = session.complete_send(&pending, Err(ChatError::Network("timeout".into())));
        assert_eq!(outcome, SendOutcome::Failed("  Hello there ".to_string()));
        assert_eq!(ids(&session), vec!["msg-1"]);
        assert!(matches!(session.last_error(), Some(ChatError::Network(_))));
    }

    #[test]
    fn test_send_result_after_reopen_is_ignored() {
        let mut session = active_session(vec![]);
        let pending = session.begin_send("Hello").unwrap();
        session.close();
        let epoch = session.open().unwrap();
        session.apply_history(epoch, Ok(vec![]));

        assert_eq!(session.pending_count(), 0);
        assert_eq!(
            session.complete_send(&pending, Err(ChatError::Network("reset".into()))),
            SendOutcome::Ignored
        );
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_empty_send_is_rejected_locally() {
        let mut session = active_session(vec![]);
        assert!(matches!(session.begin_send("   "), Err(ChatError::Validation(_))));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn test_optimistic_delete_and_restore() {
        let mut session = active_session(vec![
            confirmed(&ana(), 1, "a", None),
            confirmed(&ana(), 2, "b", None),
            confirmed(&marta(), 3, "c", None),
        ]);

        let pending = session.begin_delete("msg-2").unwrap().unwrap();
        assert_eq!(ids(&session), vec!["msg-1", "msg-3"]);

        session.complete_delete(pending, Err(ChatError::Network("offline".into())));
        assert_eq!(ids(&session), vec!["msg-1", "msg-2", "msg-3"]);
        assert!(session.last_error().is_some());
    }

    #[test]
    fn test_delete_confirmed_after_push_stays_removed() {
        let mut session = active_session(vec![confirmed(&ana(), 1, "a", None)]);
        let pending = session.begin_delete("msg-1").unwrap().unwrap();

        let deleted = DeletedMessage {
            message_id: "msg-1".to_string(),
            conversation_id: session.conversation_id().clone(),
        };
        assert!(!session.on_message_deleted(&deleted));
        session.complete_delete(pending, Ok(()));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn test_deleting_pending_entry_retracts_its_confirmation() {
        let mut session = active_session(vec![confirmed(&marta(), 1, "Hi", None)]);
        let pending = session.begin_send("typo").unwrap();

        assert_eq!(session.begin_delete(&pending.temp_id).unwrap(), None);
        assert_eq!(ids(&session), vec!["msg-1"]);

        let server_copy = confirmed(&ana(), 2, "typo", Some(&pending.temp_id));
        let retract = match session.complete_send(&pending, Ok(server_copy)) {
            SendOutcome::Retract(delete) => delete,
            other => panic!("expected a retraction, got {:?}", other),
        };
        assert_eq!(retract.message.id, "msg-2");
        assert_eq!(retract.index, 1);
        assert_eq!(ids(&session), vec!["msg-1"]);

        session.complete_delete(retract, Ok(()));
        assert_eq!(ids(&session), vec!["msg-1"]);

        // A push that was overtaken by the HTTP response stays hidden
        assert!(!session.on_message_created(confirmed(&ana(), 2, "typo", Some(&pending.temp_id))));
        assert_eq!(ids(&session), vec!["msg-1"]);
    }

    #[test]
    fn test_push_for_deleted_pending_send_is_not_rendered() {
        let mut session = active_session(vec![]);
        let pending = session.begin_send("typo").unwrap();
        session.begin_delete(&pending.temp_id).unwrap();

        let server_copy = confirmed(&ana(), 1, "typo", Some(&pending.temp_id));
        assert!(!session.on_message_created(server_copy.clone()));
        assert!(session.messages().is_empty());

        assert!(matches!(
            session.complete_send(&pending, Ok(server_copy)),
            SendOutcome::Retract(_)
        ));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn test_deleted_pending_send_is_retracted_after_reopen() {
        let mut session = active_session(vec![]);
        let pending = session.begin_send("typo").unwrap();
        session.begin_delete(&pending.temp_id).unwrap();
        session.close();

        // History fetched before the retraction still carries the message
        let server_copy = confirmed(&ana(), 1, "typo", Some(&pending.temp_id));
        let epoch = session.open().unwrap();
        session.apply_history(epoch, Ok(vec![server_copy.clone()]));
        assert!(session.messages().is_empty());

        assert!(matches!(
            session.complete_send(&pending, Ok(server_copy)),
            SendOutcome::Retract(_)
        ));
    }

    #[test]
    fn test_deleted_pending_send_that_fails_is_dropped_quietly() {
        let mut session = active_session(vec![]);
        let pending = session.begin_send("typo").unwrap();
        session.begin_delete(&pending.temp_id).unwrap();

        assert_eq!(
            session.complete_send(&pending, Err(ChatError::Network("reset".into()))),
            SendOutcome::Ignored
        );
        assert!(session.messages().is_empty());
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_failed_retraction_restores_the_message() {
        let mut session = active_session(vec![]);
        let pending = session.begin_send("typo").unwrap();
        session.begin_delete(&pending.temp_id).unwrap();

        let SendOutcome::Retract(retract) =
            session.complete_send(&pending, Ok(confirmed(&ana(), 1, "typo", Some(&pending.temp_id))))
        else {
            panic!("expected a retraction");
        };
        session.complete_delete(retract, Err(ChatError::Network("offline".into())));
        assert_eq!(ids(&session), vec!["msg-1"]);
        assert!(matches!(session.last_error(), Some(ChatError::Network(_))));
    }

    #[test]
    fn test_cannot_delete_peer_message() {
        let mut session = active_session(vec![confirmed(&marta(), 1, "mine", None)]);
        assert!(matches!(
            session.begin_delete("msg-1"),
            Err(ChatError::NotAuthorized(_))
        ));
        assert_eq!(ids(&session), vec!["msg-1"]);
        assert!(matches!(session.begin_delete("nope"), Err(ChatError::NotFound(_))));
    }

    #[test]
    fn test_pushes_during_opening_are_applied_after_history() {
        let mut session = ChatSession::new(ana(), "guide-1").unwrap();
        let epoch = session.open().unwrap();

        // msg-2 arrives live before the fetch completes; msg-1 is deleted meanwhile
        session.on_message_created(confirmed(&marta(), 2, "live", None));
        session.on_message_deleted(&DeletedMessage {
            message_id: "msg-1".to_string(),
            conversation_id: session.conversation_id().clone(),
        });

        session.apply_history(
            epoch,
            Ok(vec![confirmed(&marta(), 1, "old", None), confirmed(&marta(), 2, "live", None)]),
        );
        assert_eq!(ids(&session), vec!["msg-2"]);
        assert_no_duplicate_ids(&session);
    }

    #[test]
    fn test_events_for_other_conversations_and_closed_sessions_are_ignored() {
        let mut session = active_session(vec![]);
        let mut other = confirmed(&marta(), 1, "elsewhere", None);
        other.conversation_id = resolve("guide-1", "traveler-2").unwrap();
        assert!(!session.on_message_created(other));

        session.close();
        assert!(!session.on_message_created(confirmed(&marta(), 2, "late", None)));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn test_reconciliation_never_duplicates() {
        let mut session = active_session(vec![]);
        let mut pendings = Vec::new();
        for i in 0..5 {
            pendings.push(session.begin_send(&format!("m{}", i)).unwrap());
        }
        assert_eq!(session.pending_count(), 5);

        // Interleave pushes and responses in a scrambled order
        for (i, pending) in pendings.iter().enumerate().rev() {
            let msg = confirmed(&ana(), i as u64 + 1, &pending.body, Some(&pending.temp_id));
            if i % 2 == 0 {
                session.on_message_created(msg.clone());
                session.complete_send(pending, Ok(msg));
            } else {
                session.complete_send(pending, Ok(msg.clone()));
                session.on_message_created(msg);
            }
            assert_no_duplicate_ids(&session);
        }
        assert_eq!(session.pending_count(), 0);
        assert_eq!(session.messages().len(), 5);
    }
}
