use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wanderchat_shared::{
    resolve, ChatError, ConversationId, Message, MessageNotification, SendMessageRequest,
    ServerEvent, UserIdentity,
};

use crate::api::ChatApi;
use crate::realtime::{ConnectionStatus, RealtimeClient, RealtimeConfig};
use crate::session::{ChatSession, PendingDelete, SendOutcome, SessionState};

type Sessions = Arc<Mutex<HashMap<ConversationId, ChatSession>>>;

/// A send that failed. `body` is the text as typed, for restoring the input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error}")]
pub struct SendFailure {
    pub error: ChatError,
    pub body: String,
}

/// Why `open` did not leave the surface active.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpenError {
    #[error(transparent)]
    Failed(#[from] ChatError),
    /// A `close` or a newer `open` of the same surface took over while the
    /// history was in flight. The room now belongs to that call.
    #[error("opening {0} was superseded")]
    Superseded(ConversationId),
}

/// Drives the chat sessions of one signed-in user: HTTP calls go through
/// [`ChatApi`], pushes arrive from [`RealtimeClient`] and both are applied to
/// the matching [`ChatSession`].
///
/// The session map lock is only held between awaits, so any number of
/// sends and deletes can be in flight at once.
pub struct ChatClient {
    me: UserIdentity,
    api: ChatApi,
    realtime: RealtimeClient,
    sessions: Sessions,
    notifications: Arc<Mutex<Vec<MessageNotification>>>,
    pump: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Session updates never panic halfway through, so a poisoned lock still holds consistent data
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChatClient {
    pub fn connect(base_url: &str, token: &str, me: UserIdentity) -> Self {
        Self::with_realtime(base_url, token, me, RealtimeConfig::new(base_url, token, ""))
    }

    /// Like [`connect`](ChatClient::connect) with custom realtime settings.
    /// The config's user id is always replaced by `me.id`.
    pub fn with_realtime(base_url: &str, token: &str, me: UserIdentity, mut realtime: RealtimeConfig) -> Self {
        realtime.user_id = me.id.clone();
        let (realtime, events) = RealtimeClient::connect(realtime);
        let sessions: Sessions = Arc::new(Mutex::new(HashMap::new()));
        let notifications = Arc::new(Mutex::new(Vec::new()));
        let pump = tokio::spawn(pump_events(events, sessions.clone(), notifications.clone()));

        Self {
            me,
            api: ChatApi::new(base_url, token),
            realtime,
            sessions,
            notifications,
            pump,
        }
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.me
    }

    pub fn status(&self) -> ConnectionStatus {
        self.realtime.status()
    }

    pub async fn wait_connected(&self, within: Duration) -> bool {
        self.realtime.wait_for(ConnectionStatus::Connected, within).await
    }

    /// Open the chat surface with `peer_id`: join its room and fetch history
    /// concurrently. A failed fetch leaves the surface closed and empty.
    pub async fn open(&self, peer_id: &str) -> Result<ConversationId, OpenError> {
        let conversation_id = resolve(&self.me.id, peer_id)?;
        let epoch = {
            let mut sessions = lock(&self.sessions);
            let session = match sessions.entry(conversation_id.clone()) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => e.insert(ChatSession::new(self.me.clone(), peer_id)?),
            };
            session.open()?
        };

        self.realtime.join_room(&conversation_id);
        let history = self.api.history(&conversation_id).await;

        let mut sessions = lock(&self.sessions);
        let Some(session) = sessions.get_mut(&conversation_id) else {
            return Err(ChatError::Internal("session vanished while opening".to_string()).into());
        };
        if !session.apply_history(epoch, history) {
            return Err(OpenError::Superseded(conversation_id));
        }
        if session.state() == SessionState::Active {
            return Ok(conversation_id);
        }

        let err = session
            .take_error()
            .unwrap_or_else(|| ChatError::Internal("history fetch failed".to_string()));
        drop(sessions);
        self.realtime.leave_room(&conversation_id);
        Err(err.into())
    }

    /// Close a surface. In-flight calls are not cancelled; their results are dropped.
    pub fn close(&self, conversation_id: &ConversationId) {
        let left = lock(&self.sessions)
            .get_mut(conversation_id)
            .and_then(|session| session.close());
        if let Some(room) = left {
            self.realtime.leave_room(&room);
        }
    }

    /// Send with an optimistic entry that is reconciled when the call returns.
    pub async fn send(&self, conversation_id: &ConversationId, body: &str) -> Result<Message, SendFailure> {
        let pending = {
            let mut sessions = lock(&self.sessions);
            let session = sessions.get_mut(conversation_id).ok_or_else(|| SendFailure {
                error: ChatError::Validation(format!("conversation {} is not open", conversation_id)),
                body: body.to_string(),
            })?;
            session.begin_send(body).map_err(|error| SendFailure {
                error,
                body: body.to_string(),
            })?
        };

        let request = SendMessageRequest {
            receiver_id: pending.receiver_id.clone(),
            body: pending.body.clone(),
            sender_role: self.me.role,
            client_ref: Some(pending.temp_id.clone()),
        };
        let result = self.api.send(&request).await;

        let outcome = lock(&self.sessions)
            .get_mut(conversation_id)
            .map(|session| session.complete_send(&pending, result.clone()));
        if let Some(SendOutcome::Retract(delete)) = outcome {
            self.retract(conversation_id, delete).await;
        }
        result.map_err(|error| SendFailure {
            error,
            body: pending.body,
        })
    }

    /// Remove the persisted copy of a send that was deleted while in flight.
    async fn retract(&self, conversation_id: &ConversationId, delete: PendingDelete) {
        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %delete.message.id,
            "Retracting message deleted before confirmation"
        );
        let result = self
            .api
            .delete(&delete.message.id, self.me.role)
            .await
            .map(|_| ());
        if let Some(session) = lock(&self.sessions).get_mut(conversation_id) {
            session.complete_delete(delete, result);
        }
    }

    /// Delete with optimistic removal; the entry comes back if the call fails.
    pub async fn delete(&self, conversation_id: &ConversationId, message_id: &str) -> Result<(), ChatError> {
        let pending = {
            let mut sessions = lock(&self.sessions);
            let session = sessions.get_mut(conversation_id).ok_or_else(|| {
                ChatError::Validation(format!("conversation {} is not open", conversation_id))
            })?;
            session.begin_delete(message_id)?
        };
        let Some(pending) = pending else {
            return Ok(());
        };

        let result = self
            .api
            .delete(&pending.message.id, self.me.role)
            .await
            .map(|_| ());

        if let Some(session) = lock(&self.sessions).get_mut(conversation_id) {
            session.complete_delete(pending, result.clone());
        }
        result
    }

    /// Snapshot of the rendered list of a surface.
    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        lock(&self.sessions)
            .get(conversation_id)
            .map(|session| session.messages().to_vec())
            .unwrap_or_default()
    }

    pub fn session_state(&self, conversation_id: &ConversationId) -> SessionState {
        lock(&self.sessions)
            .get(conversation_id)
            .map(|session| session.state())
            .unwrap_or(SessionState::Closed)
    }

    /// Last error surfaced on a surface, cleared by reading it.
    pub fn take_error(&self, conversation_id: &ConversationId) -> Option<ChatError> {
        lock(&self.sessions)
            .get_mut(conversation_id)
            .and_then(|session| session.take_error())
    }

    pub fn take_notifications(&self) -> Vec<MessageNotification> {
        std::mem::take(&mut *lock(&self.notifications))
    }

    pub async fn shutdown(self) {
        self.pump.abort();
        self.realtime.shutdown().await;
    }
}

/// Apply server pushes to the sessions they belong to.
async fn pump_events(
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
    sessions: Sessions,
    notifications: Arc<Mutex<Vec<MessageNotification>>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::NewMessage(message) => {
                if let Some(session) = lock(&sessions).get_mut(&message.conversation_id) {
                    session.on_message_created(message);
                }
            }
            ServerEvent::MessageDeleted(deleted) => {
                if let Some(session) = lock(&sessions).get_mut(&deleted.conversation_id) {
                    session.on_message_deleted(&deleted);
                }
            }
            ServerEvent::MessageNotification(notification) => {
                lock(&notifications).push(notification);
            }
            ServerEvent::Registered(_) | ServerEvent::RoomJoined(_) | ServerEvent::Error(_) => {}
        }
    }
}
