//! Types shared by the Wanderchat server and its clients: the conversation
//! id resolver, the message model, realtime events and the error taxonomy.

pub mod conversation;
pub mod error;
pub mod events;
pub mod models;

pub use conversation::{resolve, ConversationId};
pub use error::{ChatError, ErrorBody, ErrorKind};
pub use events::{ClientEvent, MessageNotification, ServerEvent};
pub use models::{
    ConversationLookup, DeletedMessage, Message, Role, SendMessageRequest, Sender, SenderProfile,
    UserIdentity,
};
