use crate::chat::dispatcher::Dispatcher;
use crate::chat::service::ChatService;
use crate::chat::store::MessageStore;
use crate::config::ChatConfig;
use crate::db::DbPool;
use crate::ws::rooms::RoomMembership;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT verification secret shared with the auth service
    pub jwt_secret: Vec<u8>,
    /// Active WebSocket connections per user
    pub connections: ConnectionRegistry,
    /// Conversation rooms and the connections joined to them
    pub rooms: RoomMembership,
    /// Message operations with their realtime fan-out
    pub chat: ChatService,
    pub chat_config: ChatConfig,
}

impl AppState {
    /// Wire the registry, rooms, store and dispatcher together.
    /// The dispatcher shares the registry and rooms with the socket actors.
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, chat_config: ChatConfig) -> Self {
        let connections = ConnectionRegistry::new();
        let rooms = RoomMembership::new();
        let store = MessageStore::new(db.clone(), chat_config.max_body_chars);
        let dispatcher = Dispatcher::new(
            connections.clone(),
            rooms.clone(),
            chat_config.preview_chars,
        );

        Self {
            db,
            jwt_secret,
            connections,
            rooms,
            chat: ChatService::new(store, dispatcher),
            chat_config,
        }
    }
}
