use crate::config::ChatSettings;
use crate::db::DbPool;
use crate::ws::Hub;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Registry of live WebSocket connections, one per user
    pub hub: Hub,
    /// Queue bounds and liveness timing for new connections
    pub chat: ChatSettings,
}

impl AppState {
    /// Spawn the connection registry and bundle it with the database.
    /// Must be called from within a tokio runtime.
    pub fn new(db: DbPool, chat: ChatSettings) -> Self {
        let hub = Hub::spawn(db.clone(), chat.hub_queue_capacity);
        Self { db, hub, chat }
    }
}
