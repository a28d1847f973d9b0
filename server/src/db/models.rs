/// Database row types returned to API callers.
/// These correspond to the SQLite schema defined in migrations.rs.
use serde::Serialize;

use super::UserId;

/// A persisted private message. Immutable except for `read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessage {
    pub id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    /// RFC3339 UTC, millisecond precision
    pub created_at: String,
    pub read: bool,
    pub sender_username: String,
}

/// Row of the presence query: a user currently marked online.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: UserId,
    pub username: String,
    pub last_seen: String,
}

/// Row of the chat list: another user plus the conversation summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserChatInfo {
    pub user_id: UserId,
    pub username: String,
    pub is_online: bool,
    pub last_message: String,
    pub last_message_time: Option<String>,
    pub unread_count: i64,
}
