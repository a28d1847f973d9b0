//! HTTP queries over the message and presence stores.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::CurrentUser;
use crate::chat::{messages, presence};
use crate::db::models::{OnlineUser, PrivateMessage, UserChatInfo};
use crate::db::{run_blocking, UserId};
use crate::state::AppState;

/// Fixed page size for conversation history.
pub const HISTORY_PAGE_SIZE: u32 = 10;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub with: Option<String>,
    pub offset: Option<String>,
}

/// GET /api/messages?with={user_id}&offset={n}
/// One page of the conversation with `with`, oldest-first.
/// Also marks `with`'s messages to the caller as read, in the background.
pub async fn get_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<PrivateMessage>>, StatusCode> {
    let other: UserId = query
        .with
        .as_deref()
        .and_then(|w| w.parse().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;
    let offset: u32 = query
        .offset
        .as_deref()
        .and_then(|o| o.parse().ok())
        .unwrap_or(0);
    let me = user.user_id;

    let db = state.db.clone();
    tokio::spawn(async move {
        match run_blocking(&db, move |conn| messages::mark_messages_as_read(conn, other, me)).await {
            Ok(count) if count > 0 => {
                tracing::debug!(user_id = me, with = other, count, "Marked messages read");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(user_id = me, with = other, error = %e, "Failed to mark messages read");
            }
        }
    });

    let page = run_blocking(&state.db, move |conn| {
        messages::get_private_messages(conn, me, other, HISTORY_PAGE_SIZE, offset)
    })
    .await
    .map_err(|e| {
        tracing::warn!(user_id = me, error = %e, "Failed to load message history");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(page))
}

/// GET /api/users/online: Users currently connected, excluding the caller.
pub async fn get_online_users(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<OnlineUser>>, StatusCode> {
    let me = user.user_id;
    let users = run_blocking(&state.db, move |conn| presence::get_online_users(conn, me))
        .await
        .map_err(|e| {
            tracing::warn!(user_id = me, error = %e, "Failed to load online users");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(users))
}

/// GET /api/users: Chat list with last message and unread counts.
pub async fn get_chat_users(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<UserChatInfo>>, StatusCode> {
    let me = user.user_id;
    let users = run_blocking(&state.db, move |conn| presence::get_users_for_chat(conn, me))
        .await
        .map_err(|e| {
            tracing::warn!(user_id = me, error = %e, "Failed to load chat list");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(users))
}
