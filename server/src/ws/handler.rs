use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use crate::auth::middleware::{authenticate, credential_from_headers};
use crate::state::AppState;
use crate::ws::actor;

/// GET /ws
/// WebSocket upgrade endpoint. Authenticates via the `session_id` cookie or
/// an `Authorization: Bearer` header.
/// The session is validated before upgrading; on failure the request gets a
/// plain 401 and no socket is ever opened. On success, spawns an actor for
/// the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = credential_from_headers(&headers) else {
        tracing::warn!("WebSocket auth failed: no credential");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let user_id = match authenticate(&state.db, token).await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => {
            tracing::warn!("WebSocket auth failed: invalid or expired session");
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Err(e) => {
            tracing::error!(error = %e, "WebSocket auth failed: session lookup error");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    tracing::info!(user_id, "WebSocket connection authenticated");

    let max_bytes = state.chat.max_message_bytes;
    ws.max_message_size(max_bytes)
        .max_frame_size(max_bytes)
        .on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
}
