use axum::{middleware, routing::get, Router};

use crate::auth::middleware::SessionDb;
use crate::chat::handlers as chat_handlers;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the session database into request extensions so the CurrentUser extractor can find it.
async fn inject_session_db(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut().insert(SessionDb(state.db.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Session-authenticated JSON queries
    let chat_routes = Router::new()
        .route("/api/messages", get(chat_handlers::get_messages))
        .route("/api/users/online", get(chat_handlers::get_online_users))
        .route("/api/users", get(chat_handlers::get_chat_users));

    // WebSocket upgrade; authenticates before the handshake completes
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(chat_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_session_db,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
