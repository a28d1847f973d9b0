use chrono::Utc;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use std::time::Duration;

use crate::db::{format_timestamp, now_timestamp, DbPool, StoreError, UserId};

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session_id";

/// Create a session for `user_id` valid for `ttl`, replacing any existing
/// sessions of that user. Returns the opaque token handed to the client.
pub fn create_session(
    conn: &Connection,
    user_id: UserId,
    ttl: chrono::Duration,
) -> Result<String, StoreError> {
    let token_bytes: [u8; 32] = rand::rng().random();
    let token = hex::encode(token_bytes);
    let expires_at = format_timestamp(Utc::now() + ttl);

    conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?;
    conn.execute(
        "INSERT INTO sessions (session_id, user_id, expires_at) VALUES (?1, ?2, ?3)",
        params![token, user_id, expires_at],
    )?;

    Ok(token)
}

/// Resolve a session token to its identity. Expired or unknown tokens yield `None`.
pub fn validate_session(conn: &Connection, token: &str) -> Result<Option<UserId>, StoreError> {
    let user_id = conn
        .query_row(
            "SELECT user_id FROM sessions WHERE session_id = ?1 AND expires_at > ?2",
            params![token, now_timestamp()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(user_id)
}

/// Logout. No route here calls it; the account layer that owns login and
/// logout uses it against the same sessions table.
pub fn delete_session(conn: &Connection, token: &str) -> Result<(), StoreError> {
    conn.execute("DELETE FROM sessions WHERE session_id = ?1", params![token])?;
    Ok(())
}

pub fn purge_expired_sessions(conn: &Connection) -> Result<usize, StoreError> {
    let count = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?1",
        params![now_timestamp()],
    )?;
    Ok(count)
}

/// Spawn the background sweep that deletes expired sessions.
pub fn spawn_session_cleanup(db: DbPool, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            match crate::db::run_blocking(&db, purge_expired_sessions).await {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to clean up expired sessions: {}", e);
                }
            }
        }
    });
}
