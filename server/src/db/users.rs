//! Minimal user lookups needed by the messaging core.
//! Account registration lives in the CRUD layer; `create_user` exists for
//! seeding and tests.

use rusqlite::{params, Connection, OptionalExtension};

use super::{now_timestamp, StoreError, UserId};

pub fn create_user(conn: &Connection, username: &str, email: &str) -> Result<UserId, StoreError> {
    conn.execute(
        "INSERT INTO users (username, email, created_at) VALUES (?1, ?2, ?3)",
        params![username, email, now_timestamp()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn username_by_id(conn: &Connection, user_id: UserId) -> Result<Option<String>, StoreError> {
    let username = conn
        .query_row(
            "SELECT username FROM users WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(username)
}
