//! Durable presence: online flag and last-seen time per user.
//!
//! Written only by the connection registry on register/deregister, read by
//! the online-users and chat-list queries.

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::{OnlineUser, UserChatInfo};
use crate::db::{now_timestamp, StoreError, UserId};

/// Upsert the online flag for `user_id`, stamping `last_seen` with now.
pub fn set_user_status(conn: &Connection, user_id: UserId, online: bool) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO user_status (user_id, is_online, last_seen) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET is_online = excluded.is_online, last_seen = excluded.last_seen",
        params![user_id, online, now_timestamp()],
    )?;
    Ok(())
}

pub fn is_online(conn: &Connection, user_id: UserId) -> Result<bool, StoreError> {
    let online: Option<bool> = conn
        .query_row(
            "SELECT is_online FROM user_status WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(online.unwrap_or(false))
}

/// Users currently online, excluding `exclude`, ordered by username.
pub fn get_online_users(conn: &Connection, exclude: UserId) -> Result<Vec<OnlineUser>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT u.user_id, u.username, us.last_seen
         FROM users u
         INNER JOIN user_status us ON u.user_id = us.user_id
         WHERE us.is_online = 1 AND u.user_id != ?1
         ORDER BY u.username ASC",
    )?;

    let users = stmt
        .query_map(params![exclude], |row| {
            Ok(OnlineUser {
                user_id: row.get(0)?,
                username: row.get(1)?,
                last_seen: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(users)
}

/// Chat list for `current`: every other user with presence, the latest
/// message exchanged with them and how many of their messages are unread.
/// Most recent conversation first; users without messages follow by name.
pub fn get_users_for_chat(conn: &Connection, current: UserId) -> Result<Vec<UserChatInfo>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT u.user_id, u.username, COALESCE(us.is_online, 0),
                (SELECT pm.content FROM private_messages pm
                  WHERE (pm.sender_id = ?1 AND pm.receiver_id = u.user_id)
                     OR (pm.sender_id = u.user_id AND pm.receiver_id = ?1)
                  ORDER BY pm.created_at DESC, pm.id DESC LIMIT 1),
                (SELECT MAX(pm.created_at) FROM private_messages pm
                  WHERE (pm.sender_id = ?1 AND pm.receiver_id = u.user_id)
                     OR (pm.sender_id = u.user_id AND pm.receiver_id = ?1)),
                (SELECT COUNT(*) FROM private_messages pm
                  WHERE pm.sender_id = u.user_id AND pm.receiver_id = ?1 AND pm.read = 0)
         FROM users u
         LEFT JOIN user_status us ON u.user_id = us.user_id
         WHERE u.user_id != ?1",
    )?;

    let mut users = stmt
        .query_map(params![current], |row| {
            Ok(UserChatInfo {
                user_id: row.get(0)?,
                username: row.get(1)?,
                is_online: row.get(2)?,
                last_message: row
                    .get::<_, Option<String>>(3)?
                    .unwrap_or_else(|| "No messages yet".to_string()),
                last_message_time: row.get(4)?,
                unread_count: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // None sorts before Some, so reverse the time comparison.
    users.sort_by(|a, b| {
        b.last_message_time
            .cmp(&a.last_message_time)
            .then_with(|| a.username.cmp(&b.username))
    });

    Ok(users)
}
