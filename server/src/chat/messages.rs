//! Durable store for private messages.
//!
//! Messages are created only through `save_message` (called by the router
//! before any delivery attempt) and are immutable apart from the `read`
//! flag, which `mark_messages_as_read` sets in bulk when a recipient opens
//! the conversation.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::PrivateMessage;
use crate::db::users::username_by_id;
use crate::db::{format_timestamp, StoreError, UserId};

/// Insert a message and return the stored record with its server-assigned
/// id and timestamp.
///
/// `created_at` never goes backwards for a (sender, receiver) pair: if the
/// wall clock reads earlier than the newest stored message of the pair, the
/// newest timestamp is reused.
pub fn save_message(
    conn: &Connection,
    sender_id: UserId,
    receiver_id: UserId,
    content: &str,
) -> Result<PrivateMessage, StoreError> {
    let sender_username =
        username_by_id(conn, sender_id)?.ok_or(StoreError::UnknownUser(sender_id))?;

    let newest: Option<String> = conn
        .query_row(
            "SELECT MAX(created_at) FROM private_messages WHERE sender_id = ?1 AND receiver_id = ?2",
            params![sender_id, receiver_id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();

    let now = format_timestamp(Utc::now());
    let created_at = match newest {
        Some(newest) if newest > now => newest,
        _ => now,
    };

    conn.execute(
        "INSERT INTO private_messages (sender_id, receiver_id, content, created_at, read)
         VALUES (?1, ?2, ?3, ?4, 0)",
        params![sender_id, receiver_id, content, created_at],
    )?;

    Ok(PrivateMessage {
        id: conn.last_insert_rowid(),
        sender_id,
        receiver_id,
        content: content.to_string(),
        created_at,
        read: false,
        sender_username,
    })
}

/// Page of the conversation between `a` and `b`.
///
/// Selects the `limit` newest messages after skipping `offset`, then returns
/// them oldest-first. Callers must not re-sort.
pub fn get_private_messages(
    conn: &Connection,
    a: UserId,
    b: UserId,
    limit: u32,
    offset: u32,
) -> Result<Vec<PrivateMessage>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT pm.id, pm.sender_id, pm.receiver_id, pm.content, pm.created_at, pm.read, u.username
         FROM private_messages pm
         JOIN users u ON pm.sender_id = u.user_id
         WHERE (pm.sender_id = ?1 AND pm.receiver_id = ?2)
            OR (pm.sender_id = ?2 AND pm.receiver_id = ?1)
         ORDER BY pm.created_at DESC, pm.id DESC
         LIMIT ?3 OFFSET ?4",
    )?;

    let mut messages = stmt
        .query_map(params![a, b, limit, offset], |row| {
            Ok(PrivateMessage {
                id: row.get(0)?,
                sender_id: row.get(1)?,
                receiver_id: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
                read: row.get(5)?,
                sender_username: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    messages.reverse();
    Ok(messages)
}

/// Mark every unread message from `sender_id` to `receiver_id` as read.
pub fn mark_messages_as_read(
    conn: &Connection,
    sender_id: UserId,
    receiver_id: UserId,
) -> Result<usize, StoreError> {
    let updated = conn.execute(
        "UPDATE private_messages SET read = 1
         WHERE sender_id = ?1 AND receiver_id = ?2 AND read = 0",
        params![sender_id, receiver_id],
    )?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_in_memory, users::create_user};

    fn two_users(conn: &Connection) -> (UserId, UserId) {
        let a = create_user(conn, "alice", "alice@example.com").unwrap();
        let b = create_user(conn, "bob", "bob@example.com").unwrap();
        (a, b)
    }

    #[test]
    fn test_saved_message_is_last_of_first_page() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let (a, b) = two_users(&conn);

        save_message(&conn, a, b, "first").unwrap();
        save_message(&conn, b, a, "second").unwrap();
        let saved = save_message(&conn, a, b, "third").unwrap();

        let page = get_private_messages(&conn, a, b, 10, 0).unwrap();
        let contents: Vec<&str> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(page.last(), Some(&saved));
        assert_eq!(saved.sender_username, "alice");
        assert!(!saved.read);
    }

    #[test]
    fn test_pagination_walks_backwards_in_time() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let (a, b) = two_users(&conn);

        for i in 0..25 {
            save_message(&conn, a, b, &format!("m{}", i)).unwrap();
        }

        let newest = get_private_messages(&conn, b, a, 10, 0).unwrap();
        assert_eq!(newest.first().unwrap().content, "m15");
        assert_eq!(newest.last().unwrap().content, "m24");

        let older = get_private_messages(&conn, b, a, 10, 10).unwrap();
        assert_eq!(older.first().unwrap().content, "m5");
        assert_eq!(older.last().unwrap().content, "m14");

        let oldest = get_private_messages(&conn, b, a, 10, 20).unwrap();
        assert_eq!(oldest.len(), 5);
        assert_eq!(oldest.first().unwrap().content, "m0");
    }

    #[test]
    fn test_conversations_are_isolated() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let (a, b) = two_users(&conn);
        let c = create_user(&conn, "carol", "carol@example.com").unwrap();

        save_message(&conn, a, b, "to bob").unwrap();
        save_message(&conn, a, c, "to carol").unwrap();

        let page = get_private_messages(&conn, a, c, 10, 0).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content, "to carol");
    }

    #[test]
    fn test_created_at_non_decreasing_per_pair() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let (a, b) = two_users(&conn);

        // A row stamped in the future stands in for a clock that stepped back.
        conn.execute(
            "INSERT INTO private_messages (sender_id, receiver_id, content, created_at)
             VALUES (?1, ?2, 'future', '2999-01-01T00:00:00.000Z')",
            params![a, b],
        )
        .unwrap();

        let saved = save_message(&conn, a, b, "after").unwrap();
        assert_eq!(saved.created_at, "2999-01-01T00:00:00.000Z");

        let page = get_private_messages(&conn, a, b, 10, 0).unwrap();
        assert_eq!(page.last().unwrap().content, "after");
    }

    #[test]
    fn test_unknown_recipient_fails_persistence() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let (a, _) = two_users(&conn);

        assert!(matches!(
            save_message(&conn, a, 9999, "nobody"),
            Err(StoreError::Sqlite(_))
        ));
        assert!(matches!(
            save_message(&conn, 9999, a, "ghost"),
            Err(StoreError::UnknownUser(9999))
        ));
    }

    #[test]
    fn test_mark_read_only_touches_one_direction() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let (a, b) = two_users(&conn);

        save_message(&conn, a, b, "a1").unwrap();
        save_message(&conn, a, b, "a2").unwrap();
        save_message(&conn, b, a, "b1").unwrap();

        assert_eq!(mark_messages_as_read(&conn, a, b).unwrap(), 2);
        assert_eq!(mark_messages_as_read(&conn, a, b).unwrap(), 0);

        let page = get_private_messages(&conn, a, b, 10, 0).unwrap();
        for msg in page {
            assert_eq!(msg.read, msg.sender_id == a, "unexpected read flag on {:?}", msg);
        }
    }
}
