use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, Row};
use uuid::Uuid;

use crate::accounts::{profile_columns, profile_from_row};
use crate::models::{ConversationRow, MessageRow, NewMessage};
use crate::{Database, OptionalExt, format_ts, ordered_pair};

const MESSAGE_SELECT: &str = "SELECT m.id, m.conversation_id,
        m.sender_id, COALESCE(s.full_name, 'unknown'), COALESCE(s.profile_pic, ''),
        m.receiver_id, COALESCE(r.full_name, 'unknown'), COALESCE(r.profile_pic, ''),
        m.content, m.message_type, m.stream_msg_id, m.created_at, m.updated_at";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get(3)?,
        sender_pic: row.get(4)?,
        receiver_id: row.get(5)?,
        receiver_name: row.get(6)?,
        receiver_pic: row.get(7)?,
        content: row.get(8)?,
        message_type: row.get(9)?,
        stream_msg_id: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl Database {
    // -- Message mirror --

    /// Finds or creates the conversation for the unordered pair, refreshes its
    /// last-message snapshot, and stores the message. A message carrying a
    /// `stream_msg_id` already stored by the same sender is overwritten in
    /// place.
    ///
    /// Both writes are single upsert statements against uniqueness
    /// constraints, so concurrent first messages between a pair converge on
    /// one conversation row. Returns the conversation id and the stored row,
    /// or `None` (with nothing written) when the `stream_msg_id` belongs to
    /// another sender's message.
    pub fn save_message(&self, msg: &NewMessage<'_>) -> Result<Option<(String, MessageRow)>> {
        let now = format_ts(Utc::now());
        let (low, high) = ordered_pair(msg.sender_id, msg.receiver_id);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let conversation_id: String = tx.query_row(
                "INSERT INTO conversations
                    (id, participant_low, participant_high, last_message, last_message_type, last_message_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?6)
                 ON CONFLICT(participant_low, participant_high) DO UPDATE SET
                    last_message = excluded.last_message,
                    last_message_type = excluded.last_message_type,
                    last_message_at = excluded.last_message_at,
                    updated_at = excluded.updated_at
                 RETURNING id",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    low,
                    high,
                    msg.content,
                    msg.message_type,
                    now
                ],
                |row| row.get(0),
            )?;

            // NULL stream ids never conflict, so unkeyed messages always insert.
            let message_id: Option<String> = tx
                .query_row(
                    "INSERT INTO messages
                        (id, conversation_id, sender_id, receiver_id, content, message_type, stream_msg_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                     ON CONFLICT(stream_msg_id) DO UPDATE SET
                        conversation_id = excluded.conversation_id,
                        sender_id = excluded.sender_id,
                        receiver_id = excluded.receiver_id,
                        content = excluded.content,
                        message_type = excluded.message_type,
                        updated_at = excluded.updated_at
                     WHERE messages.sender_id = excluded.sender_id
                     RETURNING id",
                    rusqlite::params![
                        Uuid::new_v4().to_string(),
                        conversation_id,
                        msg.sender_id,
                        msg.receiver_id,
                        msg.content,
                        msg.message_type,
                        msg.stream_msg_id,
                        now
                    ],
                    |row| row.get(0),
                )
                .optional()?;

            // Dropping the transaction rolls back the conversation snapshot too.
            let Some(message_id) = message_id else {
                return Ok(None);
            };

            let stored = query_message(&tx, &message_id)?
                .ok_or_else(|| anyhow::anyhow!("Message {} vanished inside its own transaction", message_id))?;

            tx.commit()?;
            Ok(Some((conversation_id, stored)))
        })
    }

    pub fn find_conversation(&self, a: &str, b: &str) -> Result<Option<String>> {
        let (low, high) = ordered_pair(a, b);
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM conversations WHERE participant_low = ?1 AND participant_high = ?2",
                [low, high],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Conversations containing `account_id`, newest last message first.
    pub fn conversations_for(&self, account_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT c.id, c.last_message, c.last_message_type, c.last_message_at, c.created_at, c.updated_at, {}, {}
                 FROM conversations c
                 JOIN accounts lo ON lo.id = c.participant_low
                 JOIN accounts hi ON hi.id = c.participant_high
                 WHERE c.participant_low = ?1 OR c.participant_high = ?1
                 ORDER BY c.last_message_at DESC",
                profile_columns("lo"),
                profile_columns("hi")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([account_id], |row| {
                    Ok(ConversationRow {
                        id: row.get(0)?,
                        last_message: row.get(1)?,
                        last_message_type: row.get(2)?,
                        last_message_at: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                        participants: [profile_from_row(row, 6)?, profile_from_row(row, 13)?],
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The oldest `limit` messages, restricted to those strictly older than
    /// `before` when given, in ascending order.
    pub fn messages_in(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{}
                 FROM messages m
                 LEFT JOIN accounts s ON s.id = m.sender_id
                 LEFT JOIN accounts r ON r.id = m.receiver_id
                 WHERE m.conversation_id = ?1 AND (?2 IS NULL OR m.created_at < ?2)
                 ORDER BY m.created_at ASC, m.rowid ASC
                 LIMIT ?3",
                MESSAGE_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![conversation_id, before, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_messages(&self, conversation_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!(
        "{}
         FROM messages m
         LEFT JOIN accounts s ON s.id = m.sender_id
         LEFT JOIN accounts r ON r.id = m.receiver_id
         WHERE m.id = ?1",
        MESSAGE_SELECT
    );
    conn.query_row(&sql, [id], message_from_row).optional()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::NewAccount;

    fn seed(db: &Database, ids: &[&str]) {
        for &id in ids {
            let email = format!("{}@x.com", id);
            db.create_account(&NewAccount {
                id,
                email: &email,
                password_hash: None,
                full_name: id,
                profile_pic: "",
            })
            .unwrap();
        }
    }

    fn save(db: &Database, msg: &NewMessage<'_>) -> (String, MessageRow) {
        db.save_message(msg).unwrap().expect("message stored")
    }

    fn text<'a>(from: &'a str, to: &'a str, content: &'a str, key: Option<&'a str>) -> NewMessage<'a> {
        NewMessage {
            sender_id: from,
            receiver_id: to,
            content,
            message_type: "text",
            stream_msg_id: key,
        }
    }

    #[test]
    fn both_directions_share_one_conversation() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, &["a", "b"]);

        let (c1, _) = save(&db, &text("a", "b", "hi", None));
        let (c2, _) = save(&db, &text("b", "a", "hello", None));
        assert_eq!(c1, c2);
        assert_eq!(db.find_conversation("b", "a").unwrap(), Some(c1.clone()));

        let convs = db.conversations_for("a").unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].last_message, "hello");
    }

    #[test]
    fn replayed_stream_id_overwrites_instead_of_duplicating() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, &["a", "b"]);

        let (conv, first) = save(&db, &text("a", "b", "v1", Some("stream-1")));
        let (_, second) = save(&db, &text("a", "b", "v2", Some("stream-1")));

        assert_eq!(first.id, second.id);
        assert_eq!(second.content, "v2");
        assert_eq!(db.count_messages(&conv).unwrap(), 1);
    }

    #[test]
    fn unkeyed_messages_always_insert() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, &["a", "b"]);

        let (conv, _) = save(&db, &text("a", "b", "same", None));
        save(&db, &text("a", "b", "same", None));
        assert_eq!(db.count_messages(&conv).unwrap(), 2);
    }

    #[test]
    fn page_is_oldest_slice_in_ascending_order() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, &["a", "b"]);

        let mut conv = String::new();
        for i in 0..5 {
            let body = format!("m{}", i);
            conv = save(&db, &text("a", "b", &body, None)).0;
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let page = db.messages_in(&conv, 3, None).unwrap();
        let bodies: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(bodies, vec!["m0", "m1", "m2"]);

        let all = db.messages_in(&conv, 10, None).unwrap();
        let older = db.messages_in(&conv, 10, Some(&all[3].created_at)).unwrap();
        let bodies: Vec<_> = older.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(bodies, vec!["m0", "m1", "m2"]);

        let capped = db.messages_in(&conv, 2, Some(&all[4].created_at)).unwrap();
        let bodies: Vec<_> = capped.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(bodies, vec!["m0", "m1"]);
    }

    #[test]
    fn stream_id_of_another_sender_is_left_alone() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, &["a", "b", "c"]);

        let (ab, owned) = save(&db, &text("a", "b", "mine", Some("s-1")));
        assert!(db.save_message(&text("b", "c", "hijack", Some("s-1"))).unwrap().is_none());

        let page = db.messages_in(&ab, 10, None).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, owned.id);
        assert_eq!(page[0].content, "mine");
        assert_eq!(page[0].receiver_id, "b");
        assert!(db.find_conversation("b", "c").unwrap().is_none());
    }

    #[test]
    fn racing_first_messages_share_one_conversation() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        seed(&db, &["a", "b"]);

        let handles: Vec<_> = [("a", "b"), ("b", "a")]
            .into_iter()
            .map(|(from, to)| {
                let db = db.clone();
                std::thread::spawn(move || save(&db, &text(from, to, "first", None)).0)
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(ids[0], ids[1]);
        assert_eq!(db.conversations_for("a").unwrap().len(), 1);
        assert_eq!(db.conversations_for("b").unwrap().len(), 1);
        assert_eq!(db.count_messages(&ids[0]).unwrap(), 2);
    }
}
