use rusqlite::{params, Connection, OptionalExtension};

use super::{to_sql_timestamp, to_timestamp, Storage};
use crate::error::Error;
use crate::logging;
use crate::model::{MessageId, MessageRecord, Timestamp, UserId};
use crate::slog;

/// One row of the message/recipient join for a pairwise conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConversationRow {
    pub id: MessageId,
    pub sender_id: UserId,
    pub body: String,
    pub sent_at: Timestamp,
    pub reply_to: Option<MessageId>,
}

/// Rows for the conversation between `?1` and `?2`. Both directions, one row
/// per (message, counterpart recipient).
const CONVERSATION_FROM: &str = "
    FROM messages m
    JOIN message_recipients r ON r.message_id = m.id
    WHERE (m.sender_id = ?1 AND r.recipient_id = ?2)
       OR (m.sender_id = ?2 AND r.recipient_id = ?1)";

/// A limit/offset window over a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub limit: u32,
    pub offset: u64,
}

fn load_recipients(conn: &Connection, id: MessageId) -> Result<Vec<UserId>, Error> {
    let mut stmt = conn.prepare_cached(
        "SELECT recipient_id FROM message_recipients WHERE message_id = ?1 ORDER BY position",
    )?;
    let ids = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<Result<Vec<UserId>, _>>()?;
    Ok(ids)
}

fn insert_recipients(conn: &Connection, id: MessageId, recipients: &[UserId]) -> Result<(), Error> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO message_recipients (message_id, recipient_id, position) VALUES (?1, ?2, ?3)",
    )?;
    for (position, recipient) in recipients.iter().enumerate() {
        stmt.execute(params![id, recipient, position as i64])?;
    }
    Ok(())
}

impl Storage {
    // -----------------------------------------------------------------------
    // Messages CRUD
    // -----------------------------------------------------------------------

    /// Insert a message and its recipient rows in one transaction. Callers
    /// validate; the store only enforces referential integrity.
    pub fn insert_message(
        &self,
        sender_id: UserId,
        recipient_ids: &[UserId],
        body: &str,
        sent_at: Timestamp,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRecord, Error> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO messages (sender_id, body, sent_at, reply_to) VALUES (?1, ?2, ?3, ?4)",
            params![sender_id, body, to_sql_timestamp(sent_at)?, reply_to],
        )?;
        let id = MessageId(tx.last_insert_rowid());
        insert_recipients(&tx, id, recipient_ids)?;
        tx.commit()?;
        slog!(
            info,
            "messages: {} stored {} -> {} recipient(s)",
            logging::msg_id(id.0),
            logging::user_id(sender_id.0),
            recipient_ids.len()
        );
        Ok(MessageRecord {
            id,
            sender_id,
            recipient_ids: recipient_ids.to_vec(),
            body: body.to_string(),
            sent_at,
            reply_to,
        })
    }

    pub fn get_message(&self, id: MessageId) -> Result<Option<MessageRecord>, Error> {
        let conn = self.conn()?;
        let head = conn
            .query_row(
                "SELECT sender_id, body, sent_at, reply_to FROM messages WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, UserId>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<MessageId>>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((sender_id, body, sent_at, reply_to)) = head else {
            return Ok(None);
        };
        Ok(Some(MessageRecord {
            id,
            sender_id,
            recipient_ids: load_recipients(&conn, id)?,
            body,
            sent_at: to_timestamp(sent_at, "messages.sent_at")?,
            reply_to,
        }))
    }

    pub fn update_message_body(&self, id: MessageId, body: &str) -> Result<bool, Error> {
        let affected = self.conn()?.execute(
            "UPDATE messages SET body = ?1 WHERE id = ?2",
            params![body, id],
        )?;
        Ok(affected > 0)
    }

    /// Replace the recipient rows of a message.
    pub fn replace_recipients(&self, id: MessageId, recipient_ids: &[UserId]) -> Result<bool, Error> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM messages WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM message_recipients WHERE message_id = ?1",
            params![id],
        )?;
        insert_recipients(&tx, id, recipient_ids)?;
        tx.commit()?;
        Ok(true)
    }

    /// Delete a message. Replies that pointed at it keep existing with their
    /// reference cleared.
    pub fn delete_message(&self, id: MessageId) -> Result<bool, Error> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let orphaned = tx.execute(
            "UPDATE messages SET reply_to = NULL WHERE reply_to = ?1",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM message_recipients WHERE message_id = ?1",
            params![id],
        )?;
        let deleted = tx.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        tx.commit()?;
        if deleted > 0 {
            slog!(
                info,
                "messages: deleted {} ({orphaned} repl(ies) orphaned)",
                logging::msg_id(id.0)
            );
        }
        Ok(deleted > 0)
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    /// Number of join rows between two users, both directions.
    pub(crate) fn count_conversation(&self, a: UserId, b: UserId) -> Result<u64, Error> {
        let count: i64 = self.conn()?.query_row(
            &format!("SELECT COUNT(*) {CONVERSATION_FROM}"),
            params![a, b],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Conversation rows ordered by `(sent_at, id)`, optionally windowed.
    pub(crate) fn conversation_rows(
        &self,
        a: UserId,
        b: UserId,
        window: Option<Window>,
    ) -> Result<Vec<ConversationRow>, Error> {
        let conn = self.conn()?;
        let mut sql = format!(
            "SELECT m.id, m.sender_id, m.body, m.sent_at, m.reply_to {CONVERSATION_FROM}
             ORDER BY m.sent_at ASC, m.id ASC"
        );
        let raw = match window {
            Some(w) => {
                sql.push_str(" LIMIT ?3 OFFSET ?4");
                slog!(debug, "messages: window limit {} offset {}", w.limit, w.offset);
                let offset = i64::try_from(w.offset)
                    .map_err(|_| Error::validation(format!("offset {} out of range", w.offset)))?;
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![a, b, w.limit as i64, offset], raw_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![a, b], raw_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        raw.into_iter()
            .map(|(id, sender_id, body, sent_at, reply_to)| {
                Ok(ConversationRow {
                    id,
                    sender_id,
                    body,
                    sent_at: to_timestamp(sent_at, "messages.sent_at")?,
                    reply_to,
                })
            })
            .collect()
    }
}

type RawRow = (MessageId, UserId, String, i64, Option<MessageId>);

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}
