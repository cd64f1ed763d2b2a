//! Paginated conversation retrieval with reply-chain reconstruction.
//!
//! A conversation between two users is every message one of them sent to the
//! other, in both directions, ordered by `(sent_at, id)`. Pages are 1-based
//! slices of [`DEFAULT_PAGE_SIZE`] messages; page 1 holds the oldest.
//!
//! Reply links are weak: while materialising a window, a message whose parent
//! was already materialised earlier in the same window gets the parent
//! attached in `reply_of`; otherwise only `reply_of_id` is set. A single page
//! and the full conversation are different windows, so the same message can
//! come back resolved from [`ConversationPager::full_conversation`] and
//! unresolved from [`ConversationPager::page`].

use std::collections::HashMap;
use std::num::NonZeroU32;

use crate::directory::UserDirectory;
use crate::error::Error;
use crate::logging;
use crate::model::{ConversationKey, Message, MessageId, User, UserId};
use crate::slog;
use crate::storage::messages::{ConversationRow, Window};
use crate::storage::Storage;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

pub struct ConversationPager<D = Storage> {
    storage: Storage,
    directory: D,
    page_size: NonZeroU32,
}

impl ConversationPager<Storage> {
    /// Pager that resolves users from the same database.
    pub fn new(storage: Storage) -> Self {
        let directory = storage.clone();
        Self::with_directory(storage, directory)
    }
}

impl<D: UserDirectory> ConversationPager<D> {
    pub fn with_directory(storage: Storage, directory: D) -> Self {
        Self {
            storage,
            directory,
            page_size: NonZeroU32::new(DEFAULT_PAGE_SIZE).unwrap_or(NonZeroU32::MIN),
        }
    }

    pub fn with_page_size(mut self, page_size: NonZeroU32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    /// `ceil(total / page_size)`, except that an empty conversation reports
    /// one (empty) page.
    pub fn page_count(&self, user1: UserId, user2: UserId) -> Result<u32, Error> {
        self.resolve_pair(user1, user2)?;
        let (lo, hi) = ConversationKey::new(user1, user2).users();
        let total = self.storage.count_conversation(lo, hi)?;
        Ok(pages_for(total, self.page_size))
    }

    /// Raw page fetch. Does not check `page_number` against the page count:
    /// anything out of range, including 0, is simply an empty list.
    pub fn page(&self, user1: UserId, user2: UserId, page_number: u32) -> Result<Vec<Message>, Error> {
        let (u1, u2) = self.resolve_pair(user1, user2)?;
        if page_number == 0 {
            return Ok(Vec::new());
        }
        let size = self.page_size.get();
        let window = Window {
            limit: size,
            offset: u64::from(page_number - 1) * u64::from(size),
        };
        let (lo, hi) = ConversationKey::new(user1, user2).users();
        let rows = self.storage.conversation_rows(lo, hi, Some(window))?;
        let messages = materialize(rows, &u1, &u2);
        slog!(
            debug,
            "pager: {} <-> {} page {page_number} ({} message(s))",
            logging::user_id(user1.0),
            logging::user_id(user2.0),
            messages.len()
        );
        Ok(messages)
    }

    /// Whole conversation, oldest first. Every reply whose parent is anywhere
    /// earlier in the conversation comes back resolved.
    pub fn full_conversation(&self, user1: UserId, user2: UserId) -> Result<Vec<Message>, Error> {
        let (u1, u2) = self.resolve_pair(user1, user2)?;
        let (lo, hi) = ConversationKey::new(user1, user2).users();
        let rows = self.storage.conversation_rows(lo, hi, None)?;
        Ok(materialize(rows, &u1, &u2))
    }

    fn resolve_pair(&self, user1: UserId, user2: UserId) -> Result<(User, User), Error> {
        let u1 = self.directory.resolve_user(user1)?;
        let u2 = if user2 == user1 {
            u1.clone()
        } else {
            self.directory.resolve_user(user2)?
        };
        Ok((u1, u2))
    }
}

pub(crate) fn pages_for(total: u64, page_size: NonZeroU32) -> u32 {
    if total == 0 {
        return 1;
    }
    let pages = total.div_ceil(u64::from(page_size.get()));
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// Build messages from ordered rows. Direction comes from comparing the stored
/// sender with the two users already in hand; reply parents are looked up
/// only among rows materialised before the current one.
fn materialize(rows: Vec<ConversationRow>, user1: &User, user2: &User) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(rows.len());
    let mut position: HashMap<MessageId, usize> = HashMap::with_capacity(rows.len());

    for row in rows {
        let (from, to) = if row.sender_id == user1.id {
            (user1, user2)
        } else {
            (user2, user1)
        };
        let reply_of = row
            .reply_to
            .and_then(|parent| position.get(&parent))
            .map(|&i| Box::new(out[i].clone()));
        if row.reply_to.is_some() && reply_of.is_none() {
            slog!(
                debug,
                "pager: {} replies outside the window",
                logging::msg_id(row.id.0)
            );
        }
        position.entry(row.id).or_insert(out.len());
        out.push(Message {
            id: row.id,
            from: from.clone(),
            to: vec![to.clone()],
            text: row.body,
            date: row.sent_at,
            reply_of_id: row.reply_to,
            reply_of,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Timestamp;

    fn nz(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    fn u(id: i64, name: &str) -> User {
        User {
            id: UserId(id),
            first_name: name.into(),
            last_name: "T".into(),
            email: format!("{name}@t"),
        }
    }

    fn row(id: i64, sender: i64, at: Timestamp, reply_to: Option<i64>) -> ConversationRow {
        ConversationRow {
            id: MessageId(id),
            sender_id: UserId(sender),
            body: format!("m{id}"),
            sent_at: at,
            reply_to: reply_to.map(MessageId),
        }
    }

    #[test]
    fn page_arithmetic() {
        assert_eq!(pages_for(0, nz(10)), 1);
        assert_eq!(pages_for(1, nz(10)), 1);
        assert_eq!(pages_for(10, nz(10)), 1);
        assert_eq!(pages_for(11, nz(10)), 2);
        assert_eq!(pages_for(25, nz(10)), 3);
        assert_eq!(pages_for(2, nz(1)), 2);
    }

    #[test]
    fn direction_follows_sender() {
        let a = u(1, "a");
        let b = u(2, "b");
        let msgs = materialize(vec![row(1, 1, 1, None), row(2, 2, 2, None)], &a, &b);
        assert_eq!(msgs[0].from, a);
        assert_eq!(msgs[0].to, vec![b.clone()]);
        assert_eq!(msgs[1].from, b);
        assert_eq!(msgs[1].to, vec![a]);
    }

    #[test]
    fn replies_resolve_only_backwards_within_window() {
        let a = u(1, "a");
        let b = u(2, "b");
        let msgs = materialize(
            vec![
                row(1, 1, 10, None),
                row(2, 2, 20, Some(1)),
                row(3, 1, 30, Some(99)),
                row(4, 1, 40, Some(2)),
            ],
            &a,
            &b,
        );
        let parent = msgs[1].reply_of.as_deref().unwrap();
        assert_eq!(parent.id, MessageId(1));
        assert!(parent.date <= msgs[1].date);

        assert!(msgs[2].has_unresolved_reply());
        assert_eq!(msgs[2].reply_of_id, Some(MessageId(99)));

        // Chains carry the parent's own resolution.
        let grand = msgs[3].reply_of.as_deref().unwrap();
        assert_eq!(grand.id, MessageId(2));
        assert_eq!(grand.reply_of.as_deref().map(|m| m.id), Some(MessageId(1)));
    }

    #[test]
    fn forward_reference_stays_unresolved() {
        let a = u(1, "a");
        let b = u(2, "b");
        // A stored reply_to pointing at a later row never resolves.
        let msgs = materialize(vec![row(1, 1, 10, Some(2)), row(2, 2, 20, None)], &a, &b);
        assert!(msgs[0].has_unresolved_reply());
    }
}
