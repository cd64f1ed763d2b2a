//! Message service: validated CRUD plus the conversation API callers use.

use crate::directory::UserDirectory;
use crate::error::Error;
use crate::logging;
use crate::model::{now_millis, Message, MessageId, MessageRecord, NewMessage, Timestamp, UserId};
use crate::pager::ConversationPager;
use crate::slog;
use crate::storage::Storage;

pub struct MessageService<D = Storage> {
    storage: Storage,
    pager: ConversationPager<D>,
}

impl MessageService<Storage> {
    pub fn new(storage: Storage) -> Self {
        let pager = ConversationPager::new(storage.clone());
        Self { storage, pager }
    }
}

impl<D: UserDirectory> MessageService<D> {
    pub fn with_pager(storage: Storage, pager: ConversationPager<D>) -> Self {
        Self { storage, pager }
    }

    pub fn pager(&self) -> &ConversationPager<D> {
        &self.pager
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    pub fn get_page_size(&self) -> u32 {
        self.pager.page_size()
    }

    pub fn get_number_of_conversation_pages(
        &self,
        user1: UserId,
        user2: UserId,
    ) -> Result<u32, Error> {
        self.pager.page_count(user1, user2)
    }

    /// Page `page` (1-based) of the conversation. Out-of-range pages are an
    /// [`Error::InvalidPage`], never clamped.
    pub fn get_conversation_page(
        &self,
        user1: UserId,
        user2: UserId,
        page: u32,
    ) -> Result<Vec<Message>, Error> {
        let page_count = self.pager.page_count(user1, user2)?;
        if page == 0 || page > page_count {
            slog!(
                warn,
                "messages: rejected page {page} of {page_count} for {} <-> {}",
                logging::user_id(user1.0),
                logging::user_id(user2.0)
            );
            return Err(Error::InvalidPage { page, page_count });
        }
        self.pager.page(user1, user2, page)
    }

    pub fn get_conversation(&self, user1: UserId, user2: UserId) -> Result<Vec<Message>, Error> {
        self.pager.full_conversation(user1, user2)
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    pub fn find_message(&self, id: MessageId) -> Result<MessageRecord, Error> {
        self.storage
            .get_message(id)?
            .ok_or_else(|| Error::not_found("message", id.0))
    }

    pub fn send_message(&self, new: NewMessage) -> Result<MessageRecord, Error> {
        validate_text(&new.text)?;
        self.validate_sender(new.from)?;
        let recipients = self.validate_recipients(new.from, &new.to)?;
        let sent_at = new.sent_at.unwrap_or_else(now_millis);
        self.storage
            .insert_message(new.from, &recipients, &new.text, sent_at, None)
    }

    /// Reply to `parent`. The reply goes to exactly one user and lands in a
    /// conversation that contains the parent: a recipient of the parent
    /// answers its sender, and the sender may follow up to a single recipient.
    pub fn reply_to(
        &self,
        parent: MessageId,
        from: UserId,
        text: &str,
        sent_at: Option<Timestamp>,
    ) -> Result<MessageRecord, Error> {
        validate_text(text)?;
        self.validate_sender(from)?;
        let parent = self.find_message(parent)?;

        let to = if parent.recipient_ids.contains(&from) {
            parent.sender_id
        } else if parent.sender_id == from {
            match parent.recipient_ids.as_slice() {
                [only] => *only,
                _ => {
                    return Err(Error::validation(format!(
                        "{} has several recipients; a follow-up reply needs exactly one",
                        parent.id
                    )))
                }
            }
        } else {
            return Err(Error::validation(format!(
                "{from} is not part of the conversation holding {}",
                parent.id
            )));
        };
        let recipients = self.validate_recipients(from, &[to])?;

        let sent_at = match sent_at {
            Some(ts) if ts < parent.sent_at => {
                return Err(Error::validation(format!(
                    "reply dated {ts} precedes its parent dated {}",
                    parent.sent_at
                )))
            }
            Some(ts) => ts,
            None => now_millis().max(parent.sent_at),
        };
        self.storage
            .insert_message(from, &recipients, text, sent_at, Some(parent.id))
    }

    pub fn edit_text(&self, id: MessageId, text: &str) -> Result<MessageRecord, Error> {
        validate_text(text)?;
        if !self.storage.update_message_body(id, text)? {
            return Err(Error::not_found("message", id.0));
        }
        slog!(info, "messages: edited text of {}", logging::msg_id(id.0));
        self.find_message(id)
    }

    pub fn edit_recipients(&self, id: MessageId, to: &[UserId]) -> Result<MessageRecord, Error> {
        let current = self.find_message(id)?;
        let recipients = self.validate_recipients(current.sender_id, to)?;
        if let Some(parent_id) = current.reply_to {
            let [only] = recipients.as_slice() else {
                return Err(Error::validation(format!(
                    "{id} is a reply and may only have one recipient"
                )));
            };
            if let Some(parent) = self.storage.get_message(parent_id)? {
                if !parent.is_between(current.sender_id, *only) {
                    return Err(Error::validation(format!(
                        "{id} replies to {parent_id} and must stay in its conversation"
                    )));
                }
            }
        }
        if !self.storage.replace_recipients(id, &recipients)? {
            return Err(Error::not_found("message", id.0));
        }
        slog!(info, "messages: edited recipients of {}", logging::msg_id(id.0));
        self.find_message(id)
    }

    /// Delete a message; replies pointing at it become standalone.
    pub fn delete_message(&self, id: MessageId) -> Result<(), Error> {
        if !self.storage.delete_message(id)? {
            return Err(Error::not_found("message", id.0));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    fn validate_sender(&self, from: UserId) -> Result<(), Error> {
        match self.pager.directory().resolve_user(from) {
            Ok(_) => Ok(()),
            Err(Error::NotFound(_)) => Err(Error::validation(format!("unknown sender {from}"))),
            Err(e) => Err(e),
        }
    }

    /// Recipients deduplicated in first-seen order. Every one must exist and
    /// none may be the sender.
    fn validate_recipients(&self, from: UserId, to: &[UserId]) -> Result<Vec<UserId>, Error> {
        let mut recipients: Vec<UserId> = Vec::with_capacity(to.len());
        for &id in to {
            if recipients.contains(&id) {
                continue;
            }
            if id == from {
                return Err(Error::validation("a message cannot be addressed to its sender"));
            }
            match self.pager.directory().resolve_user(id) {
                Ok(_) => recipients.push(id),
                Err(Error::NotFound(_)) => {
                    return Err(Error::validation(format!("unknown recipient {id}")))
                }
                Err(e) => return Err(e),
            }
        }
        if recipients.is_empty() {
            return Err(Error::validation("a message needs at least one recipient"));
        }
        Ok(recipients)
    }
}

fn validate_text(text: &str) -> Result<(), Error> {
    if text.trim().is_empty() {
        return Err(Error::validation("message text is empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{storage, user};
    use crate::ErrorKind;

    #[test]
    fn send_validates_input() {
        let storage = storage();
        let a = user(&storage, "Ana");
        let b = user(&storage, "Bob");
        let svc = MessageService::new(storage);

        let blank = svc.send_message(NewMessage::new(a.id, [b.id], "   ")).unwrap_err();
        assert!(blank.is_validation());

        let nobody = svc.send_message(NewMessage::new(a.id, Vec::<UserId>::new(), "hi")).unwrap_err();
        assert!(nobody.is_validation());

        let ghost = svc.send_message(NewMessage::new(UserId(99), [b.id], "hi")).unwrap_err();
        assert!(ghost.is_validation());

        let unknown = svc
            .send_message(NewMessage::new(a.id, [b.id, UserId(98)], "hi"))
            .unwrap_err();
        assert!(unknown.is_validation());

        let to_self = svc.send_message(NewMessage::new(a.id, [a.id], "hi")).unwrap_err();
        assert!(to_self.is_validation());

        let ok = svc
            .send_message(NewMessage::new(a.id, [b.id, b.id], "hi").at(5))
            .unwrap();
        assert_eq!(ok.recipient_ids, vec![b.id]);
        assert_eq!(ok.sent_at, 5);
    }

    #[test]
    fn reply_goes_back_to_the_sender() {
        let storage = storage();
        let a = user(&storage, "Ana");
        let b = user(&storage, "Bob");
        let c = user(&storage, "Cid");
        let svc = MessageService::new(storage);

        let parent = svc
            .send_message(NewMessage::new(a.id, [b.id, c.id], "party?").at(10))
            .unwrap();
        let reply = svc.reply_to(parent.id, c.id, "yes", Some(11)).unwrap();
        assert_eq!(reply.recipient_ids, vec![a.id]);
        assert_eq!(reply.reply_to, Some(parent.id));

        // The sender cannot pick among several recipients.
        assert!(svc.reply_to(parent.id, a.id, "who?", Some(12)).unwrap_err().is_validation());
        // Outsiders cannot reply.
        let stranger = user(&svc.storage, "Dan");
        assert!(svc
            .reply_to(parent.id, stranger.id, "me too", Some(12))
            .unwrap_err()
            .is_validation());
        // Replies cannot predate their parent.
        assert!(svc.reply_to(parent.id, b.id, "late", Some(9)).unwrap_err().is_validation());
        // Missing parent is a repository NotFound.
        assert_eq!(
            svc.reply_to(MessageId(500), b.id, "?", None).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn follow_up_to_single_recipient() {
        let storage = storage();
        let a = user(&storage, "Ana");
        let b = user(&storage, "Bob");
        let svc = MessageService::new(storage);
        let parent = svc.send_message(NewMessage::new(a.id, [b.id], "one").at(1)).unwrap();
        let follow = svc.reply_to(parent.id, a.id, "two", None).unwrap();
        assert_eq!(follow.recipient_ids, vec![b.id]);
        assert!(follow.sent_at >= parent.sent_at);
    }

    #[test]
    fn edits() {
        let storage = storage();
        let a = user(&storage, "Ana");
        let b = user(&storage, "Bob");
        let c = user(&storage, "Cid");
        let svc = MessageService::new(storage);

        let msg = svc.send_message(NewMessage::new(a.id, [b.id], "helo").at(1)).unwrap();
        assert_eq!(svc.edit_text(msg.id, "hello").unwrap().body, "hello");
        assert!(svc.edit_text(msg.id, "").unwrap_err().is_validation());
        assert_eq!(
            svc.edit_text(MessageId(77), "x").unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let edited = svc.edit_recipients(msg.id, &[b.id, c.id]).unwrap();
        assert_eq!(edited.recipient_ids, vec![b.id, c.id]);

        let reply = svc.reply_to(msg.id, b.id, "hey", Some(2)).unwrap();
        assert!(svc
            .edit_recipients(reply.id, &[a.id, c.id])
            .unwrap_err()
            .is_validation());
        assert!(svc
            .edit_recipients(reply.id, &[c.id])
            .unwrap_err()
            .is_validation());
        assert_eq!(
            svc.edit_recipients(reply.id, &[a.id]).unwrap().recipient_ids,
            vec![a.id]
        );
    }

    #[test]
    fn reply_cannot_be_moved_out_of_its_thread() {
        let storage = storage();
        let a = user(&storage, "Ana");
        let b = user(&storage, "Bob");
        let c = user(&storage, "Cid");
        let svc = MessageService::new(storage);

        let question = svc
            .send_message(NewMessage::new(a.id, [b.id], "lunch?").at(1))
            .unwrap();
        let answer = svc.reply_to(question.id, b.id, "sure", Some(2)).unwrap();
        assert!(svc
            .edit_recipients(answer.id, &[c.id])
            .unwrap_err()
            .is_validation());

        assert_eq!(svc.find_message(answer.id).unwrap().recipient_ids, vec![a.id]);
        let thread = svc.get_conversation(a.id, b.id).unwrap();
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[1].reply_of.as_ref().map(|p| p.id), Some(question.id));
        assert!(svc.get_conversation(b.id, c.id).unwrap().is_empty());
    }

    #[test]
    fn delete_missing_is_not_found() {
        let svc = MessageService::new(storage());
        assert_eq!(
            svc.delete_message(MessageId(1)).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
