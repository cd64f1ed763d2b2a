//! Per-user activity report over a date range.
//!
//! Lists the friendships made in the range and, per friend, the messages that
//! friend sent the user in the range. Message threads come from the
//! unpaginated conversation, so replies inside them are fully resolved.

use serde::Serialize;

use crate::directory::UserDirectory;
use crate::error::Error;
use crate::model::{Message, MessageId, Timestamp, User, UserId};
use crate::pager::ConversationPager;
use crate::service::Friend;
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportMessage {
    pub id: MessageId,
    pub text: String,
    pub date: Timestamp,
    pub reply_of: Option<MessageId>,
}

impl From<&Message> for ReportMessage {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            text: m.text.clone(),
            date: m.date,
            reply_of: m.reply_of_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceivedFrom {
    pub friend: User,
    pub messages: Vec<ReportMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityReport {
    pub user: User,
    pub from: Timestamp,
    pub to: Timestamp,
    pub new_friends: Vec<Friend>,
    pub received: Vec<ReceivedFrom>,
}

impl ActivityReport {
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn message_count(&self) -> usize {
        self.received.iter().map(|r| r.messages.len()).sum()
    }
}

/// Build the report for `user` over `[from, to]` (inclusive).
pub fn activity_report<D: UserDirectory>(
    storage: &Storage,
    pager: &ConversationPager<D>,
    user: UserId,
    from: Timestamp,
    to: Timestamp,
) -> Result<ActivityReport, Error> {
    if from > to {
        return Err(Error::validation(format!(
            "report range starts at {from} after it ends at {to}"
        )));
    }
    let me = pager.directory().resolve_user(user)?;
    let in_range = |ts: Timestamp| ts >= from && ts <= to;

    let mut new_friends = Vec::new();
    let mut received = Vec::new();
    for friendship in storage.list_friendships(user)? {
        let Some(other) = friendship.other(user) else {
            continue;
        };
        let friend = pager.directory().resolve_user(other)?;
        if in_range(friendship.since) {
            new_friends.push(Friend {
                user: friend.clone(),
                since: friendship.since,
            });
        }
        let messages: Vec<ReportMessage> = pager
            .full_conversation(user, other)?
            .iter()
            .filter(|m| m.from.id == other && in_range(m.date))
            .map(ReportMessage::from)
            .collect();
        if !messages.is_empty() {
            received.push(ReceivedFrom { friend, messages });
        }
    }

    Ok(ActivityReport {
        user: me,
        from,
        to,
        new_friends,
        received,
    })
}
