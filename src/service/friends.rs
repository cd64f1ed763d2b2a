//! Friend requests and friendships.
//!
//! Every state change is published as a [`FriendEvent`] on a broadcast
//! channel. Receivers come from [`FriendService::subscribe`]; a receiver that
//! falls more than [`EVENT_CHANNEL_CAPACITY`] events behind sees
//! `RecvError::Lagged` and skips ahead.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::directory::UserDirectory;
use crate::error::Error;
use crate::logging;
use crate::model::{now_millis, FriendRequest, RequestId, RequestStatus, Timestamp, User, UserId};
use crate::slog;
use crate::storage::Storage;

pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FriendEvent {
    RequestSent(FriendRequest),
    RequestAccepted(FriendRequest),
    RequestRejected(FriendRequest),
    RequestCancelled(FriendRequest),
    Unfriended { user1: UserId, user2: UserId },
}

/// A friend as seen from one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Friend {
    pub user: User,
    pub since: Timestamp,
}

pub struct FriendService<D = Storage> {
    storage: Storage,
    directory: D,
    events: broadcast::Sender<FriendEvent>,
}

impl FriendService<Storage> {
    pub fn new(storage: Storage) -> Self {
        let directory = storage.clone();
        Self::with_directory(storage, directory)
    }
}

impl<D: UserDirectory> FriendService<D> {
    pub fn with_directory(storage: Storage, directory: D) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            storage,
            directory,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FriendEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: FriendEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Send a request from `from` to `to`. A previously rejected or cancelled
    /// request between the same pair is reopened instead of duplicated.
    pub fn send_request(&self, from: UserId, to: UserId) -> Result<FriendRequest, Error> {
        if from == to {
            return Err(Error::validation("cannot befriend yourself"));
        }
        self.directory.resolve_user(from)?;
        self.directory.resolve_user(to)?;

        if self.storage.get_friendship(from, to)?.is_some() {
            return Err(Error::Conflict(format!("{from} and {to} are already friends")));
        }
        if let Some(existing) = self.storage.find_request_between(to, from)? {
            if existing.status == RequestStatus::Pending {
                return Err(Error::Conflict(format!(
                    "{to} already has a pending request to {from} ({})",
                    existing.id
                )));
            }
        }

        let now = now_millis();
        let request = match self.storage.find_request_between(from, to)? {
            Some(existing) if existing.status == RequestStatus::Pending => {
                return Err(Error::Conflict(format!(
                    "request {} is already pending",
                    existing.id
                )));
            }
            Some(existing) if existing.status != RequestStatus::Approved => {
                self.storage
                    .update_friend_request_status(existing.id, RequestStatus::Pending, now)?;
                FriendRequest {
                    status: RequestStatus::Pending,
                    updated_at: now,
                    ..existing
                }
            }
            _ => self.storage.insert_friend_request(from, to, now)?,
        };
        slog!(
            info,
            "friends: {} -> {} request {}",
            logging::user_id(from.0),
            logging::user_id(to.0),
            request.id
        );
        self.publish(FriendEvent::RequestSent(request.clone()));
        Ok(request)
    }

    pub fn accept(&self, id: RequestId) -> Result<FriendRequest, Error> {
        let request = self.pending(id)?;
        let now = now_millis();
        self.storage.approve_friend_request(&request, now)?;
        let request = FriendRequest {
            status: RequestStatus::Approved,
            updated_at: now,
            ..request
        };
        slog!(
            info,
            "friends: {} and {} are now friends",
            logging::user_id(request.from.0),
            logging::user_id(request.to.0)
        );
        self.publish(FriendEvent::RequestAccepted(request.clone()));
        Ok(request)
    }

    pub fn reject(&self, id: RequestId) -> Result<FriendRequest, Error> {
        let request = self.transition(id, RequestStatus::Rejected)?;
        self.publish(FriendEvent::RequestRejected(request.clone()));
        Ok(request)
    }

    /// The sender withdraws a pending request.
    pub fn cancel(&self, id: RequestId) -> Result<FriendRequest, Error> {
        let request = self.transition(id, RequestStatus::Cancelled)?;
        self.publish(FriendEvent::RequestCancelled(request.clone()));
        Ok(request)
    }

    pub fn requests_for(
        &self,
        user: UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<FriendRequest>, Error> {
        self.storage.list_friend_requests(user, status)
    }

    fn pending(&self, id: RequestId) -> Result<FriendRequest, Error> {
        let request = self
            .storage
            .get_friend_request(id)?
            .ok_or_else(|| Error::not_found("friend request", id.0))?;
        if request.status != RequestStatus::Pending {
            return Err(Error::Conflict(format!(
                "{id} is {}, not pending",
                request.status.as_str()
            )));
        }
        Ok(request)
    }

    fn transition(&self, id: RequestId, status: RequestStatus) -> Result<FriendRequest, Error> {
        let request = self.pending(id)?;
        let now = now_millis();
        self.storage.update_friend_request_status(id, status, now)?;
        slog!(info, "friends: {id} -> {}", status.as_str());
        Ok(FriendRequest {
            status,
            updated_at: now,
            ..request
        })
    }

    // -----------------------------------------------------------------------
    // Friendships
    // -----------------------------------------------------------------------

    pub fn are_friends(&self, a: UserId, b: UserId) -> Result<bool, Error> {
        Ok(self.storage.get_friendship(a, b)?.is_some())
    }

    pub fn unfriend(&self, a: UserId, b: UserId) -> Result<(), Error> {
        if !self.storage.delete_friendship(a, b)? {
            return Err(Error::NotFound(format!("friendship between {a} and {b}")));
        }
        slog!(
            info,
            "friends: {} and {} are no longer friends",
            logging::user_id(a.0),
            logging::user_id(b.0)
        );
        self.publish(FriendEvent::Unfriended { user1: a, user2: b });
        Ok(())
    }

    /// Friends of `user`, oldest friendship first.
    pub fn friends_of(&self, user: UserId) -> Result<Vec<Friend>, Error> {
        self.directory.resolve_user(user)?;
        self.storage
            .list_friendships(user)?
            .into_iter()
            .filter_map(|f| f.other(user).map(|other| (other, f.since)))
            .map(|(other, since)| {
                Ok(Friend {
                    user: self.directory.resolve_user(other)?,
                    since,
                })
            })
            .collect()
    }
}
