//! Social events and subscriptions.

use crate::directory::UserDirectory;
use crate::error::Error;
use crate::model::{Event, EventId, NewEvent, Subscription, Timestamp, UserId};
use crate::slog;
use crate::storage::Storage;

pub struct EventService<D = Storage> {
    storage: Storage,
    directory: D,
}

impl EventService<Storage> {
    pub fn new(storage: Storage) -> Self {
        let directory = storage.clone();
        Self::with_directory(storage, directory)
    }
}

impl<D: UserDirectory> EventService<D> {
    pub fn with_directory(storage: Storage, directory: D) -> Self {
        Self { storage, directory }
    }

    /// Create an event; the organizer is subscribed with notifications on.
    pub fn create_event(&self, new: NewEvent) -> Result<Event, Error> {
        if new.name.trim().is_empty() {
            return Err(Error::validation("event name is empty"));
        }
        match self.directory.resolve_user(new.organizer) {
            Ok(_) => {}
            Err(Error::NotFound(_)) => {
                return Err(Error::validation(format!(
                    "unknown organizer {}",
                    new.organizer
                )))
            }
            Err(e) => return Err(e),
        }
        self.storage.insert_event(&new)
    }

    pub fn get_event(&self, id: EventId) -> Result<Event, Error> {
        self.storage
            .get_event(id)?
            .ok_or_else(|| Error::not_found("event", id.0))
    }

    pub fn delete_event(&self, id: EventId) -> Result<(), Error> {
        if !self.storage.delete_event(id)? {
            return Err(Error::not_found("event", id.0));
        }
        slog!(info, "events: deleted {id}");
        Ok(())
    }

    /// Returns false when the user was already subscribed.
    pub fn subscribe(&self, event: EventId, user: UserId) -> Result<bool, Error> {
        self.get_event(event)?;
        self.directory.resolve_user(user)?;
        let added = self.storage.insert_subscription(event, user)?;
        if added {
            slog!(info, "events: {user} subscribed to {event}");
        }
        Ok(added)
    }

    pub fn unsubscribe(&self, event: EventId, user: UserId) -> Result<(), Error> {
        if !self.storage.delete_subscription(event, user)? {
            return Err(Error::NotFound(format!("{user} is not subscribed to {event}")));
        }
        Ok(())
    }

    pub fn set_notifications(&self, event: EventId, user: UserId, on: bool) -> Result<(), Error> {
        if !self.storage.set_subscription_notify(event, user, on)? {
            return Err(Error::NotFound(format!("{user} is not subscribed to {event}")));
        }
        Ok(())
    }

    pub fn subscribers(&self, event: EventId) -> Result<Vec<Subscription>, Error> {
        self.get_event(event)?;
        self.storage.list_subscriptions(event)
    }

    pub fn events_for(&self, user: UserId) -> Result<Vec<Event>, Error> {
        self.storage.list_subscribed_events(user)
    }

    /// Subscribed events with notifications on that start within
    /// `[now, now + horizon_ms]`.
    pub fn due_notifications(
        &self,
        user: UserId,
        now: Timestamp,
        horizon_ms: u64,
    ) -> Result<Vec<Event>, Error> {
        let until = now.saturating_add(horizon_ms).min(i64::MAX as u64);
        self.storage.list_notifying_events(user, now, until)
    }
}
