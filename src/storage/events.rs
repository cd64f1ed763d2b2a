use rusqlite::{params, OptionalExtension};

use super::{to_sql_timestamp, to_timestamp, Storage};
use crate::error::Error;
use crate::model::{Event, EventId, NewEvent, Subscription, Timestamp, UserId};
use crate::slog;

type RawEvent = (EventId, String, String, i64, UserId);

fn raw_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn event_from_raw((id, name, description, starts_at, organizer): RawEvent) -> Result<Event, Error> {
    Ok(Event {
        id,
        name,
        description,
        starts_at: to_timestamp(starts_at, "events.starts_at")?,
        organizer,
    })
}

impl Storage {
    // -----------------------------------------------------------------------
    // Events CRUD
    // -----------------------------------------------------------------------

    /// Insert an event and subscribe its organizer with notifications on.
    pub fn insert_event(&self, new: &NewEvent) -> Result<Event, Error> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO events (name, description, starts_at, organizer_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                new.name,
                new.description,
                to_sql_timestamp(new.starts_at)?,
                new.organizer
            ],
        )?;
        let id = EventId(tx.last_insert_rowid());
        tx.execute(
            "INSERT INTO event_subscriptions (event_id, user_id, notify) VALUES (?1, ?2, 1)",
            params![id, new.organizer],
        )?;
        tx.commit()?;
        slog!(info, "events: created {id} {:?}", new.name);
        Ok(Event {
            id,
            name: new.name.clone(),
            description: new.description.clone(),
            starts_at: new.starts_at,
            organizer: new.organizer,
        })
    }

    pub fn get_event(&self, id: EventId) -> Result<Option<Event>, Error> {
        let raw = self
            .conn()?
            .query_row(
                "SELECT id, name, description, starts_at, organizer_id FROM events WHERE id = ?1",
                params![id],
                raw_event,
            )
            .optional()?;
        raw.map(event_from_raw).transpose()
    }

    pub fn delete_event(&self, id: EventId) -> Result<bool, Error> {
        let affected = self
            .conn()?
            .execute("DELETE FROM events WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    /// Events `user` is subscribed to, soonest first.
    pub fn list_subscribed_events(&self, user: UserId) -> Result<Vec<Event>, Error> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.name, e.description, e.starts_at, e.organizer_id
             FROM events e JOIN event_subscriptions s ON s.event_id = e.id
             WHERE s.user_id = ?1
             ORDER BY e.starts_at ASC, e.id ASC",
        )?;
        let raw = stmt
            .query_map(params![user], raw_event)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(event_from_raw).collect()
    }

    /// Subscribed events with notifications on starting within `[from, until]`.
    pub fn list_notifying_events(
        &self,
        user: UserId,
        from: Timestamp,
        until: Timestamp,
    ) -> Result<Vec<Event>, Error> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.name, e.description, e.starts_at, e.organizer_id
             FROM events e JOIN event_subscriptions s ON s.event_id = e.id
             WHERE s.user_id = ?1 AND s.notify = 1
               AND e.starts_at >= ?2 AND e.starts_at <= ?3
             ORDER BY e.starts_at ASC, e.id ASC",
        )?;
        let raw = stmt
            .query_map(
                params![user, to_sql_timestamp(from)?, to_sql_timestamp(until)?],
                raw_event,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(event_from_raw).collect()
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Returns false if the user was already subscribed.
    pub fn insert_subscription(&self, event: EventId, user: UserId) -> Result<bool, Error> {
        let affected = self.conn()?.execute(
            "INSERT OR IGNORE INTO event_subscriptions (event_id, user_id, notify)
             VALUES (?1, ?2, 1)",
            params![event, user],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_subscription(&self, event: EventId, user: UserId) -> Result<bool, Error> {
        let affected = self.conn()?.execute(
            "DELETE FROM event_subscriptions WHERE event_id = ?1 AND user_id = ?2",
            params![event, user],
        )?;
        Ok(affected > 0)
    }

    pub fn set_subscription_notify(
        &self,
        event: EventId,
        user: UserId,
        notify: bool,
    ) -> Result<bool, Error> {
        let affected = self.conn()?.execute(
            "UPDATE event_subscriptions SET notify = ?1 WHERE event_id = ?2 AND user_id = ?3",
            params![notify as i32, event, user],
        )?;
        Ok(affected > 0)
    }

    pub fn list_subscriptions(&self, event: EventId) -> Result<Vec<Subscription>, Error> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT event_id, user_id, notify FROM event_subscriptions
             WHERE event_id = ?1 ORDER BY user_id",
        )?;
        let subs = stmt
            .query_map(params![event], |row| {
                Ok(Subscription {
                    event_id: row.get(0)?,
                    user_id: row.get(1)?,
                    notify: row.get::<_, i32>(2)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{storage, user};

    fn event(storage: &Storage, organizer: UserId, name: &str, starts_at: Timestamp) -> Event {
        storage
            .insert_event(&NewEvent {
                name: name.into(),
                description: String::new(),
                starts_at,
                organizer,
            })
            .unwrap()
    }

    #[test]
    fn organizer_is_subscribed() {
        let storage = storage();
        let a = user(&storage, "Ana");
        let e = event(&storage, a.id, "Picnic", 1_000);
        assert_eq!(storage.get_event(e.id).unwrap(), Some(e.clone()));
        assert_eq!(
            storage.list_subscriptions(e.id).unwrap(),
            vec![Subscription {
                event_id: e.id,
                user_id: a.id,
                notify: true
            }]
        );
    }

    #[test]
    fn subscription_lifecycle() {
        let storage = storage();
        let a = user(&storage, "Ana");
        let b = user(&storage, "Bob");
        let e = event(&storage, a.id, "Concert", 5_000);

        assert!(storage.insert_subscription(e.id, b.id).unwrap());
        assert!(!storage.insert_subscription(e.id, b.id).unwrap());
        assert!(storage.set_subscription_notify(e.id, b.id, false).unwrap());
        assert!(storage.list_notifying_events(b.id, 0, 10_000).unwrap().is_empty());
        assert_eq!(storage.list_subscribed_events(b.id).unwrap(), vec![e.clone()]);

        assert!(storage.delete_subscription(e.id, b.id).unwrap());
        assert!(storage.list_subscribed_events(b.id).unwrap().is_empty());
    }

    #[test]
    fn delete_cascades_subscriptions() {
        let storage = storage();
        let a = user(&storage, "Ana");
        let e = event(&storage, a.id, "Hike", 10);
        assert!(storage.delete_event(e.id).unwrap());
        assert!(storage.list_subscriptions(e.id).unwrap().is_empty());
        assert_eq!(storage.get_event(e.id).unwrap(), None);
    }

    #[test]
    fn notifying_events_respect_window() {
        let storage = storage();
        let a = user(&storage, "Ana");
        let early = event(&storage, a.id, "Early", 100);
        let inside = event(&storage, a.id, "Inside", 200);
        let _late = event(&storage, a.id, "Late", 400);
        let due = storage.list_notifying_events(a.id, 150, 300).unwrap();
        assert_eq!(due, vec![inside]);
        assert!(!due.contains(&early));
    }
}
