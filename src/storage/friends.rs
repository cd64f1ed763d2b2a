use rusqlite::{params, Connection, OptionalExtension};

use super::{to_sql_timestamp, to_timestamp, Storage};
use crate::error::Error;
use crate::model::{FriendRequest, Friendship, RequestId, RequestStatus, Timestamp, UserId};

const REQUEST_COLUMNS: &str = "id, from_id, to_id, status, created_at, updated_at";

type RawRequest = (RequestId, UserId, UserId, String, i64, i64);

fn raw_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRequest> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn request_from_raw(raw: RawRequest) -> Result<FriendRequest, Error> {
    let (id, from, to, status, created_at, updated_at) = raw;
    let status = RequestStatus::parse(&status)
        .ok_or_else(|| Error::Malformed(format!("friend_requests.status = {status:?}")))?;
    Ok(FriendRequest {
        id,
        from,
        to,
        status,
        created_at: to_timestamp(created_at, "friend_requests.created_at")?,
        updated_at: to_timestamp(updated_at, "friend_requests.updated_at")?,
    })
}

fn ordered(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

pub(crate) fn set_request_status(
    conn: &Connection,
    id: RequestId,
    status: RequestStatus,
    at: Timestamp,
) -> Result<bool, Error> {
    let affected = conn.execute(
        "UPDATE friend_requests SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), to_sql_timestamp(at)?, id],
    )?;
    Ok(affected > 0)
}

pub(crate) fn insert_friendship(
    conn: &Connection,
    a: UserId,
    b: UserId,
    since: Timestamp,
) -> Result<(), Error> {
    let (user1, user2) = ordered(a, b);
    conn.execute(
        "INSERT INTO friendships (user1, user2, since) VALUES (?1, ?2, ?3)",
        params![user1, user2, to_sql_timestamp(since)?],
    )?;
    Ok(())
}

impl Storage {
    // -----------------------------------------------------------------------
    // Friendships
    // -----------------------------------------------------------------------

    pub fn get_friendship(&self, a: UserId, b: UserId) -> Result<Option<Friendship>, Error> {
        let (user1, user2) = ordered(a, b);
        let since: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT since FROM friendships WHERE user1 = ?1 AND user2 = ?2",
                params![user1, user2],
                |row| row.get(0),
            )
            .optional()?;
        since
            .map(|s| {
                Ok(Friendship {
                    user1,
                    user2,
                    since: to_timestamp(s, "friendships.since")?,
                })
            })
            .transpose()
    }

    pub fn list_friendships(&self, user: UserId) -> Result<Vec<Friendship>, Error> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user1, user2, since FROM friendships
             WHERE user1 = ?1 OR user2 = ?1
             ORDER BY since ASC, user1, user2",
        )?;
        let raw = stmt
            .query_map(params![user], |row| {
                Ok((
                    row.get::<_, UserId>(0)?,
                    row.get::<_, UserId>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(user1, user2, since)| {
                Ok(Friendship {
                    user1,
                    user2,
                    since: to_timestamp(since, "friendships.since")?,
                })
            })
            .collect()
    }

    pub fn delete_friendship(&self, a: UserId, b: UserId) -> Result<bool, Error> {
        let (user1, user2) = ordered(a, b);
        let affected = self.conn()?.execute(
            "DELETE FROM friendships WHERE user1 = ?1 AND user2 = ?2",
            params![user1, user2],
        )?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Friend requests CRUD
    // -----------------------------------------------------------------------

    pub fn insert_friend_request(
        &self,
        from: UserId,
        to: UserId,
        at: Timestamp,
    ) -> Result<FriendRequest, Error> {
        let conn = self.conn()?;
        let ts = to_sql_timestamp(at)?;
        conn.execute(
            "INSERT INTO friend_requests (from_id, to_id, status, created_at, updated_at)
             VALUES (?1, ?2, 'pending', ?3, ?3)",
            params![from, to, ts],
        )?;
        Ok(FriendRequest {
            id: RequestId(conn.last_insert_rowid()),
            from,
            to,
            status: RequestStatus::Pending,
            created_at: at,
            updated_at: at,
        })
    }

    pub fn get_friend_request(&self, id: RequestId) -> Result<Option<FriendRequest>, Error> {
        let raw = self
            .conn()?
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM friend_requests WHERE id = ?1"),
                params![id],
                raw_request,
            )
            .optional()?;
        raw.map(request_from_raw).transpose()
    }

    /// Most recent request sent from `from` to `to`, any status.
    pub fn find_request_between(
        &self,
        from: UserId,
        to: UserId,
    ) -> Result<Option<FriendRequest>, Error> {
        let raw = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {REQUEST_COLUMNS} FROM friend_requests
                     WHERE from_id = ?1 AND to_id = ?2
                     ORDER BY updated_at DESC, id DESC LIMIT 1"
                ),
                params![from, to],
                raw_request,
            )
            .optional()?;
        raw.map(request_from_raw).transpose()
    }

    /// Requests sent or received by `user`, newest first.
    pub fn list_friend_requests(
        &self,
        user: UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<FriendRequest>, Error> {
        let conn = self.conn()?;
        let mut sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM friend_requests WHERE (from_id = ?1 OR to_id = ?1)"
        );
        let raw = match status {
            Some(s) => {
                sql.push_str(" AND status = ?2 ORDER BY updated_at DESC, id DESC");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![user, s.as_str()], raw_request)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                sql.push_str(" ORDER BY updated_at DESC, id DESC");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![user], raw_request)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        raw.into_iter().map(request_from_raw).collect()
    }

    pub fn update_friend_request_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        at: Timestamp,
    ) -> Result<bool, Error> {
        let conn = self.conn()?;
        set_request_status(&conn, id, status, at)
    }

    /// Approve a request and record the friendship atomically.
    pub fn approve_friend_request(&self, request: &FriendRequest, at: Timestamp) -> Result<(), Error> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        set_request_status(&tx, request.id, RequestStatus::Approved, at)?;
        insert_friendship(&tx, request.from, request.to, at)?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{storage, user};

    #[test]
    fn friendship_pairs_are_canonical() {
        let storage = storage();
        let a = user(&storage, "Ana");
        let b = user(&storage, "Bob");
        insert_friendship(&storage.conn().unwrap(), b.id, a.id, 50).unwrap();

        let f = storage.get_friendship(a.id, b.id).unwrap().unwrap();
        assert_eq!((f.user1, f.user2), (a.id, b.id));
        assert_eq!(storage.get_friendship(b.id, a.id).unwrap(), Some(f.clone()));
        assert_eq!(storage.list_friendships(b.id).unwrap(), vec![f]);

        let dup = insert_friendship(&storage.conn().unwrap(), a.id, b.id, 60).unwrap_err();
        assert_eq!(dup.kind(), crate::ErrorKind::Conflict);

        assert!(storage.delete_friendship(b.id, a.id).unwrap());
        assert!(storage.get_friendship(a.id, b.id).unwrap().is_none());
    }

    #[test]
    fn request_crud_and_filters() {
        let storage = storage();
        let a = user(&storage, "Ana");
        let b = user(&storage, "Bob");
        let c = user(&storage, "Cid");
        let r1 = storage.insert_friend_request(a.id, b.id, 10).unwrap();
        let r2 = storage.insert_friend_request(c.id, a.id, 20).unwrap();

        assert!(storage
            .update_friend_request_status(r1.id, RequestStatus::Rejected, 30)
            .unwrap());
        let r1 = storage.get_friend_request(r1.id).unwrap().unwrap();
        assert_eq!(r1.status, RequestStatus::Rejected);
        assert_eq!(r1.updated_at, 30);

        let all = storage.list_friend_requests(a.id, None).unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![r1.id, r2.id]);
        let pending = storage
            .list_friend_requests(a.id, Some(RequestStatus::Pending))
            .unwrap();
        assert_eq!(pending, vec![r2.clone()]);

        assert_eq!(storage.find_request_between(c.id, a.id).unwrap(), Some(r2));
        assert_eq!(storage.find_request_between(a.id, c.id).unwrap(), None);
    }

    #[test]
    fn approve_creates_friendship() {
        let storage = storage();
        let a = user(&storage, "Ana");
        let b = user(&storage, "Bob");
        let req = storage.insert_friend_request(a.id, b.id, 10).unwrap();
        storage.approve_friend_request(&req, 11).unwrap();
        assert_eq!(
            storage.get_friend_request(req.id).unwrap().unwrap().status,
            RequestStatus::Approved
        );
        assert_eq!(storage.get_friendship(a.id, b.id).unwrap().unwrap().since, 11);
    }

    #[test]
    fn unknown_status_is_malformed() {
        let storage = storage();
        let a = user(&storage, "Ana");
        let b = user(&storage, "Bob");
        let req = storage.insert_friend_request(a.id, b.id, 10).unwrap();
        storage
            .conn()
            .unwrap()
            .execute(
                "UPDATE friend_requests SET status = 'blocked' WHERE id = ?1",
                params![req.id],
            )
            .unwrap();
        let err = storage.get_friend_request(req.id).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }
}
