use rusqlite::{params, Connection, OptionalExtension, Row};

use super::Storage;
use crate::error::Error;
use crate::model::{NewUser, User, UserId};
use crate::slog;

const USER_COLUMNS: &str = "id, first_name, last_name, email";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
    })
}

pub(crate) fn load_user(conn: &Connection, id: UserId) -> Result<Option<User>, Error> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

impl Storage {
    // -----------------------------------------------------------------------
    // Users CRUD
    // -----------------------------------------------------------------------

    /// Insert a user. A second user with the same email (case-insensitive) is
    /// a `Conflict`.
    pub fn insert_user(&self, new: &NewUser) -> Result<User, Error> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (first_name, last_name, email) VALUES (?1, ?2, ?3)",
            params![new.first_name, new.last_name, new.email],
        )?;
        let id = UserId(conn.last_insert_rowid());
        slog!(info, "users: created {}", crate::logging::user_id(id.0));
        Ok(User {
            id,
            first_name: new.first_name.clone(),
            last_name: new.last_name.clone(),
            email: new.email.clone(),
        })
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<User>, Error> {
        let conn = self.conn()?;
        load_user(&conn, id)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        let user = self
            .conn()?
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>, Error> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY last_name, first_name, id"
        ))?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Update names and email. Returns false when the user does not exist.
    pub fn update_user(&self, user: &User) -> Result<bool, Error> {
        let affected = self.conn()?.execute(
            "UPDATE users SET first_name = ?1, last_name = ?2, email = ?3 WHERE id = ?4",
            params![user.first_name, user.last_name, user.email, user.id],
        )?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::model::NewUser;
    use crate::storage::test_support::{storage, user};

    #[test]
    fn user_crud() {
        let storage = storage();
        let ana = user(&storage, "Ana");
        assert_eq!(storage.get_user(ana.id).unwrap(), Some(ana.clone()));

        let mut renamed = ana.clone();
        renamed.last_name = "Pop".into();
        assert!(storage.update_user(&renamed).unwrap());
        assert_eq!(
            storage.get_user(ana.id).unwrap().unwrap().full_name(),
            "Ana Pop"
        );

        assert_eq!(
            storage.find_user_by_email("ANA@example.org").unwrap(),
            Some(renamed)
        );
        assert_eq!(storage.get_user(crate::UserId(999)).unwrap(), None);
    }

    #[test]
    fn duplicate_email_conflicts() {
        let storage = storage();
        user(&storage, "Bob");
        let err = storage
            .insert_user(&NewUser {
                first_name: "Robert".into(),
                last_name: "Other".into(),
                email: "BOB@example.org".into(),
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn list_is_sorted_by_name() {
        let storage = storage();
        user(&storage, "Zed");
        user(&storage, "Amy");
        let names: Vec<String> = storage
            .list_users()
            .unwrap()
            .into_iter()
            .map(|u| u.first_name)
            .collect();
        assert_eq!(names, vec!["Amy", "Zed"]);
    }
}
