//! SQLite storage layer.
//!
//! A [`Storage`] owns an r2d2 pool of rusqlite connections. Each repository
//! method borrows one connection for the duration of the call and hands it
//! back on drop, so every exit path (including `?`) releases it. The per-table
//! CRUD lives in the submodules, all as inherent methods on `Storage`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::StorageConfig;
use crate::error::Error;
use crate::model::Timestamp;
use crate::slog;

mod events;
pub(crate) mod friends;
pub(crate) mod messages;
mod users;

pub type Conn = PooledConnection<SqliteConnectionManager>;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Storage handle
// ---------------------------------------------------------------------------

/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<SqliteConnectionManager>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.pool.state();
        f.debug_struct("Storage")
            .field("connections", &state.connections)
            .field("idle", &state.idle_connections)
            .finish()
    }
}

impl Storage {
    /// Open or create a database file and make sure the schema exists.
    pub fn open(config: &StorageConfig) -> Result<Self, Error> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(&config.path).with_init(|c| {
            c.execute_batch(
                "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
            )
        });
        let storage = Self::with_manager(manager, config.pool_size.max(1))?;
        slog!(
            info,
            "storage: opened {} (pool of {})",
            config.path.display(),
            config.pool_size.max(1)
        );
        Ok(storage)
    }

    /// Private in-memory database. The pool holds exactly one connection that
    /// never expires, since every SQLite in-memory connection is its own
    /// database.
    pub fn open_in_memory() -> Result<Self, Error> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys=ON;"));
        Self::with_manager(manager, 1)
    }

    fn with_manager(manager: SqliteConnectionManager, pool_size: u32) -> Result<Self, Error> {
        let pool = Pool::builder()
            .max_size(pool_size)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(CONNECTION_TIMEOUT)
            .build(manager)?;
        let storage = Self { pool };
        storage.create_schema()?;
        Ok(storage)
    }

    /// Borrow a connection from the pool.
    pub fn conn(&self) -> Result<Conn, Error> {
        Ok(self.pool.get()?)
    }

    fn create_schema(&self) -> Result<(), Error> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                first_name  TEXT NOT NULL,
                last_name   TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE COLLATE NOCASE
            );

            CREATE TABLE IF NOT EXISTS messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id   INTEGER NOT NULL REFERENCES users(id),
                body        TEXT NOT NULL,
                sent_at     INTEGER NOT NULL,
                reply_to    INTEGER REFERENCES messages(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_sender
                ON messages(sender_id, sent_at);
            CREATE INDEX IF NOT EXISTS idx_messages_reply_to
                ON messages(reply_to);

            CREATE TABLE IF NOT EXISTS message_recipients (
                message_id   INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                recipient_id INTEGER NOT NULL REFERENCES users(id),
                position     INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (message_id, recipient_id)
            );

            CREATE INDEX IF NOT EXISTS idx_recipients_recipient
                ON message_recipients(recipient_id, message_id);

            CREATE TABLE IF NOT EXISTS friendships (
                user1   INTEGER NOT NULL REFERENCES users(id),
                user2   INTEGER NOT NULL REFERENCES users(id),
                since   INTEGER NOT NULL,
                PRIMARY KEY (user1, user2),
                CHECK (user1 < user2)
            );

            CREATE TABLE IF NOT EXISTS friend_requests (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                from_id     INTEGER NOT NULL REFERENCES users(id),
                to_id       INTEGER NOT NULL REFERENCES users(id),
                status      TEXT NOT NULL DEFAULT 'pending',
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_friend_requests_to
                ON friend_requests(to_id, status);
            CREATE INDEX IF NOT EXISTS idx_friend_requests_from
                ON friend_requests(from_id, status);

            CREATE TABLE IF NOT EXISTS events (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                name         TEXT NOT NULL,
                description  TEXT NOT NULL DEFAULT '',
                starts_at    INTEGER NOT NULL,
                organizer_id INTEGER NOT NULL REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS event_subscriptions (
                event_id    INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                user_id     INTEGER NOT NULL REFERENCES users(id),
                notify      INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (event_id, user_id)
            );
            ",
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert a stored INTEGER timestamp, rejecting values no writer produces.
pub(crate) fn to_timestamp(raw: i64, column: &str) -> Result<Timestamp, Error> {
    u64::try_from(raw).map_err(|_| Error::Malformed(format!("{column} = {raw}")))
}

pub(crate) fn to_sql_timestamp(ts: Timestamp) -> Result<i64, Error> {
    i64::try_from(ts).map_err(|_| Error::validation(format!("timestamp {ts} out of range")))
}

/// Default database location inside a data directory.
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("socialnet.db")
}
