//! Configuration for the storage layer and the `socialnet` binary.
//!
//! Resolution order for every setting: command-line flag, then environment
//! variable, then built-in default.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::storage::db_path;

pub const HOME_ENV: &str = "SOCIALNET_HOME";
pub const DB_ENV: &str = "SOCIALNET_DB";
pub const POOL_SIZE_ENV: &str = "SOCIALNET_POOL_SIZE";

pub const DEFAULT_POOL_SIZE: u32 = 4;

/// What the library needs to open a [`crate::Storage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub pool_size: u32,
}

impl StorageConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Inspect and seed a socialnet database.
///
/// Settings can come from flags or environment variables; flags win.
#[derive(Parser, Debug)]
#[command(name = "socialnet", version, about)]
pub struct Cli {
    /// Data directory holding socialnet.db [env: SOCIALNET_HOME] [default: ~/.socialnet]
    #[arg(long, short = 'd', global = true)]
    pub data_dir: Option<PathBuf>,

    /// Explicit database file; overrides the data directory [env: SOCIALNET_DB]
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Connection pool size [env: SOCIALNET_POOL_SIZE] [default: 4]
    #[arg(long, global = true)]
    pub pool_size: Option<u32>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a user
    AddUser {
        first_name: String,
        last_name: String,
        email: String,
    },
    /// List registered users
    Users,
    /// Send a direct message
    Send {
        #[arg(long)]
        from: i64,
        #[arg(long, required = true, num_args = 1..)]
        to: Vec<i64>,
        text: String,
    },
    /// Reply to a message
    Reply {
        #[arg(long)]
        from: i64,
        #[arg(long)]
        parent: i64,
        text: String,
    },
    /// Delete a message; replies to it are kept
    DeleteMessage { id: i64 },
    /// Number of pages in a conversation
    Pages { user1: i64, user2: i64 },
    /// Show one page of a conversation (1-based)
    Page { user1: i64, user2: i64, page: u32 },
    /// Show a whole conversation
    Conversation { user1: i64, user2: i64 },
}

pub struct Config {
    pub data_dir: PathBuf,
    pub storage: StorageConfig,
    pub json: bool,
}

impl Config {
    pub fn from_cli_and_env(cli: &Cli) -> Self {
        Self::resolve(cli, |key| std::env::var(key).ok())
    }

    fn resolve(cli: &Cli, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| env(HOME_ENV).map(PathBuf::from))
            .unwrap_or_else(|| {
                env("HOME")
                    .map(|h| PathBuf::from(h).join(".socialnet"))
                    .unwrap_or_else(|| PathBuf::from(".socialnet"))
            });

        let path = cli
            .db
            .clone()
            .or_else(|| env(DB_ENV).map(PathBuf::from))
            .unwrap_or_else(|| db_path(&data_dir));

        let pool_size = cli
            .pool_size
            .or_else(|| env(POOL_SIZE_ENV).and_then(|v| v.parse().ok()))
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_POOL_SIZE);

        Self {
            data_dir,
            storage: StorageConfig { path, pool_size },
            json: cli.json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("socialnet").chain(args.iter().copied()))
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_come_from_home() {
        let config = Config::resolve(&cli(&["users"]), env_of(&[("HOME", "/home/ana")]));
        assert_eq!(config.data_dir, PathBuf::from("/home/ana/.socialnet"));
        assert_eq!(
            config.storage.path,
            PathBuf::from("/home/ana/.socialnet/socialnet.db")
        );
        assert_eq!(config.storage.pool_size, DEFAULT_POOL_SIZE);
    }

    #[test]
    fn env_overrides_defaults() {
        let config = Config::resolve(
            &cli(&["users"]),
            env_of(&[
                (HOME_ENV, "/srv/sn"),
                (POOL_SIZE_ENV, "9"),
                ("HOME", "/home/ana"),
            ]),
        );
        assert_eq!(config.storage.path, PathBuf::from("/srv/sn/socialnet.db"));
        assert_eq!(config.storage.pool_size, 9);
    }

    #[test]
    fn flags_override_env() {
        let config = Config::resolve(
            &cli(&["--db", "/tmp/x.db", "--pool-size", "2", "users"]),
            env_of(&[(DB_ENV, "/srv/other.db"), (POOL_SIZE_ENV, "9")]),
        );
        assert_eq!(config.storage.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.storage.pool_size, 2);
    }

    #[test]
    fn zero_or_garbage_pool_size_falls_back() {
        let config = Config::resolve(&cli(&["users"]), env_of(&[(POOL_SIZE_ENV, "lots")]));
        assert_eq!(config.storage.pool_size, DEFAULT_POOL_SIZE);
        let config = Config::resolve(&cli(&["--pool-size", "0", "users"]), env_of(&[]));
        assert_eq!(config.storage.pool_size, DEFAULT_POOL_SIZE);
    }

    #[test]
    fn page_command_parses() {
        match cli(&["page", "1", "2", "3"]).command {
            Command::Page { user1, user2, page } => assert_eq!((user1, user2, page), (1, 2, 3)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
