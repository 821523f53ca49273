//! User credential stores.
//!
//! `MemoryStore` keeps users for the life of the process; `SqliteStore`
//! keeps them in a `users` table on disk. Both hold only SHA-256 digests
//! of `username \0 password`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("open user database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("user database: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Registration and login checks. Implementations serialize their own
/// access; the service calls them from many worker threads.
pub trait UserStore: Send + Sync {
    /// Create a user. `false` if the name is taken or empty.
    fn register(&self, username: &str, password: &str) -> bool;

    /// Check credentials. `false` for unknown users or a wrong password.
    fn login(&self, username: &str, password: &str) -> bool;
}

type Digest32 = [u8; 32];

/// In-memory store keeping only password digests.
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<String, Digest32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.lock().is_empty()
    }
}

/// Digest of the password, salted with the user name so equal passwords
/// of different users differ.
fn digest(username: &str, password: &str) -> Digest32 {
    let mut h = Sha256::new();
    h.update(username.as_bytes());
    h.update([0u8]);
    h.update(password.as_bytes());
    h.finalize().into()
}

impl UserStore for MemoryStore {
    fn register(&self, username: &str, password: &str) -> bool {
        if username.is_empty() {
            return false;
        }
        let mut users = self.users.lock();
        if users.contains_key(username) {
            debug!(user = username, "register: name taken");
            return false;
        }
        users.insert(username.to_string(), digest(username, password));
        debug!(user = username, "registered");
        true
    }

    fn login(&self, username: &str, password: &str) -> bool {
        let users = self.users.lock();
        let ok = users
            .get(username)
            .is_some_and(|stored| *stored == digest(username, password));
        debug!(user = username, ok, "login");
        ok
    }
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY NOT NULL,
    digest   BLOB NOT NULL
)";

/// SQLite-backed store. One connection, serialized behind a lock.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|source| StoreError::Open { path: path.to_path_buf(), source })?;
        Self::with_connection(conn)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let n: i64 = self.conn.lock().query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn try_register(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        let digest = digest(username, password);
        let inserted = self.conn.lock().execute(
            "INSERT OR IGNORE INTO users (username, digest) VALUES (?1, ?2)",
            params![username, &digest[..]],
        )?;
        Ok(inserted == 1)
    }

    fn try_login(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        let stored: Option<Vec<u8>> = self
            .conn
            .lock()
            .query_row("SELECT digest FROM users WHERE username = ?1", [username], |row| row.get(0))
            .optional()?;
        Ok(stored.is_some_and(|d| d[..] == digest(username, password)[..]))
    }
}

impl UserStore for SqliteStore {
    fn register(&self, username: &str, password: &str) -> bool {
        if username.is_empty() {
            return false;
        }
        match self.try_register(username, password) {
            Ok(ok) => {
                debug!(user = username, ok, "register");
                ok
            }
            Err(e) => {
                warn!(user = username, error = %e, "register failed");
                false
            }
        }
    }

    fn login(&self, username: &str, password: &str) -> bool {
        match self.try_login(username, password) {
            Ok(ok) => {
                debug!(user = username, ok, "login");
                ok
            }
            Err(e) => {
                warn!(user = username, error = %e, "login lookup failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_register_then_login() {
        let store = MemoryStore::new();
        assert!(store.register("alice", "s3cret"));
        assert!(store.login("alice", "s3cret"));
        assert!(!store.login("alice", "wrong"));
        assert!(!store.login("bob", "s3cret"));
    }

    #[test]
    fn test_duplicate_and_empty_rejected() {
        let store = MemoryStore::new();
        assert!(store.register("alice", "a"));
        assert!(!store.register("alice", "b"));
        assert!(store.login("alice", "a"));
        assert!(!store.register("", "x"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_plaintext_not_stored() {
        let store = MemoryStore::new();
        store.register("alice", "hunter2");
        let users = store.users.lock();
        assert_ne!(&users["alice"][..], b"hunter2");
        assert_ne!(digest("alice", "pw"), digest("bob", "pw"));
    }

    #[test]
    fn test_concurrent_register_single_winner() {
        let store = Arc::new(MemoryStore::new());
        let wins: usize = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.register("same", &format!("pw{}", i)))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            assert!(store.register("alice", "s3cret"));
            assert!(!store.register("alice", "other"));
            assert!(!store.register("", "x"));
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.login("alice", "s3cret"));
        assert!(!store.login("alice", "other"));
        assert!(!store.login("bob", "s3cret"));
    }

    #[test]
    fn test_sqlite_keeps_digest_only() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.register("alice", "hunter2"));
        let stored: Vec<u8> = store
            .conn
            .lock()
            .query_row("SELECT digest FROM users WHERE username = 'alice'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stored, digest("alice", "hunter2").to_vec());
    }

    #[test]
    fn test_sqlite_open_bad_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = SqliteStore::open(dir.path().join("missing/dir/users.db")).err().unwrap();
        assert!(matches!(err, StoreError::Open { .. }));
    }
}
