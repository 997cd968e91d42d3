//! Database boundary - one fresh connection per operation
//!
//! Store handlers never hold a live connection between calls. Every
//! operation asks [`Database::connect`] for a fresh one and drops it on
//! return, so handlers stay `Send + Sync` without pooling machinery and a
//! wedged connection cannot outlive the call that wedged it.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use rusqlite::Connection;

use crate::Result;

/// How long a connection waits on a locked database before giving up
const BUSY_TIMEOUT_MS: u64 = 5000;

static MEMORY_DB_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Handle to a store database.
///
/// For in-memory databases a keepalive connection pins the shared-cache
/// database so its contents survive between per-operation connections.
pub struct Database {
    path: PathBuf,
    _keepalive: Option<Mutex<Connection>>,
}

impl Database {
    /// Open a database file (creates if it doesn't exist)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        // WAL lets per-operation connections read while another writes
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Ok(Self {
            path,
            _keepalive: None,
        })
    }

    /// Open a private in-memory database (for testing).
    ///
    /// Uses a uniquely named shared-cache URI so every connection handed
    /// out by [`Database::connect`] sees the same data.
    pub fn open_in_memory() -> Result<Self> {
        let seq = MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = PathBuf::from(format!("file:gridstore-mem-{seq}?mode=memory&cache=shared"));
        let keepalive = Connection::open(&path)?;
        Ok(Self {
            path,
            _keepalive: Some(Mutex::new(keepalive)),
        })
    }

    /// Open a fresh connection scoped to one operation
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"))?;
        Ok(conn)
    }
}
