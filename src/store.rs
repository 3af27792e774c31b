// src/store.rs

use crate::constants::DB_BUSY_TIMEOUT_MS;
use crate::database;
use crate::error::Result;
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Owns one SQLite connection.
///
/// The lock is held for a single repository call at a time and never across a
/// model call. Several `Store`s may open the same database file; they only
/// coordinate through conditional SQL updates.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_millis(DB_BUSY_TIMEOUT_MS))?;
        database::init_db(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("[DB] Opening database at {:?}", path.as_ref());
        let conn = Connection::open(path)?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }
}
