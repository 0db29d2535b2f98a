//! Durable queue of notarization requests that could not be anchored.
//!
//! When the notarization sink stays unreachable past the retry budget, the
//! request is pushed here so that an operator (or a later replay) can anchor
//! it.  A critical decision may only proceed to execution once its request is
//! either anchored or durably queued.
//!
//! # Storage layout
//!
//! | column      | type    | description                              |
//! |-------------|---------|------------------------------------------|
//! | id          | INTEGER | autoincrement primary key (FIFO order)   |
//! | run_id      | TEXT    | run the request belongs to               |
//! | request     | TEXT    | JSON-encoded `NotarizationRequest`       |
//! | attempts    | INTEGER | delivery attempts made before queueing   |
//! | enqueued_at | TEXT    | RFC-3339 enqueue time                    |

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use warden_types::{NotarizationRequest, WardenError};

use crate::StorageError;

/// A queued request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredEntry {
    pub id: i64,
    pub request: NotarizationRequest,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Durable parking lot for undeliverable notarization requests.
pub trait DeferredQueue: Send + Sync {
    fn push(&self, request: &NotarizationRequest, attempts: u32) -> Result<i64, WardenError>;

    /// Every queued entry, oldest first.
    fn pending(&self) -> Result<Vec<DeferredEntry>, WardenError>;

    /// Drop an entry once it has been anchored.
    fn remove(&self, id: i64) -> Result<bool, WardenError>;
}

pub struct SqliteDeferredQueue {
    conn: Mutex<Connection>,
}

impl SqliteDeferredQueue {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS deferred_notarizations (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id      TEXT NOT NULL,
                request     TEXT NOT NULL,
                attempts    INTEGER NOT NULL,
                enqueued_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn load(&self) -> Result<Vec<DeferredEntry>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, request, attempts, enqueued_at
             FROM deferred_notarizations
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, body, attempts, ts) = row?;
            let enqueued_at = ts
                .parse::<DateTime<Utc>>()
                .map_err(|e| StorageError::Corrupt(format!("entry {id}: {e}")))?;
            let attempts = u32::try_from(attempts)
                .map_err(|_| StorageError::Corrupt(format!("entry {id}: attempts {attempts}")))?;
            out.push(DeferredEntry {
                id,
                request: serde_json::from_str(&body)?,
                attempts,
                enqueued_at,
            });
        }
        Ok(out)
    }
}

impl DeferredQueue for SqliteDeferredQueue {
    fn push(&self, request: &NotarizationRequest, attempts: u32) -> Result<i64, WardenError> {
        let body = serde_json::to_string(request).map_err(StorageError::from)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO deferred_notarizations (run_id, request, attempts, enqueued_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                request.run_id.to_string(),
                body,
                i64::from(attempts),
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(StorageError::from)?;
        Ok(conn.last_insert_rowid())
    }

    fn pending(&self) -> Result<Vec<DeferredEntry>, WardenError> {
        Ok(self.load()?)
    }

    fn remove(&self, id: i64) -> Result<bool, WardenError> {
        let conn = self.conn()?;
        let n = conn
            .execute("DELETE FROM deferred_notarizations WHERE id = ?1", params![id])
            .map_err(StorageError::from)?;
        Ok(n > 0)
    }
}
