//! Persistent shard vault.
//!
//! # Storage layout
//!
//! | table            | columns                                             |
//! |------------------|-----------------------------------------------------|
//! | `vault_shards`   | `id`, `run_id`, `agent_id`, `sealed` (BLOB)         |
//! | `vault_outputs`  | `run_id`, `shard_id`, `agent_id`, `body` (JSON)     |
//! | `vault_tombstones` | `run_id`, `wiped_at`                              |
//!
//! The connection runs with `PRAGMA secure_delete = ON` so that deleted
//! shard bytes are zeroed in the database file rather than left in free
//! pages.  Every write checks the tombstone table inside the same lock.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, params};
use tracing::warn;
use uuid::Uuid;
use warden_kernel::vault::{DiscardReport, ShardVault};
use warden_types::{AgentOutput, Shard, WardenError};

use crate::StorageError;

pub struct SqliteShardVault {
    conn: Mutex<Connection>,
}

impl SqliteShardVault {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "PRAGMA secure_delete = ON;
             CREATE TABLE IF NOT EXISTS vault_shards (
                 id       TEXT NOT NULL PRIMARY KEY,
                 run_id   TEXT NOT NULL,
                 agent_id TEXT NOT NULL,
                 sealed   BLOB NOT NULL
             );
             CREATE INDEX IF NOT EXISTS vault_shards_run ON vault_shards (run_id);
             CREATE TABLE IF NOT EXISTS vault_outputs (
                 run_id   TEXT NOT NULL,
                 shard_id TEXT NOT NULL,
                 agent_id TEXT NOT NULL,
                 body     TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS vault_outputs_run ON vault_outputs (run_id);
             CREATE TABLE IF NOT EXISTS vault_tombstones (
                 run_id   TEXT NOT NULL PRIMARY KEY,
                 wiped_at TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

fn tombstoned(conn: &Connection, run_id: &str) -> Result<bool, StorageError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM vault_tombstones WHERE run_id = ?1",
        params![run_id],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

fn count(conn: &Connection, table: &str, run_id: &str) -> Result<usize, StorageError> {
    let n: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE run_id = ?1"),
        params![run_id],
        |row| row.get(0),
    )?;
    usize::try_from(n).map_err(|_| StorageError::Corrupt(format!("negative count in {table}")))
}

impl ShardVault for SqliteShardVault {
    fn put_shard(&self, shard: &Shard) -> Result<(), WardenError> {
        let conn = self.conn()?;
        let run = shard.run_id.to_string();
        if tombstoned(&conn, &run)? {
            warn!(run_id = %shard.run_id, "rejected shard write to wiped run");
            return Err(WardenError::Wiped {
                run_id: shard.run_id,
            });
        }
        conn.execute(
            "INSERT INTO vault_shards (id, run_id, agent_id, sealed) VALUES (?1, ?2, ?3, ?4)",
            params![shard.id.to_string(), run, shard.agent_id, shard.sealed],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }

    fn put_output(&self, run_id: Uuid, output: &AgentOutput) -> Result<(), WardenError> {
        let conn = self.conn()?;
        let run = run_id.to_string();
        if tombstoned(&conn, &run)? {
            warn!(%run_id, "rejected output write to wiped run");
            return Err(WardenError::Wiped { run_id });
        }
        let body = serde_json::to_string(output).map_err(StorageError::from)?;
        conn.execute(
            "INSERT INTO vault_outputs (run_id, shard_id, agent_id, body) VALUES (?1, ?2, ?3, ?4)",
            params![run, output.shard_id.to_string(), output.agent_id, body],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }

    fn outputs(&self, run_id: Uuid) -> Result<Vec<AgentOutput>, WardenError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT body FROM vault_outputs WHERE run_id = ?1 ORDER BY rowid ASC")
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map(params![run_id.to_string()], |row| row.get::<_, String>(0))
            .map_err(StorageError::from)?;
        let mut out = Vec::new();
        for row in rows {
            let body = row.map_err(StorageError::from)?;
            out.push(serde_json::from_str(&body).map_err(StorageError::from)?);
        }
        Ok(out)
    }

    fn discard(&self, run_id: Uuid) -> Result<DiscardReport, WardenError> {
        let mut conn = self.conn()?;
        let run = run_id.to_string();
        let tx = conn.transaction().map_err(StorageError::from)?;
        tx.execute(
            "INSERT OR IGNORE INTO vault_tombstones (run_id, wiped_at) VALUES (?1, ?2)",
            params![run, Utc::now().to_rfc3339()],
        )
        .map_err(StorageError::from)?;
        let shards_discarded = tx
            .execute("DELETE FROM vault_shards WHERE run_id = ?1", params![run])
            .map_err(StorageError::from)?;
        let outputs_discarded = tx
            .execute("DELETE FROM vault_outputs WHERE run_id = ?1", params![run])
            .map_err(StorageError::from)?;
        tx.commit().map_err(StorageError::from)?;
        Ok(DiscardReport {
            shards_discarded,
            outputs_discarded,
        })
    }

    fn retained(&self, run_id: Uuid) -> Result<usize, WardenError> {
        let conn = self.conn()?;
        let run = run_id.to_string();
        Ok(count(&conn, "vault_shards", &run)? + count(&conn, "vault_outputs", &run)?)
    }

    fn is_tombstoned(&self, run_id: Uuid) -> Result<bool, WardenError> {
        let conn = self.conn()?;
        Ok(tombstoned(&conn, &run_id.to_string())?)
    }

    fn release(&self, run_id: Uuid) -> Result<(), WardenError> {
        let conn = self.conn()?;
        let run = run_id.to_string();
        conn.execute("DELETE FROM vault_shards WHERE run_id = ?1", params![run])
            .map_err(StorageError::from)?;
        conn.execute("DELETE FROM vault_outputs WHERE run_id = ?1", params![run])
            .map_err(StorageError::from)?;
        Ok(())
    }
}
