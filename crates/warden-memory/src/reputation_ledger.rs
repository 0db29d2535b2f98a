//! Persistent agent reputation ledger.
//!
//! # Storage layout
//!
//! | column        | type    | description                       |
//! |---------------|---------|-----------------------------------|
//! | agent_id      | TEXT    | primary key                       |
//! | agreements    | INTEGER | times the agent backed the winner |
//! | disagreements | INTEGER | times it did not                  |
//! | updated_at    | TEXT    | RFC-3339 time of the last update  |
//!
//! Updates are applied as `counter = counter + n` upserts inside one
//! transaction per batch, so concurrent runs converge on the same counters
//! regardless of commit order.
//!
//! # Example
//!
//! ```rust
//! use warden_kernel::reputation::{ReputationOutcome, ReputationStore, ReputationUpdate};
//! use warden_memory::SqliteReputationLedger;
//!
//! let ledger = SqliteReputationLedger::open_in_memory().unwrap();
//! ledger.record(&[ReputationUpdate::new("agent-a", ReputationOutcome::Agreed)]).unwrap();
//! assert_eq!(ledger.get("agent-a").unwrap().agreements, 1);
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use warden_kernel::reputation::{
    ReputationOutcome, ReputationRecord, ReputationStore, ReputationUpdate,
};
use warden_types::WardenError;

use crate::StorageError;

pub struct SqliteReputationLedger {
    conn: Mutex<Connection>,
}

impl SqliteReputationLedger {
    /// Open (or create) a persistent ledger at `path`.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agent_reputation (
                agent_id      TEXT NOT NULL PRIMARY KEY,
                agreements    INTEGER NOT NULL DEFAULT 0,
                disagreements INTEGER NOT NULL DEFAULT 0,
                updated_at    TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn apply(&self, updates: &[ReputationUpdate]) -> Result<(), StorageError> {
        // Fold the batch first so each agent is touched once.
        let mut deltas: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
        for u in updates {
            let d = deltas.entry(u.agent_id.as_str()).or_default();
            match u.outcome {
                ReputationOutcome::Agreed => d.0 += 1,
                ReputationOutcome::Disagreed => d.1 += 1,
            }
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for (agent, (agreed, disagreed)) in deltas {
            tx.execute(
                "INSERT INTO agent_reputation (agent_id, agreements, disagreements, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(agent_id) DO UPDATE SET
                     agreements    = agreements + excluded.agreements,
                     disagreements = disagreements + excluded.disagreements,
                     updated_at    = excluded.updated_at",
                params![agent, agreed, disagreed, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load(&self, agent_id: &str) -> Result<ReputationRecord, StorageError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT agreements, disagreements FROM agent_reputation WHERE agent_id = ?1",
                params![agent_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        row.map_or(Ok(ReputationRecord::default()), |(a, d)| to_record(a, d))
    }

    fn load_all(&self) -> Result<Vec<(String, ReputationRecord)>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT agent_id, agreements, disagreements
             FROM agent_reputation
             ORDER BY agent_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, a, d) = row?;
            out.push((id, to_record(a, d)?));
        }
        Ok(out)
    }
}

fn to_record(agreements: i64, disagreements: i64) -> Result<ReputationRecord, StorageError> {
    let conv = |v: i64| {
        u64::try_from(v).map_err(|_| StorageError::Corrupt(format!("negative counter {v}")))
    };
    Ok(ReputationRecord {
        agreements: conv(agreements)?,
        disagreements: conv(disagreements)?,
    })
}

impl ReputationStore for SqliteReputationLedger {
    fn get(&self, agent_id: &str) -> Result<ReputationRecord, WardenError> {
        Ok(self.load(agent_id)?)
    }

    fn record(&self, updates: &[ReputationUpdate]) -> Result<(), WardenError> {
        Ok(self.apply(updates)?)
    }

    fn reset(&self) -> Result<(), WardenError> {
        let conn = self.conn()?;
        let cleared = conn
            .execute("DELETE FROM agent_reputation", [])
            .map_err(StorageError::from)?;
        info!(cleared, "reputation ledger reset");
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<(String, ReputationRecord)>, WardenError> {
        Ok(self.load_all()?)
    }
}
