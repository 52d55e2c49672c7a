// Mnema Engine — Relational Store
// Structured rows, full-text index, bi-temporal edges, and state key/value
// in SQLite via rusqlite. One process-wide connection behind a Mutex; all
// writes serialize through it. Relational calls are synchronous short
// critical sections — they never yield.
//
// Module layout:
//   schema       — idempotent migrations (tables, FTS5 + sync triggers)
//   events       — append-only event log: insert, hydrate, FTS, touch
//   entities     — upsert-on-name, batch fetch, touch
//   relations    — bi-temporal edge insert/invalidation, triple queries
//   blocks       — core memory block CRUD
//   reflections  — insight rows: insert, hydrate, touch
//   state        — loop watermarks (key/value)

use crate::atoms::error::EngineResult;
use crate::atoms::types::EngineStats;
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

mod blocks;
pub(crate) mod entities;
mod events;
mod reflections;
pub(crate) mod relations;
mod schema;
mod state;

/// Thread-safe wrapper around the engine's relational database.
pub struct MemoryStore {
    /// The SQLite connection, protected by a Mutex.
    /// `pub(crate)` so sibling engine modules can run compound reads.
    pub(crate) conn: Mutex<Connection>,
}

impl MemoryStore {
    /// Open (or create) `memory.db` under `data_dir` and initialize tables.
    pub fn open(data_dir: &Path) -> EngineResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("memory.db");
        info!("[store] opening relational store at {:?}", path);

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::init(conn)
    }

    /// In-memory store for tests. Same schema, no files.
    pub fn open_in_memory() -> EngineResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> EngineResult<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::run_migrations(&conn)?;
        Ok(MemoryStore { conn: Mutex::new(conn) })
    }

    /// Run `f` inside a single relational transaction: commit on Ok,
    /// roll back on Err, return the closure's value.
    pub fn with_txn<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Counts and event time bounds in a single compound read. Touches
    /// only this store, never the vector side.
    pub fn stats(&self) -> EngineResult<EngineStats> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM events),
                (SELECT COUNT(*) FROM entities),
                (SELECT COUNT(*) FROM relations),
                (SELECT COUNT(*) FROM relations WHERE valid_until IS NULL),
                (SELECT COUNT(*) FROM reflections),
                (SELECT COUNT(*) FROM core_blocks),
                (SELECT MIN(created_at) FROM events),
                (SELECT MAX(created_at) FROM events)",
            [],
            |row| {
                Ok(EngineStats {
                    event_count: row.get(0)?,
                    entity_count: row.get(1)?,
                    relation_count: row.get(2)?,
                    active_relation_count: row.get(3)?,
                    reflection_count: row.get(4)?,
                    core_block_count: row.get(5)?,
                    oldest_event_at: row.get(6)?,
                    newest_event_at: row.get(7)?,
                })
            },
        )
        .map_err(Into::into)
    }

    /// Flush the WAL into the main database file. Called on shutdown.
    pub fn checkpoint(&self) {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);").ok();
    }
}

/// Map a string column through FromStr, converting the error shape rusqlite
/// expects inside row-mapping closures.
pub(crate) fn parse_column<T>(index: usize, raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse().map_err(|message: String| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            message.into(),
        )
    })
}

/// Decode a JSON column, converting the error shape rusqlite expects inside
/// row-mapping closures.
pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    index: usize,
    raw: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::error::EngineError;

    #[test]
    fn stats_on_empty_store() {
        let store = MemoryStore::open_in_memory().unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.event_count, 0);
        assert_eq!(stats.entity_count, 0);
        assert!(stats.oldest_event_at.is_none());
        assert!(stats.newest_event_at.is_none());
    }

    #[test]
    fn txn_commits_on_ok() {
        let store = MemoryStore::open_in_memory().unwrap();
        store
            .with_txn(|tx| {
                tx.execute(
                    "INSERT INTO engine_state (key, value) VALUES ('k', 'v')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.get_state("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn txn_rolls_back_on_err() {
        let store = MemoryStore::open_in_memory().unwrap();
        let result: EngineResult<()> = store.with_txn(|tx| {
            tx.execute(
                "INSERT INTO engine_state (key, value) VALUES ('k', 'v')",
                [],
            )?;
            Err(EngineError::Retrieval("boom".into()))
        });
        assert!(result.is_err());
        assert!(store.get_state("k").unwrap().is_none());
    }

    #[test]
    fn open_creates_and_reopens_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = MemoryStore::open(dir.path()).unwrap();
            store.set_state("probe", "1").unwrap();
        }
        let store = MemoryStore::open(dir.path()).unwrap();
        assert_eq!(store.get_state("probe").unwrap().as_deref(), Some("1"));
    }
}
