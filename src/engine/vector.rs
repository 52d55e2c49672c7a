// Mnema Engine — Vector Store
//
// The second half of the dual store: one `memories` table keyed by memory
// id, holding little-endian f32 BLOB vectors alongside denormalized content
// and creation time. Search is an exact L2 scan, ascending by distance;
// normalization into a similarity score happens in the retrieval engine,
// not here.
//
// The table is created lazily: the very first write triggers creation, and
// the ensure path is memoized behind the connection mutex so concurrent
// first-writes resolve to a single creation. Reads before the first write
// see an empty store.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::ids::validate_id;
use crate::atoms::types::{MemoryKind, VectorHit, VectorRecord};
use log::info;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct VectorStore {
    conn: Mutex<Connection>,
    dimensions: usize,
    /// Fast path for the memoized table-ensure latch.
    table_ready: AtomicBool,
}

impl VectorStore {
    /// Open (or create) `vectors.db` under `data_dir`. The `memories` table
    /// itself is not created until the first write.
    pub fn open(data_dir: &Path, dimensions: usize) -> EngineResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("vectors.db");
        info!("[vector] opening vector store at {:?} (D={})", path, dimensions);

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(VectorStore {
            conn: Mutex::new(conn),
            dimensions,
            table_ready: AtomicBool::new(false),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory(dimensions: usize) -> EngineResult<Self> {
        Ok(VectorStore {
            conn: Mutex::new(Connection::open_in_memory()?),
            dimensions,
            table_ready: AtomicBool::new(false),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    // ── Writes ─────────────────────────────────────────────────────────

    pub fn add(&self, record: &VectorRecord) -> EngineResult<()> {
        self.validate(record)?;
        let conn = self.conn.lock();
        self.ensure_table(&conn)?;
        insert_record(&conn, record)?;
        Ok(())
    }

    /// Validation is applied to every element before any write; empty input
    /// is a no-op that never touches the table-ensure path.
    pub fn add_batch(&self, records: &[VectorRecord]) -> EngineResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            self.validate(record)?;
        }
        let conn = self.conn.lock();
        self.ensure_table(&conn)?;
        for record in records {
            insert_record(&conn, record)?;
        }
        Ok(())
    }

    /// Remove every row for `memory_id`. Returns the number removed.
    pub fn delete(&self, memory_id: &str) -> EngineResult<usize> {
        validate_id(memory_id)?;
        let conn = self.conn.lock();
        if !self.table_present(&conn) {
            return Ok(0);
        }
        let removed = conn.execute(
            "DELETE FROM memories WHERE memory_id = ?1",
            params![memory_id],
        )?;
        Ok(removed)
    }

    // ── Reads ──────────────────────────────────────────────────────────

    /// Up to `limit` records ordered by ascending L2 distance to the query.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        kind: Option<MemoryKind>,
    ) -> EngineResult<Vec<VectorHit>> {
        if query.len() != self.dimensions {
            return Err(EngineError::Embedding(format!(
                "query vector has {} dimensions, store expects {}",
                query.len(),
                self.dimensions
            )));
        }
        let conn = self.conn.lock();
        if !self.table_present(&conn) {
            return Ok(Vec::new());
        }

        let mut scored: Vec<VectorHit> = {
            let (sql, kind_param) = match kind {
                Some(k) => (
                    "SELECT memory_id, memory_type, vector, content, created_at
                     FROM memories WHERE memory_type = ?1",
                    Some(k.to_string()),
                ),
                None => (
                    "SELECT memory_id, memory_type, vector, content, created_at
                     FROM memories",
                    None,
                ),
            };
            let mut stmt = conn.prepare(sql)?;
            let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String, Vec<u8>, String, String)> {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            };
            let rows: Vec<_> = match kind_param {
                Some(k) => stmt.query_map(params![k], map_row)?.filter_map(|r| r.ok()).collect(),
                None => stmt.query_map([], map_row)?.filter_map(|r| r.ok()).collect(),
            };

            rows.into_iter()
                .filter_map(|(memory_id, memory_type, blob, content, created_at)| {
                    let memory_type: MemoryKind = memory_type.parse().ok()?;
                    let stored = bytes_to_f32_vec(&blob);
                    if stored.len() != query.len() {
                        return None;
                    }
                    Some(VectorHit {
                        memory_id,
                        memory_type,
                        content,
                        created_at,
                        distance: l2_distance(query, &stored),
                    })
                })
                .collect()
        };

        scored.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    pub fn count(&self) -> EngineResult<usize> {
        let conn = self.conn.lock();
        if !self.table_present(&conn) {
            return Ok(0);
        }
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Every (memory_id, memory_type) pair, for the dual-store repair scan.
    pub fn list_ids(&self) -> EngineResult<Vec<(String, MemoryKind)>> {
        let conn = self.conn.lock();
        if !self.table_present(&conn) {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare("SELECT memory_id, memory_type FROM memories")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .filter_map(|r| r.ok())
            .filter_map(|(id, kind)| kind.parse().ok().map(|k| (id, k)))
            .collect();
        Ok(rows)
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn validate(&self, record: &VectorRecord) -> EngineResult<()> {
        validate_id(&record.memory_id)?;
        if record.vector.len() != self.dimensions {
            return Err(EngineError::Embedding(format!(
                "vector for {} has {} dimensions, store expects {}",
                record.memory_id,
                record.vector.len(),
                self.dimensions
            )));
        }
        Ok(())
    }

    /// Memoized ensure: the atomic flag short-circuits once creation has
    /// succeeded; otherwise callers serialize on the connection mutex (the
    /// caller already holds it) and CREATE IF NOT EXISTS is idempotent, so
    /// concurrent first-writes resolve to exactly one creation.
    fn ensure_table(&self, conn: &Connection) -> EngineResult<()> {
        if self.table_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                memory_id TEXT NOT NULL,
                memory_type TEXT NOT NULL,
                vector BLOB NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memories_id ON memories(memory_id);
            CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(memory_type);",
        )?;
        self.table_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Read-side check that also handles reopening a database whose table
    /// was created by an earlier process.
    fn table_present(&self, conn: &Connection) -> bool {
        if self.table_ready.load(Ordering::Acquire) {
            return true;
        }
        let present = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'memories'",
                [],
                |_| Ok(()),
            )
            .is_ok();
        if present {
            self.table_ready.store(true, Ordering::Release);
        }
        present
    }
}

fn insert_record(conn: &Connection, record: &VectorRecord) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO memories (memory_id, memory_type, vector, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.memory_id,
            record.memory_type.to_string(),
            f32_vec_to_bytes(&record.vector),
            record.content,
            record.created_at,
        ],
    )
}

// ── Vector encoding and distance ───────────────────────────────────────

/// Convert a Vec<f32> to bytes for SQLite BLOB storage.
pub fn f32_vec_to_bytes(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert a byte slice (from a SQLite BLOB) back to a Vec<f32>.
pub fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Euclidean distance. On unit-normalized embeddings this lies in [0, 2].
fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::ids::new_id;
    use crate::engine::clock::now_iso;

    fn record(kind: MemoryKind, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            memory_id: new_id(),
            memory_type: kind,
            vector,
            content: "content".into(),
            created_at: now_iso(),
        }
    }

    #[test]
    fn bytes_roundtrip() {
        let original = vec![1.0f32, -2.5, 3.14159, 0.0];
        assert_eq!(bytes_to_f32_vec(&f32_vec_to_bytes(&original)), original);
    }

    #[test]
    fn empty_store_reads_cleanly_before_first_write() {
        let store = VectorStore::open_in_memory(3).unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.search(&[0.0, 0.0, 1.0], 5, None).unwrap().is_empty());
        let removed = store.delete(&new_id()).unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn add_rejects_wrong_dimension() {
        let store = VectorStore::open_in_memory(3).unwrap();
        let bad = record(MemoryKind::Event, vec![1.0, 2.0]);
        match store.add(&bad) {
            Err(EngineError::Embedding(_)) => {}
            other => panic!("expected embedding error, got {:?}", other),
        }
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn add_rejects_invalid_id() {
        let store = VectorStore::open_in_memory(3).unwrap();
        let mut bad = record(MemoryKind::Event, vec![0.0, 0.0, 1.0]);
        bad.memory_id = "not-a-ulid".into();
        assert!(matches!(store.add(&bad), Err(EngineError::InvalidId(_))));
    }

    #[test]
    fn search_orders_by_distance_and_respects_type_filter() {
        let store = VectorStore::open_in_memory(2).unwrap();
        let near = record(MemoryKind::Event, vec![1.0, 0.0]);
        let far = record(MemoryKind::Event, vec![0.0, 1.0]);
        let entity = record(MemoryKind::Entity, vec![1.0, 0.0]);
        store.add_batch(&[near.clone(), far.clone(), entity.clone()]).unwrap();

        let hits = store.search(&[1.0, 0.0], 10, None).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits[0].distance <= hits[1].distance && hits[1].distance <= hits[2].distance);
        assert_eq!(hits[2].memory_id, far.memory_id, "orthogonal vector sorts last");

        let events_only = store.search(&[1.0, 0.0], 10, Some(MemoryKind::Event)).unwrap();
        assert_eq!(events_only.len(), 2);
        assert!(events_only.iter().all(|h| h.memory_type == MemoryKind::Event));
        assert_eq!(events_only[0].memory_id, near.memory_id);
        assert_eq!(events_only[1].memory_id, far.memory_id);
        assert!((events_only[1].distance - 2.0f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn delete_removes_all_rows_for_id() {
        let store = VectorStore::open_in_memory(2).unwrap();
        let r = record(MemoryKind::Reflection, vec![0.5, 0.5]);
        store.add(&r).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.delete(&r.memory_id).unwrap(), 1);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn add_batch_empty_is_noop() {
        let store = VectorStore::open_in_memory(2).unwrap();
        store.add_batch(&[]).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn search_rejects_wrong_dimension_query() {
        let store = VectorStore::open_in_memory(3).unwrap();
        assert!(matches!(
            store.search(&[1.0, 0.0], 5, None),
            Err(EngineError::Embedding(_))
        ));
    }
}
