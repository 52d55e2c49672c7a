use super::{json_column, MemoryStore};
use crate::atoms::error::EngineResult;
use crate::atoms::types::Reflection;
use rusqlite::params;
use std::collections::HashMap;

const REFLECTION_COLUMNS: &str =
    "id, content, source_ids, importance, depth, created_at, accessed_at, access_count";

impl Reflection {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let source_ids: String = row.get(2)?;
        Ok(Reflection {
            id: row.get(0)?,
            content: row.get(1)?,
            source_ids: json_column(2, &source_ids)?,
            importance: row.get(3)?,
            depth: row.get(4)?,
            created_at: row.get(5)?,
            accessed_at: row.get(6)?,
            access_count: row.get(7)?,
        })
    }
}

impl MemoryStore {
    // ── Reflections ────────────────────────────────────────────────────

    pub fn insert_reflection(&self, reflection: &Reflection) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO reflections (id, content, source_ids, importance, depth, created_at, accessed_at, access_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                reflection.id,
                reflection.content,
                serde_json::to_string(&reflection.source_ids)?,
                reflection.importance,
                reflection.depth,
                reflection.created_at,
                reflection.accessed_at,
                reflection.access_count,
            ],
        )?;
        Ok(())
    }

    pub fn get_reflection(&self, id: &str) -> EngineResult<Option<Reflection>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            &format!("SELECT {} FROM reflections WHERE id = ?1", REFLECTION_COLUMNS),
            params![id],
            Reflection::from_row,
        );
        match result {
            Ok(reflection) => Ok(Some(reflection)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Hydrate a set of reflections in one query; empty input issues none.
    pub fn get_reflections_batch(
        &self,
        ids: &[String],
    ) -> EngineResult<HashMap<String, Reflection>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.conn.lock();
        let placeholders = vec!["?"; ids.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reflections WHERE id IN ({})",
            REFLECTION_COLUMNS, placeholders
        ))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), Reflection::from_row)?
            .filter_map(|r| r.ok())
            .map(|r| (r.id.clone(), r))
            .collect();
        Ok(rows)
    }

    pub fn touch_reflection(&self, id: &str, now: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE reflections SET accessed_at = ?2, access_count = access_count + 1 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }

    /// All reflection ids, for the dual-store repair scan.
    pub fn reflection_ids(&self) -> EngineResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM reflections")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }
}
