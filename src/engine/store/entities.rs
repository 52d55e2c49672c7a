use super::{json_column, parse_column, MemoryStore};
use crate::atoms::error::EngineResult;
use crate::atoms::types::Entity;
use rusqlite::{params, Connection};
use std::collections::HashMap;

const ENTITY_COLUMNS: &str =
    "id, name, entity_type, summary, observations, importance, created_at, updated_at, accessed_at, access_count";

impl Entity {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let entity_type: String = row.get(2)?;
        let observations: String = row.get(4)?;
        Ok(Entity {
            id: row.get(0)?,
            name: row.get(1)?,
            entity_type: parse_column(2, &entity_type)?,
            summary: row.get(3)?,
            observations: json_column(4, &observations)?,
            importance: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            accessed_at: row.get(8)?,
            access_count: row.get(9)?,
        })
    }
}

/// Case-insensitive name lookup, shareable between plain and transactional
/// call sites (a `Transaction` derefs to `Connection`).
pub(crate) fn entity_by_name(conn: &Connection, name: &str) -> EngineResult<Option<Entity>> {
    let result = conn.query_row(
        &format!(
            "SELECT {} FROM entities WHERE name = ?1 COLLATE NOCASE",
            ENTITY_COLUMNS
        ),
        params![name],
        Entity::from_row,
    );
    match result {
        Ok(entity) => Ok(Some(entity)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write a fully-merged entity row, upserting by id. The caller is
/// responsible for the merge semantics; this just persists the result.
/// A name collision with a different id still violates the unique
/// case-insensitive name index.
pub(crate) fn write_entity(conn: &Connection, entity: &Entity) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO entities
            (id, name, entity_type, summary, observations, importance, created_at, updated_at, accessed_at, access_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT (id) DO UPDATE SET
            name = excluded.name,
            entity_type = excluded.entity_type,
            summary = excluded.summary,
            observations = excluded.observations,
            importance = excluded.importance,
            updated_at = excluded.updated_at,
            accessed_at = excluded.accessed_at,
            access_count = excluded.access_count",
        params![
            entity.id,
            entity.name,
            entity.entity_type.to_string(),
            entity.summary,
            serde_json::to_string(&entity.observations)?,
            entity.importance,
            entity.created_at,
            entity.updated_at,
            entity.accessed_at,
            entity.access_count,
        ],
    )?;
    Ok(())
}

impl MemoryStore {
    // ── Knowledge-graph entities ───────────────────────────────────────

    pub fn find_entity_by_name(&self, name: &str) -> EngineResult<Option<Entity>> {
        let conn = self.conn.lock();
        entity_by_name(&conn, name)
    }

    pub fn get_entity(&self, id: &str) -> EngineResult<Option<Entity>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            &format!("SELECT {} FROM entities WHERE id = ?1", ENTITY_COLUMNS),
            params![id],
            Entity::from_row,
        );
        match result {
            Ok(entity) => Ok(Some(entity)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Hydrate a set of entities in one query; empty input issues none.
    pub fn get_entities_batch(&self, ids: &[String]) -> EngineResult<HashMap<String, Entity>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.conn.lock();
        let placeholders = vec!["?"; ids.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM entities WHERE id IN ({})",
            ENTITY_COLUMNS, placeholders
        ))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), Entity::from_row)?
            .filter_map(|r| r.ok())
            .map(|e| (e.id.clone(), e))
            .collect();
        Ok(rows)
    }

    /// Every entity, oldest first. Consolidation walks this.
    pub fn list_entities(&self) -> EngineResult<Vec<Entity>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM entities ORDER BY created_at ASC",
            ENTITY_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], Entity::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Bump access tracking; `updated_at` stays untouched.
    pub fn touch_entity(&self, id: &str, now: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE entities SET accessed_at = ?2, access_count = access_count + 1 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }

    /// All entity ids, for the dual-store repair scan.
    pub fn entity_ids(&self) -> EngineResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM entities")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }
}
