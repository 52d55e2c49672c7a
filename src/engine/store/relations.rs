use super::{json_column, MemoryStore};
use crate::atoms::error::{map_fk_violation, EngineResult};
use crate::atoms::types::Relation;
use rusqlite::{params, Connection};

const RELATION_COLUMNS: &str =
    "id, from_entity, to_entity, relation_type, weight, valid_from, valid_until, metadata, created_at";

impl Relation {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let metadata: String = row.get(7)?;
        Ok(Relation {
            id: row.get(0)?,
            from_entity: row.get(1)?,
            to_entity: row.get(2)?,
            relation_type: row.get(3)?,
            weight: row.get(4)?,
            valid_from: row.get(5)?,
            valid_until: row.get(6)?,
            metadata: json_column(7, &metadata)?,
            created_at: row.get(8)?,
        })
    }
}

/// Close any currently-open row for the `(from, to, relation_type)` triple.
/// Runs inside the same transaction as the subsequent insert so there is
/// never a window with zero or two open rows.
pub(crate) fn invalidate_open_relation(
    conn: &Connection,
    from_entity: &str,
    to_entity: &str,
    relation_type: &str,
    now: &str,
) -> EngineResult<usize> {
    let closed = conn.execute(
        "UPDATE relations SET valid_until = ?4
         WHERE from_entity = ?1 AND to_entity = ?2 AND relation_type = ?3
           AND valid_until IS NULL",
        params![from_entity, to_entity, relation_type, now],
    )?;
    Ok(closed)
}

/// Insert a relation row. A foreign-key violation means an endpoint id does
/// not reference an extant entity and surfaces as `EntityNotFound`, not a
/// generic storage error.
pub(crate) fn insert_relation(conn: &Connection, relation: &Relation) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO relations
            (id, from_entity, to_entity, relation_type, weight, valid_from, valid_until, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            relation.id,
            relation.from_entity,
            relation.to_entity,
            relation.relation_type,
            relation.weight,
            relation.valid_from,
            relation.valid_until,
            serde_json::to_string(&relation.metadata)?,
            relation.created_at,
        ],
    )
    .map_err(|e| {
        map_fk_violation(
            e,
            &format!("{} or {}", relation.from_entity, relation.to_entity),
        )
    })?;
    Ok(())
}

impl MemoryStore {
    // ── Bi-temporal relations ──────────────────────────────────────────

    /// Edges touching an entity (either direction). `active_only` restricts
    /// to rows whose validity interval is still open.
    pub fn relations_for_entity(
        &self,
        entity_id: &str,
        active_only: bool,
    ) -> EngineResult<Vec<Relation>> {
        let conn = self.conn.lock();
        let sql = if active_only {
            format!(
                "SELECT {} FROM relations
                 WHERE (from_entity = ?1 OR to_entity = ?1) AND valid_until IS NULL
                 ORDER BY created_at DESC",
                RELATION_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM relations
                 WHERE from_entity = ?1 OR to_entity = ?1
                 ORDER BY created_at DESC",
                RELATION_COLUMNS
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![entity_id], Relation::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}
