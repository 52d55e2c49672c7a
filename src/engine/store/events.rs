use super::{json_column, parse_column, MemoryStore};
use crate::atoms::error::EngineResult;
use crate::atoms::types::{Event, EventType};
use log::warn;
use rusqlite::params;
use std::collections::HashMap;

const EVENT_COLUMNS: &str =
    "id, agent_id, event_type, content, importance, entities, metadata, created_at, accessed_at, access_count";

/// Same column list qualified for the FTS join.
const EVENT_COLUMNS_QUALIFIED: &str =
    "e.id, e.agent_id, e.event_type, e.content, e.importance, e.entities, e.metadata, e.created_at, e.accessed_at, e.access_count";

impl Event {
    /// Map a full event row (column order = EVENT_COLUMNS).
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let event_type: String = row.get(2)?;
        let entities: String = row.get(5)?;
        let metadata: String = row.get(6)?;
        Ok(Event {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            event_type: parse_column(2, &event_type)?,
            content: row.get(3)?,
            importance: row.get(4)?,
            entities: json_column(5, &entities)?,
            metadata: json_column(6, &metadata)?,
            created_at: row.get(7)?,
            accessed_at: row.get(8)?,
            access_count: row.get(9)?,
        })
    }
}

impl MemoryStore {
    // ── Event log ──────────────────────────────────────────────────────

    pub fn insert_event(&self, event: &Event) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (id, agent_id, event_type, content, importance, entities, metadata, created_at, accessed_at, access_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.id,
                event.agent_id,
                event.event_type.to_string(),
                event.content,
                event.importance,
                serde_json::to_string(&event.entities)?,
                serde_json::to_string(&event.metadata)?,
                event.created_at,
                event.accessed_at,
                event.access_count,
            ],
        )?;
        Ok(())
    }

    pub fn get_event(&self, id: &str) -> EngineResult<Option<Event>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            &format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLUMNS),
            params![id],
            Event::from_row,
        );
        match result {
            Ok(event) => Ok(Some(event)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Hydrate a set of events in one query. Empty input returns an empty
    /// map without touching the connection — recall leans on this to stay
    /// free of N+1 reads.
    pub fn get_events_batch(&self, ids: &[String]) -> EngineResult<HashMap<String, Event>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.conn.lock();
        let placeholders = vec!["?"; ids.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events WHERE id IN ({})",
            EVENT_COLUMNS, placeholders
        ))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), Event::from_row)?
            .filter_map(|r| r.ok())
            .map(|e| (e.id.clone(), e))
            .collect();
        Ok(rows)
    }

    /// Used by the episodic append path to compensate a failed vector write.
    pub fn delete_event(&self, id: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM events WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Full-text search ranked by FTS5. Fails soft: malformed queries
    /// (unbalanced quotes and friends) log a warning and return `[]`,
    /// never an error.
    pub fn search_events_fts(&self, query: &str, limit: usize) -> EngineResult<Vec<Event>> {
        let conn = self.conn.lock();
        let result = (|| -> rusqlite::Result<Vec<Event>> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM events e
                 JOIN events_fts ON events_fts.rowid = e.rowid
                 WHERE events_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
                EVENT_COLUMNS_QUALIFIED
            ))?;
            // FTS5 reports syntax errors at step time, not prepare time, so
            // collect strictly instead of dropping row errors.
            let rows = stmt
                .query_map(params![query, limit as i64], Event::from_row)?
                .collect::<rusqlite::Result<Vec<Event>>>();
            rows
        })();

        match result {
            Ok(events) => Ok(events),
            Err(e) => {
                warn!("[store] full-text query {:?} rejected by FTS5: {}", query, e);
                Ok(Vec::new())
            }
        }
    }

    /// Events newer than the agent's reflection watermark, newest first.
    pub fn unreflected_events(&self, agent_id: &str, limit: usize) -> EngineResult<Vec<Event>> {
        let watermark = self
            .get_state(&format!("last_reflected_at:{}", agent_id))?
            .unwrap_or_default();

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events
             WHERE agent_id = ?1 AND created_at > ?2
             ORDER BY created_at DESC
             LIMIT ?3",
            EVENT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![agent_id, watermark, limit as i64], Event::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Range query over (agent_id, created_at), newest first.
    pub fn event_timeline(
        &self,
        agent_id: &str,
        event_type: Option<EventType>,
        limit: usize,
    ) -> EngineResult<Vec<Event>> {
        let conn = self.conn.lock();
        let rows = match event_type {
            Some(kind) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM events
                     WHERE agent_id = ?1 AND event_type = ?2
                     ORDER BY created_at DESC
                     LIMIT ?3",
                    EVENT_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(
                        params![agent_id, kind.to_string(), limit as i64],
                        Event::from_row,
                    )?
                    .filter_map(|r| r.ok())
                    .collect();
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM events
                     WHERE agent_id = ?1
                     ORDER BY created_at DESC
                     LIMIT ?2",
                    EVENT_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![agent_id, limit as i64], Event::from_row)?
                    .filter_map(|r| r.ok())
                    .collect();
                rows
            }
        };
        Ok(rows)
    }

    /// Bump access tracking. Never updates anything else.
    pub fn touch_event(&self, id: &str, now: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE events SET accessed_at = ?2, access_count = access_count + 1 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }

    /// All event ids, for the dual-store repair scan.
    pub fn event_ids(&self) -> EngineResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM events")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::ids::new_id;
    use crate::engine::clock::now_iso;

    fn sample_event(agent: &str, content: &str) -> Event {
        Event {
            id: new_id(),
            agent_id: agent.into(),
            event_type: EventType::Observation,
            content: content.into(),
            importance: 0.5,
            entities: vec!["Alice".into()],
            metadata: HashMap::from([("source".to_string(), serde_json::json!("test"))]),
            created_at: now_iso(),
            accessed_at: None,
            access_count: 0,
        }
    }

    #[test]
    fn insert_then_get_round_trips_all_fields() {
        let store = MemoryStore::open_in_memory().unwrap();
        let event = sample_event("a", "User prefers dark mode");
        store.insert_event(&event).unwrap();

        let loaded = store.get_event(&event.id).unwrap().unwrap();
        assert_eq!(loaded.content, event.content);
        assert_eq!(loaded.entities, event.entities);
        assert_eq!(loaded.metadata, event.metadata);
        assert_eq!(loaded.importance, event.importance);
        assert_eq!(loaded.event_type, EventType::Observation);
    }

    #[test]
    fn batch_fetch_empty_input_is_free() {
        let store = MemoryStore::open_in_memory().unwrap();
        let map = store.get_events_batch(&[]).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn batch_fetch_returns_id_keyed_map() {
        let store = MemoryStore::open_in_memory().unwrap();
        let a = sample_event("a", "first");
        let b = sample_event("a", "second");
        store.insert_event(&a).unwrap();
        store.insert_event(&b).unwrap();

        let map = store
            .get_events_batch(&[a.id.clone(), b.id.clone(), new_id()])
            .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&a.id].content, "first");
        assert_eq!(map[&b.id].content, "second");
    }

    #[test]
    fn fts_finds_ranked_matches() {
        let store = MemoryStore::open_in_memory().unwrap();
        store.insert_event(&sample_event("a", "deploy failed on staging")).unwrap();
        store.insert_event(&sample_event("a", "lunch was good")).unwrap();

        let hits = store.search_events_fts("deploy", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("deploy"));
    }

    #[test]
    fn malformed_fts_query_returns_empty() {
        let store = MemoryStore::open_in_memory().unwrap();
        store.insert_event(&sample_event("a", "anything")).unwrap();

        let hits = store.search_events_fts("\"unbalanced", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn touch_bumps_count_and_sets_accessed_at() {
        let store = MemoryStore::open_in_memory().unwrap();
        let event = sample_event("a", "touch me");
        store.insert_event(&event).unwrap();

        let t1 = now_iso();
        store.touch_event(&event.id, &t1).unwrap();
        store.touch_event(&event.id, &t1).unwrap();

        let loaded = store.get_event(&event.id).unwrap().unwrap();
        assert_eq!(loaded.access_count, 2);
        assert_eq!(loaded.accessed_at.as_deref(), Some(t1.as_str()));
    }

    #[test]
    fn unreflected_respects_watermark() {
        let store = MemoryStore::open_in_memory().unwrap();
        let old = sample_event("a", "old");
        store.insert_event(&old).unwrap();

        store
            .set_state("last_reflected_at:a", &now_iso())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));

        let fresh = sample_event("a", "fresh");
        store.insert_event(&fresh).unwrap();

        let pending = store.unreflected_events("a", 500).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].content, "fresh");
    }

    #[test]
    fn timeline_filters_and_orders_descending() {
        let store = MemoryStore::open_in_memory().unwrap();
        for content in ["one", "two", "three"] {
            let mut e = sample_event("a", content);
            e.event_type = EventType::Action;
            store.insert_event(&e).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        store.insert_event(&sample_event("b", "other agent")).unwrap();

        let timeline = store
            .event_timeline("a", Some(EventType::Action), 2)
            .unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].content, "three");
        assert_eq!(timeline[1].content, "two");
    }
}
