use super::MemoryStore;
use crate::atoms::error::EngineResult;
use rusqlite::params;

// Watermark keys used by the background loops:
//   last_reflection_at              — any agent's most recent cycle
//   last_consolidation_at           — most recent consolidation pass
//   last_reflected_at:<agent_id>    — per-agent unreflected cutoff

impl MemoryStore {
    // ── State key/value ────────────────────────────────────────────────

    pub fn get_state(&self, key: &str) -> EngineResult<Option<String>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT value FROM engine_state WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_state(&self, key: &str, value: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO engine_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_overwrite() {
        let store = MemoryStore::open_in_memory().unwrap();
        assert!(store.get_state("last_reflection_at").unwrap().is_none());

        store.set_state("last_reflection_at", "2026-01-01T00:00:00.000Z").unwrap();
        store.set_state("last_reflection_at", "2026-02-01T00:00:00.000Z").unwrap();
        assert_eq!(
            store.get_state("last_reflection_at").unwrap().as_deref(),
            Some("2026-02-01T00:00:00.000Z")
        );
    }
}
