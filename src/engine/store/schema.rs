// Database schema and migrations for the Mnema relational store.
// Called once at open by MemoryStore::open() after WAL is enabled.
// Every statement is idempotent (CREATE TABLE IF NOT EXISTS / CREATE
// TRIGGER IF NOT EXISTS) — running on an existing database is a no-op.
// Adding a table or column later: append at the end of run_migrations(),
// never modify existing SQL, to keep upgrade paths clean.

use crate::atoms::error::EngineResult;
use log::debug;
use rusqlite::Connection;

/// Current schema revision, written into engine_state on first run.
pub(crate) const SCHEMA_VERSION: i64 = 1;

pub(crate) fn run_migrations(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "
        -- ═══ Episodic: append-only event log ═══

        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            content TEXT NOT NULL,
            importance REAL NOT NULL DEFAULT 0.5,
            entities TEXT NOT NULL DEFAULT '[]',
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            accessed_at TEXT,
            access_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_events_agent_created
            ON events(agent_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_events_type
            ON events(event_type);

        -- Full-text index over event content, kept in sync by triggers so
        -- every insert path (including future ones) is covered.
        CREATE VIRTUAL TABLE IF NOT EXISTS events_fts USING fts5(
            content,
            content='events',
            content_rowid='rowid'
        );

        CREATE TRIGGER IF NOT EXISTS events_fts_after_insert
        AFTER INSERT ON events BEGIN
            INSERT INTO events_fts(rowid, content) VALUES (new.rowid, new.content);
        END;

        CREATE TRIGGER IF NOT EXISTS events_fts_after_delete
        AFTER DELETE ON events BEGIN
            INSERT INTO events_fts(events_fts, rowid, content)
            VALUES ('delete', old.rowid, old.content);
        END;

        -- ═══ Semantic: core blocks, entities, bi-temporal relations ═══

        CREATE TABLE IF NOT EXISTS core_blocks (
            id TEXT PRIMARY KEY,
            block_type TEXT NOT NULL,
            block_key TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL,
            UNIQUE (block_type, block_key)
        );

        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            summary TEXT,
            observations TEXT NOT NULL DEFAULT '[]',
            importance REAL NOT NULL DEFAULT 0.5,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            accessed_at TEXT,
            access_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_entities_name
            ON entities(name COLLATE NOCASE);

        CREATE TABLE IF NOT EXISTS relations (
            id TEXT PRIMARY KEY,
            from_entity TEXT NOT NULL REFERENCES entities(id),
            to_entity TEXT NOT NULL REFERENCES entities(id),
            relation_type TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1.0,
            valid_from TEXT NOT NULL,
            valid_until TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_relations_triple
            ON relations(from_entity, to_entity, relation_type);
        CREATE INDEX IF NOT EXISTS idx_relations_open
            ON relations(valid_until) WHERE valid_until IS NULL;

        -- ═══ Reflections: synthesized insights ═══

        CREATE TABLE IF NOT EXISTS reflections (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            source_ids TEXT NOT NULL DEFAULT '[]',
            importance REAL NOT NULL DEFAULT 0.7,
            depth INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            accessed_at TEXT,
            access_count INTEGER NOT NULL DEFAULT 0
        );

        -- ═══ State: loop watermarks and schema bookkeeping ═══

        CREATE TABLE IF NOT EXISTS engine_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO engine_state (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    debug!("[store] migrations complete (schema_version={})", SCHEMA_VERSION);
    Ok(())
}
