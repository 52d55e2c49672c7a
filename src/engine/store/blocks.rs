use super::{parse_column, MemoryStore};
use crate::atoms::error::EngineResult;
use crate::atoms::types::{BlockType, CoreBlock};
use rusqlite::params;

impl CoreBlock {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let block_type: String = row.get(1)?;
        Ok(CoreBlock {
            id: row.get(0)?,
            block_type: parse_column(1, &block_type)?,
            block_key: row.get(2)?,
            content: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }
}

impl MemoryStore {
    // ── Core memory blocks ─────────────────────────────────────────────

    pub fn get_core_block(
        &self,
        block_type: BlockType,
        block_key: &str,
    ) -> EngineResult<Option<CoreBlock>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT id, block_type, block_key, content, updated_at
             FROM core_blocks WHERE block_type = ?1 AND block_key = ?2",
            params![block_type.to_string(), block_key],
            CoreBlock::from_row,
        );
        match result {
            Ok(block) => Ok(Some(block)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert or overwrite the unique `(block_type, block_key)` row.
    pub fn put_core_block(&self, block: &CoreBlock) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO core_blocks (id, block_type, block_key, content, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (block_type, block_key)
             DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at",
            params![
                block.id,
                block.block_type.to_string(),
                block.block_key,
                block.content,
                block.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn delete_core_block(&self, block_type: BlockType, block_key: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM core_blocks WHERE block_type = ?1 AND block_key = ?2",
            params![block_type.to_string(), block_key],
        )?;
        Ok(())
    }

    /// Every block, persona first then user profiles, stable by key.
    pub fn list_core_blocks(&self) -> EngineResult<Vec<CoreBlock>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, block_type, block_key, content, updated_at
             FROM core_blocks ORDER BY block_type, block_key",
        )?;
        let rows = stmt
            .query_map([], CoreBlock::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}
