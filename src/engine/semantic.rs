// Mnema Engine — Semantic Memory
//
// The evolving half of the dual store: core memory blocks, entities with
// merged observation lists, and bi-temporal relations. Entity rows are
// authoritative; their vectors are a refreshable derived index, so a vector
// refresh failure after commit is logged, never surfaced.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::ids::new_id;
use crate::atoms::types::{
    BlockType, CoreBlock, CoreMemoryOp, Entity, EntityKind, EntityUpdate, MemoryKind, Relation,
    VectorRecord,
};
use crate::engine::clock::now_iso;
use crate::engine::embedding::EmbeddingService;
use crate::engine::store::{entities, relations, MemoryStore};
use crate::engine::vector::VectorStore;
use log::{info, warn};
use std::collections::HashMap;

/// Core memory blocks never exceed this many characters; overflow keeps the
/// beginning of the text, not the tail.
const CORE_BLOCK_MAX_CHARS: usize = 5_000;

// ═══════════════════════════════════════════════════════════════════════════
// Core memory blocks
// ═══════════════════════════════════════════════════════════════════════════

/// Apply one mutation to the `(block_type, block_key)` block and return the
/// resulting state (an empty-content echo for `remove`).
pub fn update_core_memory(
    store: &MemoryStore,
    block_type: BlockType,
    block_key: &str,
    op: CoreMemoryOp,
    content: &str,
) -> EngineResult<CoreBlock> {
    let existing = store.get_core_block(block_type, block_key)?;

    match op {
        CoreMemoryOp::Append => {
            let merged = match &existing {
                Some(block) if !block.content.is_empty() => {
                    format!("{}\n{}", block.content, content)
                }
                _ => content.to_string(),
            };
            let block = CoreBlock {
                id: existing.map(|b| b.id).unwrap_or_else(new_id),
                block_type,
                block_key: block_key.to_string(),
                content: truncate_chars(&merged, CORE_BLOCK_MAX_CHARS),
                updated_at: now_iso(),
            };
            store.put_core_block(&block)?;
            Ok(block)
        }
        CoreMemoryOp::Replace => {
            let block = CoreBlock {
                id: existing.map(|b| b.id).unwrap_or_else(new_id),
                block_type,
                block_key: block_key.to_string(),
                content: truncate_chars(content, CORE_BLOCK_MAX_CHARS),
                updated_at: now_iso(),
            };
            store.put_core_block(&block)?;
            Ok(block)
        }
        CoreMemoryOp::Remove => {
            store.delete_core_block(block_type, block_key)?;
            Ok(CoreBlock {
                id: String::new(),
                block_type,
                block_key: block_key.to_string(),
                content: String::new(),
                updated_at: now_iso(),
            })
        }
    }
}

/// Keep the leading `max` characters. Char-boundary safe.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Entity upsert
// ═══════════════════════════════════════════════════════════════════════════

/// Upsert an entity by name inside one relational transaction, then refresh
/// its vector best-effort.
pub async fn update_entity(
    store: &MemoryStore,
    vectors: &VectorStore,
    embedder: &EmbeddingService,
    update: EntityUpdate,
) -> EngineResult<Entity> {
    if update.name.is_empty() {
        return Err(EngineError::InvalidArgument("entity name must not be empty".into()));
    }

    let now = now_iso();
    let merged = store.with_txn(|tx| {
        let existing = entities::entity_by_name(tx, &update.name)?;
        let merged = match existing {
            Some(current) => Entity {
                entity_type: update.entity_type,
                summary: update.summary.clone().or(current.summary),
                observations: merge_observations(&current.observations, &update.observations),
                importance: update
                    .importance
                    .map(|i| i.clamp(0.0, 1.0))
                    .unwrap_or(current.importance),
                updated_at: now.clone(),
                ..current
            },
            None => Entity {
                id: new_id(),
                name: update.name.clone(),
                entity_type: update.entity_type,
                summary: update.summary.clone(),
                observations: merge_observations(&[], &update.observations),
                importance: update.importance.map(|i| i.clamp(0.0, 1.0)).unwrap_or(0.5),
                created_at: now.clone(),
                updated_at: now.clone(),
                accessed_at: None,
                access_count: 0,
            },
        };
        entities::write_entity(tx, &merged)?;
        Ok(merged)
    })?;

    // The row is authoritative; the vector is a derived index refreshed
    // best-effort after commit.
    match embedder.embed(&entity_text(&merged)).await {
        Ok(vector) => {
            vectors.delete(&merged.id)?;
            vectors.add(&VectorRecord {
                memory_id: merged.id.clone(),
                memory_type: MemoryKind::Entity,
                vector,
                content: entity_text(&merged),
                created_at: merged.created_at.clone(),
            })?;
        }
        Err(e) => warn!("[semantic] vector refresh failed for {}: {}", merged.name, e),
    }

    info!(
        "[semantic] ✓ upserted entity {} ({} observations)",
        merged.name,
        merged.observations.len()
    );
    Ok(merged)
}

/// Union preserving first-seen order, duplicate-free.
fn merge_observations(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();
    for observation in existing.iter().chain(incoming.iter()) {
        if seen.insert(observation.clone()) {
            merged.push(observation.clone());
        }
    }
    merged
}

/// The text an entity embeds under: name, summary, observations, joined by
/// spaces.
pub(crate) fn entity_text(entity: &Entity) -> String {
    let mut parts: Vec<&str> = vec![entity.name.as_str()];
    if let Some(summary) = &entity.summary {
        parts.push(summary.as_str());
    }
    parts.extend(entity.observations.iter().map(|o| o.as_str()));
    parts.join(" ")
}

// ═══════════════════════════════════════════════════════════════════════════
// Relations
// ═══════════════════════════════════════════════════════════════════════════

/// Assert a relation between two named entities. Any open row for the same
/// triple is closed in the same transaction the new row is inserted in.
pub fn create_relation(
    store: &MemoryStore,
    from_name: &str,
    to_name: &str,
    relation_type: &str,
    metadata: HashMap<String, serde_json::Value>,
) -> EngineResult<Relation> {
    let now = now_iso();
    let relation = store.with_txn(|tx| {
        let from = entities::entity_by_name(tx, from_name)?
            .ok_or_else(|| EngineError::EntityNotFound(from_name.to_string()))?;
        let to = entities::entity_by_name(tx, to_name)?
            .ok_or_else(|| EngineError::EntityNotFound(to_name.to_string()))?;

        relations::invalidate_open_relation(tx, &from.id, &to.id, relation_type, &now)?;

        let relation = Relation {
            id: new_id(),
            from_entity: from.id,
            to_entity: to.id,
            relation_type: relation_type.to_string(),
            weight: 1.0,
            valid_from: now.clone(),
            valid_until: None,
            metadata: metadata.clone(),
            created_at: now.clone(),
        };
        relations::insert_relation(tx, &relation)?;
        Ok(relation)
    })?;

    info!(
        "[semantic] ✓ relation {} -{}-> {}",
        from_name, relation_type, to_name
    );
    Ok(relation)
}

/// Edges touching a named entity, optionally restricted to open intervals.
pub fn get_relations(
    store: &MemoryStore,
    entity_name: &str,
    active_only: bool,
) -> EngineResult<Vec<Relation>> {
    let entity = store
        .find_entity_by_name(entity_name)?
        .ok_or_else(|| EngineError::EntityNotFound(entity_name.to_string()))?;
    store.relations_for_entity(&entity.id, active_only)
}

// ═══════════════════════════════════════════════════════════════════════════
// Knowledge search
// ═══════════════════════════════════════════════════════════════════════════

/// One-shot vector search over entities, distance-ordered. Use recall for
/// weighted scoring.
pub async fn search_knowledge(
    store: &MemoryStore,
    vectors: &VectorStore,
    embedder: &EmbeddingService,
    query: &str,
    limit: usize,
    entity_type: Option<EntityKind>,
) -> EngineResult<Vec<Entity>> {
    let query_vector = match embedder.embed(query).await {
        Ok(v) => v,
        Err(e) => {
            warn!("[semantic] knowledge search degraded to empty (embedding failed): {}", e);
            return Ok(Vec::new());
        }
    };

    // 2× headroom so the entity-type filter still leaves `limit` rows.
    let hits = vectors.search(&query_vector, limit * 2, Some(MemoryKind::Entity))?;
    let ids: Vec<String> = hits.iter().map(|h| h.memory_id.clone()).collect();
    let hydrated = store.get_entities_batch(&ids)?;

    let now = now_iso();
    let mut results = Vec::new();
    for hit in &hits {
        if results.len() >= limit {
            break;
        }
        let Some(entity) = hydrated.get(&hit.memory_id) else {
            warn!("[semantic] orphan vector {} has no entity row", hit.memory_id);
            continue;
        };
        if let Some(kind) = entity_type {
            if entity.entity_type != kind {
                continue;
            }
        }
        store.touch_entity(&entity.id, &now)?;
        results.push(entity.clone());
    }
    Ok(results)
}
