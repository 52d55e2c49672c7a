// Mnema Engine — Dual-Store Repair
//
// The two stores are only eventually consistent: a crash or a cancelled
// request inside the two-phase persist window can leave a vector with no
// row, or a row with no vector. Recall already tolerates both; this pass
// actively heals them. Orphan vectors are deleted, vector-less rows are
// re-embedded and re-inserted.

use crate::atoms::error::EngineResult;
use crate::atoms::types::{MemoryKind, RepairReport, VectorRecord};
use crate::engine::embedding::EmbeddingService;
use crate::engine::semantic::entity_text;
use crate::engine::store::MemoryStore;
use crate::engine::vector::VectorStore;
use log::{info, warn};
use std::collections::HashSet;

pub async fn repair(
    store: &MemoryStore,
    vectors: &VectorStore,
    embedder: &EmbeddingService,
) -> EngineResult<RepairReport> {
    let mut report = RepairReport::default();

    let event_ids: HashSet<String> = store.event_ids()?.into_iter().collect();
    let entity_ids: HashSet<String> = store.entity_ids()?.into_iter().collect();
    let reflection_ids: HashSet<String> = store.reflection_ids()?.into_iter().collect();

    // Pass one: vectors whose row is gone.
    let vector_ids = vectors.list_ids()?;
    let mut seen_vector_ids: HashSet<String> = HashSet::new();
    for (memory_id, kind) in &vector_ids {
        let row_exists = match kind {
            MemoryKind::Event => event_ids.contains(memory_id),
            MemoryKind::Entity => entity_ids.contains(memory_id),
            MemoryKind::Reflection => reflection_ids.contains(memory_id),
        };
        if row_exists {
            seen_vector_ids.insert(memory_id.clone());
        } else {
            report.orphan_vectors_deleted += vectors.delete(memory_id)?;
        }
    }

    // Pass two: rows whose vector is gone, re-embedded one kind at a time.
    let missing_events: Vec<String> = event_ids
        .iter()
        .filter(|id| !seen_vector_ids.contains(*id))
        .cloned()
        .collect();
    for (id, event) in store.get_events_batch(&missing_events)? {
        reembed(
            vectors,
            embedder,
            &mut report,
            &id,
            MemoryKind::Event,
            &event.content,
            &event.created_at,
        )
        .await;
    }

    let missing_entities: Vec<String> = entity_ids
        .iter()
        .filter(|id| !seen_vector_ids.contains(*id))
        .cloned()
        .collect();
    for (id, entity) in store.get_entities_batch(&missing_entities)? {
        reembed(
            vectors,
            embedder,
            &mut report,
            &id,
            MemoryKind::Entity,
            &entity_text(&entity),
            &entity.created_at,
        )
        .await;
    }

    let missing_reflections: Vec<String> = reflection_ids
        .iter()
        .filter(|id| !seen_vector_ids.contains(*id))
        .cloned()
        .collect();
    for (id, reflection) in store.get_reflections_batch(&missing_reflections)? {
        reembed(
            vectors,
            embedder,
            &mut report,
            &id,
            MemoryKind::Reflection,
            &reflection.content,
            &reflection.created_at,
        )
        .await;
    }

    info!(
        "[repair] ✓ {} orphan vectors deleted, {} rows re-embedded, {} re-embed failures",
        report.orphan_vectors_deleted, report.rows_reembedded, report.reembed_failures
    );
    Ok(report)
}

async fn reembed(
    vectors: &VectorStore,
    embedder: &EmbeddingService,
    report: &mut RepairReport,
    memory_id: &str,
    kind: MemoryKind,
    text: &str,
    created_at: &str,
) {
    let result = async {
        let vector = embedder.embed(text).await?;
        vectors.add(&VectorRecord {
            memory_id: memory_id.to_string(),
            memory_type: kind,
            vector,
            content: text.to_string(),
            created_at: created_at.to_string(),
        })
    }
    .await;

    match result {
        Ok(()) => report.rows_reembedded += 1,
        Err(e) => {
            warn!("[repair] re-embed failed for {} ({}): {}", memory_id, kind, e);
            report.reembed_failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::ids::new_id;
    use crate::atoms::types::{EntityKind, EntityUpdate, Event, EventType, NewEvent};
    use crate::engine::clock::now_iso;
    use crate::engine::embedding::testing::{FailingEmbedder, MockEmbedder};
    use crate::engine::{episodic, semantic};
    use std::sync::Arc;

    fn parts() -> (MemoryStore, VectorStore, EmbeddingService) {
        let store = MemoryStore::open_in_memory().unwrap();
        let vectors = VectorStore::open_in_memory(8).unwrap();
        let embedder = EmbeddingService::new(MockEmbedder::new(8), 8);
        (store, vectors, embedder)
    }

    #[tokio::test]
    async fn healthy_stores_need_no_repair() {
        let (store, vectors, embedder) = parts();
        episodic::record_event(
            &store,
            &vectors,
            &embedder,
            None,
            NewEvent {
                agent_id: "a".into(),
                event_type: EventType::Observation,
                content: "all good".into(),
                importance: None,
                entities: vec![],
                metadata: Default::default(),
            },
        )
        .await
        .unwrap();

        let report = repair(&store, &vectors, &embedder).await.unwrap();
        assert_eq!(report.orphan_vectors_deleted, 0);
        assert_eq!(report.rows_reembedded, 0);
        assert_eq!(report.reembed_failures, 0);
    }

    #[tokio::test]
    async fn deletes_orphan_vectors() {
        let (store, vectors, embedder) = parts();
        vectors
            .add(&VectorRecord {
                memory_id: new_id(),
                memory_type: MemoryKind::Event,
                vector: embedder.embed("ghost").await.unwrap(),
                content: "ghost".into(),
                created_at: now_iso(),
            })
            .unwrap();

        let report = repair(&store, &vectors, &embedder).await.unwrap();
        assert_eq!(report.orphan_vectors_deleted, 1);
        assert_eq!(vectors.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn reembeds_rows_missing_vectors() {
        let (store, vectors, embedder) = parts();
        // A row written without its vector (the crash window).
        let event = Event {
            id: new_id(),
            agent_id: "a".into(),
            event_type: EventType::Observation,
            content: "lost my vector".into(),
            importance: 0.5,
            entities: vec![],
            metadata: Default::default(),
            created_at: now_iso(),
            accessed_at: None,
            access_count: 0,
        };
        store.insert_event(&event).unwrap();
        // An entity whose vector refresh failed.
        semantic::update_entity(
            &store,
            &vectors,
            &embedder,
            EntityUpdate {
                name: "Whole".into(),
                entity_type: EntityKind::Concept,
                summary: None,
                observations: vec![],
                importance: None,
            },
        )
        .await
        .unwrap();
        vectors
            .delete(&store.find_entity_by_name("Whole").unwrap().unwrap().id)
            .unwrap();

        let report = repair(&store, &vectors, &embedder).await.unwrap();
        assert_eq!(report.rows_reembedded, 2);
        assert_eq!(vectors.count().unwrap(), 2);

        // Idempotent: a second pass finds nothing.
        let again = repair(&store, &vectors, &embedder).await.unwrap();
        assert_eq!(again.rows_reembedded, 0);
        assert_eq!(again.orphan_vectors_deleted, 0);
    }

    #[tokio::test]
    async fn embed_outage_counts_failures_without_raising() {
        let (store, vectors, _embedder) = parts();
        let event = Event {
            id: new_id(),
            agent_id: "a".into(),
            event_type: EventType::Observation,
            content: "cannot re-embed".into(),
            importance: 0.5,
            entities: vec![],
            metadata: Default::default(),
            created_at: now_iso(),
            accessed_at: None,
            access_count: 0,
        };
        store.insert_event(&event).unwrap();

        let broken = EmbeddingService::new(Arc::new(FailingEmbedder), 8);
        let report = repair(&store, &vectors, &broken).await.unwrap();
        assert_eq!(report.reembed_failures, 1);
        assert_eq!(report.rows_reembedded, 0);
    }
}
