// Mnema Engine — Retrieval
//
// The unified recall contract: one query vector fanned out over every
// memory kind, batch-hydrated against the relational store (one query per
// kind), scored with the weighted recency/importance/relevance model, and
// truncated. The score is a weighted sum — not the product the shorthand
// "recency × importance × relevance" suggests; see README.

use crate::atoms::error::EngineResult;
use crate::atoms::types::{
    Entity, MemoryKind, RecallResult, ScoredMemory, VectorHit,
};
use crate::engine::clock::{hours_since, now_iso};
use crate::engine::config::EngineConfig;
use crate::engine::embedding::EmbeddingService;
use crate::engine::store::MemoryStore;
use crate::engine::vector::VectorStore;
use log::{debug, warn};

/// Fan-out inflation: the vector search over-fetches by this factor so the
/// agent-id filter and final truncation still leave `limit` results.
const FANOUT_FACTOR: usize = 3;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct RecallOptions {
    pub limit: usize,
    pub include_core: bool,
    pub agent_id: Option<String>,
    pub touch: bool,
}

impl Default for RecallOptions {
    fn default() -> Self {
        RecallOptions {
            limit: DEFAULT_LIMIT,
            include_core: true,
            agent_id: None,
            touch: true,
        }
    }
}

pub async fn recall(
    store: &MemoryStore,
    vectors: &VectorStore,
    embedder: &EmbeddingService,
    config: &EngineConfig,
    query: &str,
    opts: RecallOptions,
) -> EngineResult<RecallResult> {
    let limit = opts.limit.clamp(1, MAX_LIMIT);

    let query_vector = embedder.embed(query).await?;
    let hits = vectors.search(&query_vector, limit * FANOUT_FACTOR, None)?;
    let total_searched = hits.len();

    // Partition ids by kind, then hydrate each partition in one query.
    let mut event_ids = Vec::new();
    let mut entity_ids = Vec::new();
    let mut reflection_ids = Vec::new();
    for hit in &hits {
        match hit.memory_type {
            MemoryKind::Event => event_ids.push(hit.memory_id.clone()),
            MemoryKind::Entity => entity_ids.push(hit.memory_id.clone()),
            MemoryKind::Reflection => reflection_ids.push(hit.memory_id.clone()),
        }
    }
    let events = store.get_events_batch(&event_ids)?;
    let entities = store.get_entities_batch(&entity_ids)?;
    let reflections = store.get_reflections_batch(&reflection_ids)?;

    let now = now_iso();
    let mut scored: Vec<ScoredMemory> = Vec::new();
    for hit in &hits {
        let entry = match hit.memory_type {
            MemoryKind::Event => {
                let Some(event) = events.get(&hit.memory_id) else {
                    warn!("[recall] orphan vector {} (event) — skipping", hit.memory_id);
                    continue;
                };
                if let Some(agent_id) = &opts.agent_id {
                    if &event.agent_id != agent_id {
                        continue;
                    }
                }
                if opts.touch {
                    store.touch_event(&event.id, &now)?;
                }
                score_memory(
                    hit,
                    config,
                    event.importance,
                    event.accessed_at.as_deref().unwrap_or(&event.created_at),
                    event.content.clone(),
                    event.created_at.clone(),
                )
            }
            MemoryKind::Entity => {
                let Some(entity) = entities.get(&hit.memory_id) else {
                    warn!("[recall] orphan vector {} (entity) — skipping", hit.memory_id);
                    continue;
                };
                if opts.touch {
                    store.touch_entity(&entity.id, &now)?;
                }
                score_memory(
                    hit,
                    config,
                    entity.importance,
                    entity.accessed_at.as_deref().unwrap_or(&entity.created_at),
                    render_entity(entity),
                    entity.created_at.clone(),
                )
            }
            MemoryKind::Reflection => {
                let Some(reflection) = reflections.get(&hit.memory_id) else {
                    warn!("[recall] orphan vector {} (reflection) — skipping", hit.memory_id);
                    continue;
                };
                if opts.touch {
                    store.touch_reflection(&reflection.id, &now)?;
                }
                score_memory(
                    hit,
                    config,
                    reflection.importance,
                    reflection.accessed_at.as_deref().unwrap_or(&reflection.created_at),
                    reflection.content.clone(),
                    reflection.created_at.clone(),
                )
            }
        };
        scored.push(entry);
    }

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);

    let core_memory = if opts.include_core {
        store.list_core_blocks()?
    } else {
        Vec::new()
    };

    debug!(
        "[recall] {:?}: {} searched, {} returned",
        query,
        total_searched,
        scored.len()
    );
    Ok(RecallResult { core_memory, memories: scored, total_searched })
}

// ═══════════════════════════════════════════════════════════════════════════
// Scoring
// ═══════════════════════════════════════════════════════════════════════════

fn score_memory(
    hit: &VectorHit,
    config: &EngineConfig,
    stored_importance: f64,
    last_access_or_created: &str,
    content: String,
    created_at: String,
) -> ScoredMemory {
    let relevance = relevance_score(hit.distance);
    let recency = recency_score(config.decay_rate, last_access_or_created);
    let importance = stored_importance.clamp(0.0, 1.0);
    let score = config.weight_recency * recency
        + config.weight_importance * importance
        + config.weight_relevance * relevance;

    ScoredMemory {
        id: hit.memory_id.clone(),
        memory_type: hit.memory_type,
        content,
        score,
        recency,
        importance,
        relevance,
        created_at,
    }
}

/// L2 distance on unit-normalized embeddings lies in [0, 2]; map 0 → 1 and
/// 2 → 0, clamped.
pub(crate) fn relevance_score(distance: f64) -> f64 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// `decay_rate ^ hours` since the row was last seen; monotonically
/// non-increasing in elapsed time, 1.0 at zero hours.
pub(crate) fn recency_score(decay_rate: f64, last_access_or_created: &str) -> f64 {
    decay_rate.powf(hours_since(last_access_or_created))
}

/// The entity card rendered into recall output.
fn render_entity(entity: &Entity) -> String {
    let mut lines = vec![format!("{} ({})", entity.name, entity.entity_type)];
    if let Some(summary) = &entity.summary {
        lines.push(summary.clone());
    }
    for observation in &entity.observations {
        lines.push(format!("- {}", observation));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::ids::new_id;
    use crate::atoms::types::{
        BlockType, CoreMemoryOp, EntityKind, EntityUpdate, Event, EventType, NewEvent, VectorRecord,
    };
    use crate::engine::clock::to_iso;
    use crate::engine::embedding::testing::MockEmbedder;
    use crate::engine::{episodic, semantic};

    fn parts() -> (MemoryStore, VectorStore, EmbeddingService, EngineConfig) {
        let store = MemoryStore::open_in_memory().unwrap();
        let vectors = VectorStore::open_in_memory(8).unwrap();
        let embedder = EmbeddingService::new(MockEmbedder::new(8), 8);
        (store, vectors, embedder, EngineConfig::default())
    }

    fn observation(agent: &str, content: &str) -> NewEvent {
        NewEvent {
            agent_id: agent.into(),
            event_type: EventType::Observation,
            content: content.into(),
            importance: None,
            entities: vec![],
            metadata: Default::default(),
        }
    }

    /// Insert an event row + vector with a controlled creation time.
    async fn plant_event(
        store: &MemoryStore,
        vectors: &VectorStore,
        embedder: &EmbeddingService,
        content: &str,
        created_at: &str,
    ) -> String {
        let event = Event {
            id: new_id(),
            agent_id: "a".into(),
            event_type: EventType::Observation,
            content: content.into(),
            importance: 0.5,
            entities: vec![],
            metadata: Default::default(),
            created_at: created_at.into(),
            accessed_at: None,
            access_count: 0,
        };
        store.insert_event(&event).unwrap();
        vectors
            .add(&VectorRecord {
                memory_id: event.id.clone(),
                memory_type: MemoryKind::Event,
                vector: embedder.embed(content).await.unwrap(),
                content: content.into(),
                created_at: created_at.into(),
            })
            .unwrap();
        event.id
    }

    #[test]
    fn relevance_maps_distance_range() {
        assert_eq!(relevance_score(0.0), 1.0);
        assert_eq!(relevance_score(2.0), 0.0);
        assert_eq!(relevance_score(5.0), 0.0);
        assert!((relevance_score(1.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn recency_is_monotonically_non_increasing() {
        let mut last = f64::INFINITY;
        for hours_ago in [0i64, 1, 5, 24, 720] {
            let stamp = to_iso(chrono::Utc::now() - chrono::Duration::hours(hours_ago));
            let score = recency_score(0.995, &stamp);
            assert!(score <= last, "recency must not increase with age");
            assert!(score > 0.0 && score <= 1.0);
            last = score;
        }
    }

    #[tokio::test]
    async fn newer_duplicate_outscores_older_on_recency() {
        let (store, vectors, embedder, config) = parts();
        let now = chrono::Utc::now();
        let fresh = plant_event(&store, &vectors, &embedder, "event", &to_iso(now)).await;
        let stale = plant_event(
            &store,
            &vectors,
            &embedder,
            "event",
            &to_iso(now - chrono::Duration::days(30)),
        )
        .await;

        let result = recall(
            &store,
            &vectors,
            &embedder,
            &config,
            "event",
            RecallOptions { touch: false, ..Default::default() },
        )
        .await
        .unwrap();

        assert_eq!(result.total_searched, 2);
        let fresh_score = result.memories.iter().find(|m| m.id == fresh).unwrap();
        let stale_score = result.memories.iter().find(|m| m.id == stale).unwrap();
        assert!(fresh_score.recency > stale_score.recency);
        assert_eq!(fresh_score.relevance, stale_score.relevance, "identical content, same distance");
        assert!(fresh_score.score > stale_score.score);
    }

    #[tokio::test]
    async fn recall_bounds_and_ordering_hold() {
        let (store, vectors, embedder, config) = parts();
        for i in 0..10 {
            episodic::record_event(
                &store,
                &vectors,
                &embedder,
                None,
                observation("a", &format!("note number {}", i)),
            )
            .await
            .unwrap();
        }

        let result = recall(
            &store,
            &vectors,
            &embedder,
            &config,
            "note",
            RecallOptions { limit: 4, ..Default::default() },
        )
        .await
        .unwrap();

        assert!(result.memories.len() <= 4);
        assert!(result.memories.iter().all(|m| m.score >= 0.0));
        assert!(result
            .memories
            .windows(2)
            .all(|pair| pair[0].score >= pair[1].score));
        assert!(result.total_searched >= result.memories.len());
    }

    #[tokio::test]
    async fn agent_filter_drops_foreign_events() {
        let (store, vectors, embedder, config) = parts();
        episodic::record_event(&store, &vectors, &embedder, None, observation("a", "shared topic"))
            .await
            .unwrap();
        episodic::record_event(&store, &vectors, &embedder, None, observation("b", "shared topic two"))
            .await
            .unwrap();

        let result = recall(
            &store,
            &vectors,
            &embedder,
            &config,
            "shared topic",
            RecallOptions { agent_id: Some("a".into()), ..Default::default() },
        )
        .await
        .unwrap();
        assert_eq!(result.memories.len(), 1);
        assert_eq!(result.total_searched, 2, "pre-filter count includes both");
    }

    #[tokio::test]
    async fn orphan_vectors_are_skipped_not_fatal() {
        let (store, vectors, embedder, config) = parts();
        vectors
            .add(&VectorRecord {
                memory_id: new_id(),
                memory_type: MemoryKind::Event,
                vector: embedder.embed("phantom").await.unwrap(),
                content: "phantom".into(),
                created_at: now_iso(),
            })
            .unwrap();

        let result = recall(&store, &vectors, &embedder, &config, "phantom", RecallOptions::default())
            .await
            .unwrap();
        assert!(result.memories.is_empty());
        assert_eq!(result.total_searched, 1);
    }

    #[tokio::test]
    async fn include_core_carries_blocks() {
        let (store, vectors, embedder, config) = parts();
        semantic::update_core_memory(
            &store,
            BlockType::Persona,
            "default",
            CoreMemoryOp::Replace,
            "I am a test agent",
        )
        .unwrap();
        episodic::record_event(&store, &vectors, &embedder, None, observation("a", "hello"))
            .await
            .unwrap();

        let with_core =
            recall(&store, &vectors, &embedder, &config, "hello", RecallOptions::default())
                .await
                .unwrap();
        assert_eq!(with_core.core_memory.len(), 1);
        assert_eq!(with_core.core_memory[0].content, "I am a test agent");

        let without_core = recall(
            &store,
            &vectors,
            &embedder,
            &config,
            "hello",
            RecallOptions { include_core: false, ..Default::default() },
        )
        .await
        .unwrap();
        assert!(without_core.core_memory.is_empty());
    }

    #[tokio::test]
    async fn touch_updates_access_tracking_per_kind() {
        let (store, vectors, embedder, config) = parts();
        let event = episodic::record_event(
            &store,
            &vectors,
            &embedder,
            None,
            observation("a", "touchable event"),
        )
        .await
        .unwrap();
        semantic::update_entity(
            &store,
            &vectors,
            &embedder,
            EntityUpdate {
                name: "Touchable".into(),
                entity_type: EntityKind::Concept,
                summary: None,
                observations: vec!["touchable entity".into()],
                importance: None,
            },
        )
        .await
        .unwrap();

        recall(&store, &vectors, &embedder, &config, "touchable", RecallOptions::default())
            .await
            .unwrap();

        assert_eq!(store.get_event(&event.id).unwrap().unwrap().access_count, 1);
        assert_eq!(
            store.find_entity_by_name("Touchable").unwrap().unwrap().access_count,
            1
        );
    }

    #[tokio::test]
    async fn entity_results_render_as_cards() {
        let (store, vectors, embedder, config) = parts();
        semantic::update_entity(
            &store,
            &vectors,
            &embedder,
            EntityUpdate {
                name: "Alice".into(),
                entity_type: EntityKind::Person,
                summary: Some("a colleague".into()),
                observations: vec!["likes Rust".into(), "drinks tea".into()],
                importance: None,
            },
        )
        .await
        .unwrap();

        let result = recall(&store, &vectors, &embedder, &config, "Alice", RecallOptions::default())
            .await
            .unwrap();
        let card = &result.memories[0].content;
        assert!(card.starts_with("Alice (person)\n"));
        assert!(card.contains("a colleague"));
        assert!(card.contains("- likes Rust"));
        assert!(card.contains("- drinks tea"));
    }
}
