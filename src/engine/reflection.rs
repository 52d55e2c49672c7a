// Mnema Engine — Reflection
//
// Threshold-gated insight synthesis over unreflected events. The whole
// component is gated on the language-model provider: without one it is
// disabled and every public method returns empty. Failure modes inside a
// cycle are logged and shrink the output, they never raise.
//
// Ordering rule: an insight is embedded BEFORE its row is inserted, so an
// embedding outage can never create a reflection row without a vector.

use crate::atoms::error::EngineResult;
use crate::atoms::ids::new_id;
use crate::atoms::types::{Event, MemoryKind, Reflection, VectorRecord};
use crate::engine::clock::now_iso;
use crate::engine::embedding::EmbeddingService;
use crate::engine::provider::LanguageModel;
use crate::engine::store::MemoryStore;
use crate::engine::vector::VectorStore;
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Cap on events pulled per cycle.
const UNREFLECTED_LIMIT: usize = 500;
/// Events summarized for the question prompt.
const MAX_SUMMARY_EVENTS: usize = 50;
/// Events grounding each insight.
const MAX_GROUNDING_EVENTS: usize = 30;
/// Salient questions per cycle.
const MAX_QUESTIONS: usize = 3;
/// Fixed importance assigned to synthesized insights.
const REFLECTION_IMPORTANCE: f64 = 0.7;
/// Stored importance lives on [0,1]; the threshold is calibrated for a
/// ten-point scale, hence the multiplier.
const IMPORTANCE_SCALE: f64 = 10.0;

pub struct ReflectionEngine {
    llm: Option<Arc<dyn LanguageModel>>,
    threshold: f64,
    /// Per-agent latch: at most one reflection cycle in flight per agent.
    in_flight: Mutex<HashSet<String>>,
}

/// Removes the agent from the in-flight set however the cycle ends.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    agent: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.agent);
    }
}

impl ReflectionEngine {
    pub fn new(llm: Option<Arc<dyn LanguageModel>>, threshold: f64) -> Self {
        ReflectionEngine {
            llm,
            threshold,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.llm.is_some()
    }

    /// Whether the agent's unreflected importance mass crosses the
    /// threshold (Σ importance × 10 ≥ threshold).
    pub fn should_reflect(&self, store: &MemoryStore, agent_id: &str) -> EngineResult<bool> {
        if !self.enabled() {
            return Ok(false);
        }
        let events = store.unreflected_events(agent_id, UNREFLECTED_LIMIT)?;
        Ok(cumulative_importance(&events) >= self.threshold)
    }

    /// Run one reflection cycle. Returns the stored insights (possibly
    /// empty). A second concurrent call for the same agent returns empty
    /// immediately instead of queueing.
    pub async fn reflect(
        &self,
        store: &MemoryStore,
        vectors: &VectorStore,
        embedder: &EmbeddingService,
        agent_id: &str,
        force: bool,
    ) -> EngineResult<Vec<Reflection>> {
        let Some(llm) = &self.llm else {
            return Ok(Vec::new());
        };

        if !self.in_flight.lock().insert(agent_id.to_string()) {
            info!("[reflect] cycle already in flight for {} — skipping", agent_id);
            return Ok(Vec::new());
        }
        let _guard = InFlightGuard { set: &self.in_flight, agent: agent_id.to_string() };

        let events = store.unreflected_events(agent_id, UNREFLECTED_LIMIT)?;
        if events.is_empty() {
            return Ok(Vec::new());
        }
        if !force && cumulative_importance(&events) < self.threshold {
            return Ok(Vec::new());
        }

        let summaries = summarize_events(&events, MAX_SUMMARY_EVENTS);
        let questions = match ask_questions(llm.as_ref(), &summaries).await {
            Ok(questions) => questions,
            Err(e) => {
                warn!("[reflect] question synthesis failed: {}", e);
                Vec::new()
            }
        };

        // source_ids always carries the full unreflected window, not the
        // summarized subset.
        let source_ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
        let grounding = summarize_events(&events, MAX_GROUNDING_EVENTS);

        let mut stored = Vec::new();
        for question in &questions {
            let insight = match ask_insight(llm.as_ref(), question, &grounding).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("[reflect] insight synthesis failed for {:?}: {}", question, e);
                    continue;
                }
            };
            if insight.is_empty() {
                continue;
            }

            // Embed first; a failed embed skips the insight entirely so no
            // orphan row is ever created.
            let vector = match embedder.embed(&insight).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("[reflect] embed failed, dropping insight: {}", e);
                    continue;
                }
            };

            let reflection = Reflection {
                id: new_id(),
                content: insight,
                source_ids: source_ids.clone(),
                importance: REFLECTION_IMPORTANCE,
                depth: 1,
                created_at: now_iso(),
                accessed_at: None,
                access_count: 0,
            };
            store.insert_reflection(&reflection)?;
            if let Err(e) = vectors.add(&VectorRecord {
                memory_id: reflection.id.clone(),
                memory_type: MemoryKind::Reflection,
                vector,
                content: reflection.content.clone(),
                created_at: reflection.created_at.clone(),
            }) {
                warn!("[reflect] vector write failed for {} (row kept): {}", reflection.id, e);
            }
            stored.push(reflection);
        }

        // Retire this window regardless of how many insights made it.
        let now = now_iso();
        store.set_state("last_reflection_at", &now)?;
        store.set_state(&format!("last_reflected_at:{}", agent_id), &now)?;

        info!(
            "[reflect] ✓ {} insights from {} events for {}",
            stored.len(),
            events.len(),
            agent_id
        );
        Ok(stored)
    }
}

fn cumulative_importance(events: &[Event]) -> f64 {
    events.iter().map(|e| e.importance * IMPORTANCE_SCALE).sum()
}

/// One line per event: `- [type] content`, content capped at 200 chars.
fn summarize_events(events: &[Event], cap: usize) -> String {
    events
        .iter()
        .take(cap)
        .map(|e| {
            let short: String = e.content.chars().take(200).collect();
            format!("- [{}] {}", e.event_type, short)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn ask_questions(llm: &dyn LanguageModel, summaries: &str) -> EngineResult<Vec<String>> {
    let prompt = format!(
        "Given only the recent memory events below, what are the {} most \
         salient high-level questions about the agent's situation? Reply \
         with one question per line, nothing else.\n\nEvents:\n{}",
        MAX_QUESTIONS, summaries
    );
    let reply = llm.complete(&prompt).await?;
    Ok(reply
        .lines()
        .map(|line| line.trim_start_matches(['-', '*', ' ', '\t']))
        .map(|line| line.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')'))
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .take(MAX_QUESTIONS)
        .map(str::to_string)
        .collect())
}

async fn ask_insight(
    llm: &dyn LanguageModel,
    question: &str,
    grounding: &str,
) -> EngineResult<String> {
    let prompt = format!(
        "Answer the question in a single concise paragraph, grounded only \
         in the events below.\n\nQuestion: {}\n\nEvents:\n{}",
        question, grounding
    );
    Ok(llm.complete(&prompt).await?.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{EventType, NewEvent};
    use crate::engine::embedding::testing::{FailingEmbedder, MockEmbedder};
    use crate::engine::episodic::record_event;
    use crate::engine::provider::testing::{BrokenModel, ScriptedModel};

    fn parts() -> (MemoryStore, VectorStore, EmbeddingService) {
        let store = MemoryStore::open_in_memory().unwrap();
        let vectors = VectorStore::open_in_memory(8).unwrap();
        let embedder = EmbeddingService::new(MockEmbedder::new(8), 8);
        (store, vectors, embedder)
    }

    async fn seed_events(
        store: &MemoryStore,
        vectors: &VectorStore,
        embedder: &EmbeddingService,
        agent: &str,
        count: usize,
        importance: f64,
    ) {
        for i in 0..count {
            record_event(
                store,
                vectors,
                embedder,
                None,
                NewEvent {
                    agent_id: agent.into(),
                    event_type: EventType::Observation,
                    content: format!("observation {}", i),
                    importance: Some(importance),
                    entities: vec![],
                    metadata: Default::default(),
                },
            )
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn disabled_without_provider() {
        let (store, vectors, embedder) = parts();
        seed_events(&store, &vectors, &embedder, "a", 5, 1.0).await;

        let engine = ReflectionEngine::new(None, 1.0);
        assert!(!engine.enabled());
        assert!(!engine.should_reflect(&store, "a").unwrap());
        let out = engine.reflect(&store, &vectors, &embedder, "a", true).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn threshold_uses_ten_point_scale() {
        let (store, vectors, embedder) = parts();
        // 20 events × importance 0.75 × 10 = 150 — exactly the default.
        seed_events(&store, &vectors, &embedder, "a", 20, 0.75).await;

        let model: Arc<dyn LanguageModel> = ScriptedModel::new(&["q"]);
        let engine = ReflectionEngine::new(Some(model), 150.0);
        assert!(engine.should_reflect(&store, "a").unwrap());

        let below = ReflectionEngine::new(Some(ScriptedModel::new(&["q"])), 151.0);
        assert!(!below.should_reflect(&store, "a").unwrap());
    }

    #[tokio::test]
    async fn cycle_stores_insights_and_advances_watermark() {
        let (store, vectors, embedder) = parts();
        seed_events(&store, &vectors, &embedder, "a", 3, 0.9).await;
        let vector_count_before = vectors.count().unwrap();

        let model = ScriptedModel::new(&[
            "What changed?\nWhat is risky?",
            "The agent observed steady change.",
            "Nothing seems risky yet.",
        ]);
        let engine = ReflectionEngine::new(Some(model), 10.0);
        let stored = engine.reflect(&store, &vectors, &embedder, "a", false).await.unwrap();

        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|r| r.depth == 1));
        assert!(stored.iter().all(|r| (r.importance - 0.7).abs() < 1e-9));
        assert!(stored.iter().all(|r| r.source_ids.len() == 3));
        assert_eq!(vectors.count().unwrap(), vector_count_before + 2);

        let watermark = store.get_state("last_reflected_at:a").unwrap().unwrap();
        assert!(stored.iter().all(|r| watermark >= r.created_at));
        assert!(store.unreflected_events("a", 500).unwrap().is_empty());
        assert!(store.get_state("last_reflection_at").unwrap().is_some());
    }

    #[tokio::test]
    async fn source_ids_exceed_summary_window() {
        let (store, vectors, embedder) = parts();
        seed_events(&store, &vectors, &embedder, "a", 60, 0.9).await;

        let model = ScriptedModel::new(&["One question?", "One insight."]);
        let engine = ReflectionEngine::new(Some(model), 1.0);
        let stored = engine.reflect(&store, &vectors, &embedder, "a", false).await.unwrap();

        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source_ids.len(), 60, "all 60 events, not the 50 summarized");
    }

    #[tokio::test]
    async fn below_threshold_without_force_is_a_no_op() {
        let (store, vectors, embedder) = parts();
        seed_events(&store, &vectors, &embedder, "a", 2, 0.1).await;

        let engine = ReflectionEngine::new(Some(ScriptedModel::new(&["q", "i"])), 150.0);
        let out = engine.reflect(&store, &vectors, &embedder, "a", false).await.unwrap();
        assert!(out.is_empty());
        assert!(
            store.get_state("last_reflected_at:a").unwrap().is_none(),
            "watermark untouched below threshold"
        );
        assert_eq!(store.unreflected_events("a", 500).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn embed_failure_leaves_no_orphan_rows() {
        let (store, vectors, good_embedder) = parts();
        seed_events(&store, &vectors, &good_embedder, "a", 3, 0.9).await;
        let reflections_vectors_before = vectors
            .list_ids()
            .unwrap()
            .iter()
            .filter(|(_, k)| *k == MemoryKind::Reflection)
            .count();

        let broken = EmbeddingService::new(Arc::new(FailingEmbedder), 8);
        let model = ScriptedModel::new(&["Why?", "Because."]);
        let engine = ReflectionEngine::new(Some(model), 1.0);
        let stored = engine.reflect(&store, &vectors, &broken, "a", false).await.unwrap();

        assert!(stored.is_empty());
        assert_eq!(store.stats().unwrap().reflection_count, 0, "no orphan rows");
        let reflections_vectors_after = vectors
            .list_ids()
            .unwrap()
            .iter()
            .filter(|(_, k)| *k == MemoryKind::Reflection)
            .count();
        assert_eq!(reflections_vectors_after, reflections_vectors_before);
    }

    #[tokio::test]
    async fn concurrent_cycle_for_same_agent_returns_empty() {
        let (store, vectors, embedder) = parts();
        seed_events(&store, &vectors, &embedder, "a", 3, 0.9).await;

        let engine = ReflectionEngine::new(Some(ScriptedModel::new(&["q", "i"])), 1.0);
        engine.in_flight.lock().insert("a".to_string());

        let out = engine.reflect(&store, &vectors, &embedder, "a", true).await.unwrap();
        assert!(out.is_empty(), "second cycle yields immediately");
        assert!(
            store.get_state("last_reflected_at:a").unwrap().is_none(),
            "skipped cycle does not advance the watermark"
        );

        engine.in_flight.lock().remove("a");
        let out = engine.reflect(&store, &vectors, &embedder, "a", true).await.unwrap();
        assert!(!out.is_empty(), "latch released after the first cycle ends");
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_empty() {
        let (store, vectors, embedder) = parts();
        seed_events(&store, &vectors, &embedder, "a", 3, 0.9).await;

        let engine = ReflectionEngine::new(Some(Arc::new(BrokenModel)), 1.0);
        let out = engine.reflect(&store, &vectors, &embedder, "a", false).await.unwrap();
        assert!(out.is_empty());
    }
}
