// Mnema Engine — Episodic Memory
//
// The append-only event log. The append path does a two-phase persist (row
// first, then vector) with a compensating row delete when the vector half
// fails — the engine's substitute for a cross-store transaction. Search
// fuses vector and full-text hits, post-filters, and orders by distance.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::ids::new_id;
use crate::atoms::types::{Event, EventFilter, EventType, MemoryKind, NewEvent, VectorRecord};
use crate::engine::clock::now_iso;
use crate::engine::embedding::EmbeddingService;
use crate::engine::provider::LanguageModel;
use crate::engine::store::MemoryStore;
use crate::engine::vector::VectorStore;
use log::{debug, info, warn};
use std::sync::Arc;

/// Hard caps from the data model.
const MAX_CONTENT_LEN: usize = 50_000;
const MAX_AGENT_ID_LEN: usize = 255;

/// Timeline paging bounds.
const TIMELINE_DEFAULT_LIMIT: usize = 50;
const TIMELINE_MAX_LIMIT: usize = 200;

/// Sort key for rows found only by full-text search: they carry no vector
/// distance and order after every vector hit.
const NO_DISTANCE: f64 = f64::INFINITY;

// ═══════════════════════════════════════════════════════════════════════════
// Append
// ═══════════════════════════════════════════════════════════════════════════

/// Record one immutable event. Returns the stored row.
pub async fn record_event(
    store: &MemoryStore,
    vectors: &VectorStore,
    embedder: &EmbeddingService,
    llm: Option<&Arc<dyn LanguageModel>>,
    new: NewEvent,
) -> EngineResult<Event> {
    if new.agent_id.is_empty() || new.agent_id.len() > MAX_AGENT_ID_LEN {
        return Err(EngineError::InvalidArgument(format!(
            "agent_id must be 1–{} characters",
            MAX_AGENT_ID_LEN
        )));
    }
    if new.content.is_empty() || new.content.len() > MAX_CONTENT_LEN {
        return Err(EngineError::InvalidArgument(format!(
            "content must be 1–{} characters",
            MAX_CONTENT_LEN
        )));
    }

    let importance = resolve_importance(llm, new.importance, &new.content).await;
    let event = Event {
        id: new_id(),
        agent_id: new.agent_id,
        event_type: new.event_type,
        content: new.content,
        importance,
        entities: new.entities,
        metadata: new.metadata,
        created_at: now_iso(),
        accessed_at: None,
        access_count: 0,
    };

    store.insert_event(&event)?;

    // Phase two: embed and write the vector. On failure, compensate by
    // deleting the row just written so the dual store stays consistent.
    let vector_result = async {
        let vector = embedder.embed(&event.content).await?;
        vectors.add(&VectorRecord {
            memory_id: event.id.clone(),
            memory_type: MemoryKind::Event,
            vector,
            content: event.content.clone(),
            created_at: event.created_at.clone(),
        })
    }
    .await;

    if let Err(e) = vector_result {
        warn!("[episodic] vector write failed for {} — compensating row delete", event.id);
        store.delete_event(&event.id)?;
        return Err(e);
    }

    info!(
        "[episodic] ✓ recorded {} type={} imp={:.2} agent={}",
        event.id, event.event_type, event.importance, event.agent_id
    );
    Ok(event)
}

/// Resolve importance: caller value clamped, else the scorer, else 0.5.
async fn resolve_importance(
    llm: Option<&Arc<dyn LanguageModel>>,
    caller: Option<f64>,
    content: &str,
) -> f64 {
    if let Some(value) = caller {
        return value.clamp(0.0, 1.0);
    }
    if let Some(model) = llm {
        match score_importance(model.as_ref(), content).await {
            Ok(score) => return score,
            Err(e) => warn!("[episodic] importance scoring failed, using 0.5: {}", e),
        }
    }
    0.5
}

/// Ask the language model for a 0–10 rating and map it onto [0, 1].
async fn score_importance(model: &dyn LanguageModel, content: &str) -> EngineResult<f64> {
    let excerpt: String = content.chars().take(2_000).collect();
    let prompt = format!(
        "Rate the long-term importance of this memory for an AI agent on a \
         scale of 0 to 10. Reply with only the number.\n\nMemory: {}",
        excerpt
    );
    let reply = model.complete(&prompt).await?;
    let parsed: f64 = reply
        .trim()
        .split_whitespace()
        .next()
        .and_then(|token| token.trim_matches(|c: char| !c.is_ascii_digit() && c != '.').parse().ok())
        .ok_or_else(|| {
            EngineError::provider("importance-scorer", format!("unparseable reply: {:?}", reply))
        })?;
    Ok((parsed / 10.0).clamp(0.0, 1.0))
}

// ═══════════════════════════════════════════════════════════════════════════
// Hybrid search
// ═══════════════════════════════════════════════════════════════════════════

/// Fused vector ∪ keyword search with post-filters, ordered by ascending
/// vector distance (keyword-only hits sort last). Every returned row has
/// its access tracking bumped.
pub async fn search_events(
    store: &MemoryStore,
    vectors: &VectorStore,
    embedder: &EmbeddingService,
    query: &str,
    limit: usize,
    filter: &EventFilter,
) -> EngineResult<Vec<Event>> {
    // Vector half: inflate by 2× so the post-filters still leave enough.
    let vector_hits = match embedder.embed(query).await {
        Ok(query_vector) => vectors.search(&query_vector, limit * 2, Some(MemoryKind::Event))?,
        Err(e) => {
            warn!("[episodic] vector search skipped (embedding failed): {}", e);
            Vec::new()
        }
    };

    // Keyword half (fails soft on malformed queries).
    let fts_hits = store.search_events_fts(query, limit)?;

    // Union of ids, vector order first, then keyword-only stragglers.
    let mut distances: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
    let mut ids: Vec<String> = Vec::new();
    for hit in &vector_hits {
        if !distances.contains_key(&hit.memory_id) {
            ids.push(hit.memory_id.clone());
        }
        distances.entry(hit.memory_id.clone()).or_insert(hit.distance);
    }
    for event in &fts_hits {
        if !distances.contains_key(&event.id) {
            distances.insert(event.id.clone(), NO_DISTANCE);
            ids.push(event.id.clone());
        }
    }

    let hydrated = store.get_events_batch(&ids)?;
    debug!(
        "[episodic] search: {} vector + {} keyword hits, {} hydrated",
        vector_hits.len(),
        fts_hits.len(),
        hydrated.len()
    );

    let now = now_iso();
    let mut results: Vec<(Event, f64)> = Vec::new();
    for id in &ids {
        let Some(event) = hydrated.get(id) else { continue };
        if !passes_filter(event, filter) {
            continue;
        }
        store.touch_event(id, &now)?;
        results.push((event.clone(), distances[id]));
    }

    results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(limit);
    Ok(results.into_iter().map(|(event, _)| event).collect())
}

/// Post-filter order: agent, type, time window, requested entities.
fn passes_filter(event: &Event, filter: &EventFilter) -> bool {
    if let Some(agent_id) = &filter.agent_id {
        if &event.agent_id != agent_id {
            return false;
        }
    }
    if let Some(event_type) = filter.event_type {
        if event.event_type != event_type {
            return false;
        }
    }
    if let Some(start) = &filter.start {
        if event.created_at.as_str() < start.as_str() {
            return false;
        }
    }
    if let Some(end) = &filter.end {
        if event.created_at.as_str() > end.as_str() {
            return false;
        }
    }
    if !filter.entities.is_empty() {
        let wanted: Vec<String> = filter.entities.iter().map(|e| e.to_lowercase()).collect();
        let matched = event.entities.iter().any(|have| {
            let have = have.to_lowercase();
            wanted.iter().any(|want| have.contains(want.as_str()))
        });
        if !matched {
            return false;
        }
    }
    true
}

// ═══════════════════════════════════════════════════════════════════════════
// Timeline
// ═══════════════════════════════════════════════════════════════════════════

/// Range query over (agent_id, created_at), newest first.
pub fn timeline(
    store: &MemoryStore,
    agent_id: &str,
    event_type: Option<EventType>,
    limit: Option<usize>,
) -> EngineResult<Vec<Event>> {
    let limit = limit.unwrap_or(TIMELINE_DEFAULT_LIMIT).min(TIMELINE_MAX_LIMIT);
    store.event_timeline(agent_id, event_type, limit)
}
