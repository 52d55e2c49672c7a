// Mnema Engine — Consolidation
//
// Periodic compression of the knowledge graph: long observation lists are
// pruned to the most recent window, and entity summaries are refreshed by
// the language model when they are missing, stale, or their observations
// just changed. Rows are authoritative; vector refresh failures after
// commit are logged, never fatal.

use crate::atoms::error::EngineResult;
use crate::atoms::types::{ConsolidationReport, Entity, MemoryKind, VectorRecord};
use crate::engine::clock::{hours_since, now_iso};
use crate::engine::embedding::EmbeddingService;
use crate::engine::provider::LanguageModel;
use crate::engine::semantic::entity_text;
use crate::engine::store::{entities, MemoryStore};
use crate::engine::vector::VectorStore;
use log::{debug, info, warn};
use std::sync::Arc;

/// Observations kept per entity; older ones are pruned first.
const MAX_OBSERVATIONS: usize = 20;
/// Observations shown to the summarizer.
const SUMMARY_OBSERVATIONS: usize = 15;
/// Relations shown to the summarizer.
const SUMMARY_RELATIONS: usize = 10;
/// An entity untouched for this long gets its summary refreshed.
const STALE_AFTER_HOURS: f64 = 7.0 * 24.0;

/// Run one consolidation pass over every entity.
///
/// `max_age_days` is accepted for forward compatibility but currently a
/// no-op — whether old events should be deleted, old observations dropped,
/// or both merely downweighted is still undecided.
/// TODO: settle max_age_days semantics and wire it through.
pub async fn consolidate(
    store: &MemoryStore,
    vectors: &VectorStore,
    embedder: &EmbeddingService,
    llm: Option<&Arc<dyn LanguageModel>>,
    max_age_days: Option<u32>,
) -> EngineResult<ConsolidationReport> {
    if let Some(days) = max_age_days {
        debug!("[consolidate] max_age_days={} accepted but not yet applied", days);
    }

    let mut report = ConsolidationReport::default();

    for mut entity in store.list_entities()? {
        let mut changed = false;

        // 1. Prune to the most recent observations.
        if entity.observations.len() > MAX_OBSERVATIONS {
            let excess = entity.observations.len() - MAX_OBSERVATIONS;
            entity.observations.drain(..excess);
            report.observations_pruned += excess;
            changed = true;
        }

        // 2. Summary refresh, gated on provider presence and need.
        let stale = hours_since(&entity.updated_at) > STALE_AFTER_HOURS;
        if let Some(model) = llm {
            if changed || entity.summary.is_none() || stale {
                match summarize_entity(store, model.as_ref(), &entity).await {
                    Ok(summary) if !summary.is_empty() => {
                        entity.summary = Some(summary);
                        report.summaries_refreshed += 1;
                        changed = true;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("[consolidate] summary refresh failed for {}: {}", entity.name, e),
                }
            }
        }

        // 3. Persist and refresh the derived vector.
        if changed {
            entity.updated_at = now_iso();
            store.with_txn(|tx| entities::write_entity(tx, &entity))?;
            report.entities_updated += 1;

            match embedder.embed(&entity_text(&entity)).await {
                Ok(vector) => {
                    if let Err(e) = vectors.delete(&entity.id).and_then(|_| {
                        vectors.add(&VectorRecord {
                            memory_id: entity.id.clone(),
                            memory_type: MemoryKind::Entity,
                            vector,
                            content: entity_text(&entity),
                            created_at: entity.created_at.clone(),
                        })
                    }) {
                        warn!("[consolidate] vector swap failed for {}: {}", entity.name, e);
                    }
                }
                Err(e) => warn!("[consolidate] re-embed failed for {}: {}", entity.name, e),
            }
        }
    }

    store.set_state("last_consolidation_at", &now_iso())?;
    info!(
        "[consolidate] ✓ {} updated, {} observations pruned, {} summaries refreshed",
        report.entities_updated, report.observations_pruned, report.summaries_refreshed
    );
    Ok(report)
}

/// Ask for a 1–2 sentence summary conditioned on the entity's most recent
/// observations and its relations.
async fn summarize_entity(
    store: &MemoryStore,
    model: &dyn LanguageModel,
    entity: &Entity,
) -> EngineResult<String> {
    let observations: Vec<&str> = entity
        .observations
        .iter()
        .rev()
        .take(SUMMARY_OBSERVATIONS)
        .rev()
        .map(|o| o.as_str())
        .collect();

    let mut relation_lines = Vec::new();
    for relation in store
        .relations_for_entity(&entity.id, true)?
        .into_iter()
        .take(SUMMARY_RELATIONS)
    {
        let (other_id, arrow) = if relation.from_entity == entity.id {
            (relation.to_entity.clone(), "->")
        } else {
            (relation.from_entity.clone(), "<-")
        };
        let other = store
            .get_entity(&other_id)?
            .map(|e| e.name)
            .unwrap_or(other_id);
        relation_lines.push(format!("{} {} {}", relation.relation_type, arrow, other));
    }

    let prompt = format!(
        "Summarize what is known about \"{}\" ({}) in 1–2 sentences.\n\n\
         Observations:\n{}\n\nRelations:\n{}",
        entity.name,
        entity.entity_type,
        observations
            .iter()
            .map(|o| format!("- {}", o))
            .collect::<Vec<_>>()
            .join("\n"),
        if relation_lines.is_empty() {
            "(none)".to_string()
        } else {
            relation_lines.join("\n")
        },
    );
    Ok(model.complete(&prompt).await?.trim().to_string())
}
