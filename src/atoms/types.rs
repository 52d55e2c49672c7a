// ── Mnema Atoms: Memory System Types ───────────────────────────────────────
//
// Type definitions for the dual-store memory engine. These are pure data
// types (no logic beyond enum string mapping, no DB access, no I/O).
//
// Follows the project pattern: structs in atoms/, impls in engine/.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 1: Enumerations
// ═══════════════════════════════════════════════════════════════════════════

/// Kind of episodic event being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Message,
    Email,
    Action,
    Decision,
    Observation,
    Communication,
    FileChange,
    Error,
    Milestone,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Message => write!(f, "message"),
            EventType::Email => write!(f, "email"),
            EventType::Action => write!(f, "action"),
            EventType::Decision => write!(f, "decision"),
            EventType::Observation => write!(f, "observation"),
            EventType::Communication => write!(f, "communication"),
            EventType::FileChange => write!(f, "file_change"),
            EventType::Error => write!(f, "error"),
            EventType::Milestone => write!(f, "milestone"),
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(EventType::Message),
            "email" => Ok(EventType::Email),
            "action" => Ok(EventType::Action),
            "decision" => Ok(EventType::Decision),
            "observation" => Ok(EventType::Observation),
            "communication" => Ok(EventType::Communication),
            "file_change" => Ok(EventType::FileChange),
            "error" => Ok(EventType::Error),
            "milestone" => Ok(EventType::Milestone),
            _ => Err(format!("Unknown event type: {}", s)),
        }
    }
}

/// Which of the two core memory blocks a write addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Persona,
    UserProfile,
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockType::Persona => write!(f, "persona"),
            BlockType::UserProfile => write!(f, "user_profile"),
        }
    }
}

impl std::str::FromStr for BlockType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "persona" => Ok(BlockType::Persona),
            "user_profile" => Ok(BlockType::UserProfile),
            _ => Err(format!("Unknown block type: {}", s)),
        }
    }
}

/// Mutation verb accepted by the core memory update operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreMemoryOp {
    Append,
    Replace,
    Remove,
}

/// Kinds of tracked knowledge-graph entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Project,
    Concept,
    Preference,
    Tool,
    Organization,
    Location,
    Topic,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Person => write!(f, "person"),
            EntityKind::Project => write!(f, "project"),
            EntityKind::Concept => write!(f, "concept"),
            EntityKind::Preference => write!(f, "preference"),
            EntityKind::Tool => write!(f, "tool"),
            EntityKind::Organization => write!(f, "organization"),
            EntityKind::Location => write!(f, "location"),
            EntityKind::Topic => write!(f, "topic"),
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "person" => Ok(EntityKind::Person),
            "project" => Ok(EntityKind::Project),
            "concept" => Ok(EntityKind::Concept),
            "preference" => Ok(EntityKind::Preference),
            "tool" => Ok(EntityKind::Tool),
            "organization" => Ok(EntityKind::Organization),
            "location" => Ok(EntityKind::Location),
            "topic" => Ok(EntityKind::Topic),
            _ => Err(format!("Unknown entity kind: {}", s)),
        }
    }
}

/// The closed set of memory kinds a vector record may carry. The vector
/// store refuses anything outside this enum at its boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Event,
    Entity,
    Reflection,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryKind::Event => write!(f, "event"),
            MemoryKind::Entity => write!(f, "entity"),
            MemoryKind::Reflection => write!(f, "reflection"),
        }
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(MemoryKind::Event),
            "entity" => Ok(MemoryKind::Entity),
            "reflection" => Ok(MemoryKind::Reflection),
            _ => Err(format!("Unknown memory kind: {}", s)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 2: Row Types
// ═══════════════════════════════════════════════════════════════════════════

/// An immutable episodic event. Only `accessed_at` / `access_count` ever
/// change after insert, via the touch operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub agent_id: String,
    pub event_type: EventType,
    pub content: String,
    /// Importance on [0, 1].
    pub importance: f64,
    /// Entity names mentioned by the event, in caller order.
    #[serde(default)]
    pub entities: Vec<String>,
    /// Opaque key/value map supplied by the caller.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessed_at: Option<String>,
    #[serde(default)]
    pub access_count: i64,
}

/// A mutable core memory block. `(block_type, block_key)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreBlock {
    pub id: String,
    pub block_type: BlockType,
    pub block_key: String,
    pub content: String,
    pub updated_at: String,
}

/// An evolving knowledge-graph entity. Names are unique case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Ordered, duplicate-free list of observed facts.
    #[serde(default)]
    pub observations: Vec<String>,
    pub importance: f64,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessed_at: Option<String>,
    #[serde(default)]
    pub access_count: i64,
}

/// A bi-temporal graph edge. At any wall-clock instant, at most one row per
/// `(from_entity, to_entity, relation_type)` triple has `valid_until` NULL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub from_entity: String,
    pub to_entity: String,
    pub relation_type: String,
    /// Kept for schema compatibility; always 1.0, nothing consumes it yet.
    pub weight: f64,
    pub valid_from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: String,
}

/// A synthesized insight grounded in a window of events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    pub id: String,
    pub content: String,
    /// Every unreflected event id the cycle saw, never truncated.
    pub source_ids: Vec<String>,
    pub importance: f64,
    /// Synthesis depth; direct event reflections are depth 1.
    pub depth: i64,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessed_at: Option<String>,
    #[serde(default)]
    pub access_count: i64,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 3: Vector Store Records
// ═══════════════════════════════════════════════════════════════════════════

/// One row of the vector store's `memories` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub memory_id: String,
    pub memory_type: MemoryKind,
    pub vector: Vec<f32>,
    pub content: String,
    pub created_at: String,
}

/// A vector search hit with its L2 distance to the query.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub memory_id: String,
    pub memory_type: MemoryKind,
    pub content: String,
    pub created_at: String,
    pub distance: f64,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 4: Search / Recall Shapes
// ═══════════════════════════════════════════════════════════════════════════

/// Caller input for the episodic append path.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    pub agent_id: String,
    pub event_type: EventType,
    pub content: String,
    /// Clamped to [0, 1] when given; resolved by the importance scorer or
    /// defaulted to 0.5 when absent.
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Caller input for the entity upsert path.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityUpdate {
    pub name: String,
    pub entity_type: EntityKind,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default)]
    pub importance: Option<f64>,
}

/// Post-filters applied to hybrid event search after hydration.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub agent_id: Option<String>,
    pub event_type: Option<EventType>,
    /// Inclusive ISO-8601 window bounds, compared lexicographically.
    pub start: Option<String>,
    pub end: Option<String>,
    /// Case-insensitive substring match against any requested entity name.
    pub entities: Vec<String>,
}

/// One scored recall result.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    pub id: String,
    pub memory_type: MemoryKind,
    /// Rendered content: raw event/reflection text, or the entity card.
    pub content: String,
    pub score: f64,
    pub recency: f64,
    pub importance: f64,
    pub relevance: f64,
    pub created_at: String,
}

/// The unified recall response.
#[derive(Debug, Clone, Serialize)]
pub struct RecallResult {
    pub core_memory: Vec<CoreBlock>,
    pub memories: Vec<ScoredMemory>,
    /// Pre-filter vector hit count (fan-out size, not result size).
    pub total_searched: usize,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 5: Reports
// ═══════════════════════════════════════════════════════════════════════════

/// Outcome of one consolidation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationReport {
    pub entities_updated: usize,
    pub observations_pruned: usize,
    pub summaries_refreshed: usize,
}

/// Outcome of one dual-store repair pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    pub orphan_vectors_deleted: usize,
    pub rows_reembedded: usize,
    pub reembed_failures: usize,
}

/// Counts and bounds reported by the status operation. Read from the
/// relational store alone, in a single compound query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub event_count: i64,
    pub entity_count: i64,
    pub relation_count: i64,
    pub active_relation_count: i64,
    pub reflection_count: i64,
    pub core_block_count: i64,
    pub oldest_event_at: Option<String>,
    pub newest_event_at: Option<String>,
}
