//! Mnema — a persistent dual-store memory engine for AI agents.
//!
//! Fuses an immutable event log (episodic memory) with an evolving
//! bi-temporal knowledge graph (semantic memory) and exposes both through
//! one weighted retrieval interface. Two storage backends — a relational
//! SQLite store with a full-text index, and a vector store — are kept
//! consistent with fixed write orders plus compensation rather than a
//! cross-store transaction; recall tolerates the orphans a crash can leave
//! and [`MemoryEngine::repair`] heals them.
//!
//! ```rust,ignore
//! use mnema::{EngineConfig, MemoryEngine};
//!
//! #[tokio::main]
//! async fn main() -> mnema::EngineResult<()> {
//!     let engine = MemoryEngine::open(EngineConfig::from_env()?)?;
//!     engine.start_scheduler();
//!
//!     engine.store_learning("default", "User prefers dark mode", None).await?;
//!     let result = engine.recall("user preferences", Default::default()).await?;
//!     for memory in &result.memories {
//!         println!("{:.3}  {}", memory.score, memory.content);
//!     }
//!
//!     engine.close();
//!     Ok(())
//! }
//! ```
//!
//! The protocol server, CLI, and provider processes are external
//! collaborators: embedding is any `text -> [f32; D]` implementation of
//! [`Embedder`], the language model any `prompt -> text` implementation of
//! [`LanguageModel`] — and the engine degrades gracefully when the latter
//! is absent.

pub mod atoms;
pub mod engine;

// ── Public API surface ─────────────────────────────────────────────────────

pub use atoms::error::{EngineError, EngineResult};
pub use atoms::ids::{is_valid_id, new_id};
pub use atoms::types::{
    BlockType, ConsolidationReport, CoreBlock, CoreMemoryOp, EngineStats, Entity, EntityKind,
    EntityUpdate, Event, EventFilter, EventType, MemoryKind, NewEvent, RecallResult, Reflection,
    Relation, RepairReport, ScoredMemory, VectorHit, VectorRecord,
};
pub use engine::config::EngineConfig;
pub use engine::embedding::{Embedder, EmbeddingService, HttpEmbedder};
pub use engine::provider::{AnthropicProvider, LanguageModel};
pub use engine::retrieval::RecallOptions;
pub use engine::scheduler::BackgroundScheduler;
pub use engine::store::MemoryStore;
pub use engine::vector::VectorStore;
pub use engine::MemoryEngine;
