// Mnema Engine — component wiring and the MemoryEngine facade.
//
// Module layout:
//   config        — environment-loaded configuration with collect-all validation
//   store         — relational store (rows, FTS, bi-temporal edges, state)
//   vector        — vector store (BLOB vectors, lazy table, L2 scan)
//   embedding     — Embedder trait, lazy shared warm-up, HTTP provider
//   provider      — LanguageModel trait, Anthropic provider
//   episodic      — append path with compensation, hybrid search, timeline
//   semantic      — core blocks, entity upsert, bi-temporal relations
//   retrieval     — unified weighted recall
//   reflection    — threshold-gated insight synthesis
//   consolidation — observation pruning and summary refresh
//   scheduler     — the two background timers
//   repair        — dual-store orphan healing
//   clock         — canonical ISO-8601 timestamps

pub(crate) mod clock;
pub mod config;
pub mod consolidation;
pub mod embedding;
pub mod episodic;
pub mod provider;
pub mod reflection;
pub mod repair;
pub mod retrieval;
pub mod scheduler;
pub mod semantic;
pub mod store;
pub mod vector;

use crate::atoms::error::EngineResult;
use crate::atoms::types::{
    BlockType, ConsolidationReport, CoreBlock, CoreMemoryOp, EngineStats, Entity, EntityKind,
    EntityUpdate, Event, EventFilter, EventType, NewEvent, RecallResult, Reflection, Relation,
    RepairReport,
};
use config::EngineConfig;
use embedding::{Embedder, EmbeddingService, HttpEmbedder};
use log::info;
use provider::{AnthropicProvider, LanguageModel};
use reflection::ReflectionEngine;
use scheduler::{BackgroundScheduler, SchedulerContext, REFLECTION_CHECK_INTERVAL_MS};
use std::collections::HashMap;
use std::sync::Arc;
use store::MemoryStore;
use vector::VectorStore;

/// The memory engine: both stores, both providers, both background loops,
/// one method per tool-surface operation.
pub struct MemoryEngine {
    store: Arc<MemoryStore>,
    vectors: Arc<VectorStore>,
    embedder: Arc<EmbeddingService>,
    llm: Option<Arc<dyn LanguageModel>>,
    reflection: Arc<ReflectionEngine>,
    scheduler: BackgroundScheduler,
    config: EngineConfig,
}

impl MemoryEngine {
    /// Open the engine with the built-in providers: the HTTP embedder and,
    /// when an API key is configured, the Anthropic language model.
    pub fn open(config: EngineConfig) -> EngineResult<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
            config.embedding_base_url.clone(),
            config.embedding_model.clone(),
        ));
        let llm: Option<Arc<dyn LanguageModel>> = config
            .anthropic_api_key
            .as_deref()
            .map(|key| Arc::new(AnthropicProvider::new(key)) as Arc<dyn LanguageModel>);
        Self::open_with_providers(config, embedder, llm)
    }

    /// Open with caller-supplied providers. This is the seam hosts (and
    /// tests) use to plug in their own embedding or language-model backends.
    pub fn open_with_providers(
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        llm: Option<Arc<dyn LanguageModel>>,
    ) -> EngineResult<Self> {
        let mut errors = Vec::new();
        config.validate(&mut errors);
        if !errors.is_empty() {
            return Err(crate::atoms::error::EngineError::Config(format!(
                "invalid configuration:\n  - {}",
                errors.join("\n  - ")
            )));
        }
        config.check_weight_sum();

        let store = Arc::new(MemoryStore::open(&config.data_dir)?);
        let vectors = Arc::new(VectorStore::open(&config.data_dir, config.embedding_dimensions)?);
        Self::assemble(config, store, vectors, embedder, llm)
    }

    /// Fully in-memory engine for tests: no files, injected providers.
    pub fn open_in_memory(
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        llm: Option<Arc<dyn LanguageModel>>,
    ) -> EngineResult<Self> {
        let store = Arc::new(MemoryStore::open_in_memory()?);
        let vectors = Arc::new(VectorStore::open_in_memory(config.embedding_dimensions)?);
        Self::assemble(config, store, vectors, embedder, llm)
    }

    fn assemble(
        config: EngineConfig,
        store: Arc<MemoryStore>,
        vectors: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        llm: Option<Arc<dyn LanguageModel>>,
    ) -> EngineResult<Self> {
        let embedder = Arc::new(EmbeddingService::new(embedder, config.embedding_dimensions));
        let reflection = Arc::new(ReflectionEngine::new(
            llm.clone(),
            config.reflection_threshold,
        ));
        info!(
            "[engine] ready (D={}, llm={})",
            config.embedding_dimensions,
            if llm.is_some() { "enabled" } else { "disabled" }
        );
        Ok(MemoryEngine {
            store,
            vectors,
            embedder,
            llm,
            reflection,
            scheduler: BackgroundScheduler::new(),
            config,
        })
    }

    // ── Episodic operations ────────────────────────────────────────────

    pub async fn record_event(&self, new: NewEvent) -> EngineResult<Event> {
        episodic::record_event(
            &self.store,
            &self.vectors,
            &self.embedder,
            self.llm.as_ref(),
            new,
        )
        .await
    }

    pub async fn search_events(
        &self,
        query: &str,
        limit: usize,
        filter: &EventFilter,
    ) -> EngineResult<Vec<Event>> {
        episodic::search_events(&self.store, &self.vectors, &self.embedder, query, limit, filter)
            .await
    }

    pub fn get_timeline(
        &self,
        agent_id: &str,
        event_type: Option<EventType>,
        limit: Option<usize>,
    ) -> EngineResult<Vec<Event>> {
        episodic::timeline(&self.store, agent_id, event_type, limit)
    }

    pub fn get_event(&self, id: &str) -> EngineResult<Option<Event>> {
        self.store.get_event(id)
    }

    /// Record a distilled learning as an observation event.
    pub async fn store_learning(
        &self,
        agent_id: &str,
        content: &str,
        importance: Option<f64>,
    ) -> EngineResult<Event> {
        self.record_event(NewEvent {
            agent_id: agent_id.to_string(),
            event_type: EventType::Observation,
            content: content.to_string(),
            importance,
            entities: Vec::new(),
            metadata: HashMap::new(),
        })
        .await
    }

    // ── Semantic operations ────────────────────────────────────────────

    pub fn update_core_memory(
        &self,
        block_type: BlockType,
        block_key: &str,
        op: CoreMemoryOp,
        content: &str,
    ) -> EngineResult<CoreBlock> {
        semantic::update_core_memory(&self.store, block_type, block_key, op, content)
    }

    pub async fn update_entity(&self, update: EntityUpdate) -> EngineResult<Entity> {
        semantic::update_entity(&self.store, &self.vectors, &self.embedder, update).await
    }

    pub fn create_relation(
        &self,
        from_name: &str,
        to_name: &str,
        relation_type: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> EngineResult<Relation> {
        semantic::create_relation(&self.store, from_name, to_name, relation_type, metadata)
    }

    pub fn get_relations(&self, entity_name: &str, active_only: bool) -> EngineResult<Vec<Relation>> {
        semantic::get_relations(&self.store, entity_name, active_only)
    }

    pub async fn search_knowledge(
        &self,
        query: &str,
        limit: usize,
        entity_type: Option<EntityKind>,
    ) -> EngineResult<Vec<Entity>> {
        semantic::search_knowledge(&self.store, &self.vectors, &self.embedder, query, limit, entity_type)
            .await
    }

    // ── Retrieval ──────────────────────────────────────────────────────

    pub async fn recall(
        &self,
        query: &str,
        opts: retrieval::RecallOptions,
    ) -> EngineResult<RecallResult> {
        retrieval::recall(&self.store, &self.vectors, &self.embedder, &self.config, query, opts)
            .await
    }

    // ── Maintenance ────────────────────────────────────────────────────

    pub fn should_reflect(&self, agent_id: &str) -> EngineResult<bool> {
        self.reflection.should_reflect(&self.store, agent_id)
    }

    pub async fn reflect(&self, agent_id: &str, force: bool) -> EngineResult<Vec<Reflection>> {
        self.reflection
            .reflect(&self.store, &self.vectors, &self.embedder, agent_id, force)
            .await
    }

    pub async fn consolidate(&self, max_age_days: Option<u32>) -> EngineResult<ConsolidationReport> {
        consolidation::consolidate(
            &self.store,
            &self.vectors,
            &self.embedder,
            self.llm.as_ref(),
            max_age_days,
        )
        .await
    }

    pub async fn repair(&self) -> EngineResult<RepairReport> {
        repair::repair(&self.store, &self.vectors, &self.embedder).await
    }

    /// Read-only status, a single compound read of the relational store.
    pub fn memory_status(&self) -> EngineResult<EngineStats> {
        self.store.stats()
    }

    /// Row count of the vector store's `memories` table.
    pub fn vector_count(&self) -> EngineResult<usize> {
        self.vectors.count()
    }

    /// Clear a cached embedding-provider failure so the next call retries.
    pub fn reset_embedder(&self) {
        self.embedder.reset();
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    pub fn start_scheduler(&self) {
        self.scheduler.start(SchedulerContext {
            store: self.store.clone(),
            vectors: self.vectors.clone(),
            embedder: self.embedder.clone(),
            llm: self.llm.clone(),
            reflection: self.reflection.clone(),
            reflection_check_ms: REFLECTION_CHECK_INTERVAL_MS,
            consolidation_interval_ms: self.config.consolidation_interval_ms,
        });
    }

    pub fn stop_scheduler(&self) {
        self.scheduler.stop();
    }

    pub fn scheduler_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Stop the timers and flush the relational store. The engine is still
    /// usable afterwards; this just makes shutdown orderly.
    pub fn close(&self) {
        self.scheduler.stop();
        self.store.checkpoint();
        info!("[engine] closed");
    }
}
