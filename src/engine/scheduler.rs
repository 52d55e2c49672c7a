// Mnema Engine — Background Scheduler
//
// Two independent timers: a reflection check every five minutes and a
// consolidation pass on the configured interval. Loop bodies log and
// swallow every error — a failing provider or a locked database must never
// take the process down. `start` is idempotent, `stop` is safe in any
// order, and the spawned tasks never block process exit.

use crate::engine::consolidation;
use crate::engine::embedding::EmbeddingService;
use crate::engine::provider::LanguageModel;
use crate::engine::reflection::ReflectionEngine;
use crate::engine::store::MemoryStore;
use crate::engine::vector::VectorStore;
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// How often the reflection trigger is evaluated.
pub const REFLECTION_CHECK_INTERVAL_MS: u64 = 5 * 60 * 1000;

/// The agent the timed reflection check watches.
const DEFAULT_AGENT: &str = "default";

/// Everything the background loops need, cheap to clone into tasks.
#[derive(Clone)]
pub struct SchedulerContext {
    pub store: Arc<MemoryStore>,
    pub vectors: Arc<VectorStore>,
    pub embedder: Arc<EmbeddingService>,
    pub llm: Option<Arc<dyn LanguageModel>>,
    pub reflection: Arc<ReflectionEngine>,
    pub reflection_check_ms: u64,
    pub consolidation_interval_ms: u64,
}

struct RunningTasks {
    reflection: JoinHandle<()>,
    consolidation: JoinHandle<()>,
}

#[derive(Default)]
pub struct BackgroundScheduler {
    tasks: Mutex<Option<RunningTasks>>,
}

impl BackgroundScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    /// Spawn both timers. Calling again while running is a no-op — no
    /// duplicate timers are ever created.
    pub fn start(&self, ctx: SchedulerContext) {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return;
        }

        let reflection_ctx = ctx.clone();
        let reflection = tokio::spawn(async move {
            let mut timer = interval(Duration::from_millis(reflection_ctx.reflection_check_ms));
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.tick().await; // the first tick completes immediately
            loop {
                timer.tick().await;
                run_reflection_check(&reflection_ctx).await;
            }
        });

        let consolidation_ctx = ctx;
        let consolidation = tokio::spawn(async move {
            let mut timer =
                interval(Duration::from_millis(consolidation_ctx.consolidation_interval_ms));
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.tick().await;
            loop {
                timer.tick().await;
                let result = consolidation::consolidate(
                    &consolidation_ctx.store,
                    &consolidation_ctx.vectors,
                    &consolidation_ctx.embedder,
                    consolidation_ctx.llm.as_ref(),
                    None,
                )
                .await;
                if let Err(e) = result {
                    warn!("[scheduler] consolidation pass failed: {}", e);
                }
            }
        });

        info!("[scheduler] started (reflection check + consolidation timers)");
        *tasks = Some(RunningTasks { reflection, consolidation });
    }

    /// Clear both timers. Safe to call before `start` and more than once.
    pub fn stop(&self) {
        if let Some(running) = self.tasks.lock().take() {
            running.reflection.abort();
            running.consolidation.abort();
            info!("[scheduler] stopped");
        }
    }
}

async fn run_reflection_check(ctx: &SchedulerContext) {
    match ctx.reflection.should_reflect(&ctx.store, DEFAULT_AGENT) {
        Ok(true) => {
            if let Err(e) = ctx
                .reflection
                .reflect(&ctx.store, &ctx.vectors, &ctx.embedder, DEFAULT_AGENT, false)
                .await
            {
                warn!("[scheduler] reflection cycle failed: {}", e);
            }
        }
        Ok(false) => {}
        Err(e) => warn!("[scheduler] reflection check failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::embedding::testing::MockEmbedder;

    fn context(consolidation_ms: u64) -> SchedulerContext {
        SchedulerContext {
            store: Arc::new(MemoryStore::open_in_memory().unwrap()),
            vectors: Arc::new(VectorStore::open_in_memory(8).unwrap()),
            embedder: Arc::new(EmbeddingService::new(MockEmbedder::new(8), 8)),
            llm: None,
            reflection: Arc::new(ReflectionEngine::new(None, 150.0)),
            reflection_check_ms: 60_000,
            consolidation_interval_ms: consolidation_ms,
        }
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_is_safe_anywhere() {
        let scheduler = BackgroundScheduler::new();
        scheduler.stop(); // before start: no-op
        assert!(!scheduler.is_running());

        scheduler.start(context(60_000));
        scheduler.start(context(60_000));
        assert!(scheduler.is_running());

        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn consolidation_timer_fires_and_survives_errors() {
        let ctx = context(25);
        let store = ctx.store.clone();
        let scheduler = BackgroundScheduler::new();
        scheduler.start(ctx);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(
            store.get_state("last_consolidation_at").unwrap().is_some(),
            "timer ran at least one pass"
        );
        assert!(scheduler.is_running(), "loop survives");
        scheduler.stop();
    }
}
