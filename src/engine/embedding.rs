// Mnema Engine — Embedding Provider
//
// The engine treats embedding as a pure `text -> [f32; D]` function behind
// the `Embedder` trait. `HttpEmbedder` speaks the Ollama embed API with an
// OpenAI-compatible fallback; hosts with other backends implement the trait
// themselves.
//
// `EmbeddingService` adds the shared lifecycle the engine requires:
//   • lazy single warm-up — concurrent first callers await one in-flight
//     probe instead of racing their own
//   • a failed warm-up is cached so later calls fail fast instead of
//     hammering a dead provider; `reset()` clears the cached failure and
//     the next call probes again
//   • every returned vector is validated against the configured dimension

use crate::atoms::error::{EngineError, EngineResult};
use async_trait::async_trait;
use log::{info, warn};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Text used for the one-shot readiness probe.
const WARMUP_TEXT: &str = "warmup";

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Shared lazy-load wrapper
// ═══════════════════════════════════════════════════════════════════════════

pub struct EmbeddingService {
    provider: Arc<dyn Embedder>,
    dimensions: usize,
    warmup: OnceCell<()>,
    cached_failure: Mutex<Option<String>>,
}

impl EmbeddingService {
    pub fn new(provider: Arc<dyn Embedder>, dimensions: usize) -> Self {
        EmbeddingService {
            provider,
            dimensions,
            warmup: OnceCell::new(),
            cached_failure: Mutex::new(None),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed `text`, warming the provider up on first use. A cached failure
    /// short-circuits with the original message until `reset()`.
    pub async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        if let Some(message) = self.cached_failure.lock().clone() {
            return Err(EngineError::Embedding(format!(
                "provider unavailable (cached failure): {}",
                message
            )));
        }

        let warmup = self
            .warmup
            .get_or_try_init(|| async {
                let probe = self.provider.embed(WARMUP_TEXT).await?;
                self.check_dimensions(&probe)?;
                info!("[embedding] provider ready ({} dims)", probe.len());
                Ok::<(), EngineError>(())
            })
            .await;

        if let Err(e) = warmup {
            warn!("[embedding] warm-up failed, caching failure: {}", e);
            *self.cached_failure.lock() = Some(e.to_string());
            return Err(e);
        }

        let vector = self.provider.embed(text).await?;
        self.check_dimensions(&vector)?;
        Ok(vector)
    }

    /// Clear a cached warm-up failure so the next call retries the probe.
    pub fn reset(&self) {
        *self.cached_failure.lock() = None;
    }

    fn check_dimensions(&self, vector: &[f32]) -> EngineResult<()> {
        if vector.len() != self.dimensions {
            return Err(EngineError::Embedding(format!(
                "provider returned {} dimensions, expected {}",
                vector.len(),
                self.dimensions
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HTTP provider (Ollama + OpenAI-compatible)
// ═══════════════════════════════════════════════════════════════════════════

pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        HttpEmbedder {
            client: Client::builder()
                .connect_timeout(std::time::Duration::from_secs(10))
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    /// Ollama API: POST /api/embed { model, input } → { embeddings: [[f32…]] }
    async fn embed_ollama(&self, text: &str) -> EngineResult<Vec<f32>> {
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(EngineError::embedding)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Embedding(format!("embed {} — {}", status, body)));
        }

        let v: Value = resp.json().await.map_err(EngineError::embedding)?;
        if let Some(first) = v["embeddings"].as_array().and_then(|e| e.first()).and_then(|e| e.as_array()) {
            let vec: Vec<f32> = first.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect();
            if !vec.is_empty() {
                return Ok(vec);
            }
        }
        // Some servers return the singular field even on /api/embed.
        if let Some(embedding) = v["embedding"].as_array() {
            let vec: Vec<f32> = embedding.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect();
            if !vec.is_empty() {
                return Ok(vec);
            }
        }
        Err(EngineError::Embedding("no embedding array in response".into()))
    }

    /// OpenAI-compatible fallback: POST /v1/embeddings { model, input }
    async fn embed_openai(&self, text: &str) -> EngineResult<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(EngineError::embedding)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Embedding(format!("embed {} — {}", status, body)));
        }

        let v: Value = resp.json().await.map_err(EngineError::embedding)?;
        let embedding = v["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| EngineError::Embedding("no data[0].embedding array in response".into()))?;
        let vec: Vec<f32> = embedding.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect();
        if vec.is_empty() {
            return Err(EngineError::Embedding("empty embedding vector".into()));
        }
        Ok(vec)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        match self.embed_ollama(text).await {
            Ok(vec) => Ok(vec),
            Err(ollama_err) => match self.embed_openai(text).await {
                Ok(vec) => Ok(vec),
                Err(openai_err) => Err(EngineError::Embedding(format!(
                    "embedding failed. Ollama: {} | OpenAI: {}",
                    ollama_err, openai_err
                ))),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Test doubles
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedder: identical text always maps to the identical
    /// unit vector, and nearby hashes land far apart, which is enough for
    /// ordering assertions.
    pub struct MockEmbedder {
        pub dimensions: usize,
        pub calls: AtomicUsize,
    }

    impl MockEmbedder {
        pub fn new(dimensions: usize) -> Arc<Self> {
            Arc::new(MockEmbedder { dimensions, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl Embedder for MockEmbedder {
        async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            let mut seed = hasher.finish();
            let mut vector: Vec<f32> = (0..self.dimensions)
                .map(|_| {
                    seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    ((seed >> 33) as f32 / u32::MAX as f32) - 0.5
                })
                .collect();
            let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 1e-8 {
                for x in &mut vector {
                    *x /= norm;
                }
            }
            Ok(vector)
        }
    }

    /// Always fails; used to drive compensation paths.
    pub struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> EngineResult<Vec<f32>> {
            Err(EngineError::Embedding("provider offline".into()))
        }
    }
}
