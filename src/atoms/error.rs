// ── Mnema Atoms: Error Types ───────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by failure domain (storage, embedding,
//     retrieval, reflection, configuration).
//   • The `#[from]` attribute wires std/external error conversions for the
//     storage-kind causes automatically.
//   • Foreign-key violations on relation insert are remapped to the distinct
//     `EntityNotFound` variant before they reach a caller.
//   • No variant carries secret material (API keys) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite reported a problem in either store.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// JSON serialization of a row column failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A relation endpoint (or direct id lookup) referenced an entity that
    /// does not exist.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// A caller handed a store an id that is not a 26-character Crockford
    /// base32 ULID.
    #[error("Invalid memory id: {0}")]
    InvalidId(String),

    /// A caller-supplied field violates a data-model constraint (length
    /// bounds and the like).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The embedding provider failed to load, was unreachable, or produced
    /// a vector of the wrong dimension.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Language-model provider HTTP or API-level failure.
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Scoring / merge pipeline failure during recall. Reserved: the normal
    /// recall path degrades instead of raising.
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Insight synthesis pipeline failure. Reserved: reflection logs and
    /// returns empty instead of raising.
    #[error("Reflection error: {0}")]
    Reflection(String),

    /// Engine configuration is invalid or inconsistent at startup.
    #[error("Configuration error: {0}")]
    Config(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a provider error with name and message.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }

    /// Create an embedding error from any displayable cause.
    pub fn embedding(message: impl std::fmt::Display) -> Self {
        Self::Embedding(message.to_string())
    }
}

/// Remap SQLite foreign-key violations to `EntityNotFound`; pass everything
/// else through as a storage error. Used by the relation insert path.
pub fn map_fk_violation(err: rusqlite::Error, context: &str) -> EngineError {
    const SQLITE_CONSTRAINT_FOREIGNKEY: i32 = 787;
    if let rusqlite::Error::SqliteFailure(code, ref message) = err {
        let fk = code.extended_code == SQLITE_CONSTRAINT_FOREIGNKEY
            || message
                .as_deref()
                .map(|m| m.contains("FOREIGN KEY"))
                .unwrap_or(false);
        if code.code == rusqlite::ErrorCode::ConstraintViolation && fk {
            return EngineError::EntityNotFound(context.to_string());
        }
    }
    EngineError::Storage(err)
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations return this type.
pub type EngineResult<T> = Result<T, EngineError>;
