//! Typed failure conditions for the store and job layers.
//!
//! The orchestration code propagates `anyhow::Result`, but these variants are
//! preserved in the chain so callers can distinguish "store not found" from
//! "store present but corrupt", and retry on lock contention.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No directory for this store id exists under the base directory.
    #[error("vector store '{0}' not found")]
    StoreNotFound(String),

    /// The store directory exists but its index or metadata cannot be read.
    #[error("vector store '{id}' is unreadable: {reason}")]
    StoreUnreadable { id: String, reason: String },

    /// No durable record for this job id.
    #[error("job '{0}' not found")]
    JobNotFound(String),

    /// The embedding backend failed after retries. Transient per batch; the
    /// batch may be retried without restarting the whole operation.
    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    /// An update or query raced a mutation holding the store lock.
    /// Callers should retry with backoff.
    #[error("store '{0}' is locked by a concurrent mutation")]
    ConcurrentMutationConflict(String),
}
