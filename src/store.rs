//! Vector store lifecycle engine.
//!
//! Owns the directory of stores (`<base_dir>/<store_id>/`), orchestrates
//! batched embedding and insertion, and answers classification-filtered
//! similarity queries with metadata enrichment. Long operations report
//! per-batch progress through the [`JobTracker`] and honor cancellation at
//! batch boundaries.
//!
//! # Consistency
//!
//! Creation is all-or-nothing: the store is assembled under a hidden staging
//! directory and renamed into place only after every batch has embedded
//! successfully, so a mid-batch failure leaves no partial store. Updates hold
//! the store's write lock for the whole load→append→save and rename the
//! metadata file last.
//!
//! # Locking
//!
//! The on-disk index+metadata pair for one store id is the unit of mutual
//! exclusion. Mutations take the write side of a per-store `RwLock`, queries
//! the read side, both without waiting — contention surfaces as
//! [`StoreError::ConcurrentMutationConflict`] and callers retry with backoff.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::classification;
use crate::config::EmbeddingConfig;
use crate::embedding::{discover_dimension, Embedder};
use crate::error::StoreError;
use crate::index::FlatIndex;
use crate::jobs::JobTracker;
use crate::models::{
    Chunk, ChunkMetadata, FileInfo, JobStatus, QueryResult, ResultMetadata, StoreMetadata,
};

pub const METADATA_FILE: &str = "metadata.json";

/// Raw distances on unit vectors lie in `[0, 2]`; relevance is
/// `1 - distance / MAX_DISTANCE`, in `[0, 1]`, higher is better.
const MAX_DISTANCE: f32 = 2.0;

/// A text query to be embedded, or a precomputed vector.
pub enum QueryInput {
    Text(String),
    Vector(Vec<f32>),
}

/// One row of `vkeep stores` output.
#[derive(Debug, Clone)]
pub struct StoreSummary {
    pub id: String,
    pub name: Option<String>,
    pub file_count: usize,
    pub chunk_count: Option<usize>,
    pub updated_at: Option<DateTime<Utc>>,
    pub readable: bool,
}

/// Registry of per-store locks. Lock entries are created on first touch and
/// shared across engine clones.
#[derive(Clone, Default)]
struct StoreLocks {
    inner: Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>,
}

impl StoreLocks {
    fn lock_for(&self, store_id: &str) -> Arc<RwLock<()>> {
        self.inner
            .lock()
            .unwrap()
            .entry(store_id.to_string())
            .or_default()
            .clone()
    }
}

#[derive(Clone)]
pub struct VectorStoreEngine {
    base_dir: PathBuf,
    tracker: Arc<JobTracker>,
    locks: StoreLocks,
    batch_size: usize,
    batch_retries: u32,
}

impl VectorStoreEngine {
    pub fn new(
        base_dir: PathBuf,
        tracker: Arc<JobTracker>,
        embedding: &EmbeddingConfig,
    ) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)
            .with_context(|| format!("Failed to create store dir: {}", base_dir.display()))?;
        Ok(VectorStoreEngine {
            base_dir,
            tracker,
            locks: StoreLocks::default(),
            batch_size: embedding.batch_size,
            batch_retries: embedding.batch_retries,
        })
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    fn store_dir(&self, store_id: &str) -> Result<PathBuf> {
        // Store ids are UUIDs; anything else cannot name a directory here.
        if store_id.is_empty()
            || !store_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(StoreError::StoreNotFound(store_id.to_string()).into());
        }
        Ok(self.base_dir.join(store_id))
    }

    /// Create a new store and return its id.
    ///
    /// An empty `chunks` list still creates a durable, queryable store: one
    /// synthetic placeholder vector bootstraps the index so "zero-document
    /// store" is distinct from "store does not exist". The staging directory
    /// is renamed into place only after every batch succeeds.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        name: &str,
        description: &str,
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        file_infos: Vec<FileInfo>,
        chunk_size: usize,
        chunk_overlap: usize,
        job_id: Option<&str>,
    ) -> Result<String> {
        let store_id = Uuid::new_v4().to_string();
        let staging = self.base_dir.join(format!(".staging-{}", store_id));
        std::fs::create_dir_all(&staging)
            .with_context(|| format!("Failed to create staging dir: {}", staging.display()))?;

        let built = self
            .build_store(
                &store_id,
                &staging,
                name,
                description,
                chunks,
                embedder,
                file_infos,
                chunk_size,
                chunk_overlap,
                job_id,
            )
            .await;

        if let Err(e) = built {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        let final_dir = self.store_dir(&store_id)?;
        std::fs::rename(&staging, &final_dir)
            .with_context(|| format!("Failed to commit store {}", store_id))?;
        Ok(store_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn build_store(
        &self,
        store_id: &str,
        staging: &PathBuf,
        name: &str,
        description: &str,
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        file_infos: Vec<FileInfo>,
        chunk_size: usize,
        chunk_overlap: usize,
        job_id: Option<&str>,
    ) -> Result<()> {
        let dimension = discover_dimension(embedder)
            .await
            .map_err(|e| StoreError::EmbeddingFailure(format!("{:#}", e)))?;

        let chunks = if chunks.is_empty() {
            vec![placeholder_chunk()]
        } else {
            chunks
        };

        let mut index = FlatIndex::new(dimension);
        self.embed_into(&mut index, &chunks, embedder, job_id).await?;

        let now = Utc::now();
        let metadata = StoreMetadata {
            id: store_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            embedding_model: embedder.model_name().to_string(),
            embedding_dimension: dimension,
            chunk_size,
            chunk_overlap,
            created_at: now,
            updated_at: now,
            files: file_infos,
        };

        index.save(staging)?;
        write_metadata(staging, &metadata)?;
        Ok(())
    }

    /// Append chunks and file records to an existing store.
    ///
    /// Holds the store's write lock for the duration. An empty `new_chunks`
    /// with only metadata changes is a successful no-op on the index.
    pub async fn update(
        &self,
        store_id: &str,
        new_chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        file_infos: Vec<FileInfo>,
        job_id: Option<&str>,
    ) -> Result<bool> {
        let lock = self.locks.lock_for(store_id);
        let _guard = lock
            .try_write_owned()
            .map_err(|_| StoreError::ConcurrentMutationConflict(store_id.to_string()))?;

        let dir = self.store_dir(store_id)?;
        if !dir.is_dir() {
            return Err(StoreError::StoreNotFound(store_id.to_string()).into());
        }
        let mut metadata = read_metadata(&dir, store_id)?;
        let mut index = FlatIndex::load(&dir).map_err(|e| StoreError::StoreUnreadable {
            id: store_id.to_string(),
            reason: format!("{:#}", e),
        })?;

        if metadata.embedding_model != embedder.model_name() {
            eprintln!(
                "Warning: store {} was built with model '{}' but update uses '{}'",
                store_id,
                metadata.embedding_model,
                embedder.model_name()
            );
        }

        if !new_chunks.is_empty() {
            self.embed_into(&mut index, &new_chunks, embedder, job_id)
                .await?;
        }

        metadata.files.extend(file_infos);
        metadata.updated_at = Utc::now();

        index.save(&dir)?;
        // Metadata is committed last: readers see the old snapshot or the new
        // one, never new files pointing at missing vectors.
        write_metadata(&dir, &metadata)?;
        Ok(true)
    }

    /// Embed `chunks` in batches into `index`, reporting progress after each
    /// batch and checking for cancellation before each one.
    async fn embed_into(
        &self,
        index: &mut FlatIndex,
        chunks: &[Chunk],
        embedder: &dyn Embedder,
        job_id: Option<&str>,
    ) -> Result<()> {
        // A lone placeholder bootstraps an empty store; it is not a work item.
        let countable = !(chunks.len() == 1 && chunks[0].metadata.placeholder);
        let mut processed = 0u64;
        for batch in chunks.chunks(self.batch_size) {
            if let Some(jid) = job_id {
                if self.tracker.is_cancelled(jid) {
                    anyhow::bail!("job {} cancelled", jid);
                }
            }

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embed_batch(embedder, &texts).await?;
            index.add(vectors, batch.to_vec())?;

            processed += batch.len() as u64;
            if let Some(jid) = job_id.filter(|_| countable) {
                self.tracker.update_progress(
                    jid,
                    processed,
                    Some(JobStatus::Processing),
                    None,
                    Some("embedding"),
                );
            }
            // Yield between batches so progress updates are observable.
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    /// Embed one batch with bounded retry. A transient failure retries the
    /// batch, not the whole operation.
    async fn embed_batch(
        &self,
        embedder: &dyn Embedder,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let mut last_err = None;
        for attempt in 0..=self.batch_retries {
            if attempt > 0 {
                eprintln!(
                    "Warning: embedding batch failed, retrying ({}/{})",
                    attempt, self.batch_retries
                );
                tokio::time::sleep(Duration::from_millis(250u64 << (attempt - 1).min(4))).await;
            }
            match embedder.embed_documents(texts).await {
                Ok(vectors) if vectors.len() == texts.len() => return Ok(vectors),
                Ok(vectors) => {
                    last_err = Some(anyhow::anyhow!(
                        "embedder returned {} vectors for {} texts",
                        vectors.len(),
                        texts.len()
                    ));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(StoreError::EmbeddingFailure(format!(
            "{:#}",
            last_err.unwrap_or_else(|| anyhow::anyhow!("unknown embedding error"))
        ))
        .into())
    }

    /// Run a similarity query against one store.
    ///
    /// The classification predicate is applied during the index scan so a
    /// filtered query still fills `top_k` from the allowed population.
    /// Embedder failures degrade to an empty result list with a warning —
    /// queries are read-only and best served as "no results".
    pub async fn query(
        &self,
        store_id: &str,
        input: QueryInput,
        embedder: &dyn Embedder,
        top_k: usize,
        score_threshold: f32,
        allowed_classifications: Option<&[String]>,
    ) -> Result<Vec<QueryResult>> {
        let lock = self.locks.lock_for(store_id);
        let _guard = lock
            .try_read_owned()
            .map_err(|_| StoreError::ConcurrentMutationConflict(store_id.to_string()))?;

        let dir = self.store_dir(store_id)?;
        if !dir.is_dir() {
            return Err(StoreError::StoreNotFound(store_id.to_string()).into());
        }
        let metadata = read_metadata(&dir, store_id)?;
        let index = FlatIndex::load(&dir).map_err(|e| StoreError::StoreUnreadable {
            id: store_id.to_string(),
            reason: format!("{:#}", e),
        })?;

        let query_vec = match input {
            QueryInput::Vector(v) => v,
            QueryInput::Text(text) => match embedder.embed_query(&text).await {
                Ok(v) => v,
                Err(e) => {
                    eprintln!("Warning: query embedding failed: {:#}", e);
                    return Ok(Vec::new());
                }
            },
        };
        if query_vec.len() != index.dimension() {
            eprintln!(
                "Warning: query vector has dimension {} but store {} expects {}",
                query_vec.len(),
                store_id,
                index.dimension()
            );
            return Ok(Vec::new());
        }

        // Absent or empty set means "no filtering".
        let allowed: Option<Vec<String>> = allowed_classifications
            .filter(|a| !a.is_empty())
            .map(|a| a.iter().map(|c| c.to_uppercase()).collect());

        let hits = index.search(&query_vec, top_k, |m| {
            if m.placeholder {
                return false;
            }
            match &allowed {
                None => true,
                Some(set) => set
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(&m.chunk_classification)),
            }
        });

        let file_map: HashMap<&str, &FileInfo> = metadata
            .files
            .iter()
            .map(|f| (f.document_id.as_str(), f))
            .collect();

        let results = hits
            .into_iter()
            .filter_map(|(i, distance)| {
                let relevance = (1.0 - distance / MAX_DISTANCE).clamp(0.0, 1.0);
                if relevance < score_threshold {
                    return None;
                }
                let chunk = index.entry(i);
                let file = file_map.get(chunk.metadata.document_id.as_str()).copied();
                Some(QueryResult {
                    text: chunk.text.clone(),
                    relevance,
                    metadata: ResultMetadata::enrich(&chunk.metadata, file),
                })
            })
            .collect();

        Ok(results)
    }

    /// Remove a store. Idempotent: `false` when it never existed.
    pub async fn delete(&self, store_id: &str) -> Result<bool> {
        let lock = self.locks.lock_for(store_id);
        let _guard = lock
            .try_write_owned()
            .map_err(|_| StoreError::ConcurrentMutationConflict(store_id.to_string()))?;

        let dir = match self.store_dir(store_id) {
            Ok(dir) => dir,
            Err(_) => return Ok(false),
        };
        if !dir.is_dir() {
            return Ok(false);
        }

        // Staged source copies live outside the store directory; drop them too.
        if let Ok(metadata) = read_metadata(&dir, store_id) {
            for file in &metadata.files {
                let _ = std::fs::remove_file(&file.staging_path);
            }
        }

        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to remove store {}", store_id))?;
        Ok(true)
    }

    /// Read one store's authoritative metadata record.
    pub fn get(&self, store_id: &str) -> Result<StoreMetadata> {
        let dir = self.store_dir(store_id)?;
        if !dir.is_dir() {
            return Err(StoreError::StoreNotFound(store_id.to_string()).into());
        }
        read_metadata(&dir, store_id)
    }

    /// Enumerate stores under the base directory. Corrupt stores show up as
    /// unreadable rather than disappearing from the listing.
    pub fn list(&self) -> Result<Vec<StoreSummary>> {
        let mut summaries = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)
            .with_context(|| format!("Failed to read {}", self.base_dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            let Some(id) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // Hidden entries are staging directories and staged file copies.
            if !path.is_dir() || id.starts_with('.') {
                continue;
            }

            let metadata = read_metadata(&path, id).ok();
            let chunk_count = FlatIndex::read_header(&path).ok().map(|(_, count)| count);
            let readable = metadata.is_some() && chunk_count.is_some();
            summaries.push(StoreSummary {
                id: id.to_string(),
                name: metadata.as_ref().map(|m| m.name.clone()),
                file_count: metadata.as_ref().map(|m| m.files.len()).unwrap_or(0),
                chunk_count,
                updated_at: metadata.as_ref().map(|m| m.updated_at),
                readable,
            });
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

/// The one chunk allowed to exist without a backing `FileInfo`: it bootstraps
/// an empty store's index and is invisible to queries.
fn placeholder_chunk() -> Chunk {
    Chunk {
        text: "empty store placeholder".to_string(),
        metadata: ChunkMetadata {
            document_id: "placeholder".to_string(),
            original_filename: String::new(),
            source_classification: classification::UNCLASSIFIED.to_string(),
            chunk_classification: classification::UNCLASSIFIED.to_string(),
            semantic_block_index: 0,
            sub_chunk_index: None,
            page: None,
            split_reason: None,
            placeholder: true,
        },
    }
}

fn write_metadata(dir: &std::path::Path, metadata: &StoreMetadata) -> Result<()> {
    let path = dir.join(METADATA_FILE);
    let tmp = dir.join(format!("{}.tmp", METADATA_FILE));
    let json = serde_json::to_string_pretty(metadata)?;
    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, &path).with_context(|| format!("Failed to commit {}", path.display()))?;
    Ok(())
}

fn read_metadata(dir: &std::path::Path, store_id: &str) -> Result<StoreMetadata> {
    let path = dir.join(METADATA_FILE);
    let content = std::fs::read_to_string(&path).map_err(|e| StoreError::StoreUnreadable {
        id: store_id.to_string(),
        reason: format!("{}: {}", path.display(), e),
    })?;
    let metadata = serde_json::from_str(&content).map_err(|e| StoreError::StoreUnreadable {
        id: store_id.to_string(),
        reason: format!("{}: {}", path.display(), e),
    })?;
    Ok(metadata)
}
