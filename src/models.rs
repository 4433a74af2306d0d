//! Core data models used throughout Vector Keep.
//!
//! These types represent the durable job records, store metadata, and
//! classified chunks that flow through the ingestion and retrieval pipeline.
//! Chunk metadata is a typed record with an explicit merge rule (chunk-specific
//! fields win over file-level fields) rather than an open-ended map.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a long-running background operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states never transition again and freeze the record.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!(
                "unknown job status '{}'; expected pending, processing, paused, completed, failed, or cancelled",
                other
            )),
        }
    }
}

/// Durable record of one long-running operation.
///
/// Stored as `<jobs_dir>/<id>.json`. Mutated only through the tracker so the
/// invariants hold: `processed_items` never decreases while the job is live,
/// exactly one transition enters a terminal state, and `completed_at` is set
/// iff the status is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub operation_type: String,
    pub status: JobStatus,
    pub total_items: u64,
    pub processed_items: u64,
    pub progress_percentage: f64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

/// Authoritative metadata record for one vector store.
///
/// Lives at `<base_dir>/<id>/metadata.json` next to the index files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<FileInfo>,
}

/// A file accepted into a store. Created once, never mutated afterwards
/// except for classification normalization; removed only by a store-wide
/// metadata rewrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub document_id: String,
    pub filename: String,
    pub original_filename: String,
    pub security_classification: String,
    pub staging_path: PathBuf,
    pub size_bytes: u64,
    pub added_at: DateTime<Utc>,
}

/// File-level context handed to the chunker for one document.
#[derive(Debug, Clone)]
pub struct DocumentMetadata {
    pub document_id: String,
    pub original_filename: String,
    pub security_classification: String,
    pub page: Option<u32>,
}

/// Typed per-chunk metadata embedded in the store's docstore.
///
/// `chunk_classification` is always present and normalized; it defaults to
/// the owning document's classification when no in-text marking is found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub original_filename: String,
    pub source_classification: String,
    pub chunk_classification: String,
    pub semantic_block_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_chunk_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_reason: Option<String>,
    #[serde(default)]
    pub placeholder: bool,
}

impl ChunkMetadata {
    /// Merge document-level metadata with chunk-specific fields.
    /// Chunk-specific keys win on conflict.
    pub fn merge(
        doc: &DocumentMetadata,
        chunk_classification: String,
        semantic_block_index: usize,
        sub_chunk_index: Option<usize>,
        split_reason: Option<String>,
    ) -> Self {
        ChunkMetadata {
            document_id: doc.document_id.clone(),
            original_filename: doc.original_filename.clone(),
            source_classification: doc.security_classification.clone(),
            chunk_classification,
            semantic_block_index,
            sub_chunk_index,
            page: doc.page,
            split_reason,
            placeholder: false,
        }
    }
}

/// A retrievable unit of text. Belongs to exactly one store and one file
/// (via `document_id`); never shared across stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Metadata attached to a query result: chunk-specific fields overlaid on
/// the owning file's record so neither side is lost.
#[derive(Debug, Clone, Serialize)]
pub struct ResultMetadata {
    pub document_id: String,
    pub original_filename: String,
    pub filename: Option<String>,
    pub staging_path: Option<PathBuf>,
    pub size_bytes: Option<u64>,
    pub added_at: Option<DateTime<Utc>>,
    pub security_classification: Option<String>,
    pub chunk_classification: String,
    pub semantic_block_index: usize,
    pub sub_chunk_index: Option<usize>,
    pub page: Option<u32>,
}

impl ResultMetadata {
    /// Join a chunk against its file record. File-level fields are `None`
    /// when the document id has no surviving `FileInfo` entry.
    pub fn enrich(chunk: &ChunkMetadata, file: Option<&FileInfo>) -> Self {
        ResultMetadata {
            document_id: chunk.document_id.clone(),
            original_filename: chunk.original_filename.clone(),
            filename: file.map(|f| f.filename.clone()),
            staging_path: file.map(|f| f.staging_path.clone()),
            size_bytes: file.map(|f| f.size_bytes),
            added_at: file.map(|f| f.added_at),
            security_classification: file.map(|f| f.security_classification.clone()),
            chunk_classification: chunk.chunk_classification.clone(),
            semantic_block_index: chunk.semantic_block_index,
            sub_chunk_index: chunk.sub_chunk_index,
            page: chunk.page,
        }
    }
}

/// A ranked result returned from a similarity query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub text: String,
    /// Relevance in `[0, 1]`, higher is better, regardless of the index metric.
    pub relevance: f32,
    pub metadata: ResultMetadata,
}
