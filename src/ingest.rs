//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for `vkeep create` and `vkeep add`: collect
//! files → extract text → chunk with classification detection → register a
//! job → embed and persist on the worker pool, while the CLI watches the
//! durable job record for progress. Files that yield no qualifying blocks
//! are reported as skipped, never fatal.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::task::JoinHandle;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunker;
use crate::classification;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::StoreError;
use crate::extract;
use crate::jobs::JobTracker;
use crate::models::{Chunk, DocumentMetadata, FileInfo, Job, JobStatus};
use crate::progress::{ProgressEvent, ProgressMode, ProgressReporter};
use crate::store::VectorStoreEngine;
use crate::worker::WorkerPool;

/// How many times a conflicting update is retried before giving up.
const CONFLICT_RETRIES: u32 = 5;

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Classification applied to every accepted file; `None` warns and
    /// defaults each file to UNCLASSIFIED.
    pub classification: Option<String>,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
}

/// One file ready for embedding: its store record plus its chunks.
pub struct PreparedFile {
    pub info: FileInfo,
    pub chunks: Vec<Chunk>,
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Bad glob: {}", pattern))?);
    }
    Ok(Some(builder.build()?))
}

/// Expand the CLI's path arguments into a sorted, deduplicated file list.
/// Directories are walked recursively; globs filter walked files only —
/// explicitly named files are always taken.
pub fn collect_files(paths: &[PathBuf], opts: &IngestOptions) -> Result<Vec<PathBuf>> {
    let include = build_globset(&opts.include_globs)?;
    let exclude = build_globset(&opts.exclude_globs)?;

    let mut out = Vec::new();
    for path in paths {
        if path.is_file() {
            out.push(path.clone());
        } else if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(false) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let p = entry.path();
                if !extract::is_supported(p) {
                    continue;
                }
                if let Some(set) = &include {
                    if !set.is_match(p) {
                        continue;
                    }
                }
                if let Some(set) = &exclude {
                    if set.is_match(p) {
                        continue;
                    }
                }
                out.push(p.to_path_buf());
            }
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    out.sort();
    out.dedup();
    Ok(out)
}

/// Extract, classify, and chunk one file. Returns `None` when the file is
/// skipped (unsupported content or zero qualifying blocks); a staged copy of
/// accepted files is kept under `staged_dir`.
pub fn prepare_file(
    path: &Path,
    opts: &IngestOptions,
    config: &Config,
    staged_dir: &Path,
    reporter: &dyn ProgressReporter,
) -> Result<Option<PreparedFile>> {
    reporter.report(ProgressEvent::Preparing {
        file: path.display().to_string(),
    });

    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = match extract::extract_text(path, &bytes) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Warning: skipping {}: {}", path.display(), e);
            return Ok(None);
        }
    };

    let document_id = Uuid::new_v4().to_string();
    let original_filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let security_classification = classification::normalize(opts.classification.as_deref());

    let doc = DocumentMetadata {
        document_id: document_id.clone(),
        original_filename: original_filename.clone(),
        security_classification: security_classification.clone(),
        page: None,
    };
    let chunks = chunker::split(&text, &doc, &config.chunking.chunker_options());
    if chunks.is_empty() {
        eprintln!(
            "Warning: no qualifying blocks in {}; file skipped",
            path.display()
        );
        return Ok(None);
    }

    let filename = format!("{}_{}", document_id, original_filename);
    let staging_path = staged_dir.join(&filename);
    std::fs::create_dir_all(staged_dir)
        .with_context(|| format!("Failed to create {}", staged_dir.display()))?;
    std::fs::copy(path, &staging_path)
        .with_context(|| format!("Failed to stage {}", path.display()))?;

    let info = FileInfo {
        document_id,
        filename,
        original_filename,
        security_classification,
        staging_path,
        size_bytes: bytes.len() as u64,
        added_at: Utc::now(),
    };
    Ok(Some(PreparedFile { info, chunks }))
}

fn prepare_all(
    paths: &[PathBuf],
    opts: &IngestOptions,
    config: &Config,
    reporter: &dyn ProgressReporter,
) -> Result<(Vec<FileInfo>, Vec<Chunk>, usize)> {
    let staged_dir = config.storage.base_dir.join(".staged");
    let files = collect_files(paths, opts)?;

    let mut file_infos = Vec::new();
    let mut chunks = Vec::new();
    let mut skipped = 0usize;
    for path in &files {
        match prepare_file(path, opts, config, &staged_dir, reporter)? {
            Some(prepared) => {
                file_infos.push(prepared.info);
                chunks.extend(prepared.chunks);
            }
            None => skipped += 1,
        }
    }
    Ok((file_infos, chunks, skipped))
}

/// Poll the durable job record while the worker task runs, surfacing
/// embedding progress; returns the terminal record.
async fn watch_job(
    tracker: &JobTracker,
    job_id: &str,
    handle: JoinHandle<()>,
    reporter: &dyn ProgressReporter,
) -> Result<Job> {
    loop {
        if handle.is_finished() {
            break;
        }
        if let Ok(job) = tracker.get(job_id) {
            if job.status == JobStatus::Processing && job.total_items > 0 {
                reporter.report(ProgressEvent::Embedding {
                    n: job.processed_items,
                    total: job.total_items,
                });
            }
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
    // Aborted (cancelled) tasks resolve with a JoinError; the record is
    // already terminal either way.
    let _ = handle.await;
    tracker.get(job_id)
}

/// Run the `create` command: build a new store from zero or more files.
pub async fn run_create(
    config: &Config,
    name: &str,
    description: &str,
    paths: &[PathBuf],
    opts: &IngestOptions,
    mode: ProgressMode,
) -> Result<()> {
    let reporter = mode.reporter();
    let tracker = Arc::new(JobTracker::new(config.storage.jobs_dir.clone())?);
    let engine = VectorStoreEngine::new(
        config.storage.base_dir.clone(),
        tracker.clone(),
        &config.embedding,
    )?;
    let embedder = create_embedder(&config.embedding)?;
    let pool = WorkerPool::new(config.jobs.workers);

    let (file_infos, chunks, skipped) = prepare_all(paths, opts, config, reporter.as_ref())?;
    let file_count = file_infos.len();
    let chunk_count = chunks.len();

    let details = BTreeMap::from([
        ("store_name".to_string(), name.to_string()),
        ("files".to_string(), file_count.to_string()),
    ]);
    let job = tracker.register("create_store", chunk_count as u64, details)?;

    let task_engine = engine.clone();
    let task_embedder = embedder.clone();
    let task_name = name.to_string();
    let task_description = description.to_string();
    let job_id = job.id.clone();
    let chunk_size = config.chunking.fallback_chunk_size;
    let chunk_overlap = config.chunking.fallback_overlap;

    let handle = pool.spawn_job(tracker.clone(), job.id.clone(), async move {
        let store_id = task_engine
            .create(
                &task_name,
                &task_description,
                chunks,
                task_embedder.as_ref(),
                file_infos,
                chunk_size,
                chunk_overlap,
                Some(&job_id),
            )
            .await?;
        Ok(Some(serde_json::json!({ "store_id": store_id })))
    });

    let record = watch_job(&tracker, &job.id, handle, reporter.as_ref()).await?;
    match record.status {
        JobStatus::Completed => {
            let store_id = record
                .result
                .as_ref()
                .and_then(|r| r.get("store_id"))
                .and_then(|v| v.as_str())
                .unwrap_or("?")
                .to_string();
            println!("create {}", name);
            println!("  store id: {}", store_id);
            println!("  files accepted: {} (skipped: {})", file_count, skipped);
            println!("  chunks embedded: {}", chunk_count);
            println!("  job: {}", record.id);
            println!("ok");
            Ok(())
        }
        JobStatus::Cancelled => bail!("create was cancelled (job {})", record.id),
        _ => bail!(
            "create failed (job {}): {}",
            record.id,
            record.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Run the `add` command: append files to an existing store. Lock conflicts
/// with a concurrent mutation are retried with backoff.
pub async fn run_add(
    config: &Config,
    store_id: &str,
    paths: &[PathBuf],
    opts: &IngestOptions,
    mode: ProgressMode,
) -> Result<()> {
    let reporter = mode.reporter();
    let tracker = Arc::new(JobTracker::new(config.storage.jobs_dir.clone())?);
    let engine = VectorStoreEngine::new(
        config.storage.base_dir.clone(),
        tracker.clone(),
        &config.embedding,
    )?;
    let embedder = create_embedder(&config.embedding)?;
    let pool = WorkerPool::new(config.jobs.workers);

    // Surface "store not found" before doing any extraction work.
    engine.get(store_id)?;

    let (file_infos, chunks, skipped) = prepare_all(paths, opts, config, reporter.as_ref())?;
    let file_count = file_infos.len();
    let chunk_count = chunks.len();

    let details = BTreeMap::from([
        ("store_id".to_string(), store_id.to_string()),
        ("files".to_string(), file_count.to_string()),
    ]);
    let job = tracker.register("update_store", chunk_count as u64, details)?;

    let task_engine = engine.clone();
    let task_embedder = embedder.clone();
    let task_store_id = store_id.to_string();
    let job_id = job.id.clone();

    let handle = pool.spawn_job(tracker.clone(), job.id.clone(), async move {
        let mut attempt = 0u32;
        loop {
            let result = task_engine
                .update(
                    &task_store_id,
                    chunks.clone(),
                    task_embedder.as_ref(),
                    file_infos.clone(),
                    Some(&job_id),
                )
                .await;
            match result {
                Err(e)
                    if attempt < CONFLICT_RETRIES
                        && matches!(
                            e.downcast_ref::<StoreError>(),
                            Some(StoreError::ConcurrentMutationConflict(_))
                        ) =>
                {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(100u64 << attempt.min(6))).await;
                }
                Err(e) => return Err(e),
                Ok(_) => {
                    return Ok(Some(serde_json::json!({ "store_id": task_store_id })));
                }
            }
        }
    });

    let record = watch_job(&tracker, &job.id, handle, reporter.as_ref()).await?;
    match record.status {
        JobStatus::Completed => {
            println!("add {}", store_id);
            println!("  files accepted: {} (skipped: {})", file_count, skipped);
            println!("  chunks embedded: {}", chunk_count);
            println!("  job: {}", record.id);
            println!("ok");
            Ok(())
        }
        JobStatus::Cancelled => bail!("add was cancelled (job {})", record.id),
        _ => bail!(
            "add failed (job {}): {}",
            record.id,
            record.error.as_deref().unwrap_or("unknown error")
        ),
    }
}
