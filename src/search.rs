//! Classification-filtered similarity search over one store.
//!
//! Thin command wrapper around [`VectorStoreEngine::query`]: embeds the query
//! text, applies the caller's allowed-classification set, and prints ranked
//! results. Lock contention with an in-progress update is retried briefly
//! with backoff before giving up.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::classification;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::StoreError;
use crate::jobs::JobTracker;
use crate::models::QueryResult;
use crate::store::{QueryInput, VectorStoreEngine};

const CONFLICT_RETRIES: u32 = 3;

#[allow(clippy::too_many_arguments)]
pub async fn run_search(
    config: &Config,
    store_id: &str,
    query: &str,
    top_k: Option<usize>,
    threshold: Option<f32>,
    classifications: Option<&str>,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let tracker = Arc::new(JobTracker::new(config.storage.jobs_dir.clone())?);
    let engine = VectorStoreEngine::new(
        config.storage.base_dir.clone(),
        tracker,
        &config.embedding,
    )?;
    let embedder = create_embedder(&config.embedding)?;

    let top_k = top_k.unwrap_or(config.query.top_k);
    let threshold = threshold.unwrap_or(config.query.score_threshold);

    // Normalize the caller's filter set so `u,secret` works as well as the
    // canonical forms. Absent means "no filtering".
    let allowed: Option<Vec<String>> = classifications.map(|list| {
        list.split(',')
            .filter(|c| !c.trim().is_empty())
            .map(|c| classification::normalize(Some(c)))
            .collect()
    });

    let mut attempt = 0u32;
    let results: Vec<QueryResult> = loop {
        let outcome = engine
            .query(
                store_id,
                QueryInput::Text(query.to_string()),
                embedder.as_ref(),
                top_k,
                threshold,
                allowed.as_deref(),
            )
            .await;
        match outcome {
            Ok(results) => break results,
            Err(e)
                if attempt < CONFLICT_RETRIES
                    && matches!(
                        e.downcast_ref::<StoreError>(),
                        Some(StoreError::ConcurrentMutationConflict(_))
                    ) =>
            {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(100u64 << attempt)).await;
            }
            Err(e) => return Err(e),
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] ({}) {}",
            i + 1,
            result.relevance,
            result.metadata.chunk_classification,
            result.metadata.original_filename
        );
        println!("   {}", snippet(&result.text, 160));
    }
    Ok(())
}

/// First `max` characters of a chunk, flattened to one line.
fn snippet(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}…", cut)
    }
}

/// Run the `delete` command. Deleting a missing store is not an error.
pub async fn run_delete(config: &Config, store_id: &str) -> Result<()> {
    let tracker = Arc::new(JobTracker::new(config.storage.jobs_dir.clone())?);
    let engine = VectorStoreEngine::new(
        config.storage.base_dir.clone(),
        tracker,
        &config.embedding,
    )?;

    let mut attempt = 0u32;
    loop {
        match engine.delete(store_id).await {
            Ok(true) => {
                println!("deleted {}", store_id);
                return Ok(());
            }
            Ok(false) => {
                println!("store {} not found (nothing to delete)", store_id);
                return Ok(());
            }
            Err(e)
                if attempt < CONFLICT_RETRIES
                    && matches!(
                        e.downcast_ref::<StoreError>(),
                        Some(StoreError::ConcurrentMutationConflict(_))
                    ) =>
            {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(100u64 << attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run the `stores` command: list every store under the base directory.
pub fn run_stores(config: &Config) -> Result<()> {
    let tracker = Arc::new(JobTracker::new(config.storage.jobs_dir.clone())?);
    let engine = VectorStoreEngine::new(
        config.storage.base_dir.clone(),
        tracker,
        &config.embedding,
    )?;

    let stores = engine.list()?;
    if stores.is_empty() {
        println!("No stores.");
        return Ok(());
    }
    for store in stores {
        if store.readable {
            println!(
                "{}  {}  files: {}  chunks: {}  updated: {}",
                store.id,
                store.name.as_deref().unwrap_or("?"),
                store.file_count,
                store.chunk_count.unwrap_or(0),
                store
                    .updated_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "?".to_string()),
            );
        } else {
            println!("{}  (unreadable)", store.id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_flattens_and_truncates() {
        assert_eq!(snippet("a  b\nc", 10), "a b c");
        let long = "word ".repeat(100);
        let s = snippet(&long, 20);
        assert_eq!(s.chars().count(), 21); // 20 + ellipsis
        assert!(s.ends_with('…'));
    }

    #[tokio::test]
    async fn test_empty_query_is_no_results() {
        // An all-whitespace query never touches the store or the embedder.
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config {
            storage: crate::config::StorageConfig {
                base_dir: tmp.path().join("stores"),
                jobs_dir: tmp.path().join("jobs"),
            },
            chunking: Default::default(),
            embedding: Default::default(),
            jobs: Default::default(),
            query: Default::default(),
        };
        run_search(&config, "whatever", "   ", None, None, None, false)
            .await
            .unwrap();
    }
}
