//! Flat on-disk vector index.
//!
//! A store's index is two files: `vectors.bin` (a small header followed by
//! little-endian f32 vector data) and `chunks.json` (the docstore — one
//! [`Chunk`] per vector, in insertion order). Vectors are unit-normalized on
//! insert so Euclidean distance lies in `[0, 2]` and converts cleanly to a
//! relevance score. Search is an exhaustive scan with an inline metadata
//! predicate, so classification filtering happens during the search rather
//! than shrinking an already-truncated result page.
//!
//! Writes are temp-then-rename; [`FlatIndex::save`] never leaves a reader
//! looking at a half-written file.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::embedding::{blob_to_vec, l2_distance, l2_normalize, vec_to_blob};
use crate::models::{Chunk, ChunkMetadata};

pub const VECTORS_FILE: &str = "vectors.bin";
pub const CHUNKS_FILE: &str = "chunks.json";

const MAGIC: &[u8; 4] = b"VKIX";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

pub struct FlatIndex {
    dimension: usize,
    /// Row-major unit vectors, `dimension` floats per entry.
    vectors: Vec<f32>,
    entries: Vec<Chunk>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        FlatIndex {
            dimension,
            vectors: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, i: usize) -> &Chunk {
        &self.entries[i]
    }

    /// Append a batch of embedded chunks. Vectors are normalized here;
    /// a dimension mismatch rejects the whole batch.
    pub fn add(&mut self, vectors: Vec<Vec<f32>>, chunks: Vec<Chunk>) -> Result<()> {
        if vectors.len() != chunks.len() {
            bail!(
                "Vector/chunk count mismatch: {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }
        for vector in &vectors {
            if vector.len() != self.dimension {
                bail!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    vector.len()
                );
            }
        }
        for mut vector in vectors {
            l2_normalize(&mut vector);
            self.vectors.extend_from_slice(&vector);
        }
        self.entries.extend(chunks);
        Ok(())
    }

    /// Nearest-neighbor scan: returns up to `top_k` `(entry_index, distance)`
    /// pairs, closest first, considering only entries whose metadata passes
    /// `filter`.
    pub fn search<F>(&self, query: &[f32], top_k: usize, filter: F) -> Vec<(usize, f32)>
    where
        F: Fn(&ChunkMetadata) -> bool,
    {
        if query.len() != self.dimension || top_k == 0 {
            return Vec::new();
        }
        let mut normalized = query.to_vec();
        l2_normalize(&mut normalized);

        let mut hits: Vec<(usize, f32)> = Vec::new();
        for (i, chunk) in self.entries.iter().enumerate() {
            if !filter(&chunk.metadata) {
                continue;
            }
            let row = &self.vectors[i * self.dimension..(i + 1) * self.dimension];
            hits.push((i, l2_distance(&normalized, row)));
        }
        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        hits
    }

    /// Persist both index files into `dir` (temp-then-rename each).
    pub fn save(&self, dir: &Path) -> Result<()> {
        let mut blob = Vec::with_capacity(HEADER_LEN + self.vectors.len() * 4);
        blob.extend_from_slice(MAGIC);
        blob.extend_from_slice(&VERSION.to_le_bytes());
        blob.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        blob.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        blob.extend_from_slice(&vec_to_blob(&self.vectors));

        let vectors_path = dir.join(VECTORS_FILE);
        let vectors_tmp = dir.join(format!("{}.tmp", VECTORS_FILE));
        std::fs::write(&vectors_tmp, &blob)
            .with_context(|| format!("Failed to write {}", vectors_tmp.display()))?;
        std::fs::rename(&vectors_tmp, &vectors_path)
            .with_context(|| format!("Failed to commit {}", vectors_path.display()))?;

        let chunks_path = dir.join(CHUNKS_FILE);
        let chunks_tmp = dir.join(format!("{}.tmp", CHUNKS_FILE));
        let json = serde_json::to_string(&self.entries)?;
        std::fs::write(&chunks_tmp, json)
            .with_context(|| format!("Failed to write {}", chunks_tmp.display()))?;
        std::fs::rename(&chunks_tmp, &chunks_path)
            .with_context(|| format!("Failed to commit {}", chunks_path.display()))?;

        Ok(())
    }

    /// Read just the header of an index in `dir`: `(dimension, count)`.
    /// Cheap enough for store listings.
    pub fn read_header(dir: &Path) -> Result<(usize, usize)> {
        let vectors_path = dir.join(VECTORS_FILE);
        let mut header = [0u8; HEADER_LEN];
        let mut file = std::fs::File::open(&vectors_path)
            .with_context(|| format!("Failed to open {}", vectors_path.display()))?;
        use std::io::Read;
        file.read_exact(&mut header)
            .with_context(|| format!("Failed to read header of {}", vectors_path.display()))?;
        if &header[0..4] != MAGIC {
            bail!("{} is not a vector index file", vectors_path.display());
        }
        let dimension = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
        let count = u32::from_le_bytes(header[12..16].try_into().unwrap()) as usize;
        Ok((dimension, count))
    }

    /// Load an index from `dir`. Any structural problem (bad magic, size
    /// mismatch, unparseable docstore) is an error — the caller maps it to
    /// its "store unreadable" condition.
    pub fn load(dir: &Path) -> Result<Self> {
        let vectors_path = dir.join(VECTORS_FILE);
        let blob = std::fs::read(&vectors_path)
            .with_context(|| format!("Failed to read {}", vectors_path.display()))?;
        if blob.len() < HEADER_LEN || &blob[0..4] != MAGIC {
            bail!("{} is not a vector index file", vectors_path.display());
        }
        let version = u32::from_le_bytes(blob[4..8].try_into().unwrap());
        if version != VERSION {
            bail!("Unsupported index version {}", version);
        }
        let dimension = u32::from_le_bytes(blob[8..12].try_into().unwrap()) as usize;
        let count = u32::from_le_bytes(blob[12..16].try_into().unwrap()) as usize;

        let expected = HEADER_LEN + count * dimension * 4;
        if blob.len() != expected {
            bail!(
                "Index size mismatch in {}: expected {} bytes, found {}",
                vectors_path.display(),
                expected,
                blob.len()
            );
        }
        let vectors = blob_to_vec(&blob[HEADER_LEN..]);

        let chunks_path = dir.join(CHUNKS_FILE);
        let json = std::fs::read_to_string(&chunks_path)
            .with_context(|| format!("Failed to read {}", chunks_path.display()))?;
        let entries: Vec<Chunk> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse {}", chunks_path.display()))?;

        if entries.len() != count {
            bail!(
                "Docstore/index mismatch: {} chunks for {} vectors",
                entries.len(),
                count
            );
        }

        Ok(FlatIndex {
            dimension,
            vectors,
            entries,
        })
    }
}
