//! # Vector Keep
//!
//! A classification-aware vector store engine with durable background jobs.
//!
//! Vector Keep owns a directory of vector stores. Documents are split into
//! classification-tagged chunks, embedded in batches through a pluggable
//! provider, and served back via classification-filtered similarity queries.
//! Long-running builds are tracked as durable, cancellable background jobs.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────────┐   ┌───────────────────────┐
//! │  Files    │──▶│ SemanticChunk │──▶│   VectorStoreEngine   │
//! │ txt/pdf/  │   │ + classifier  │   │ batch embed → index   │
//! │ docx      │   └───────────────┘   │ + metadata.json       │
//! └───────────┘                       └──────┬─────────▲──────┘
//!                                            │         │
//!                              ┌─────────────┤         │
//!                              ▼             ▼         │
//!                        ┌──────────┐  ┌──────────┐    │
//!                        │JobTracker│  │  query   │────┘
//!                        │ <id>.json│  │ filtered │
//!                        └──────────┘  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vkeep init                                  # create directories
//! vkeep create reports ./docs                 # build a store
//! vkeep query <store-id> "supply routes" \
//!     --classifications UNCLASSIFIED          # filtered search
//! vkeep jobs list                             # watch long builds
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`classification`] | Security classification normalization |
//! | [`chunker`] | Classification-aware semantic chunking |
//! | [`jobs`] | Durable background-job tracking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Flat on-disk vector index |
//! | [`store`] | Store lifecycle engine (create/update/query/delete) |
//! | [`worker`] | Bounded worker pool for job-driven operations |
//! | [`extract`] | Text extraction (plain, PDF, DOCX) |
//! | [`ingest`] | File-to-store ingestion pipeline |
//! | [`search`] | Query/stores/delete command wrappers |

pub mod chunker;
pub mod classification;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod jobs;
pub mod models;
pub mod progress;
pub mod search;
pub mod store;
pub mod worker;
