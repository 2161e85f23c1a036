//! # strata
//!
//! Hierarchical document ingestion, retrieval, and conversational Q&A over
//! a vector index.
//!
//! strata parses heterogeneous documents into typed blocks, builds a
//! leveled content hierarchy, recursively chunks it into a multi-level node
//! tree, embeds and stores the nodes, and later answers conversational
//! queries by rewriting them with dialogue context, retrieving and
//! reranking candidate chunks, and assembling a length-budgeted context
//! for an LLM.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────────┐   ┌───────────┐
//! │  Parser   │──▶│  Classify → Hierarchy →      │──▶│  SQLite    │
//! │ (layout)  │   │  Chunk → Embed → Store       │   │ store+vec │
//! └──────────┘   └──────────────┬───────────────┘   └─────┬─────┘
//!                               │ progress                │
//!                               ▼                         ▼
//!                        ┌────────────┐            ┌────────────┐
//!                        │ StatusSink  │            │ Retrieval  │
//!                        │ (reports)   │            │  + Q&A     │
//!                        └────────────┘            └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! strata init                          # create database
//! strata ingest doc-1 report.pdf       # parse, chunk, embed, store
//! strata ask "what does §3 require?"   # retrieve + answer
//! strata delete doc-1                  # cascade delete
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`blocks`] | Block classification and tag mapping |
//! | [`hierarchy`] | Leveled document-unit construction |
//! | [`chunker`] | Hierarchical multi-level chunking |
//! | [`metadata`] | Chunking-time and storage-time metadata filters |
//! | [`progress`] | Stage-weighted progress tracking and status reports |
//! | [`parser`] | Document parser collaborators |
//! | [`embedding`] | Embedding collaborator and vector utilities |
//! | [`index`] | Vector index collaborator |
//! | [`store`] | Document store collaborator |
//! | [`llm`] | LLM collaborator |
//! | [`pipeline`] | Ingestion and deletion orchestration |
//! | [`retrieval`] | Conversation-aware retrieval and context assembly |
//! | [`qa`] | Four-stage Q&A workflow |

pub mod blocks;
pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod hierarchy;
pub mod index;
pub mod llm;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod qa;
pub mod retrieval;
pub mod stats;
pub mod store;
