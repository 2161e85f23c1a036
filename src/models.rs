//! Core data models used throughout strata.
//!
//! These types represent the blocks, hierarchy units, chunk nodes, and
//! retrieval results that flow through the ingestion and query pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical content type of a block or chunk node.
///
/// Parser tags map onto a wider set of block-type names (figure, caption,
/// footnote, ...); everything outside the four structural categories folds
/// into `Other` for level and importance assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Header,
    Paragraph,
    Table,
    ListItem,
    Other,
}

impl ContentType {
    /// Fixed importance heuristic per content type.
    pub fn importance_score(self) -> f32 {
        match self {
            ContentType::Header => 0.9,
            ContentType::Table => 0.8,
            ContentType::Paragraph => 0.7,
            ContentType::ListItem => 0.6,
            ContentType::Other => 0.5,
        }
    }

    /// Semantic hierarchy level: 0 is the most structural, 3 the least.
    pub fn hierarchical_level(self) -> u8 {
        match self {
            ContentType::Header => 0,
            ContentType::Paragraph | ContentType::Table => 1,
            ContentType::ListItem => 2,
            ContentType::Other => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Header => "header",
            ContentType::Paragraph => "paragraph",
            ContentType::Table => "table",
            ContentType::ListItem => "list_item",
            ContentType::Other => "other",
        }
    }
}

/// One unit of parsed source content, as produced by a document parser.
///
/// Immutable after creation; owned by the ingestion run that created it.
#[derive(Debug, Clone)]
pub struct Block {
    /// Raw text content (for layout parsers, the joined sentences).
    pub content: String,
    /// Block-type name derived from the source tag via the fixed mapping
    /// table (`header`, `paragraph`, `table`, `list_item`, `figure`, ...,
    /// or `text` for anything unrecognized).
    pub block_type: String,
    /// Stable ordering key within the document.
    pub block_index: usize,
    /// 1-based page number; 1 when the source has no page information.
    pub page_number: u32,
    /// Source-parser provenance (tag, nesting level, bounding box,
    /// constituent sentences).
    pub metadata: Map<String, Value>,
}

/// A leveled document unit emitted by the hierarchy builder: one block with
/// its assigned semantic level, importance, and document back-reference.
#[derive(Debug, Clone)]
pub struct DocumentUnit {
    pub text: String,
    pub content_type: ContentType,
    pub hierarchical_level: u8,
    pub importance_score: f32,
    pub page_number: u32,
    pub block_index: usize,
    /// Owning document id; also stamped into metadata as `ref_doc_id` and
    /// used for cascade deletion.
    pub ref_doc_id: String,
    /// Full parser-provenance metadata, carried for storage-time filtering.
    pub metadata: Map<String, Value>,
}

/// One node in the hierarchical, multi-granularity split of a document.
///
/// Created during the chunking stage, persisted to the vector index and
/// the metadata store, and never mutated afterwards except for the
/// relationship metadata attached during the same ingestion pass.
#[derive(Debug, Clone)]
pub struct ChunkNode {
    /// Internal node id (UUID); the stable external id
    /// `{document_id}::chunk_{seq}::{internal_id}` is stamped by the
    /// pipeline after the tree is complete.
    pub id: String,
    pub text: String,
    pub content_type: ContentType,
    /// Semantic level inherited from the originating block (0-3).
    pub hierarchical_level: u8,
    /// Size-based split level: index into the configured chunk sizes.
    /// Distinct from `hierarchical_level`; the two systems coexist.
    pub split_level: usize,
    pub importance_score: f32,
    pub page_number: u32,
    pub document_id: String,
    /// Node at `split_level - 1` this node was split from; `None` at the
    /// top split level.
    pub parent_id: Option<String>,
    /// Nodes at `split_level + 1` produced by splitting this node's text;
    /// empty at the deepest level.
    pub child_ids: Vec<String>,
    pub metadata: Map<String, Value>,
}

/// A candidate answer-context item produced per query. Ephemeral.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    /// Relevance score reported by the vector index.
    pub score: f32,
    /// Rerank score; equals `score` when no distinct reranker is applied.
    pub rerank_score: f32,
    /// Authoritative content looked up from the document store.
    pub content: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub filename: String,
    pub file_type: Option<String>,
    pub page_number: Option<u32>,
}

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of a conversation session. Append-only within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata; assistant turns carry sources, confidence, and
    /// reasoning here.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }
}

/// Document row as held by the persistence collaborator.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: String,
    pub filename: String,
    pub file_type: Option<String>,
    pub status: String,
    pub created_at: i64,
}

/// Stored chunk as held by the persistence collaborator, ordered by
/// `chunk_index` within a document.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub content: String,
    pub chunk_index: usize,
    pub metadata: Map<String, Value>,
}

/// Chunk payload shape sent to the status sink on the final `completed`
/// report and persisted through the document store.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkPayload {
    pub content: String,
    pub chunk_index: usize,
    pub document_id: String,
    pub embedding_id: String,
    pub metadata: Map<String, Value>,
}
