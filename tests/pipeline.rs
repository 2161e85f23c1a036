//! End-to-end pipeline tests: ingestion, deletion cascade, retrieval, and
//! failure semantics against an in-memory SQLite store and index with stub
//! parser/embedder collaborators.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map};

use strata::chunker::HierarchicalChunker;
use strata::db;
use strata::embedding::Embedder;
use strata::error::PipelineError;
use strata::index::{QueryFilter, SqliteVectorIndex, VectorIndex};
use strata::migrate;
use strata::models::{Block, ChunkPayload, ConversationTurn, DocumentRecord, StoredChunk};
use strata::parser::DocumentParser;
use strata::pipeline::IngestionPipeline;
use strata::progress::{Operation, ProgressTracker, StatusReport, StatusSink};
use strata::retrieval::RetrievalEngine;
use strata::store::{DocumentStore, SqliteStore};

// ============ Stub collaborators ============

/// Parser returning a fixed block list: one header and two paragraphs on a
/// single page.
struct StubParser;

fn block(content: &str, tag: &str, block_type: &str, index: usize) -> Block {
    let mut metadata = Map::new();
    metadata.insert("layout_tag".into(), json!(tag));
    metadata.insert("layout_level".into(), json!(0));
    Block {
        content: content.to_string(),
        block_type: block_type.to_string(),
        block_index: index,
        page_number: 1,
        metadata,
    }
}

#[async_trait]
impl DocumentParser for StubParser {
    fn is_supported(&self, _path: &Path) -> bool {
        true
    }

    async fn parse(&self, _path: &Path) -> Result<Vec<Block>, PipelineError> {
        Ok(vec![
            block("Intro", "header", "header", 0),
            block(
                "The first paragraph describes the system in detail.",
                "para",
                "paragraph",
                1,
            ),
            block(
                "The second paragraph covers the remaining behavior.",
                "para",
                "paragraph",
                2,
            ),
        ])
    }
}

/// Parser that always fails, for the failure-path tests.
struct BrokenParser;

#[async_trait]
impl DocumentParser for BrokenParser {
    fn is_supported(&self, _path: &Path) -> bool {
        true
    }

    async fn parse(&self, _path: &Path) -> Result<Vec<Block>, PipelineError> {
        Err(PipelineError::Parse("layout service exploded".to_string()))
    }
}

/// Deterministic embedder: every text maps to the same unit vector, which
/// keeps retrieval trivially satisfiable.
struct StubEmbedder;

#[async_trait]
impl Embedder for StubEmbedder {
    fn model_name(&self) -> &str {
        "stub"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

/// Captures every status report for assertions.
struct RecordingSink {
    reports: Mutex<Vec<StatusReport>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
        }
    }

    fn statuses(&self) -> Vec<String> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.status.clone())
            .collect()
    }

    fn last(&self) -> StatusReport {
        self.reports.lock().unwrap().last().unwrap().clone()
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn send(&self, report: &StatusReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}

/// Store whose `save_chunks` always fails, for the documented non-fatal
/// chunk-save behavior.
struct FailingSaveStore;

#[async_trait]
impl DocumentStore for FailingSaveStore {
    async fn upsert_document(&self, _document: &DocumentRecord) -> Result<(), PipelineError> {
        Ok(())
    }
    async fn get_document(
        &self,
        _document_id: &str,
    ) -> Result<Option<DocumentRecord>, PipelineError> {
        Ok(None)
    }
    async fn get_chunks(&self, _document_id: &str) -> Result<Vec<StoredChunk>, PipelineError> {
        Ok(Vec::new())
    }
    async fn save_chunks(
        &self,
        _document_id: &str,
        _chunks: &[ChunkPayload],
    ) -> Result<(), PipelineError> {
        Err(PipelineError::Store("chunk table unavailable".to_string()))
    }
    async fn delete_document(&self, _document_id: &str) -> Result<(), PipelineError> {
        Ok(())
    }
}

// ============ Harness ============

struct Harness {
    pipeline: IngestionPipeline,
    store: Arc<SqliteStore>,
    index: Arc<SqliteVectorIndex>,
    sink: Arc<RecordingSink>,
}

async fn harness_with(
    parser: Arc<dyn DocumentParser>,
    store_override: Option<Arc<dyn DocumentStore>>,
) -> Harness {
    let pool = db::connect_in_memory().await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let index = Arc::new(SqliteVectorIndex::new(pool));
    let sink = Arc::new(RecordingSink::new());

    let pipeline_store: Arc<dyn DocumentStore> = match store_override {
        Some(s) => s,
        None => store.clone(),
    };

    let pipeline = IngestionPipeline::new(
        parser.clone(),
        parser,
        HierarchicalChunker::new(vec![4096, 1024], 100).unwrap(),
        Arc::new(StubEmbedder),
        index.clone(),
        pipeline_store,
        16,
    );

    Harness {
        pipeline,
        store,
        index,
        sink,
    }
}

async fn harness() -> Harness {
    harness_with(Arc::new(StubParser), None).await
}

fn tracker(h: &Harness, operation: Operation) -> ProgressTracker {
    ProgressTracker::new(h.sink.clone(), "doc-1", "task-1", operation)
}

// ============ Tests ============

#[tokio::test]
async fn ingest_produces_chunks_vectors_and_reports() {
    let h = harness().await;
    let t = tracker(&h, Operation::Ingestion);

    let count = h
        .pipeline
        .ingest("doc-1", Path::new("report.pdf"), &t)
        .await
        .unwrap();

    // One header and two paragraphs, each small enough for a single node
    // per level, two levels configured.
    assert!(count >= 3, "expected at least 3 chunks, got {count}");

    let chunks = h.store.get_chunks("doc-1").await.unwrap();
    assert_eq!(chunks.len(), count);
    let indices: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
    assert_eq!(indices, (0..count).collect::<Vec<_>>());

    let matches = h.index.query(&[1.0, 0.0], 100, None).await.unwrap();
    assert_eq!(matches.len(), count);
    for m in &matches {
        assert!(m.id.starts_with("doc-1::chunk_"), "unexpected id {}", m.id);
        assert_eq!(m.metadata["document_id"], "doc-1");
        // Index metadata went through the storage filter.
        assert!(!m.metadata.contains_key("layout_sentences"));
    }

    let statuses = h.sink.statuses();
    assert_eq!(statuses.first().map(String::as_str), Some("processing"));
    assert_eq!(statuses.last().map(String::as_str), Some("completed"));

    let last = h.sink.last();
    assert_eq!(last.chunks.len(), count);
    assert_eq!(last.progress, 100);
    assert!(last.error.is_none());
}

#[tokio::test]
async fn ingest_reports_all_four_stages_in_order() {
    let h = harness().await;
    let t = tracker(&h, Operation::Ingestion);
    h.pipeline
        .ingest("doc-1", Path::new("report.pdf"), &t)
        .await
        .unwrap();

    let reports = h.sink.reports.lock().unwrap().clone();
    let stage_starts: Vec<String> = reports
        .iter()
        .filter(|r| r.message.starts_with("Started "))
        .map(|r| r.stage.clone())
        .collect();
    assert_eq!(stage_starts, vec!["parsing", "chunking", "embedding", "storage"]);

    // Weighted total progress never decreases.
    let mut last = 0.0;
    for r in &reports {
        assert!(r.total_progress >= last - 1e-9);
        last = r.total_progress;
    }
}

#[tokio::test]
async fn deletion_cascades_across_index_and_store() {
    let h = harness().await;
    let t = tracker(&h, Operation::Ingestion);
    h.pipeline
        .ingest("doc-1", Path::new("report.pdf"), &t)
        .await
        .unwrap();

    let t = tracker(&h, Operation::Deletion);
    let deleted = h.pipeline.delete("doc-1", &t).await.unwrap();
    assert!(deleted > 0);

    assert!(h.store.get_chunks("doc-1").await.unwrap().is_empty());
    assert!(h.store.get_document("doc-1").await.unwrap().is_none());

    let filter = QueryFilter {
        document_id: Some("doc-1".to_string()),
        ..Default::default()
    };
    let matches = h.index.query(&[1.0, 0.0], 100, Some(&filter)).await.unwrap();
    assert!(matches.is_empty());

    assert_eq!(h.sink.last().status, "deletion_completed");
}

#[tokio::test]
async fn parse_failure_fails_the_task_and_reports_error() {
    let h = harness_with(Arc::new(BrokenParser), None).await;
    let t = tracker(&h, Operation::Ingestion);

    let err = h
        .pipeline
        .ingest("doc-1", Path::new("report.pdf"), &t)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Parse(_)));

    let last = h.sink.last();
    assert_eq!(last.status, "failed");
    assert!(last.error.as_deref().unwrap_or("").contains("exploded"));

    // Nothing reached the index.
    let matches = h.index.query(&[1.0, 0.0], 100, None).await.unwrap();
    assert!(matches.is_empty());
}

#[tokio::test]
async fn chunk_save_failure_does_not_fail_the_task() {
    let h = harness_with(Arc::new(StubParser), Some(Arc::new(FailingSaveStore))).await;
    let t = tracker(&h, Operation::Ingestion);

    let count = h
        .pipeline
        .ingest("doc-1", Path::new("report.pdf"), &t)
        .await
        .unwrap();
    assert!(count > 0);
    assert_eq!(h.sink.last().status, "completed");
}

#[tokio::test]
async fn ingested_content_is_retrievable_within_budget() {
    let h = harness().await;
    let t = tracker(&h, Operation::Ingestion);
    h.pipeline
        .ingest("doc-1", Path::new("report.pdf"), &t)
        .await
        .unwrap();

    let engine = RetrievalEngine::new(
        Arc::new(StubEmbedder),
        h.index.clone(),
        h.store.clone(),
        8,
    );

    let context = engine.get_context("what does the system do?", &[], 4000).await;
    assert!(!context.sources.is_empty());
    assert!(context.context.contains("paragraph"));
    assert!(context.context_length <= 4000);
    for source in &context.sources {
        assert_eq!(source.document_id, "doc-1");
        assert_eq!(source.filename, "report.pdf");
    }
}

#[tokio::test]
async fn conversation_history_survives_round_trip() {
    let h = harness().await;

    let mut turn = ConversationTurn::user("what is ingestion?");
    turn.timestamp = chrono::Utc::now();
    h.store.append_turn("session-1", &turn).await.unwrap();

    let mut answer = ConversationTurn::assistant("ingestion parses and stores documents");
    answer
        .metadata
        .insert("confidence".into(), json!(0.87));
    h.store.append_turn("session-1", &answer).await.unwrap();

    let turns = h.store.recent_turns("session-1", 10).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].content, "what is ingestion?");
    assert_eq!(turns[1].metadata["confidence"], json!(0.87));
}
