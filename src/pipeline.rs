//! Ingestion pipeline orchestration.
//!
//! Drives one document through `parsing → chunking → embedding → storage`
//! with stage-weighted progress reporting, and the single-stage deletion
//! path that removes a document's vectors and stored chunks.
//!
//! Transitions are strictly sequential and forward-only: a failure at any
//! stage aborts the remaining stages and reports `failed` with the error
//! message. There is no retry within a task — a document either fully
//! ingests or is marked failed. The one documented exception is the final
//! chunk persistence: a chunk-save failure after successful vector storage
//! is logged and swallowed, because the vectors and the completion payload
//! (which also carries the chunks) have already been delivered.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use crate::blocks;
use crate::chunker::HierarchicalChunker;
use crate::embedding::Embedder;
use crate::error::PipelineError;
use crate::hierarchy;
use crate::index::{VectorIndex, VectorPoint};
use crate::metadata;
use crate::models::{Block, ChunkNode, ChunkPayload, ContentType, DocumentRecord, DocumentUnit};
use crate::parser::DocumentParser;
use crate::progress::ProgressTracker;
use crate::store::DocumentStore;

pub struct IngestionPipeline {
    parser: Arc<dyn DocumentParser>,
    reader: Arc<dyn DocumentParser>,
    chunker: HierarchicalChunker,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn DocumentStore>,
    embed_batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(
        parser: Arc<dyn DocumentParser>,
        reader: Arc<dyn DocumentParser>,
        chunker: HierarchicalChunker,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn DocumentStore>,
        embed_batch_size: usize,
    ) -> Self {
        Self {
            parser,
            reader,
            chunker,
            embedder,
            index,
            store,
            embed_batch_size: embed_batch_size.max(1),
        }
    }

    /// Ingest one document. Returns the number of chunks produced.
    ///
    /// The final `completed` report carries the full chunk payload — the
    /// status channel doubles as the delivery channel for downstream
    /// consumers of the chunk set.
    pub async fn ingest(
        &self,
        document_id: &str,
        file_path: &Path,
        tracker: &ProgressTracker,
    ) -> Result<usize, PipelineError> {
        tracker.report_started().await;
        tracing::info!(document_id, path = %file_path.display(), "starting ingestion");

        match self.run_stages(document_id, file_path, tracker).await {
            Ok(payloads) => {
                let count = payloads.len();
                tracker.report_final(true, payloads, None).await;
                tracing::info!(document_id, chunks = count, "ingestion completed");
                Ok(count)
            }
            Err(e) => {
                tracing::error!(document_id, error = %e, "ingestion failed");
                tracker.report_final(false, Vec::new(), Some(e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        document_id: &str,
        file_path: &Path,
        tracker: &ProgressTracker,
    ) -> Result<Vec<ChunkPayload>, PipelineError> {
        let file_type = file_extension(file_path);
        let filename = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(document_id)
            .to_string();

        self.store
            .upsert_document(&DocumentRecord {
                id: document_id.to_string(),
                filename: filename.clone(),
                file_type: Some(file_type.clone()),
                status: "processing".to_string(),
                created_at: chrono::Utc::now().timestamp(),
            })
            .await?;

        // Stage 1: parsing.
        tracker.start_stage("parsing").await;
        tracker
            .update_stage_progress("Parsing document", 0, 1)
            .await;
        let (blocks, structured) = if self.parser.is_supported(file_path) {
            (self.parser.parse(file_path).await?, true)
        } else {
            (self.reader.parse(file_path).await?, false)
        };
        tracker
            .update_stage_progress(&format!("Parsed {} blocks", blocks.len()), 1, 1)
            .await;
        tracker.complete_stage("parsing").await;

        // Stage 2: chunking.
        tracker.start_stage("chunking").await;
        let units = if structured {
            hierarchy::build(blocks::classify(blocks), document_id)
        } else {
            flat_units(blocks, document_id)
        };
        let mut nodes = self.chunker.chunk_units(&units, Some(tracker)).await?;
        tracker.complete_stage("chunking").await;

        stamp_node_identities(&mut nodes, document_id, file_path, &file_type);

        // Stage 3: embedding.
        tracker.start_stage("embedding").await;
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(nodes.len());
        for batch in nodes.chunks(self.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|n| n.text.clone()).collect();
            let batch_vectors = self.embedder.embed_batch(&texts).await?;
            if batch_vectors.len() != batch.len() {
                return Err(PipelineError::Embedding(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    batch_vectors.len()
                )));
            }
            vectors.extend(batch_vectors);
            tracker
                .update_stage_progress(
                    &format!("Embedded {}/{} chunks", vectors.len(), nodes.len()),
                    vectors.len() as u64,
                    nodes.len() as u64,
                )
                .await;
        }
        tracker.complete_stage("embedding").await;

        // Stage 4: storage.
        tracker.start_stage("storage").await;
        let points: Vec<VectorPoint> = nodes
            .iter()
            .zip(vectors)
            .map(|(node, vector)| VectorPoint {
                id: node.id.clone(),
                vector,
                metadata: metadata::filter_for_storage(&node.metadata),
            })
            .collect();
        let total_points = points.len();
        self.index.upsert(points).await?;
        tracker
            .update_stage_progress(
                &format!("Stored {total_points} vectors"),
                total_points as u64,
                total_points as u64,
            )
            .await;
        tracker.complete_stage("storage").await;

        let payloads = chunk_payloads(&nodes, document_id);

        // Chunk persistence is non-fatal: the vectors are stored and the
        // completion report below carries the same payload.
        if let Err(e) = self.store.save_chunks(document_id, &payloads).await {
            tracing::error!(document_id, error = %e, "failed to persist chunks, continuing");
        }

        let _ = self
            .store
            .upsert_document(&DocumentRecord {
                id: document_id.to_string(),
                filename,
                file_type: Some(file_type),
                status: "completed".to_string(),
                created_at: chrono::Utc::now().timestamp(),
            })
            .await;

        Ok(payloads)
    }

    /// Delete a document's vectors and stored chunks. A single `deletion`
    /// stage carries the whole progress weight.
    pub async fn delete(
        &self,
        document_id: &str,
        tracker: &ProgressTracker,
    ) -> Result<u64, PipelineError> {
        tracker.report_started().await;
        tracing::info!(document_id, "starting deletion");

        let result = self.run_deletion(document_id, tracker).await;
        match result {
            Ok(deleted) => {
                tracker.report_final(true, Vec::new(), None).await;
                tracing::info!(document_id, deleted, "deletion completed");
                Ok(deleted)
            }
            Err(e) => {
                tracing::error!(document_id, error = %e, "deletion failed");
                tracker.report_final(false, Vec::new(), Some(e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn run_deletion(
        &self,
        document_id: &str,
        tracker: &ProgressTracker,
    ) -> Result<u64, PipelineError> {
        tracker.start_stage("deletion").await;
        tracker
            .update_stage_progress("Deleting document vectors", 0, 2)
            .await;

        let deleted = self.index.delete_by_document(document_id).await?;
        tracker
            .update_stage_progress(&format!("Deleted {deleted} vectors"), 1, 2)
            .await;

        self.store.delete_document(document_id).await?;
        tracker
            .update_stage_progress("Deleted stored chunks", 2, 2)
            .await;

        tracker.complete_stage("deletion").await;
        Ok(deleted)
    }
}

/// Units for the flat-reader path: no hierarchy to build, the content goes
/// straight to the chunker at the top level.
fn flat_units(blocks: Vec<Block>, document_id: &str) -> Vec<DocumentUnit> {
    blocks
        .into_iter()
        .map(|block| {
            let mut metadata = block.metadata.clone();
            metadata.insert("document_id".into(), json!(document_id));
            metadata.insert("content_type".into(), json!("unknown"));
            metadata.insert("block_type".into(), json!(block.block_type));
            metadata.insert("block_index".into(), json!(block.block_index));
            metadata.insert("page_number".into(), json!(block.page_number));
            metadata.insert("hierarchical_level".into(), json!(0));
            metadata.insert("ref_doc_id".into(), json!(document_id));

            DocumentUnit {
                text: block.content,
                content_type: ContentType::Other,
                hierarchical_level: 0,
                importance_score: ContentType::Other.importance_score(),
                page_number: block.page_number,
                block_index: block.block_index,
                ref_doc_id: document_id.to_string(),
                metadata,
            }
        })
        .collect()
}

/// Stamp the stable external node ids and per-chunk metadata after the
/// tree is complete: `{document_id}::chunk_{sequence}::{internal_id}`.
fn stamp_node_identities(
    nodes: &mut [ChunkNode],
    document_id: &str,
    file_path: &Path,
    file_type: &str,
) {
    let source_file = file_path.display().to_string();
    for (i, node) in nodes.iter_mut().enumerate() {
        node.id = format!("{}::chunk_{}::{}", document_id, i, node.id);
        node.metadata.insert("chunk_index".into(), json!(i));
        node.metadata
            .insert("document_id".into(), json!(document_id));
        node.metadata.insert("source_file".into(), json!(source_file));
        node.metadata.insert("file_type".into(), json!(file_type));
    }
}

/// Chunk payload for the completion report and the document store.
fn chunk_payloads(nodes: &[ChunkNode], document_id: &str) -> Vec<ChunkPayload> {
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let mut payload_metadata = metadata::filter_for_storage(&node.metadata);
            payload_metadata.insert("text_length".into(), json!(node.text.len()));
            payload_metadata.insert("split_level".into(), json!(node.split_level));
            if let Some(parent_id) = &node.parent_id {
                payload_metadata.insert("parent_id".into(), json!(parent_id));
            }

            ChunkPayload {
                content: node.text.clone(),
                chunk_index: i,
                document_id: document_id.to_string(),
                embedding_id: node.id.clone(),
                metadata: payload_metadata,
            }
        })
        .collect()
}

fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}
