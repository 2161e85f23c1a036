//! Conversation-aware retrieval: query rewriting, vector search, content
//! enrichment, reranking, and budgeted context assembly.
//!
//! Retrieval degrades rather than fails: an embedding failure retries with
//! the original query and then returns an empty result set, and candidates
//! whose backing document or chunk has vanished are dropped with a logged
//! warning. A user-facing query never errors because retrieval did.

use std::sync::Arc;

use serde_json::Value;

use crate::embedding::Embedder;
use crate::error::PipelineError;
use crate::index::{QueryFilter, VectorIndex, VectorMatch};
use crate::models::{ConversationTurn, RetrievalResult, Role};
use crate::store::DocumentStore;

/// How many prior turns feed the query rewrite.
const REWRITE_HISTORY_TURNS: usize = 4;

/// Assembled, length-budgeted context for one query.
#[derive(Debug, Clone)]
pub struct QaContext {
    /// Included chunk contents joined with blank lines.
    pub context: String,
    /// Source attribution, mirroring exactly the chunks included.
    pub sources: Vec<RetrievalResult>,
    /// Total characters of included chunk content (separators excluded).
    pub context_length: usize,
    /// Candidate count before the budget was applied.
    pub total_results: usize,
}

impl QaContext {
    pub fn empty() -> Self {
        Self {
            context: String::new(),
            sources: Vec::new(),
            context_length: 0,
            total_results: 0,
        }
    }
}

pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn DocumentStore>,
    top_k: usize,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn DocumentStore>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            store,
            top_k,
        }
    }

    /// Append a bracketed conversation-context suffix built from the last
    /// four turns. Returns the query unchanged when there is no history.
    pub fn rewrite_query_with_history(query: &str, history: &[ConversationTurn]) -> String {
        if history.is_empty() {
            return query.to_string();
        }

        let recent: Vec<String> = history
            .iter()
            .rev()
            .take(REWRITE_HISTORY_TURNS)
            .rev()
            .map(|turn| match turn.role {
                Role::User => format!("Previous question: {}", turn.content),
                Role::Assistant => format!("Previous answer: {}", turn.content),
            })
            .collect();

        if recent.is_empty() {
            return query.to_string();
        }

        format!("{query} [Context from conversation: {}]", recent.join(" "))
    }

    /// Retrieve, enrich, and rerank candidates for a query with optional
    /// conversation history. Returns an empty list when no query embedding
    /// can be produced.
    pub async fn search_with_history(
        &self,
        query: &str,
        history: &[ConversationTurn],
        top_k: usize,
    ) -> Vec<RetrievalResult> {
        let rewritten = Self::rewrite_query_with_history(query, history);

        let query_vector = match self.embedder.embed(&rewritten).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "embedding rewritten query failed, retrying original");
                match self.embedder.embed(query).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::error!(error = %e, "embedding original query also failed");
                        return Vec::new();
                    }
                }
            }
        };

        // Over-fetch so reranking can discard weak matches.
        let matches = match self.index.query(&query_vector, top_k * 2, None).await {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "vector index query failed");
                return Vec::new();
            }
        };

        let enriched = self.enrich_matches(matches).await;
        rerank(enriched, top_k)
    }

    /// Direct metadata-filtered search (by document id and/or file type)
    /// without conversation context.
    pub async fn search_filtered(
        &self,
        query: &str,
        top_k: usize,
        document_id: Option<&str>,
        file_type: Option<&str>,
    ) -> Result<Vec<RetrievalResult>, PipelineError> {
        let query_vector = self.embedder.embed(query).await?;

        let filter = QueryFilter {
            document_id: document_id.map(str::to_string),
            file_type: file_type.map(str::to_string),
        };
        let matches = self
            .index
            .query(&query_vector, top_k * 2, Some(&filter))
            .await?;

        let enriched = self.enrich_matches(matches).await;
        Ok(rerank(enriched, top_k))
    }

    /// Assemble a length-budgeted context for Q&A: walk the reranked list
    /// in order and stop the instant the next chunk would exceed the
    /// budget. Chunks are never truncated.
    pub async fn get_context(
        &self,
        query: &str,
        history: &[ConversationTurn],
        max_context_length: usize,
    ) -> QaContext {
        let results = self.search_with_history(query, history, self.top_k).await;
        let total_results = results.len();

        let mut parts: Vec<&str> = Vec::new();
        let mut sources = Vec::new();
        let mut current_length = 0usize;

        for result in &results {
            if current_length + result.content.len() > max_context_length {
                tracing::debug!(
                    included = sources.len(),
                    "context budget reached, dropping remaining candidates"
                );
                break;
            }
            current_length += result.content.len();
            parts.push(&result.content);
            sources.push(result.clone());
        }

        QaContext {
            context: parts.join("\n\n"),
            sources,
            context_length: current_length,
            total_results,
        }
    }

    /// Substitute each candidate's authoritative content and source
    /// attributes from the document store. The vector index only stores
    /// attributes, not guaranteed-fresh text; unresolvable candidates are
    /// dropped, not fatal.
    async fn enrich_matches(&self, matches: Vec<VectorMatch>) -> Vec<RetrievalResult> {
        let mut enriched = Vec::with_capacity(matches.len());

        for m in matches {
            let Some(document_id) = m
                .metadata
                .get("document_id")
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                tracing::warn!(id = %m.id, "candidate carries no document_id, dropping");
                continue;
            };
            let chunk_index = m
                .metadata
                .get("chunk_index")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;

            let document = match self.store.get_document(&document_id).await {
                Ok(Some(doc)) => doc,
                Ok(None) => {
                    tracing::warn!(document_id, "document missing from store, dropping candidate");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(document_id, error = %e, "document lookup failed, dropping candidate");
                    continue;
                }
            };

            let chunks = match self.store.get_chunks(&document_id).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    tracing::warn!(document_id, error = %e, "chunk lookup failed, dropping candidate");
                    continue;
                }
            };

            let Some(chunk) = chunks.iter().find(|c| c.chunk_index == chunk_index) else {
                tracing::warn!(
                    document_id,
                    chunk_index,
                    "chunk missing from store, dropping candidate"
                );
                continue;
            };

            let page_number = m
                .metadata
                .get("page_number")
                .and_then(Value::as_u64)
                .map(|p| p as u32);

            enriched.push(RetrievalResult {
                chunk_id: m.id,
                score: m.score,
                rerank_score: m.score,
                content: chunk.content.clone(),
                document_id,
                chunk_index,
                filename: document.filename,
                file_type: document.file_type,
                page_number,
            });
        }

        enriched
    }
}

/// Score-identity rerank: carry the vector-index score forward, sort
/// descending with a stable tie-break on original rank, keep the top k.
fn rerank(mut results: Vec<RetrievalResult>, top_k: usize) -> Vec<RetrievalResult> {
    results.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(top_k);
    results
}
