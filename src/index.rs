//! Vector index collaborator.
//!
//! The index is a black box to the pipeline: it supports upsert, top-k
//! query with an optional metadata filter, and deletion by id or by owning
//! document. The bundled implementation keeps vectors in SQLite as
//! little-endian f32 BLOBs and scores candidates with cosine similarity in
//! Rust, which is plenty for local corpora and keeps the whole system
//! dependency-free of external index services.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::PipelineError;

/// One vector with its id and index-side metadata.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Map<String, Value>,
}

/// One query match, ranked by descending score.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Map<String, Value>,
}

/// Metadata filter for queries: all set fields must match.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub document_id: Option<String>,
    pub file_type: Option<String>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), PipelineError>;

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<VectorMatch>, PipelineError>;

    async fn delete_ids(&self, ids: &[String]) -> Result<u64, PipelineError>;

    /// Bulk-delete every vector owned by a document. Used by the deletion
    /// cascade.
    async fn delete_by_document(&self, document_id: &str) -> Result<u64, PipelineError>;
}

/// SQLite-backed vector index.
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), PipelineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PipelineError::Index(e.to_string()))?;

        for point in &points {
            let document_id = point
                .metadata
                .get("document_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let metadata_json = serde_json::to_string(&point.metadata)
                .map_err(|e| PipelineError::Index(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO vectors (id, document_id, embedding, metadata_json)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    document_id = excluded.document_id,
                    embedding = excluded.embedding,
                    metadata_json = excluded.metadata_json
                "#,
            )
            .bind(&point.id)
            .bind(&document_id)
            .bind(vec_to_blob(&point.vector))
            .bind(&metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| PipelineError::Index(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| PipelineError::Index(e.to_string()))?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<VectorMatch>, PipelineError> {
        // Document scoping happens in SQL; the remaining metadata filter and
        // similarity scoring happen in Rust over the candidate rows.
        let rows = match filter.and_then(|f| f.document_id.as_deref()) {
            Some(document_id) => sqlx::query(
                "SELECT id, embedding, metadata_json FROM vectors WHERE document_id = ? ORDER BY rowid",
            )
            .bind(document_id)
            .fetch_all(&self.pool)
            .await,
            None => {
                sqlx::query("SELECT id, embedding, metadata_json FROM vectors ORDER BY rowid")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| PipelineError::Index(e.to_string()))?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in &rows {
            let metadata_json: String = row.get("metadata_json");
            let metadata: Map<String, Value> =
                serde_json::from_str(&metadata_json).unwrap_or_default();

            if let Some(f) = filter {
                if let Some(file_type) = &f.file_type {
                    let value = metadata.get("file_type").and_then(Value::as_str);
                    if value != Some(file_type.as_str()) {
                        continue;
                    }
                }
            }

            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(vector, &blob_to_vec(&blob));
            matches.push(VectorMatch {
                id: row.get("id"),
                score,
                metadata,
            });
        }

        // Stable sort: ties keep insertion (rowid) order.
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);

        Ok(matches)
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<u64, PipelineError> {
        let mut deleted = 0u64;
        for id in ids {
            let result = sqlx::query("DELETE FROM vectors WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| PipelineError::Index(e.to_string()))?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<u64, PipelineError> {
        let result = sqlx::query("DELETE FROM vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::Index(e.to_string()))?;
        Ok(result.rows_affected())
    }
}
