//! Document store collaborator.
//!
//! The persistence layer holds the authoritative chunk content and the
//! document rows the retrieval path enriches results from. The bundled
//! implementation is SQLite via sqlx; it also keeps conversation turns for
//! the `ask` command's session history.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{ChunkPayload, ConversationTurn, DocumentRecord, Role, StoredChunk};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert_document(&self, document: &DocumentRecord) -> Result<(), PipelineError>;

    async fn get_document(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentRecord>, PipelineError>;

    /// Full chunk list of a document, ordered by chunk index.
    async fn get_chunks(&self, document_id: &str) -> Result<Vec<StoredChunk>, PipelineError>;

    /// Replace a document's chunks in one transaction.
    async fn save_chunks(
        &self,
        document_id: &str,
        chunks: &[ChunkPayload],
    ) -> Result<(), PipelineError>;

    /// Remove the document row and its chunks.
    async fn delete_document(&self, document_id: &str) -> Result<(), PipelineError>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one conversation turn to a session.
    pub async fn append_turn(
        &self,
        session_id: &str,
        turn: &ConversationTurn,
    ) -> Result<(), PipelineError> {
        let metadata_json = serde_json::to_string(&turn.metadata)
            .map_err(|e| PipelineError::Store(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO conversation_turns (id, session_id, role, content, created_at, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session_id)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(turn.timestamp.timestamp_millis())
        .bind(&metadata_json)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Store(e.to_string()))?;

        Ok(())
    }

    /// Most recent turns of a session in chronological order.
    pub async fn recent_turns(
        &self,
        session_id: &str,
        count: usize,
    ) -> Result<Vec<ConversationTurn>, PipelineError> {
        let rows = sqlx::query(
            r#"
            SELECT role, content, created_at, metadata_json
            FROM conversation_turns
            WHERE session_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::Store(e.to_string()))?;

        let mut turns: Vec<ConversationTurn> = rows
            .iter()
            .map(|row| {
                let role: String = row.get("role");
                let metadata_json: String = row.get("metadata_json");
                let created_at: i64 = row.get("created_at");
                ConversationTurn {
                    role: if role == "assistant" {
                        Role::Assistant
                    } else {
                        Role::User
                    },
                    content: row.get("content"),
                    timestamp: chrono::DateTime::from_timestamp_millis(created_at)
                        .unwrap_or_else(chrono::Utc::now),
                    metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
                }
            })
            .collect();

        turns.reverse();
        Ok(turns)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn upsert_document(&self, document: &DocumentRecord) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, file_type, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                filename = excluded.filename,
                file_type = excluded.file_type,
                status = excluded.status
            "#,
        )
        .bind(&document.id)
        .bind(&document.filename)
        .bind(&document.file_type)
        .bind(&document.status)
        .bind(document.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Store(e.to_string()))?;

        Ok(())
    }

    async fn get_document(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentRecord>, PipelineError> {
        let row = sqlx::query(
            "SELECT id, filename, file_type, status, created_at FROM documents WHERE id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::Store(e.to_string()))?;

        Ok(row.map(|row| DocumentRecord {
            id: row.get("id"),
            filename: row.get("filename"),
            file_type: row.get("file_type"),
            status: row.get("status"),
            created_at: row.get("created_at"),
        }))
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<StoredChunk>, PipelineError> {
        let rows = sqlx::query(
            r#"
            SELECT content, chunk_index, metadata_json
            FROM chunks
            WHERE document_id = ?
            ORDER BY chunk_index
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::Store(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| {
                let metadata_json: String = row.get("metadata_json");
                let chunk_index: i64 = row.get("chunk_index");
                StoredChunk {
                    content: row.get("content"),
                    chunk_index: chunk_index as usize,
                    metadata: serde_json::from_str::<Map<String, Value>>(&metadata_json)
                        .unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn save_chunks(
        &self,
        document_id: &str,
        chunks: &[ChunkPayload],
    ) -> Result<(), PipelineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;

        for chunk in chunks {
            let metadata_json = serde_json::to_string(&chunk.metadata)
                .map_err(|e| PipelineError::Store(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, content, hash, metadata_json)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.embedding_id)
            .bind(document_id)
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.content)
            .bind(hash_text(&chunk.content))
            .bind(&metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), PipelineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;

        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;
        Ok(())
    }
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use serde_json::json;

    async fn store() -> SqliteStore {
        let pool = db::connect_in_memory().await.unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn document(id: &str) -> DocumentRecord {
        DocumentRecord {
            id: id.to_string(),
            filename: format!("{id}.pdf"),
            file_type: Some(".pdf".to_string()),
            status: "pending".to_string(),
            created_at: 1_700_000_000,
        }
    }

    fn payload(document_id: &str, index: usize, content: &str) -> ChunkPayload {
        let mut metadata = Map::new();
        metadata.insert("content_type".into(), json!("paragraph"));
        ChunkPayload {
            content: content.to_string(),
            chunk_index: index,
            document_id: document_id.to_string(),
            embedding_id: format!("{document_id}::chunk_{index}"),
            metadata,
        }
    }

    #[tokio::test]
    async fn chunks_round_trip_in_index_order() {
        let store = store().await;
        store.upsert_document(&document("doc-1")).await.unwrap();
        store
            .save_chunks(
                "doc-1",
                &[
                    payload("doc-1", 1, "second"),
                    payload("doc-1", 0, "first"),
                ],
            )
            .await
            .unwrap();

        let chunks = store.get_chunks("doc-1").await.unwrap();
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert_eq!(chunks[0].metadata["content_type"], "paragraph");
    }

    #[tokio::test]
    async fn save_chunks_replaces_previous_set() {
        let store = store().await;
        store.upsert_document(&document("doc-1")).await.unwrap();
        store
            .save_chunks("doc-1", &[payload("doc-1", 0, "old")])
            .await
            .unwrap();
        store
            .save_chunks("doc-1", &[payload("doc-1", 0, "new")])
            .await
            .unwrap();

        let chunks = store.get_chunks("doc-1").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "new");
    }

    #[tokio::test]
    async fn delete_document_cascades_to_chunks() {
        let store = store().await;
        store.upsert_document(&document("doc-1")).await.unwrap();
        store
            .save_chunks("doc-1", &[payload("doc-1", 0, "content")])
            .await
            .unwrap();

        store.delete_document("doc-1").await.unwrap();
        assert!(store.get_document("doc-1").await.unwrap().is_none());
        assert!(store.get_chunks("doc-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recent_turns_returns_chronological_tail() {
        let store = store().await;
        for i in 0..5 {
            let mut turn = ConversationTurn::user(format!("question {i}"));
            turn.timestamp = chrono::DateTime::from_timestamp_millis(1_000 + i).unwrap();
            store.append_turn("session-1", &turn).await.unwrap();
        }

        let turns = store.recent_turns("session-1", 3).await.unwrap();
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["question 2", "question 3", "question 4"]);
    }
}
