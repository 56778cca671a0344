//! SQLite-backed [`DocumentStore`] implementation.
//!
//! Documents and chunks live in two tables (see [`crate::migrate`]).
//! Every operation that touches both runs in one transaction, and chunk
//! rows are deleted explicitly rather than through the foreign-key
//! cascade alone.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::migrate;
use crate::models::{Chunk, Document, DocumentStatus};
use crate::store::DocumentStore;

const DOCUMENT_COLUMNS: &str = "id, conversation_id, filename, media_type, status, error, \
                                chunk_count, created_at, updated_at";

/// SQLite implementation of the [`DocumentStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `db.path` and apply migrations.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn set_status(&self, id: &str, status: DocumentStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE documents SET status = ?, error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("document not found: {}", id);
        }
        Ok(())
    }
}

fn ts_from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("invalid timestamp: {}", ms))
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let status: String = row.try_get("status")?;
    let chunk_count: i64 = row.try_get("chunk_count")?;
    Ok(Document {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        filename: row.try_get("filename")?,
        media_type: row.try_get("media_type")?,
        status: status.parse()?,
        chunk_count: chunk_count as usize,
        error: row.try_get("error")?,
        created_at: ts_from_millis(row.try_get("created_at")?)?,
        updated_at: ts_from_millis(row.try_get("updated_at")?)?,
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk> {
    let ordinal: i64 = row.try_get("ordinal")?;
    let char_start: i64 = row.try_get("char_start")?;
    let char_end: i64 = row.try_get("char_end")?;
    let embedding: Option<Vec<u8>> = row.try_get("embedding")?;
    Ok(Chunk {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        ordinal: ordinal as usize,
        text: row.try_get("text")?,
        char_start: char_start as usize,
        char_end: char_end as usize,
        hash: row.try_get("hash")?,
        embedding: embedding.map(|b| blob_to_vec(&b)),
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, conversation_id, filename, media_type, status, error,
                                   chunk_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.conversation_id)
        .bind(&doc.filename)
        .bind(&doc.media_type)
        .bind(doc.status.as_str())
        .bind(&doc.error)
        .bind(doc.chunk_count as i64)
        .bind(doc.created_at.timestamp_millis())
        .bind(doc.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn update_status(&self, id: &str, status: DocumentStatus) -> Result<()> {
        self.set_status(id, status).await
    }

    async fn reset_document(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            "UPDATE documents SET status = 'pending', error = NULL, chunk_count = 0, updated_at = ? \
             WHERE id = ?",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            bail!("document not found: {}", id);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, ordinal, text, char_start, char_end, hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(document_id)
            .bind(chunk.ordinal as i64)
            .bind(&chunk.text)
            .bind(chunk.char_start as i64)
            .bind(chunk.char_end as i64)
            .bind(&chunk.hash)
            .bind(chunk.embedding.as_deref().map(vec_to_blob))
            .execute(&mut *tx)
            .await?;
        }

        let result = sqlx::query(
            "UPDATE documents SET status = 'chunked', error = NULL, chunk_count = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(chunks.len() as i64)
        .bind(Utc::now().timestamp_millis())
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            bail!("document not found: {}", document_id);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            "UPDATE documents SET status = 'failed', error = ?, chunk_count = 0, updated_at = ? \
             WHERE id = ?",
        )
        .bind(error)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            bail!("document not found: {}", id);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, ordinal, text, char_start, char_end, hash, embedding
            FROM chunks
            WHERE document_id = ?
            ORDER BY ordinal ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn list_documents(&self, conversation_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE conversation_id = ? ORDER BY created_at ASC, rowid ASC",
            DOCUMENT_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn list_chunked_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE status = 'chunked' ORDER BY created_at ASC, rowid ASC",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM documents WHERE conversation_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM chunks WHERE document_id IN (SELECT id FROM documents WHERE conversation_id = ?)",
        )
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM documents WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ids)
    }
}
