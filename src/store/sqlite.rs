//! SQLite-backed [`DocumentStore`].
//!
//! Records live in `chat_documents`, chunk rows in `chunks` (see
//! [`migrate`](crate::migrate)). `created_at` is stored as Unix milliseconds.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{error, info};
use uuid::Uuid;

use super::{not_found_document, DocumentStore, NO_DOCUMENTS, SAVE_FAILED};
use crate::cache::{Revalidate, RevalidateScope};
use crate::chunk::to_chunks;
use crate::error::IngestError;
use crate::models::{ChatDocumentRecord, Chunk, CHAT_DOCUMENT_TYPE};

pub struct SqliteDocumentStore {
    pool: SqlitePool,
    revalidate: Arc<dyn Revalidate>,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool, revalidate: Arc<dyn Revalidate>) -> Self {
        Self { pool, revalidate }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ChatDocumentRecord, IngestError> {
    let millis: i64 = row.try_get("created_at")?;
    let created_at = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        IngestError::Database(format!("database error: invalid created_at {}", millis))
    })?;
    let is_deleted: i64 = row.try_get("is_deleted")?;

    Ok(ChatDocumentRecord {
        id: row.try_get("id")?,
        chat_thread_id: row.try_get("chat_thread_id")?,
        user_id: row.try_get("user_id")?,
        created_at,
        doc_type: row.try_get("type")?,
        is_deleted: is_deleted != 0,
        name: row.try_get("name")?,
    })
}

async fn insert_record(
    conn: &mut SqliteConnection,
    thread_id: &str,
    user_id: &str,
    name: &str,
) -> Result<ChatDocumentRecord, IngestError> {
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now().timestamp_millis();

    let row = sqlx::query(
        r#"
        INSERT INTO chat_documents (id, chat_thread_id, user_id, created_at, type, is_deleted, name)
        VALUES (?, ?, ?, ?, ?, 0, ?)
        ON CONFLICT(id) DO UPDATE SET
            chat_thread_id = excluded.chat_thread_id,
            user_id = excluded.user_id,
            created_at = excluded.created_at,
            type = excluded.type,
            is_deleted = excluded.is_deleted,
            name = excluded.name
        RETURNING id, chat_thread_id, user_id, created_at, type, is_deleted, name
        "#,
    )
    .bind(&id)
    .bind(thread_id)
    .bind(user_id)
    .bind(created_at)
    .bind(CHAT_DOCUMENT_TYPE)
    .bind(name)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| {
        error!(thread = %thread_id, error = %e, "document insert failed");
        IngestError::from(e)
    })?;

    match row {
        Some(row) => record_from_row(&row),
        None => Err(IngestError::Database(SAVE_FAILED.to_string())),
    }
}

async fn insert_chunks(
    conn: &mut SqliteConnection,
    document_id: &str,
    chunks: &[Chunk],
) -> Result<(), IngestError> {
    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn create(
        &self,
        thread_id: &str,
        user_id: &str,
        name: &str,
    ) -> Result<ChatDocumentRecord, IngestError> {
        let mut conn = self.pool.acquire().await?;
        let record = insert_record(&mut *conn, thread_id, user_id, name).await?;

        info!(document = %record.id, thread = %thread_id, "document record created");
        self.revalidate
            .revalidate(&RevalidateScope::chat_thread(thread_id));
        Ok(record)
    }

    async fn create_with_chunks(
        &self,
        thread_id: &str,
        user_id: &str,
        name: &str,
        chunks: &[String],
    ) -> Result<ChatDocumentRecord, IngestError> {
        let mut tx = self.pool.begin().await?;
        let record = insert_record(&mut *tx, thread_id, user_id, name).await?;
        insert_chunks(&mut *tx, &record.id, &to_chunks(&record.id, chunks)).await?;
        tx.commit().await?;

        info!(
            document = %record.id,
            thread = %thread_id,
            chunks = chunks.len(),
            "document recorded with chunks"
        );
        self.revalidate
            .revalidate(&RevalidateScope::chat_thread(thread_id));
        Ok(record)
    }

    async fn list_by_thread(&self, thread_id: &str) -> Result<Vec<ChatDocumentRecord>, IngestError> {
        let rows = sqlx::query(
            r#"
            SELECT id, chat_thread_id, user_id, created_at, type, is_deleted, name
            FROM chat_documents
            WHERE type = ? AND chat_thread_id = ? AND is_deleted = 0
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(CHAT_DOCUMENT_TYPE)
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(IngestError::NotFound(NO_DOCUMENTS.to_string()));
        }
        rows.iter().map(record_from_row).collect()
    }

    async fn soft_delete(
        &self,
        thread_id: &str,
        id: &str,
    ) -> Result<ChatDocumentRecord, IngestError> {
        let row = sqlx::query(
            r#"
            UPDATE chat_documents SET is_deleted = 1
            WHERE id = ? AND chat_thread_id = ? AND type = ? AND is_deleted = 0
            RETURNING id, chat_thread_id, user_id, created_at, type, is_deleted, name
            "#,
        )
        .bind(id)
        .bind(thread_id)
        .bind(CHAT_DOCUMENT_TYPE)
        .fetch_optional(&self.pool)
        .await?;

        let record = match row {
            Some(row) => record_from_row(&row)?,
            None => return Err(not_found_document(id)),
        };

        info!(document = %id, thread = %thread_id, "document soft-deleted");
        self.revalidate
            .revalidate(&RevalidateScope::chat_thread(thread_id));
        Ok(record)
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<(), IngestError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        insert_chunks(&mut *tx, document_id, chunks).await?;

        tx.commit().await?;
        info!(document = %document_id, chunks = chunks.len(), "chunks stored");
        Ok(())
    }
}
