use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::document::models::{Document, DocumentStatus, NewDocument};
use crate::document::repositories::DocumentRepository;
use quarry_common::error::{QuarryError, QuarryResult};

const DOCUMENT_COLUMNS: &str = "id, connector_id, source_id, title, blob_key, content_hash, \
     mime_type, status, original_url, created_at, updated_at";

#[derive(Clone)]
pub struct PgDocumentRepository {
    pool: PgPool,
}

impl PgDocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> QuarryResult<Document> {
        let status_raw: String = row.get("status");
        let status = DocumentStatus::from_str(&status_raw).map_err(QuarryError::Internal)?;

        Ok(Document {
            id: row.get("id"),
            connector_id: row.get("connector_id"),
            source_id: row.get("source_id"),
            title: row.get("title"),
            blob_key: row.get("blob_key"),
            content_hash: row.get("content_hash"),
            mime_type: row.get("mime_type"),
            status,
            original_url: row.get("original_url"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn get_by_source(
        &self,
        connector_id: Uuid,
        source_id: &str,
    ) -> QuarryResult<Option<Document>> {
        let row = sqlx::query(&format!(
            "select {DOCUMENT_COLUMNS} from documents
             where connector_id = $1 and source_id = $2"
        ))
        .bind(connector_id)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QuarryError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, doc: NewDocument) -> QuarryResult<Document> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "insert into documents
               (id, connector_id, source_id, title, blob_key, content_hash,
                mime_type, status, original_url, created_at, updated_at)
             values ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $9)
             on conflict (connector_id, source_id) do update
               set title = excluded.title,
                   blob_key = excluded.blob_key,
                   content_hash = excluded.content_hash,
                   mime_type = excluded.mime_type,
                   status = 'pending',
                   original_url = excluded.original_url,
                   updated_at = excluded.updated_at
             returning {DOCUMENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(doc.connector_id)
        .bind(&doc.source_id)
        .bind(&doc.title)
        .bind(&doc.blob_key)
        .bind(&doc.content_hash)
        .bind(&doc.mime_type)
        .bind(&doc.original_url)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QuarryError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn mark_deleted(&self, connector_id: Uuid, source_id: &str) -> QuarryResult<bool> {
        let result = sqlx::query(
            "update documents
             set status = 'deleted', updated_at = $1
             where connector_id = $2 and source_id = $3",
        )
        .bind(Utc::now())
        .bind(connector_id)
        .bind(source_id)
        .execute(&self.pool)
        .await
        .map_err(|e| QuarryError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;

    async fn test_repo() -> Option<(PgDocumentRepository, PgPool)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url).await.expect("db should connect");

        sqlx::query(
            "create table if not exists documents (
               id uuid primary key,
               connector_id uuid not null,
               source_id text not null,
               title text not null,
               blob_key text not null,
               content_hash text not null,
               mime_type text not null,
               status text not null default 'pending',
               original_url text,
               created_at timestamptz not null default now(),
               updated_at timestamptz not null default now()
             )",
        )
        .execute(&pool)
        .await
        .ok()?;

        sqlx::query(
            "create unique index if not exists documents_connector_source_uidx
             on documents(connector_id, source_id)",
        )
        .execute(&pool)
        .await
        .ok()?;

        Some((PgDocumentRepository::new(pool.clone()), pool))
    }

    fn new_doc(connector_id: Uuid, source_id: &str, hash: &str) -> NewDocument {
        NewDocument {
            connector_id,
            source_id: source_id.to_string(),
            title: "Quarterly report".to_string(),
            blob_key: format!("{connector_id}/{hash}"),
            content_hash: hash.to_string(),
            mime_type: "application/pdf".to_string(),
            original_url: Some("https://example.com/doc".to_string()),
        }
    }

    #[tokio::test]
    async fn upsert_creates_then_updates_same_row() {
        let (repo, _pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let connector_id = Uuid::new_v4();

        let first = repo
            .upsert(new_doc(connector_id, "file-1", "aaa"))
            .await
            .expect("first upsert");
        let second = repo
            .upsert(new_doc(connector_id, "file-1", "bbb"))
            .await
            .expect("second upsert");

        // Same logical row, refreshed content
        assert_eq!(first.id, second.id);
        assert_eq!(second.content_hash, "bbb");
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_for_unchanged_content() {
        let (repo, _pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let connector_id = Uuid::new_v4();

        let first = repo
            .upsert(new_doc(connector_id, "file-2", "ccc"))
            .await
            .expect("first upsert");
        let second = repo
            .upsert(new_doc(connector_id, "file-2", "ccc"))
            .await
            .expect("second upsert");

        assert_eq!(first.id, second.id);
        assert_eq!(second.content_hash, "ccc");
    }

    #[tokio::test]
    async fn same_source_id_under_different_connectors_is_distinct() {
        let (repo, _pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let doc_a = repo.upsert(new_doc(a, "shared", "aaa")).await.expect("a");
        let doc_b = repo.upsert(new_doc(b, "shared", "bbb")).await.expect("b");

        assert_ne!(doc_a.id, doc_b.id);
    }

    #[tokio::test]
    async fn mark_deleted_soft_deletes() {
        let (repo, _pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let connector_id = Uuid::new_v4();
        repo.upsert(new_doc(connector_id, "file-3", "ddd"))
            .await
            .expect("upsert");

        let matched = repo
            .mark_deleted(connector_id, "file-3")
            .await
            .expect("mark_deleted");
        assert!(matched);

        let doc = repo
            .get_by_source(connector_id, "file-3")
            .await
            .expect("get")
            .expect("row should survive");
        assert_eq!(doc.status, DocumentStatus::Deleted);
    }

    #[tokio::test]
    async fn mark_deleted_returns_false_for_unknown_item() {
        let (repo, _pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let matched = repo
            .mark_deleted(Uuid::new_v4(), "ghost")
            .await
            .expect("mark_deleted");
        assert!(!matched);
    }
}
