//! Relational store for [`Document`] records.
//!
//! The [`DocumentStore`] trait is the only surface the orchestrator sees.
//! [`SqliteDocumentStore`] backs the CLI; [`InMemoryDocumentStore`] backs
//! tests and embedding applications that keep state elsewhere.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{IngestError, Result};
use crate::models::{Document, UploadStatus};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document. Returns `false` without writing when a
    /// document with the same storage key already exists.
    async fn create(&self, doc: &Document) -> Result<bool>;

    async fn find_by_key(&self, key: &str) -> Result<Option<Document>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>>;

    /// Look up a document only if it belongs to `user_id`.
    async fn find_for_user(&self, id: &str, user_id: &str) -> Result<Option<Document>>;

    /// All of a user's documents, newest first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Document>>;

    /// Move a document to `status`. `SUCCESS` and `FAILED` are final: a
    /// document already in one of them is left alone and this returns a
    /// [`IngestError::Store`] error, as does an unknown id.
    async fn update_status(&self, id: &str, status: UploadStatus) -> Result<()>;

    /// Remove a document. Returns `false` if it did not exist.
    async fn delete(&self, id: &str) -> Result<bool>;
}

// ============ SQLite ============

/// SQLite implementation of [`DocumentStore`] over the `documents` table.
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, key, name, url, user_id, private, upload_status, created_at FROM documents";

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let status: String = row.try_get("upload_status")?;
    let private: i64 = row.try_get("private")?;
    Ok(Document {
        id: row.try_get("id")?,
        key: row.try_get("key")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        user_id: row.try_get("user_id")?,
        private: private != 0,
        upload_status: status.parse()?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn create(&self, doc: &Document) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (id, key, name, url, user_id, private,
                                   upload_status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO NOTHING
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.key)
        .bind(&doc.name)
        .bind(&doc.url)
        .bind(&doc.user_id)
        .bind(doc.private as i64)
        .bind(doc.upload_status.as_str())
        .bind(doc.created_at)
        .bind(doc.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!("{} WHERE key = ?", SELECT_COLUMNS))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn find_for_user(&self, id: &str, user_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!("{} WHERE id = ? AND user_id = ?", SELECT_COLUMNS))
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "{} WHERE user_id = ? ORDER BY created_at DESC, id",
            SELECT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn update_status(&self, id: &str, status: UploadStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE documents SET upload_status = ?, updated_at = ?
            WHERE id = ? AND upload_status NOT IN ('SUCCESS', 'FAILED')
            "#,
        )
        .bind(status.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(match self.find_by_id(id).await? {
                Some(doc) => terminal_error(&doc, status),
                None => IngestError::Store(format!("document not found: {}", id)),
            });
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn terminal_error(doc: &Document, requested: UploadStatus) -> IngestError {
    IngestError::Store(format!(
        "document {} is already {}, refusing {}",
        doc.id, doc.upload_status, requested
    ))
}

// ============ In-memory ============

/// `HashMap`-backed store keyed by document id.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    docs: RwLock<HashMap<String, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(&self, doc: &Document) -> Result<bool> {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        if docs.values().any(|d| d.key == doc.key) {
            return Ok(false);
        }
        docs.insert(doc.id.clone(), doc.clone());
        Ok(true)
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        Ok(docs.values().find(|d| d.key == key).cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        Ok(docs.get(id).cloned())
    }

    async fn find_for_user(&self, id: &str, user_id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        Ok(docs.get(id).filter(|d| d.user_id == user_id).cloned())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Document>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<Document> = docs
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn update_status(&self, id: &str, status: UploadStatus) -> Result<()> {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        match docs.get_mut(id) {
            Some(doc) if doc.upload_status.is_terminal() => Err(terminal_error(doc, status)),
            Some(doc) => {
                doc.upload_status = status;
                Ok(())
            }
            None => Err(IngestError::Store(format!("document not found: {}", id))),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        Ok(docs.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, key: &str, user: &str, created_at: i64) -> Document {
        Document {
            id: id.to_string(),
            key: key.to_string(),
            name: "book.pdf".to_string(),
            url: format!("https://files.example.com/{}", key),
            user_id: user.to_string(),
            private: false,
            upload_status: UploadStatus::Processing,
            created_at,
        }
    }

    #[tokio::test]
    async fn memory_create_is_unique_by_key() {
        let store = InMemoryDocumentStore::new();
        assert!(store.create(&doc("1", "k", "u", 0)).await.unwrap());
        assert!(!store.create(&doc("2", "k", "u", 0)).await.unwrap());
        assert_eq!(store.find_by_key("k").await.unwrap().unwrap().id, "1");
        assert!(store.find_by_id("2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_scopes_lookups_to_owner() {
        let store = InMemoryDocumentStore::new();
        store.create(&doc("1", "a", "alice", 1)).await.unwrap();
        store.create(&doc("2", "b", "alice", 2)).await.unwrap();
        store.create(&doc("3", "c", "bob", 3)).await.unwrap();

        assert!(store.find_for_user("1", "bob").await.unwrap().is_none());
        assert!(store.find_for_user("1", "alice").await.unwrap().is_some());

        let ids: Vec<String> = store
            .list_for_user("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[tokio::test]
    async fn memory_status_and_delete() {
        let store = InMemoryDocumentStore::new();
        store.create(&doc("1", "a", "u", 0)).await.unwrap();
        store.update_status("1", UploadStatus::Success).await.unwrap();
        assert_eq!(
            store.find_by_id("1").await.unwrap().unwrap().upload_status,
            UploadStatus::Success
        );
        assert!(matches!(
            store.update_status("nope", UploadStatus::Failed).await,
            Err(IngestError::Store(_))
        ));
        assert!(store.delete("1").await.unwrap());
        assert!(!store.delete("1").await.unwrap());
    }

    #[tokio::test]
    async fn memory_terminal_status_is_final() {
        let store = InMemoryDocumentStore::new();
        store.create(&doc("1", "a", "u", 0)).await.unwrap();
        store.update_status("1", UploadStatus::Failed).await.unwrap();

        let err = store
            .update_status("1", UploadStatus::Success)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already FAILED"));
        assert_eq!(
            store.find_by_id("1").await.unwrap().unwrap().upload_status,
            UploadStatus::Failed
        );
    }
}
