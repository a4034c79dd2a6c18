//! Vector store abstraction.
//!
//! Records are partitioned by namespace, one namespace per document, so a
//! document's records can be deleted in one call.
//!
//! | Config Value | Backend |
//! |-------------|---------|
//! | `"sqlite"` | [`SqliteVectorStore`], in the documents database |
//! | `"pinecone"` | [`PineconeStore`] |
//!
//! [`InMemoryVectorStore`] is not selectable from config: it forgets
//! everything when the process exits. Tests and dry runs build it directly.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::{Row, SqlitePool};

use crate::config::VectorStoreConfig;
use crate::error::IngestError;
use crate::models::IndexRecord;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite records (matched by id) under `namespace`.
    async fn upsert(&self, namespace: &str, records: &[IndexRecord]) -> Result<(), IngestError>;

    /// Remove every record in `namespace`. Deleting an unknown namespace is
    /// not an error.
    async fn delete_namespace(&self, namespace: &str) -> Result<(), IngestError>;
}

// ============ In-memory ============

/// Process-local store for tests and offline runs.
#[derive(Default)]
pub struct InMemoryVectorStore {
    namespaces: RwLock<HashMap<String, Vec<IndexRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records in `namespace`, in first-insert order.
    pub fn records(&self, namespace: &str) -> Vec<IndexRecord> {
        let map = self.namespaces.read().unwrap_or_else(|e| e.into_inner());
        map.get(namespace).cloned().unwrap_or_default()
    }

    pub fn count(&self, namespace: &str) -> usize {
        let map = self.namespaces.read().unwrap_or_else(|e| e.into_inner());
        map.get(namespace).map(Vec::len).unwrap_or(0)
    }

    pub fn namespaces(&self) -> Vec<String> {
        let map = self.namespaces.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, namespace: &str, records: &[IndexRecord]) -> Result<(), IngestError> {
        let mut map = self.namespaces.write().unwrap_or_else(|e| e.into_inner());
        let stored = map.entry(namespace.to_string()).or_default();
        for record in records {
            match stored.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => stored.push(record.clone()),
            }
        }
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), IngestError> {
        let mut map = self.namespaces.write().unwrap_or_else(|e| e.into_inner());
        map.remove(namespace);
        Ok(())
    }
}

// ============ SQLite ============

/// Encode a vector as little-endian `f32` bytes for a BLOB column.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes short of a full `f32` are
/// ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Stores records in the `records` table next to `documents`, so a local
/// install keeps its index between runs.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Records in `namespace`, in first-insert order.
    pub async fn records(&self, namespace: &str) -> Result<Vec<IndexRecord>, IngestError> {
        let rows = sqlx::query(
            "SELECT id, embedding, metadata FROM records WHERE namespace = ? ORDER BY rowid",
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<IndexRecord, IngestError> {
                let blob: Vec<u8> = row.try_get("embedding")?;
                let metadata: String = row.try_get("metadata")?;
                let metadata: Map<String, Value> = serde_json::from_str(&metadata)
                    .map_err(|e| IngestError::Store(format!("corrupt record metadata: {}", e)))?;
                Ok(IndexRecord {
                    id: row.try_get("id")?,
                    values: blob_to_vec(&blob),
                    metadata,
                })
            })
            .collect()
    }

    pub async fn count(&self, namespace: &str) -> Result<usize, IngestError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM records WHERE namespace = ?")
            .bind(namespace)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as usize)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, namespace: &str, records: &[IndexRecord]) -> Result<(), IngestError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            let metadata = serde_json::to_string(&record.metadata)
                .map_err(|e| IngestError::Index(format!("metadata not serializable: {}", e)))?;
            sqlx::query(
                r#"
                INSERT INTO records (namespace, id, embedding, metadata)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(namespace, id) DO UPDATE SET
                    embedding = excluded.embedding,
                    metadata = excluded.metadata
                "#,
            )
            .bind(namespace)
            .bind(&record.id)
            .bind(vec_to_blob(&record.values))
            .bind(metadata)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), IngestError> {
        sqlx::query("DELETE FROM records WHERE namespace = ?")
            .bind(namespace)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============ Pinecone ============

/// Pinecone data-plane client.
///
/// Talks to the index host directly (`POST /vectors/upsert`,
/// `POST /vectors/delete`). Requires `PINECONE_API_KEY`.
pub struct PineconeStore {
    client: reqwest::Client,
    host: String,
    api_key: String,
}

impl PineconeStore {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let host = config
            .index_host
            .clone()
            .ok_or_else(|| anyhow::anyhow!("vector_store.index_host required for Pinecone"))?;
        let api_key = std::env::var("PINECONE_API_KEY")
            .map_err(|_| anyhow::anyhow!("PINECONE_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response, IngestError> {
        Ok(self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await?)
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn upsert(&self, namespace: &str, records: &[IndexRecord]) -> Result<(), IngestError> {
        if records.is_empty() {
            return Ok(());
        }
        let body = json!({
            "vectors": records,
            "namespace": namespace,
        });
        let response = self.post("/vectors/upsert", body).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IngestError::Index(format!(
                "Pinecone upsert failed {}: {}",
                status, text
            )));
        }
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), IngestError> {
        let body = json!({
            "deleteAll": true,
            "namespace": namespace,
        });
        let response = self.post("/vectors/delete", body).await?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(());
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IngestError::Index(format!(
                "Pinecone delete failed {}: {}",
                status, text
            )));
        }
        Ok(())
    }
}

/// Create the [`VectorStore`] named by `config.provider`. The `sqlite`
/// backend writes into `pool`.
pub fn create_vector_store(
    config: &VectorStoreConfig,
    pool: &SqlitePool,
) -> Result<Arc<dyn VectorStore>> {
    match config.provider.as_str() {
        "sqlite" => Ok(Arc::new(SqliteVectorStore::new(pool.clone()))),
        "pinecone" => Ok(Arc::new(PineconeStore::new(config)?)),
        other => bail!("Unknown vector store provider: {}", other),
    }
}
