//! Indexing batcher: chunks → embedded records in the vector store.
//!
//! Chunks are split into fixed-size batches, in order. Each batch is
//! embedded and upserted under the document's namespace before the next one
//! starts. The first failing batch aborts the run; records already written
//! stay in the namespace and are removed by deleting the document.

use sha2::{Digest, Sha256};

use crate::embedding::EmbeddingProvider;
use crate::error::{IngestError, Result};
use crate::models::{Chunk, IndexRecord, Location};
use crate::vector_store::VectorStore;

/// Default records per upsert request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Summary of a successful indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexReport {
    pub records: usize,
    pub batches: usize,
}

/// Sizes of the batches `total` chunks are split into.
///
/// ```rust
/// use quote_ingest::index::plan_batches;
/// assert_eq!(plan_batches(250, 100), vec![100, 100, 50]);
/// ```
pub fn plan_batches(total: usize, batch_size: usize) -> Vec<usize> {
    let batch_size = batch_size.max(1);
    (0..total)
        .step_by(batch_size)
        .map(|start| (total - start).min(batch_size))
        .collect()
}

/// Stable record id for a chunk. Re-indexing the same document overwrites
/// its records instead of duplicating them.
pub fn record_id(namespace: &str, chunk: &Chunk) -> String {
    let anchor = match &chunk.location {
        Location::Page { page_number } => format!("page:{}", page_number),
        Location::Chapter { id, order, .. } => format!("chapter:{}:{}", order, id),
    };
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b"\0");
    hasher.update(anchor.as_bytes());
    hasher.update(b"\0");
    hasher.update(chunk.part.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Build the stored record for one chunk.
pub fn build_record(namespace: &str, chunk: &Chunk, values: Vec<f32>) -> IndexRecord {
    let mut metadata = chunk.location.to_metadata();
    metadata.insert("document_id".into(), namespace.into());
    metadata.insert("part".into(), chunk.part.into());
    metadata.insert("text".into(), chunk.text.as_str().into());
    IndexRecord {
        id: record_id(namespace, chunk),
        values,
        metadata,
    }
}

/// Embed and upsert `chunks` under `namespace`, `batch_size` at a time.
pub async fn index_document(
    chunks: &[Chunk],
    namespace: &str,
    embedder: &dyn EmbeddingProvider,
    store: &dyn VectorStore,
    batch_size: usize,
) -> Result<IndexReport> {
    let batch_size = batch_size.max(1);
    let total_batches = plan_batches(chunks.len(), batch_size).len();
    let mut report = IndexReport {
        records: 0,
        batches: 0,
    };

    for (n, batch) in chunks.chunks(batch_size).enumerate() {
        let batch_no = n + 1;
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        let vectors = embedder
            .embed(&texts)
            .await
            .map_err(|e| batch_error(batch_no, total_batches, "embedding", e))?;
        if vectors.len() != batch.len() {
            return Err(IngestError::Index(format!(
                "batch {}/{}: got {} vectors for {} chunks",
                batch_no,
                total_batches,
                vectors.len(),
                batch.len()
            )));
        }

        let records: Vec<IndexRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, values)| build_record(namespace, chunk, values))
            .collect();

        store
            .upsert(namespace, &records)
            .await
            .map_err(|e| batch_error(batch_no, total_batches, "upsert", e))?;

        report.records += records.len();
        report.batches += 1;
        tracing::debug!(
            namespace,
            batch = batch_no,
            of = total_batches,
            records = records.len(),
            "batch indexed"
        );
    }

    Ok(report)
}

fn batch_error(batch: usize, total: usize, step: &str, err: IngestError) -> IngestError {
    tracing::warn!(batch, of = total, step, error = %err, "indexing batch failed");
    let detail = match err {
        IngestError::Index(msg) => msg,
        other => other.to_string(),
    };
    IngestError::Index(format!("batch {}/{} {} failed: {}", batch, total, step, detail))
}
