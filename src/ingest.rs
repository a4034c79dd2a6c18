//! Ingestion pipeline orchestration.
//!
//! Coordinates one document's run: load → sanitize → chunk → limit gate →
//! index, with the status written back to the document store. Re-delivered
//! upload events for a known storage key are no-ops.
//!
//! All collaborators are injected as trait objects, so [`Ingestor`] is cheap
//! to clone and one clone can be moved into each spawned run.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::chunk::chunk_unit_with_overrun;
use crate::config::{Config, Plan};
use crate::documents::{DocumentStore, SqliteDocumentStore};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{IngestError, Result};
use crate::extract::{loader_for, DocumentSource, FormatLoader};
use crate::index::index_document;
use crate::limits::{check_limits, unit_count_for, LimitDecision};
use crate::models::{
    Chunk, ContentUnit, Document, DocumentFormat, PlanTier, UploadMetadata, UploadStatus,
    UploadedFile,
};
use crate::sanitize::sanitize_unit_text;
use crate::vector_store::{create_vector_store, VectorStore};
use crate::{db, migrate};

/// Tunables for a run, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub max_chunk_chars: usize,
    pub overrun_chars: usize,
    pub batch_size: usize,
    pub free: Plan,
    pub pro: Plan,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            max_chunk_chars: config.chunking.max_chars,
            overrun_chars: config.chunking.overrun_chars,
            batch_size: config.indexing.batch_size,
            free: config.plans.resolve(PlanTier::Free)?,
            pro: config.plans.resolve(PlanTier::Pro)?,
        })
    }

    pub fn plan(&self, tier: PlanTier) -> &Plan {
        match tier {
            PlanTier::Free => &self.free,
            PlanTier::Pro => &self.pro,
        }
    }
}

/// Counts from a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub units: usize,
    pub chunks: usize,
    pub records: usize,
    pub batches: usize,
}

/// Result of one upload-complete event.
#[derive(Debug)]
pub enum IngestOutcome {
    /// A document with this storage key already existed; nothing was done.
    AlreadyExists { document_id: String },
    Success {
        document_id: String,
        report: IngestReport,
    },
    /// The document was marked `FAILED`.
    Failed {
        document_id: String,
        reason: IngestError,
    },
}

impl IngestOutcome {
    pub fn document_id(&self) -> &str {
        match self {
            IngestOutcome::AlreadyExists { document_id }
            | IngestOutcome::Success { document_id, .. }
            | IngestOutcome::Failed { document_id, .. } => document_id,
        }
    }

    /// Status the document is left in.
    pub fn status(&self) -> Option<UploadStatus> {
        match self {
            IngestOutcome::AlreadyExists { .. } => None,
            IngestOutcome::Success { .. } => Some(UploadStatus::Success),
            IngestOutcome::Failed { .. } => Some(UploadStatus::Failed),
        }
    }
}

/// Units and chunks of a loaded document, before the limit gate.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub format: DocumentFormat,
    /// Bytes actually read from the source.
    pub byte_size: u64,
    pub units: Vec<ContentUnit>,
    pub chunks: Vec<Chunk>,
}

impl Prepared {
    /// The count the plan's page ceiling applies to.
    pub fn unit_count(&self) -> usize {
        unit_count_for(self.format, self.units.len(), self.chunks.len())
    }
}

#[derive(Clone)]
pub struct Ingestor {
    documents: Arc<dyn DocumentStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    loaders: HashMap<DocumentFormat, Arc<dyn FormatLoader>>,
    settings: IngestSettings,
}

impl Ingestor {
    /// Build an ingestor with the default PDF and EPUB loaders.
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: IngestSettings,
    ) -> Self {
        let client = reqwest::Client::new();
        let loaders = [DocumentFormat::Pdf, DocumentFormat::Epub]
            .into_iter()
            .map(|f| (f, loader_for(f, client.clone())))
            .collect();
        Self {
            documents,
            vectors,
            embedder,
            loaders,
            settings,
        }
    }

    /// Replace the loader for the format it reports.
    pub fn with_loader(mut self, loader: Arc<dyn FormatLoader>) -> Self {
        self.loaders.insert(loader.format(), loader);
        self
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    /// Entry point for an upload-complete event: the file is fetched from
    /// `upload.url`.
    pub async fn handle_upload_complete(
        &self,
        upload: &UploadedFile,
        metadata: &UploadMetadata,
    ) -> Result<IngestOutcome> {
        self.ingest(upload, metadata, DocumentSource::Url(upload.url.clone()))
            .await
    }

    /// Ingest `upload`, reading its bytes from `source`.
    ///
    /// Only a failure to look up or create the document row is returned as
    /// `Err`. Everything after that ends as [`IngestOutcome::Failed`].
    pub async fn ingest(
        &self,
        upload: &UploadedFile,
        metadata: &UploadMetadata,
        source: DocumentSource,
    ) -> Result<IngestOutcome> {
        if let Some(existing) = self.documents.find_by_key(&upload.key).await? {
            tracing::info!(
                document_id = %existing.id,
                key = %upload.key,
                status = %existing.upload_status,
                "upload already ingested, skipping"
            );
            return Ok(IngestOutcome::AlreadyExists {
                document_id: existing.id,
            });
        }

        let doc = Document {
            id: Uuid::new_v4().to_string(),
            key: upload.key.clone(),
            name: upload.name.clone(),
            url: upload.url.clone(),
            user_id: metadata.user_id.clone(),
            private: metadata.private,
            upload_status: UploadStatus::Pending,
            created_at: chrono::Utc::now().timestamp(),
        };

        if !self.documents.create(&doc).await? {
            // lost a race with a concurrent delivery of the same key
            let document_id = match self.documents.find_by_key(&upload.key).await? {
                Some(existing) => existing.id,
                None => doc.id,
            };
            return Ok(IngestOutcome::AlreadyExists { document_id });
        }

        tracing::info!(
            document_id = %doc.id,
            key = %doc.key,
            name = %doc.name,
            plan = metadata.plan.as_str(),
            "ingestion started"
        );

        let plan = *self.settings.plan(metadata.plan);
        let result = match self
            .documents
            .update_status(&doc.id, UploadStatus::Processing)
            .await
        {
            Ok(()) => self.process(&doc, upload.size, &plan, &source).await,
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(report) => match self
                .documents
                .update_status(&doc.id, UploadStatus::Success)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        document_id = %doc.id,
                        units = report.units,
                        chunks = report.chunks,
                        batches = report.batches,
                        "ingestion succeeded"
                    );
                    IngestOutcome::Success {
                        document_id: doc.id,
                        report,
                    }
                }
                Err(e) => self.fail(doc.id, e).await,
            },
            Err(e) => self.fail(doc.id, e).await,
        };
        Ok(outcome)
    }

    async fn process(
        &self,
        doc: &Document,
        byte_size: u64,
        plan: &Plan,
        source: &DocumentSource,
    ) -> Result<IngestReport> {
        let format = DocumentFormat::from_name(&doc.name)?;
        // the declared size can reject before anything is downloaded
        enforce_plan(doc, plan, byte_size, 0)?;
        let prepared = self
            .prepare(format, source, Some(plan.max_file_size))
            .await?;

        // the upload service's size may be missing or wrong
        let byte_size = byte_size.max(prepared.byte_size);
        enforce_plan(doc, plan, byte_size, prepared.unit_count())?;

        let index = index_document(
            &prepared.chunks,
            &doc.id,
            self.embedder.as_ref(),
            self.vectors.as_ref(),
            self.settings.batch_size,
        )
        .await?;

        Ok(IngestReport {
            units: prepared.units.len(),
            chunks: prepared.chunks.len(),
            records: index.records,
            batches: index.batches,
        })
    }

    /// Load, sanitize and chunk a document without touching any store.
    ///
    /// `max_bytes` cuts off sources larger than that many bytes.
    pub async fn prepare(
        &self,
        format: DocumentFormat,
        source: &DocumentSource,
        max_bytes: Option<u64>,
    ) -> Result<Prepared> {
        let loader = self
            .loaders
            .get(&format)
            .ok_or_else(|| IngestError::UnsupportedFormat(format.as_str().to_string()))?;

        let loaded = loader.load(source, max_bytes).await?;
        let units: Vec<ContentUnit> = loaded
            .units
            .into_iter()
            .map(|unit| ContentUnit {
                text: sanitize_unit_text(&unit.text),
                location: unit.location,
            })
            .collect();

        let chunks: Vec<Chunk> = units
            .iter()
            .flat_map(|unit| {
                chunk_unit_with_overrun(
                    unit,
                    self.settings.max_chunk_chars,
                    self.settings.overrun_chars,
                )
            })
            .collect();

        tracing::debug!(
            format = format.as_str(),
            bytes = loaded.byte_size,
            units = units.len(),
            chunks = chunks.len(),
            "document prepared"
        );

        Ok(Prepared {
            format,
            byte_size: loaded.byte_size,
            units,
            chunks,
        })
    }

    async fn fail(&self, document_id: String, reason: IngestError) -> IngestOutcome {
        tracing::error!(
            document_id = %document_id,
            stage = reason.kind(),
            error = %reason,
            "ingestion failed"
        );
        if matches!(reason, IngestError::Index(_)) {
            // earlier batches may have landed; drop them with the document
            if let Err(e) = self.vectors.delete_namespace(&document_id).await {
                tracing::warn!(document_id = %document_id, error = %e, "could not clear partial records");
            }
        }
        if let Err(e) = self
            .documents
            .update_status(&document_id, UploadStatus::Failed)
            .await
        {
            tracing::error!(document_id = %document_id, error = %e, "could not mark document FAILED");
        }
        IngestOutcome::Failed {
            document_id,
            reason,
        }
    }

    /// Current status of a user's document. Unknown ids read as `PENDING`:
    /// the row may simply not be written yet.
    pub async fn upload_status(&self, id: &str, user_id: &str) -> Result<UploadStatus> {
        Ok(self
            .documents
            .find_for_user(id, user_id)
            .await?
            .map(|d| d.upload_status)
            .unwrap_or(UploadStatus::Pending))
    }

    /// Delete a user's document and every record in its namespace.
    ///
    /// Returns `None` if the document does not exist or belongs to someone
    /// else.
    pub async fn delete_document(&self, id: &str, user_id: &str) -> Result<Option<Document>> {
        let Some(doc) = self.documents.find_for_user(id, user_id).await? else {
            return Ok(None);
        };
        self.vectors.delete_namespace(&doc.id).await?;
        self.documents.delete(&doc.id).await?;
        tracing::info!(document_id = %doc.id, "document deleted");
        Ok(Some(doc))
    }
}

fn enforce_plan(doc: &Document, plan: &Plan, byte_size: u64, unit_count: usize) -> Result<()> {
    match check_limits(byte_size, unit_count, plan) {
        LimitDecision::Accept => Ok(()),
        LimitDecision::Reject(reason) => {
            tracing::info!(
                document_id = %doc.id,
                plan = plan.tier.as_str(),
                ?reason,
                "document rejected by plan limits"
            );
            Err(reason.into())
        }
    }
}

/// Wire an [`Ingestor`] from configuration: SQLite documents (migrated on
/// open), the configured vector store and embedding provider. The `sqlite`
/// vector store shares the documents database.
pub async fn build_ingestor(config: &Config) -> anyhow::Result<Ingestor> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    let vectors = create_vector_store(&config.vector_store, &pool)?;
    let documents: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(pool));
    let embedder = create_provider(&config.embedding)?;
    let settings = IngestSettings::from_config(config)?;
    Ok(Ingestor::new(documents, vectors, embedder, settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn settings_follow_config_defaults() {
        let settings = IngestSettings::from_config(&Config::minimal()).unwrap();
        assert_eq!(settings.max_chunk_chars, 3000);
        assert_eq!(settings.overrun_chars, 23);
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.plan(PlanTier::Free).pages_per_pdf, 5);
        assert_eq!(settings.plan(PlanTier::Pro).pages_per_pdf, 500);
    }

    #[test]
    fn prepared_counts_pages_for_pdf_and_chunks_for_epub() {
        let unit = ContentUnit {
            text: "x".repeat(7000),
            location: crate::models::Location::Page { page_number: 1 },
        };
        let chunks = chunk_unit_with_overrun(&unit, 3000, 23);
        let pdf = Prepared {
            format: DocumentFormat::Pdf,
            byte_size: 7000,
            units: vec![unit.clone()],
            chunks: chunks.clone(),
        };
        assert_eq!(pdf.unit_count(), 1);
        let epub = Prepared {
            format: DocumentFormat::Epub,
            ..pdf
        };
        assert_eq!(epub.unit_count(), 3);
    }
}
