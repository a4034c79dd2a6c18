//! CLI command implementations for the `qi` binary.
//!
//! Each `run_*` function prints a short plain-text summary to stdout.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::documents::InMemoryDocumentStore;
use crate::embedding::DisabledProvider;
use crate::extract::DocumentSource;
use crate::ingest::{build_ingestor, IngestOutcome, IngestSettings, Ingestor};
use crate::limits::{check_limits, LimitDecision};
use crate::models::{DocumentFormat, PlanTier, UploadMetadata, UploadedFile};
use crate::vector_store::InMemoryVectorStore;

/// Arguments of `qi ingest`.
#[derive(Debug, Clone)]
pub struct IngestArgs {
    /// Local path or http(s) URL. `None` means "fetch by storage key".
    pub target: Option<String>,
    pub user_id: String,
    pub plan: PlanTier,
    pub private: bool,
    pub key: Option<String>,
    pub name: Option<String>,
}

fn is_url(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

fn short_hash(bytes: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(bytes));
    digest[..32].to_string()
}

async fn remote_size(url: &str) -> Option<u64> {
    let response = reqwest::Client::new().head(url).send().await.ok()?;
    response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn name_from_url(url: &str) -> Option<String> {
    url.split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub async fn run_ingest(config: &Config, args: IngestArgs) -> Result<()> {
    let (upload, source) = match args.target.as_deref() {
        Some(target) if is_url(target) => {
            let name = args
                .name
                .clone()
                .or_else(|| name_from_url(target))
                .with_context(|| format!("Cannot infer a file name from {}", target))?;
            let upload = UploadedFile {
                key: args
                    .key
                    .clone()
                    .unwrap_or_else(|| short_hash(target.as_bytes())),
                name,
                url: target.to_string(),
                size: remote_size(target).await.unwrap_or(0),
            };
            (upload, DocumentSource::Url(target.to_string()))
        }
        Some(target) => {
            let path = Path::new(target);
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let name = args
                .name
                .clone()
                .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
                .with_context(|| format!("Cannot infer a file name from {}", target))?;
            let absolute = std::fs::canonicalize(path)?;
            let upload = UploadedFile {
                key: args.key.clone().unwrap_or_else(|| short_hash(&bytes)),
                name,
                url: format!("file://{}", absolute.display()),
                size: bytes.len() as u64,
            };
            (upload, DocumentSource::Bytes(bytes))
        }
        None => {
            let (Some(key), Some(name)) = (args.key.clone(), args.name.clone()) else {
                bail!("Without a file or URL, both --key and --name are required");
            };
            let url = config.uploads.url_for_key(&key);
            let upload = UploadedFile {
                size: remote_size(&url).await.unwrap_or(0),
                key,
                name,
                url: url.clone(),
            };
            (upload, DocumentSource::Url(url))
        }
    };

    let metadata = UploadMetadata {
        user_id: args.user_id,
        plan: args.plan,
        private: args.private,
    };

    let ingestor = build_ingestor(config).await?;
    let outcome = ingestor.ingest(&upload, &metadata, source).await?;

    println!("ingest");
    println!("  document: {}", outcome.document_id());
    println!("  key: {}", upload.key);
    match outcome {
        IngestOutcome::AlreadyExists { .. } => {
            println!("  skipped: a document with this key already exists");
        }
        IngestOutcome::Success { report, .. } => {
            println!("  status: SUCCESS");
            println!("  units: {}", report.units);
            println!("  chunks: {}", report.chunks);
            println!("  records: {}", report.records);
            println!("  batches: {}", report.batches);
        }
        IngestOutcome::Failed { reason, .. } => {
            println!("  status: FAILED");
            bail!("ingestion failed: {}", reason);
        }
    }
    Ok(())
}

pub async fn run_status(config: &Config, id: &str, user_id: &str) -> Result<()> {
    let ingestor = build_ingestor(config).await?;
    let status = ingestor.upload_status(id, user_id).await?;
    println!("{}", status);
    Ok(())
}

pub async fn run_list(config: &Config, user_id: &str) -> Result<()> {
    let ingestor = build_ingestor(config).await?;
    let docs = ingestor.documents().list_for_user(user_id).await?;

    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!("{:<38} {:<11} {:<8} NAME", "ID", "STATUS", "PRIVATE");
    for doc in docs {
        println!(
            "{:<38} {:<11} {:<8} {}",
            doc.id, doc.upload_status, doc.private, doc.name
        );
    }
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str, user_id: &str) -> Result<()> {
    let ingestor = build_ingestor(config).await?;
    match ingestor.delete_document(id, user_id).await? {
        Some(doc) => {
            println!("Deleted {} ({}).", doc.id, doc.name);
            Ok(())
        }
        None => bail!("Document not found: {}", id),
    }
}

/// Load, sanitize and chunk a local file and report what ingestion would
/// do, without any store.
pub async fn run_chunk(
    config: &Config,
    path: &Path,
    format: Option<DocumentFormat>,
    plan: PlanTier,
    show: usize,
) -> Result<()> {
    let name = path.to_string_lossy();
    let format = match format {
        Some(f) => f,
        None => DocumentFormat::from_name(&name)?,
    };
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let size = bytes.len() as u64;

    let settings = IngestSettings::from_config(config)?;
    let ingestor = Ingestor::new(
        Arc::new(InMemoryDocumentStore::new()),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(DisabledProvider),
        settings,
    );
    let prepared = ingestor
        .prepare(format, &DocumentSource::Bytes(bytes), None)
        .await?;
    let decision = check_limits(size, prepared.unit_count(), ingestor.settings().plan(plan));

    println!("chunk (dry-run)");
    println!("  format: {}", format.as_str());
    println!("  bytes: {}", size);
    println!("  units: {}", prepared.units.len());
    println!("  chunks: {}", prepared.chunks.len());
    match decision {
        LimitDecision::Accept => println!("  plan {}: accept", plan.as_str()),
        LimitDecision::Reject(reason) => {
            println!("  plan {}: reject ({:?})", plan.as_str(), reason)
        }
    }

    for chunk in prepared.chunks.iter().take(show) {
        let preview: String = chunk
            .text
            .chars()
            .take(60)
            .map(|c| if c.is_whitespace() { ' ' } else { c })
            .collect();
        println!(
            "  [{} part {}] {} chars: {}",
            chunk.citation(),
            chunk.part,
            chunk.text.chars().count(),
            preview
        );
    }
    Ok(())
}

pub fn run_plans(config: &Config) -> Result<()> {
    println!("{:<6} {:<16} {:>14} PAGES", "PLAN", "MAX FILE SIZE", "BYTES");
    for tier in [PlanTier::Free, PlanTier::Pro] {
        let raw = match tier {
            PlanTier::Free => &config.plans.free,
            PlanTier::Pro => &config.plans.pro,
        };
        let plan = config.plans.resolve(tier)?;
        println!(
            "{:<6} {:<16} {:>14} {}",
            tier.as_str(),
            raw.max_file_size,
            plan.max_file_size,
            plan.pages_per_pdf
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_detection_and_names() {
        assert!(is_url("https://x.io/a.pdf"));
        assert!(!is_url("./a.pdf"));
        assert_eq!(
            name_from_url("https://x.io/books/moby.epub?sig=1").as_deref(),
            Some("moby.epub")
        );
        assert_eq!(name_from_url("https://x.io/"), None);
    }

    #[test]
    fn short_hash_is_stable() {
        assert_eq!(short_hash(b"abc"), short_hash(b"abc"));
        assert_eq!(short_hash(b"abc").len(), 32);
        assert_ne!(short_hash(b"abc"), short_hash(b"abd"));
    }
}
