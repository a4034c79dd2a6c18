//! Format loaders: uploaded file → ordered [`ContentUnit`]s.
//!
//! A [`FormatLoader`] turns a [`DocumentSource`] into one unit per PDF page
//! or EPUB spine item, in reading order. [`loader_for`] picks the
//! implementation from the closed [`DocumentFormat`] set; adding a format
//! means adding a variant and a loader, not another `if` on the extension.
//!
//! Remote PDFs are fetched into memory. Remote EPUBs are downloaded into a
//! [`NamedTempFile`] because the zip reader needs a seekable source; the
//! file is removed when the guard drops, on success and on error alike.
//!
//! Loaders report how many bytes they actually read. With a byte ceiling,
//! downloads stop as soon as the body grows past it, whatever the server
//! declared up front.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use crate::epub;
use crate::error::{IngestError, Result};
use crate::models::{ContentUnit, DocumentFormat, Location};

/// Where the raw file comes from.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
    Url(String),
}

/// Units read from one file, plus the size of that file in bytes.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub units: Vec<ContentUnit>,
    pub byte_size: u64,
}

/// Produces content units for one document format.
#[async_trait]
pub trait FormatLoader: Send + Sync {
    fn format(&self) -> DocumentFormat;

    /// Load the document and return its units in reading order.
    ///
    /// With `max_bytes` set, a larger source fails with
    /// [`IngestError::PayloadTooLarge`] before it is parsed.
    async fn load(&self, source: &DocumentSource, max_bytes: Option<u64>)
        -> Result<LoadedDocument>;
}

fn ensure_within(size: u64, max_bytes: Option<u64>) -> Result<()> {
    match max_bytes {
        Some(limit) if size > limit => Err(IngestError::PayloadTooLarge { size, limit }),
        _ => Ok(()),
    }
}

/// Build the loader for `format`, sharing one HTTP client.
pub fn loader_for(format: DocumentFormat, client: reqwest::Client) -> Arc<dyn FormatLoader> {
    match format {
        DocumentFormat::Pdf => Arc::new(PdfLoader::new(client)),
        DocumentFormat::Epub => Arc::new(EpubLoader::new(client)),
    }
}

// ============ PDF ============

/// One unit per page, `page_number` 1-based.
pub struct PdfLoader {
    client: reqwest::Client,
}

impl PdfLoader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FormatLoader for PdfLoader {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pdf
    }

    async fn load(
        &self,
        source: &DocumentSource,
        max_bytes: Option<u64>,
    ) -> Result<LoadedDocument> {
        let bytes = match source {
            DocumentSource::Bytes(b) => {
                ensure_within(b.len() as u64, max_bytes)?;
                b.clone()
            }
            DocumentSource::Path(p) => {
                ensure_within(tokio::fs::metadata(p).await?.len(), max_bytes)?;
                tokio::fs::read(p).await?
            }
            DocumentSource::Url(url) => fetch_bytes(&self.client, url, max_bytes).await?,
        };
        let byte_size = bytes.len() as u64;
        // pdf-extract is CPU-bound and panics on some malformed inputs
        let units = tokio::task::spawn_blocking(move || extract_pdf_pages(&bytes))
            .await
            .map_err(|e| IngestError::Parse(format!("PDF extraction aborted: {}", e)))??;
        Ok(LoadedDocument { units, byte_size })
    }
}

/// Extract per-page text from an in-memory PDF.
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<ContentUnit>> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| IngestError::Parse(format!("PDF extraction failed: {}", e)))?;
    if pages.is_empty() {
        return Err(IngestError::Parse("PDF has no pages".to_string()));
    }
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| ContentUnit {
            text,
            location: Location::Page {
                page_number: i as u32 + 1,
            },
        })
        .collect())
}

// ============ EPUB ============

/// One unit per spine item, carrying chapter id/href/title/order/level.
pub struct EpubLoader {
    client: reqwest::Client,
}

impl EpubLoader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FormatLoader for EpubLoader {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Epub
    }

    async fn load(
        &self,
        source: &DocumentSource,
        max_bytes: Option<u64>,
    ) -> Result<LoadedDocument> {
        type Job = Box<dyn FnOnce() -> Result<Vec<ContentUnit>> + Send>;
        let (byte_size, job): (u64, Job) = match source {
            DocumentSource::Bytes(b) => {
                let size = b.len() as u64;
                ensure_within(size, max_bytes)?;
                let bytes = b.clone();
                (size, Box::new(move || epub::parse_epub(Cursor::new(bytes))))
            }
            DocumentSource::Path(p) => {
                let size = tokio::fs::metadata(p).await?.len();
                ensure_within(size, max_bytes)?;
                let path = p.clone();
                (
                    size,
                    Box::new(move || epub::parse_epub(std::fs::File::open(&path)?)),
                )
            }
            DocumentSource::Url(url) => {
                let (tmp, size) =
                    download_to_tempfile(&self.client, url, ".epub", max_bytes).await?;
                tracing::debug!(path = %tmp.path().display(), bytes = size, "epub downloaded to temp file");
                // `tmp` moves into the job and is deleted when it finishes
                (
                    size,
                    Box::new(move || {
                        let file = tmp.reopen()?;
                        epub::parse_epub(file)
                    }),
                )
            }
        };
        let units = tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| IngestError::Parse(format!("EPUB parsing aborted: {}", e)))??;
        Ok(LoadedDocument { units, byte_size })
    }
}

// ============ Fetching ============

/// Prefix of the temp files remote EPUBs are spooled into.
pub const TEMP_FILE_PREFIX: &str = "quote-ingest-";

async fn get(
    client: &reqwest::Client,
    url: &str,
    max_bytes: Option<u64>,
) -> Result<reqwest::Response> {
    let response = client.get(url).send().await?.error_for_status()?;
    if let Some(declared) = response.content_length() {
        ensure_within(declared, max_bytes)?;
    }
    Ok(response)
}

/// GET `url` into memory, failing once more than `max_bytes` arrive.
pub async fn fetch_bytes(
    client: &reqwest::Client,
    url: &str,
    max_bytes: Option<u64>,
) -> Result<Vec<u8>> {
    let mut response = get(client, url, max_bytes).await?;
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        bytes.extend_from_slice(&chunk);
        ensure_within(bytes.len() as u64, max_bytes)?;
    }
    Ok(bytes)
}

/// Stream `url` into a fresh temp file and return it with the number of
/// bytes written. The file is deleted when the returned guard is dropped,
/// including when the download is cut off by `max_bytes`.
pub async fn download_to_tempfile(
    client: &reqwest::Client,
    url: &str,
    suffix: &str,
    max_bytes: Option<u64>,
) -> Result<(NamedTempFile, u64)> {
    let mut response = get(client, url, max_bytes).await?;
    let tmp = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .suffix(suffix)
        .tempfile()?;
    let mut file = tokio::fs::File::from_std(tmp.reopen()?);
    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        written += chunk.len() as u64;
        ensure_within(written, max_bytes)?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok((tmp, written))
}
