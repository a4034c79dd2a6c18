//! Core data models used throughout the ingestion pipeline.
//!
//! [`Document`] is the only type persisted in the relational store and
//! [`IndexRecord`] the only type persisted in the vector store. Content
//! units and chunks live for a single ingestion run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::IngestError;

/// Ingestion status of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "PENDING",
            UploadStatus::Processing => "PROCESSING",
            UploadStatus::Success => "SUCCESS",
            UploadStatus::Failed => "FAILED",
        }
    }

    /// `SUCCESS` and `FAILED` are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Success | UploadStatus::Failed)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(UploadStatus::Pending),
            "PROCESSING" => Ok(UploadStatus::Processing),
            "SUCCESS" => Ok(UploadStatus::Success),
            "FAILED" => Ok(UploadStatus::Failed),
            other => Err(IngestError::Store(format!("unknown upload status: {}", other))),
        }
    }
}

/// Supported upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Epub,
}

impl DocumentFormat {
    /// Infer the format from a file name's extension (case-insensitive).
    pub fn from_name(name: &str) -> Result<Self, IngestError> {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "epub" => Ok(DocumentFormat::Epub),
            _ => Err(IngestError::UnsupportedFormat(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Epub => "epub",
        }
    }
}

impl FromStr for DocumentFormat {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "epub" => Ok(DocumentFormat::Epub),
            other => Err(IngestError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// A user-owned upload, stored in the relational store.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub key: String,
    pub name: String,
    pub url: String,
    pub user_id: String,
    pub private: bool,
    pub upload_status: UploadStatus,
    pub created_at: i64,
}

/// Where a piece of text sits inside its book.
///
/// Downstream UI turns this back into a "page N" or chapter deep link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Location {
    Page {
        page_number: u32,
    },
    Chapter {
        id: String,
        href: String,
        title: Option<String>,
        order: u32,
        level: Option<u32>,
    },
}

impl Location {
    /// Human-readable citation anchor: `page 3` or the chapter href.
    pub fn citation(&self) -> String {
        match self {
            Location::Page { page_number } => format!("page {}", page_number),
            Location::Chapter { href, .. } => href.clone(),
        }
    }

    /// Flat metadata fields for vector-store records.
    pub fn to_metadata(&self) -> Map<String, Value> {
        let mut map = Map::new();
        match self {
            Location::Page { page_number } => {
                map.insert("page_number".into(), Value::from(*page_number));
            }
            Location::Chapter {
                id,
                href,
                title,
                order,
                level,
            } => {
                map.insert("id".into(), Value::from(id.as_str()));
                map.insert("href".into(), Value::from(href.as_str()));
                map.insert("order".into(), Value::from(*order));
                if let Some(title) = title {
                    map.insert("title".into(), Value::from(title.as_str()));
                }
                if let Some(level) = level {
                    map.insert("level".into(), Value::from(*level));
                }
            }
        }
        map
    }
}

/// One raw page (PDF) or chapter (EPUB) of extracted text.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentUnit {
    pub text: String,
    pub location: Location,
}

/// A bounded slice of a [`ContentUnit`].
///
/// `start..end` is the character range the slice was cut at; `text` may
/// run a little past `end` because of the fixed overrun allowance.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub location: Location,
    /// 1-based, unique within the parent unit.
    pub part: u32,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    pub fn citation(&self) -> String {
        self.location.citation()
    }
}

/// The stored representation of a chunk in the vector store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Map<String, Value>,
}

impl IndexRecord {
    pub fn text(&self) -> Option<&str> {
        self.metadata.get("text").and_then(|v| v.as_str())
    }
}

/// File descriptor delivered by the upload store on completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub key: String,
    pub name: String,
    pub url: String,
    pub size: u64,
}

/// Plan tiers. The set is closed; ceilings come from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Pro,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
        }
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "pro" => Ok(PlanTier::Pro),
            other => Err(format!("unknown plan '{}': expected free or pro", other)),
        }
    }
}

/// Caller-supplied context that travels with an upload event.
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub user_id: String,
    pub plan: PlanTier,
    pub private: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_name_is_case_insensitive() {
        assert_eq!(
            DocumentFormat::from_name("Moby Dick.PDF").unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::from_name("book.v2.epub").unwrap(),
            DocumentFormat::Epub
        );
    }

    #[test]
    fn format_from_name_rejects_unknown() {
        let err = DocumentFormat::from_name("notes.docx").unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat(_)));
        assert!(DocumentFormat::from_name("no-extension").is_err());
    }

    #[test]
    fn status_roundtrips_through_str() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Processing,
            UploadStatus::Success,
            UploadStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<UploadStatus>().unwrap(), status);
        }
        assert!(UploadStatus::Success.is_terminal());
        assert!(!UploadStatus::Processing.is_terminal());
    }

    #[test]
    fn chapter_metadata_carries_href() {
        let loc = Location::Chapter {
            id: "c1".into(),
            href: "chapter1.xhtml".into(),
            title: Some("Intro".into()),
            order: 1,
            level: None,
        };
        let meta = loc.to_metadata();
        assert_eq!(meta["href"], "chapter1.xhtml");
        assert_eq!(meta["title"], "Intro");
        assert!(!meta.contains_key("level"));
        assert_eq!(loc.citation(), "chapter1.xhtml");
    }

    #[test]
    fn page_citation() {
        let loc = Location::Page { page_number: 7 };
        assert_eq!(loc.citation(), "page 7");
        assert_eq!(loc.to_metadata()["page_number"], 7);
    }
}
