//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/quote-ingest.sqlite"
//!
//! [chunking]
//! max_chars = 3000
//!
//! [indexing]
//! batch_size = 100
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-ada-002"
//! dims = 1536
//!
//! [vector_store]
//! provider = "pinecone"
//! index_host = "https://ai-quote-finder-xxxx.svc.gcp-starter.pinecone.io"
//!
//! [plans.free]
//! max_file_size = "4MB"
//! pages_per_pdf = 5
//!
//! [plans.pro]
//! max_file_size = "16MB"
//! pages_per_pdf = 500
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::{CHUNK_OVERRUN_CHARS, DEFAULT_MAX_CHUNK_CHARS};
use crate::models::PlanTier;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub plans: PlansConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overrun_chars")]
    pub overrun_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHUNK_CHARS,
            overrun_chars: CHUNK_OVERRUN_CHARS,
        }
    }
}

fn default_max_chars() -> usize {
    DEFAULT_MAX_CHUNK_CHARS
}
fn default_overrun_chars() -> usize {
    CHUNK_OVERRUN_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_index_batch_size")]
    pub batch_size: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_index_batch_size(),
        }
    }
}

fn default_index_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_vector_provider")]
    pub provider: String,
    /// Data-plane host of the Pinecone index.
    #[serde(default)]
    pub index_host: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            index_host: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_vector_provider() -> String {
    "sqlite".to_string()
}

/// Raw per-tier plan limits as written in the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct PlanConfig {
    pub max_file_size: String,
    pub pages_per_pdf: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlansConfig {
    #[serde(default = "default_free_plan")]
    pub free: PlanConfig,
    #[serde(default = "default_pro_plan")]
    pub pro: PlanConfig,
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            free: default_free_plan(),
            pro: default_pro_plan(),
        }
    }
}

fn default_free_plan() -> PlanConfig {
    PlanConfig {
        max_file_size: "4MB".to_string(),
        pages_per_pdf: 5,
    }
}

fn default_pro_plan() -> PlanConfig {
    PlanConfig {
        max_file_size: "16MB".to_string(),
        pages_per_pdf: 500,
    }
}

/// Resolved plan ceilings handed to the limit enforcer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub tier: PlanTier,
    pub max_file_size: u64,
    pub pages_per_pdf: usize,
}

impl PlansConfig {
    /// Resolve the ceilings for a tier.
    pub fn resolve(&self, tier: PlanTier) -> Result<Plan> {
        let raw = match tier {
            PlanTier::Free => &self.free,
            PlanTier::Pro => &self.pro,
        };
        Ok(Plan {
            tier,
            max_file_size: parse_file_size(&raw.max_file_size)
                .with_context(|| format!("plans.{}.max_file_size", tier.as_str()))?,
            pages_per_pdf: raw.pages_per_pdf,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadsConfig {
    /// Prefix used to derive a download URL from a storage key.
    #[serde(default = "default_uploads_base_url")]
    pub base_url: String,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            base_url: default_uploads_base_url(),
        }
    }
}

fn default_uploads_base_url() -> String {
    "https://uploadthing-prod.s3.us-west-2.amazonaws.com".to_string()
}

impl UploadsConfig {
    pub fn url_for_key(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }
}

impl Config {
    /// Config with every section at its default, for commands that do not
    /// touch the database (e.g. `qi chunk`).
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/quote-ingest.sqlite"),
            },
            chunking: ChunkingConfig::default(),
            indexing: IndexingConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            plans: PlansConfig::default(),
            uploads: UploadsConfig::default(),
        }
    }
}

/// Parse a human file size such as `"4MB"` into bytes (powers of 1024).
///
/// Accepted units: `B`, `KB`, `MB`, `GB`, case-insensitive.
pub fn parse_file_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (value, unit) = s.split_at(split);
    if value.is_empty() {
        bail!("Invalid file size: '{}'", s);
    }
    let value: u64 = value
        .parse()
        .with_context(|| format!("Invalid file size: '{}'", s))?;
    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "B" => 1,
        "KB" => 1024,
        "MB" => 1024 * 1024,
        "GB" => 1024 * 1024 * 1024,
        other => bail!("Invalid file size unit: '{}'", other),
    };
    value
        .checked_mul(multiplier)
        .with_context(|| format!("File size overflows: '{}'", s))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }

    if config.indexing.batch_size == 0 {
        bail!("indexing.batch_size must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    match config.vector_store.provider.as_str() {
        "sqlite" => {}
        "memory" => bail!(
            "vector_store provider 'memory' keeps nothing once the command exits. Use sqlite or pinecone."
        ),
        "pinecone" => {
            if config.vector_store.index_host.is_none() {
                bail!("vector_store.index_host must be set when provider is 'pinecone'");
            }
            if !config.embedding.is_enabled() {
                bail!("vector_store provider 'pinecone' requires an embedding provider");
            }
        }
        other => bail!(
            "Unknown vector store provider: '{}'. Must be sqlite or pinecone.",
            other
        ),
    }

    for tier in [PlanTier::Free, PlanTier::Pro] {
        config.plans.resolve(tier)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_file_size_units() {
        assert_eq!(parse_file_size("512B").unwrap(), 512);
        assert_eq!(parse_file_size("4KB").unwrap(), 4096);
        assert_eq!(parse_file_size("4MB").unwrap(), 4 * 1024 * 1024);
        assert_eq!(parse_file_size("1gb").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_file_size(" 16 MB ").unwrap(), 16 * 1024 * 1024);
    }

    #[test]
    fn parse_file_size_rejects_garbage() {
        assert!(parse_file_size("MB").is_err());
        assert!(parse_file_size("4TB").is_err());
        assert!(parse_file_size("").is_err());
    }

    #[test]
    fn minimal_config_defaults() {
        let cfg: Config = toml::from_str("[db]\npath = \"x.sqlite\"\n").unwrap();
        assert_eq!(cfg.chunking.max_chars, 3000);
        assert_eq!(cfg.chunking.overrun_chars, 23);
        assert_eq!(cfg.indexing.batch_size, 100);
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.vector_store.provider, "sqlite");
        let free = cfg.plans.resolve(PlanTier::Free).unwrap();
        assert_eq!(free.max_file_size, 4 * 1024 * 1024);
        assert_eq!(free.pages_per_pdf, 5);
        assert_eq!(cfg.plans.resolve(PlanTier::Pro).unwrap().pages_per_pdf, 500);
        validate(&cfg).unwrap();
    }

    #[test]
    fn pinecone_requires_host() {
        let cfg: Config =
            toml::from_str("[db]\npath = \"x\"\n[vector_store]\nprovider = \"pinecone\"\n")
                .unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn pinecone_requires_embeddings() {
        let cfg: Config = toml::from_str(
            "[db]\npath = \"x\"\n[vector_store]\nprovider = \"pinecone\"\nindex_host = \"https://h\"\n",
        )
        .unwrap();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("embedding"));
    }

    #[test]
    fn memory_vector_store_is_rejected() {
        let cfg: Config =
            toml::from_str("[db]\npath = \"x\"\n[vector_store]\nprovider = \"memory\"\n")
                .unwrap();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("memory"));
    }

    #[test]
    fn openai_requires_model_and_dims() {
        let cfg: Config =
            toml::from_str("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn url_for_key_joins_cleanly() {
        let uploads = UploadsConfig {
            base_url: "https://files.example.com/".to_string(),
        };
        assert_eq!(uploads.url_for_key("abc"), "https://files.example.com/abc");
    }
}
