//! # quote-ingest
//!
//! Document ingestion for quote search: turns an uploaded PDF or EPUB into
//! bounded, addressable, embedded text chunks in a vector store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────┐   ┌────────┐   ┌─────────┐
//! │  Loader  │──▶│ Sanitize │──▶│  Chunk  │──▶│ Limits │──▶│  Index  │──▶ vector store
//! │ PDF/EPUB │   │          │   │ 3000+23 │   │ (gate) │   │ 100/req │
//! └──────────┘   └──────────┘   └─────────┘   └────────┘   └─────────┘
//!                                                               │
//!                 documents (SQLite): PENDING → PROCESSING → SUCCESS / FAILED
//! ```
//!
//! Every chunk keeps its page number (PDF) or chapter href (EPUB), so a
//! retrieved passage can be cited back to its place in the book.
//!
//! ## Quick Start
//!
//! ```bash
//! qi init
//! qi ingest ./moby-dick.epub --user u_123 --plan pro
//! qi status <document-id> --user u_123
//! qi chunk ./paper.pdf          # preview units and chunks, writes nothing
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and plan ceilings |
//! | [`models`] | Core data types |
//! | [`extract`] | Format loaders (PDF, EPUB) and remote fetching |
//! | [`epub`] | EPUB container, spine and TOC parsing |
//! | [`sanitize`] | Non-ASCII scrubbing |
//! | [`chunk`] | Whitespace-boundary chunking |
//! | [`limits`] | Plan size/page gate |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_store`] | Namespaced vector store abstraction |
//! | [`index`] | Batched embedding + upsert |
//! | [`documents`] | Document records (SQLite, in-memory) |
//! | [`ingest`] | Pipeline orchestration |
//! | [`commands`] | CLI command implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod commands;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod epub;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod limits;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod sanitize;
pub mod vector_store;
