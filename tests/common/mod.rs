//! Shared fixtures: in-memory PDF and EPUB builders and test doubles.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use quote_ingest::embedding::EmbeddingProvider;
use quote_ingest::error::IngestError;
use quote_ingest::extract::{DocumentSource, FormatLoader, LoadedDocument};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use quote_ingest::models::{ContentUnit, DocumentFormat, IndexRecord};
use quote_ingest::vector_store::{InMemoryVectorStore, VectorStore};

/// A PDF with one page per entry of `pages`, each drawing its text with
/// Helvetica. Offsets in the xref table are computed while writing, so
/// pdf-extract can parse it.
pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let n = pages.len();
    let font_obj = 3;
    let page_obj = |i: usize| 4 + 2 * i;
    let content_obj = |i: usize| 5 + 2 * i;
    let total_objs = 3 + 2 * n;

    let mut out = Vec::new();
    let mut offsets = vec![0usize; total_objs + 1];
    out.extend_from_slice(b"%PDF-1.4\n");

    offsets[1] = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

    offsets[2] = out.len();
    let kids: Vec<String> = (0..n).map(|i| format!("{} 0 R", page_obj(i))).collect();
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
            kids.join(" "),
            n
        )
        .as_bytes(),
    );

    offsets[font_obj] = out.len();
    out.extend_from_slice(
        b"3 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );

    for (i, text) in pages.iter().enumerate() {
        offsets[page_obj(i)] = out.len();
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >> endobj\n",
                page_obj(i),
                content_obj(i)
            )
            .as_bytes(),
        );
        let stream = format!("BT /F1 12 Tf 72 700 Td ({}) Tj ET", text);
        offsets[content_obj(i)] = out.len();
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
                content_obj(i),
                stream.len(),
                stream
            )
            .as_bytes(),
        );
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", total_objs + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets.iter().skip(1) {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            total_objs + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

/// An EPUB 2 book. Each chapter is `(href, title, body_text)`; hrefs are
/// relative to `OEBPS/`.
pub fn epub_with_chapters(chapters: &[(&str, &str, &str)]) -> Vec<u8> {
    let container = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#;

    let mut manifest = String::from(
        r#"<item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>"#,
    );
    let mut spine = String::new();
    let mut nav = String::new();
    for (i, (href, title, _)) in chapters.iter().enumerate() {
        manifest.push_str(&format!(
            r#"<item id="ch{}" href="{}" media-type="application/xhtml+xml"/>"#,
            i + 1,
            href
        ));
        spine.push_str(&format!(r#"<itemref idref="ch{}"/>"#, i + 1));
        nav.push_str(&format!(
            r#"<navPoint id="np{0}" playOrder="{0}"><navLabel><text>{1}</text></navLabel><content src="{2}"/></navPoint>"#,
            i + 1,
            title,
            href
        ));
    }
    let opf = format!(
        r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <manifest>{}</manifest>
  <spine toc="ncx">{}</spine>
</package>"#,
        manifest, spine
    );
    let ncx = format!(
        r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/"><navMap>{}</navMap></ncx>"#,
        nav
    );

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        let opts = zip::write::SimpleFileOptions::default();
        let mut add = |name: &str, content: &str| {
            zip.start_file(name, opts).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        };
        add("mimetype", "application/epub+zip");
        add("META-INF/container.xml", container);
        add("OEBPS/content.opf", &opf);
        add("OEBPS/toc.ncx", &ncx);
        for (href, title, body) in chapters {
            add(
                &format!("OEBPS/{}", href),
                &format!(
                    "<html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>{}</title></head><body><p>{}</p></body></html>",
                    title, body
                ),
            );
        }
        zip.finish().unwrap();
    }
    buf
}

/// Loader that returns a fixed set of units.
pub struct StaticLoader {
    pub format: DocumentFormat,
    pub units: Vec<ContentUnit>,
}

#[async_trait]
impl FormatLoader for StaticLoader {
    fn format(&self) -> DocumentFormat {
        self.format
    }

    async fn load(
        &self,
        _source: &DocumentSource,
        _max_bytes: Option<u64>,
    ) -> Result<LoadedDocument, IngestError> {
        Ok(LoadedDocument {
            units: self.units.clone(),
            byte_size: 0,
        })
    }
}

/// Embedder that records the size of every batch it sees.
#[derive(Default)]
pub struct CountingEmbedder {
    pub batches: Mutex<Vec<usize>>,
}

impl CountingEmbedder {
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    fn model_name(&self) -> &str {
        "counting"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        self.batches.lock().unwrap().push(texts.len());
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

/// Vector store that fails the upsert call number `fail_on` (1-based).
pub struct FlakyStore {
    pub inner: InMemoryVectorStore,
    pub fail_on: usize,
    pub calls: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_on(fail_on: usize) -> Self {
        Self {
            inner: InMemoryVectorStore::new(),
            fail_on,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    async fn upsert(&self, namespace: &str, records: &[IndexRecord]) -> Result<(), IngestError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(IngestError::TransientIo("connection reset".to_string()));
        }
        self.inner.upsert(namespace, records).await
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), IngestError> {
        self.inner.delete_namespace(namespace).await
    }
}

/// Serve `files` (path -> body) over HTTP on a random local port and return
/// the base URL. Bodies go out without `Content-Length`, ended by closing
/// the connection. Unknown paths get a 404.
pub async fn serve_files(files: Vec<(&str, Vec<u8>)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let files: Arc<HashMap<String, Vec<u8>>> = Arc::new(
        files
            .into_iter()
            .map(|(path, body)| (path.to_string(), body))
            .collect(),
    );

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let files = files.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let mut read = 0;
                while read < buf.len() {
                    let n = socket.read(&mut buf[read..]).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    read += n;
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let request = String::from_utf8_lossy(&buf[..read]);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                match files.get(&path) {
                    Some(body) => {
                        let _ = socket
                            .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n")
                            .await;
                        let _ = socket.write_all(body).await;
                    }
                    None => {
                        let _ = socket
                            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                            .await;
                    }
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}", addr)
}

/// Temp files left behind by remote EPUB downloads.
pub fn spooled_temp_files() -> usize {
    std::fs::read_dir(std::env::temp_dir())
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.file_name()
                        .to_string_lossy()
                        .starts_with(quote_ingest::extract::TEMP_FILE_PREFIX)
                })
                .count()
        })
        .unwrap_or(0)
}
