//! EPUB container parsing.
//!
//! An EPUB is a zip archive. `META-INF/container.xml` points at the OPF
//! package document, whose `<manifest>` maps item ids to hrefs and whose
//! `<spine>` gives the reading order. Chapter titles and nesting levels come
//! from the table of contents: the NCX (EPUB 2) named by `spine@toc`, or the
//! `nav` document (EPUB 3) when no NCX exists.
//!
//! Every spine item becomes one [`ContentUnit`] with a
//! [`Location::Chapter`]. The `href` is the manifest href, relative to the
//! OPF, which is what reader UIs use to deep-link to the chapter.

use std::collections::HashMap;
use std::io::{Read, Seek};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use scraper::{ElementRef, Html, Selector};

use crate::error::{IngestError, Result};
use crate::models::{ContentUnit, Location};

/// Upper bound on any single archive entry we decompress.
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Elements rendered as line breaks when flattening chapter HTML.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "ol", "p",
    "pre", "section", "table", "tr", "ul",
];

/// Elements whose content is never text.
const SKIPPED_ELEMENTS: &[&str] = &["head", "script", "style", "svg", "title"];

#[derive(Debug, Clone)]
struct ManifestItem {
    href: String,
    media_type: String,
    properties: String,
}

#[derive(Debug, Default)]
struct Package {
    manifest: HashMap<String, ManifestItem>,
    spine: Vec<String>,
    toc_id: Option<String>,
}

#[derive(Debug, Clone)]
struct TocEntry {
    title: String,
    level: u32,
}

/// Parse an EPUB archive into one unit per spine item, in spine order.
pub fn parse_epub<R: Read + Seek>(reader: R) -> Result<Vec<ContentUnit>> {
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| IngestError::Parse(format!("not an EPUB archive: {}", e)))?;

    let container = read_entry(&mut archive, CONTAINER_PATH)?;
    let opf_path = rootfile_path(&container)?;
    let opf_dir = parent_dir(&opf_path);

    let opf = read_entry(&mut archive, &opf_path)?;
    let package = parse_package(&opf)?;
    if package.spine.is_empty() {
        return Err(IngestError::Parse("EPUB spine is empty".to_string()));
    }

    let toc = read_toc(&mut archive, &package, &opf_dir);

    let mut units = Vec::with_capacity(package.spine.len());
    for (i, idref) in package.spine.iter().enumerate() {
        let Some(item) = package.manifest.get(idref) else {
            tracing::warn!(idref = %idref, "spine item missing from manifest, skipping");
            continue;
        };
        let path = resolve_href(&opf_dir, &item.href);
        let content = read_entry(&mut archive, &path)?;
        let text = html_to_text(&String::from_utf8_lossy(&content));
        let entry = toc.get(&path);
        units.push(ContentUnit {
            text,
            location: Location::Chapter {
                id: idref.clone(),
                href: item.href.clone(),
                title: entry.map(|e| e.title.clone()),
                order: i as u32 + 1,
                level: entry.map(|e| e.level),
            },
        });
    }

    if units.is_empty() {
        return Err(IngestError::Parse(
            "EPUB spine references no manifest items".to_string(),
        ));
    }
    Ok(units)
}

fn read_entry<R: Read + Seek>(archive: &mut zip::ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| IngestError::Parse(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| IngestError::Parse(format!("{}: {}", name, e)))?;
    if out.len() as u64 >= MAX_ENTRY_BYTES {
        return Err(IngestError::Parse(format!(
            "EPUB entry {} exceeds size limit ({} bytes)",
            name, MAX_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn xml_error(what: &str, e: quick_xml::Error) -> IngestError {
    IngestError::Parse(format!("malformed {}: {}", what, e))
}

fn rootfile_path(xml: &[u8]) -> Result<String> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"rootfile" {
                    if let Some(path) = attr(&e, b"full-path") {
                        return Ok(path);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(CONTAINER_PATH, e)),
            _ => {}
        }
        buf.clear();
    }
    Err(IngestError::Parse(
        "container.xml has no rootfile".to_string(),
    ))
}

fn parse_package(xml: &[u8]) -> Result<Package> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut package = Package::default();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"item" => {
                    if let (Some(id), Some(href)) = (attr(&e, b"id"), attr(&e, b"href")) {
                        package.manifest.insert(
                            id,
                            ManifestItem {
                                href,
                                media_type: attr(&e, b"media-type").unwrap_or_default(),
                                properties: attr(&e, b"properties").unwrap_or_default(),
                            },
                        );
                    }
                }
                b"spine" => package.toc_id = attr(&e, b"toc"),
                b"itemref" => {
                    if let Some(idref) = attr(&e, b"idref") {
                        package.spine.push(idref);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("OPF package", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(package)
}

/// Chapter titles keyed by resolved archive path. Best effort: a missing or
/// broken TOC yields an empty map, never an error.
fn read_toc<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    package: &Package,
    opf_dir: &str,
) -> HashMap<String, TocEntry> {
    let ncx = package
        .toc_id
        .as_ref()
        .and_then(|id| package.manifest.get(id))
        .or_else(|| {
            package
                .manifest
                .values()
                .find(|item| item.media_type == "application/x-dtbncx+xml")
        });
    if let Some(item) = ncx {
        let path = resolve_href(opf_dir, &item.href);
        match read_entry(archive, &path).and_then(|xml| parse_ncx(&xml, &parent_dir(&path))) {
            Ok(toc) => return toc,
            Err(e) => tracing::warn!(path = %path, error = %e, "ignoring unreadable NCX"),
        }
    }

    let nav = package
        .manifest
        .values()
        .find(|item| item.properties.split_whitespace().any(|p| p == "nav"));
    if let Some(item) = nav {
        let path = resolve_href(opf_dir, &item.href);
        match read_entry(archive, &path).and_then(|html| {
            parse_nav(&String::from_utf8_lossy(&html), &parent_dir(&path))
        }) {
            Ok(toc) => return toc,
            Err(e) => tracing::warn!(path = %path, error = %e, "ignoring unreadable nav document"),
        }
    }

    HashMap::new()
}

fn parse_ncx(xml: &[u8], base_dir: &str) -> Result<HashMap<String, TocEntry>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut toc = HashMap::new();
    let mut depth = 0u32;
    let mut label: Option<String> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"navPoint" => {
                    depth += 1;
                    label = None;
                }
                b"text" if depth > 0 && label.is_none() => {
                    if let Ok(Event::Text(te)) = reader.read_event_into(&mut Vec::new()) {
                        label = Some(te.unescape().unwrap_or_default().trim().to_string());
                    }
                }
                b"content" => record_ncx_target(&e, base_dir, depth, &label, &mut toc),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"content" => {
                record_ncx_target(&e, base_dir, depth, &label, &mut toc)
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"navPoint" => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("NCX", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(toc)
}

fn record_ncx_target(
    e: &BytesStart<'_>,
    base_dir: &str,
    depth: u32,
    label: &Option<String>,
    toc: &mut HashMap<String, TocEntry>,
) {
    let (Some(src), Some(title)) = (attr(e, b"src"), label.as_ref()) else {
        return;
    };
    // first entry wins: later ones are usually fragments inside the chapter
    toc.entry(resolve_href(base_dir, &src))
        .or_insert_with(|| TocEntry {
            title: title.clone(),
            level: depth.saturating_sub(1),
        });
}

fn parse_nav(html: &str, base_dir: &str) -> Result<HashMap<String, TocEntry>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("nav a[href]")
        .map_err(|e| IngestError::Parse(format!("CSS selector error: {:?}", e)))?;
    let mut toc = HashMap::new();
    for link in document.select(&selector) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let title = collapse_whitespace(&link.text().collect::<String>());
        if title.is_empty() {
            continue;
        }
        let nesting = link
            .ancestors()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "ol")
            .count() as u32;
        toc.entry(resolve_href(base_dir, href))
            .or_insert_with(|| TocEntry {
                title,
                level: nesting.saturating_sub(1),
            });
    }
    Ok(toc)
}

/// Flatten chapter (X)HTML into plain text, one line per block element.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    let body = Selector::parse("body")
        .ok()
        .and_then(|s| document.select(&s).next());
    walk(body.unwrap_or_else(|| document.root_element()), &mut raw);

    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0;
    for line in raw.lines().map(str::trim) {
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        blank_run = 0;
    }
    out
}

fn walk(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            push_collapsed(out, text);
        } else if let Some(el) = ElementRef::wrap(child) {
            let name = el.value().name();
            if SKIPPED_ELEMENTS.contains(&name) {
                continue;
            }
            if name == "br" {
                out.push('\n');
                continue;
            }
            let block = BLOCK_ELEMENTS.contains(&name);
            if block {
                out.push('\n');
            }
            walk(el, out);
            if block {
                out.push('\n');
            }
        }
    }
}

fn push_collapsed(out: &mut String, text: &str) {
    let mut last_space = out.ends_with(' ') || out.ends_with('\n') || out.is_empty();
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(c);
            last_space = false;
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(i) => path[..i].to_string(),
        None => String::new(),
    }
}

/// Resolve an href against a directory inside the archive, dropping any
/// `#fragment` and normalizing `.`/`..` segments.
fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or_default();
    let href = percent_decode(href);
    let mut parts: Vec<&str> = if href.starts_with('/') {
        Vec::new()
    } else {
        base_dir.split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
