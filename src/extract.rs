//! Paragraph extraction from uploaded documents.
//!
//! [`TextExtractor`] is the seam between the ingestion pipeline and whatever
//! turns bytes into text. Two implementations ship with the crate:
//! - **[`LocalExtractor`]**: in-process parsing of plain text, PDF, and
//!   OOXML (docx, pptx, xlsx).
//! - **[`DocumentIntelligenceExtractor`](crate::document_intelligence::DocumentIntelligenceExtractor)**
//!   calls the remote "prebuilt-read" analysis service.
//!
//! Both return paragraphs in reading order. A document with no text yields
//! an empty list, not an error.

use async_trait::async_trait;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

use crate::error::IngestError;
use crate::models::UploadedFile;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum rows to process per sheet.
const XLSX_MAX_ROWS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Converts an uploaded file into paragraph strings.
///
/// Implementations must not retry; a failure is reported once as
/// [`IngestError::Extraction`] with the underlying cause in the message.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Short backend name for logs (e.g. `"local"`).
    fn name(&self) -> &str;

    /// Extract paragraphs in reading order.
    async fn extract_paragraphs(&self, file: &UploadedFile) -> Result<Vec<String>, IngestError>;
}

/// Format-level extraction failure, before it is surfaced to callers.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

impl From<ExtractError> for IngestError {
    fn from(err: ExtractError) -> Self {
        IngestError::Extraction(format!("Document extraction failed: {}", err))
    }
}

/// In-process extractor for text, PDF, and OOXML documents.
#[derive(Debug, Default, Clone)]
pub struct LocalExtractor;

impl LocalExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextExtractor for LocalExtractor {
    fn name(&self) -> &str {
        "local"
    }

    async fn extract_paragraphs(&self, file: &UploadedFile) -> Result<Vec<String>, IngestError> {
        let bytes = file.bytes.clone();
        let content_type = file.content_type.clone();
        // PDF and XML parsing are CPU-bound; keep them off the async workers.
        let result = tokio::task::spawn_blocking(move || extract_paragraphs(&bytes, &content_type))
            .await
            .map_err(|e| IngestError::Extraction(format!("Document extraction failed: {}", e)))?;
        Ok(result?)
    }
}

/// Extract paragraphs from `bytes` according to `content_type`.
///
/// Media-type parameters (`; charset=...`) are ignored.
pub fn extract_paragraphs(bytes: &[u8], content_type: &str) -> Result<Vec<String>, ExtractError> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        MIME_TEXT | MIME_MARKDOWN | MIME_CSV => Ok(split_paragraphs(&String::from_utf8_lossy(bytes))),
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        MIME_XLSX => extract_xlsx(bytes),
        _ => Err(ExtractError::UnsupportedContentType(content_type.to_string())),
    }
}

/// Guess a media type from a file extension, for CLI uploads.
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "pptx" => MIME_PPTX,
        "xlsx" => MIME_XLSX,
        "md" | "markdown" => MIME_MARKDOWN,
        "csv" => MIME_CSV,
        "txt" | "text" | "log" => MIME_TEXT,
        _ => "application/octet-stream",
    }
}

/// Split text on blank lines into trimmed, non-empty paragraphs.
fn split_paragraphs(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(split_paragraphs(&text))
}

fn open_archive(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_paragraph_runs(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let slide_names = numbered_entries(&archive, "ppt/slides/slide");
    let mut out = Vec::new();
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        out.extend(extract_paragraph_runs(&xml)?);
    }
    Ok(out)
}

/// Entries named `{prefix}{n}.xml`, sorted by `n`.
fn numbered_entries(archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Collect the text runs (`<*:t>`) of each paragraph (`<*:p>`).
///
/// Works for both WordprocessingML (`w:p`/`w:t`) and DrawingML
/// (`a:p`/`a:t`), which share local names. Empty paragraphs are dropped.
fn extract_paragraph_runs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut paragraphs = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"tab" {
                    current.push('\t');
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let trimmed = current.trim();
                    if !trimmed.is_empty() {
                        paragraphs.push(trimmed.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

fn extract_xlsx(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_names = numbered_entries(&archive, "xl/worksheets/sheet");
    let mut out = Vec::new();
    for name in sheet_names.into_iter().take(XLSX_MAX_SHEETS) {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        out.extend(extract_xlsx_rows(&sheet_xml, &shared_strings)?);
    }
    Ok(out)
}

/// Shared string table; a workbook without one has no string cells.
fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractError> {
    if archive.index_for_name("xl/sharedStrings.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_t => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Shared,
    Inline,
    Value,
}

/// One paragraph per non-empty row: its cell texts joined by spaces.
fn extract_xlsx_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<String>, ExtractError> {
    let mut rows = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut kind = CellKind::Value;
    let mut in_text = false;
    loop {
        if rows.len() >= XLSX_MAX_ROWS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    kind = CellKind::Value;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            kind = match attr.value.as_ref() {
                                b"s" => CellKind::Shared,
                                b"inlineStr" => CellKind::Inline,
                                _ => CellKind::Value,
                            };
                        }
                    }
                }
                b"v" => in_text = kind != CellKind::Inline,
                b"t" => in_text = kind == CellKind::Inline,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_text => {
                let raw = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                let value = raw.trim();
                if !value.is_empty() {
                    match kind {
                        CellKind::Shared => {
                            if let Some(s) = value
                                .parse::<usize>()
                                .ok()
                                .and_then(|i| shared_strings.get(i))
                            {
                                cells.push(s.clone());
                            }
                        }
                        CellKind::Inline | CellKind::Value => cells.push(value.to_string()),
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_text = false,
                b"row" => {
                    if !cells.is_empty() {
                        rows.push(cells.join(" "));
                        cells.clear();
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}
