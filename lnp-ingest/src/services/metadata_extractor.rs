//! Document metadata extraction
//!
//! Best-effort: page count, author and last-modified time. The upload
//! pipeline stores nulls on any failure.
//!
//! - PDF: page objects are counted, `/Author` and `/ModDate` read from the
//!   info dictionary
//! - DOCX: `docProps/core.xml` and `docProps/app.xml`
//! - DOC: nothing is extracted

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::io::{Cursor, Read};
use thiserror::Error;

use super::content_type::DocumentKind;
use crate::models::DocumentMetadata;

/// Metadata extraction errors
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Failed to read document: {0}")]
    ReadError(String),

    #[error("No metadata found")]
    NoMetadata,
}

pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn extract(kind: DocumentKind, bytes: &[u8]) -> Result<DocumentMetadata, MetadataError> {
        let metadata = match kind {
            DocumentKind::Pdf => extract_pdf(bytes),
            DocumentKind::Docx => extract_docx(bytes)?,
            DocumentKind::Doc => DocumentMetadata::default(),
        };

        if metadata == DocumentMetadata::default() {
            return Err(MetadataError::NoMetadata);
        }
        Ok(metadata)
    }
}

fn extract_pdf(bytes: &[u8]) -> DocumentMetadata {
    let text = String::from_utf8_lossy(bytes);

    let pages = count_page_objects(&text);
    DocumentMetadata {
        page_count: (pages > 0).then_some(pages),
        author: pdf_string_value(&text, "/Author"),
        modified_at: pdf_string_value(&text, "/ModDate").and_then(|v| parse_pdf_date(&v)),
    }
}

/// `/Type /Page` (any spacing) but not `/Type /Pages`
fn count_page_objects(text: &str) -> i64 {
    let mut count = 0;
    let mut rest = text;
    while let Some(idx) = rest.find("/Type") {
        let after = rest[idx + "/Type".len()..].trim_start();
        if let Some(tail) = after.strip_prefix("/Page") {
            if !tail.starts_with('s') {
                count += 1;
            }
        }
        rest = &rest[idx + "/Type".len()..];
    }
    count
}

/// Literal string following `key`, e.g. `/Author (Ada Obi)`
fn pdf_string_value(text: &str, key: &str) -> Option<String> {
    let start = text.find(key)? + key.len();
    let after = text[start..].trim_start().strip_prefix('(')?;
    let end = after.find(')')?;
    let value = after[..end].trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// `D:YYYYMMDDHHmmSS` with an optional zone suffix, read as UTC
fn parse_pdf_date(value: &str) -> Option<DateTime<Utc>> {
    let digits: String = value
        .trim_start_matches("D:")
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() < 8 {
        return None;
    }
    let padded = format!("{:0<14}", digits.get(..14).unwrap_or(&digits));
    NaiveDateTime::parse_from_str(&padded, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn extract_docx(bytes: &[u8]) -> Result<DocumentMetadata, MetadataError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| MetadataError::ReadError(e.to_string()))?;

    let core = read_entry(&mut archive, "docProps/core.xml");
    let app = read_entry(&mut archive, "docProps/app.xml");

    Ok(DocumentMetadata {
        page_count: app
            .as_deref()
            .and_then(|xml| xml_text(xml, "Pages"))
            .and_then(|v| v.parse().ok()),
        author: core.as_deref().and_then(|xml| xml_text(xml, "dc:creator")),
        modified_at: core
            .as_deref()
            .and_then(|xml| xml_text(xml, "dcterms:modified"))
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    })
}

fn read_entry(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, name: &str) -> Option<String> {
    let mut file = archive.by_name(name).ok()?;
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    Some(content)
}

/// Text content of the first `<tag ...>text</tag>`
fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)?;
    let content_start = start + xml[start..].find('>')? + 1;
    let content_end = content_start + xml[content_start..].find(&close)?;
    let value = xml[content_start..content_end].trim();
    (!value.is_empty()).then(|| value.to_string())
}
