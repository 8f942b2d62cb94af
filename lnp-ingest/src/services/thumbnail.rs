//! Preview cards for review queues
//!
//! The preview is an SVG card with type, name, page count and author. No
//! page content is rendered.

use super::content_type::DocumentKind;
use crate::models::DocumentMetadata;

const MAX_NAME_CHARS: usize = 40;

/// Storage path of the card for a stored document path
pub fn thumbnail_path_for(file_path: &str) -> String {
    match file_path.rsplit_once('.') {
        Some((stem, _ext)) => format!("{}.thumb.svg", stem),
        None => format!("{}.thumb.svg", file_path),
    }
}

pub fn render_card(kind: DocumentKind, file_name: &str, metadata: &DocumentMetadata) -> Result<Vec<u8>, String> {
    if file_name.trim().is_empty() {
        return Err("no file name to render".to_string());
    }

    let label = kind.extension().to_ascii_uppercase();
    let accent = match kind {
        DocumentKind::Pdf => "#c0392b",
        DocumentKind::Doc | DocumentKind::Docx => "#2b579a",
    };

    let name = truncate(file_name, MAX_NAME_CHARS);
    let pages = metadata
        .page_count
        .map(|n| format!("{} page{}", n, if n == 1 { "" } else { "s" }))
        .unwrap_or_else(|| "pages unknown".to_string());
    let author = metadata.author.as_deref().unwrap_or("author unknown");

    let svg = format!(
        concat!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="240" height="320" viewBox="0 0 240 320">"##,
            r##"<rect width="240" height="320" rx="8" fill="#ffffff" stroke="#d0d0d0"/>"##,
            r##"<rect width="240" height="56" rx="8" fill="{accent}"/>"##,
            r##"<text x="16" y="37" font-family="sans-serif" font-size="22" fill="#ffffff">{label}</text>"##,
            r##"<text x="16" y="96" font-family="sans-serif" font-size="13" fill="#222222">{name}</text>"##,
            r##"<text x="16" y="124" font-family="sans-serif" font-size="12" fill="#555555">{pages}</text>"##,
            r##"<text x="16" y="144" font-family="sans-serif" font-size="12" fill="#555555">{author}</text>"##,
            "</svg>"
        ),
        accent = accent,
        label = label,
        name = escape_xml(&name),
        pages = escape_xml(&pages),
        author = escape_xml(&truncate(author, MAX_NAME_CHARS)),
    );

    Ok(svg.into_bytes())
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let mut out: String = value.chars().take(max - 1).collect();
        out.push('…');
        out
    }
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
