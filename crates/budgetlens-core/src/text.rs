//! Statement text sources
//!
//! Turns uploaded statement bytes into plain text for the extraction adapter.
//! Page boundaries are kept as `--- PAGE n ---` marker lines so segments can be
//! cut on page edges.

use async_trait::async_trait;

use crate::error::{Error, Result};

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Prefix of the marker line that opens each page
pub const PAGE_MARKER_PREFIX: &str = "--- PAGE ";

#[async_trait]
pub trait TextSource: Send + Sync {
    /// Extract the statement text; fails with `Error::UnreadablePdf` when no text
    /// can be recovered
    async fn extract_text(&self, bytes: &[u8]) -> Result<String>;

    fn name(&self) -> &'static str;
}

/// Pick a text source by sniffing the content
pub fn for_bytes(bytes: &[u8]) -> Box<dyn TextSource> {
    if is_pdf(bytes) {
        Box::new(PdfTextSource)
    } else {
        Box::new(PlainTextSource)
    }
}

pub fn is_pdf(bytes: &[u8]) -> bool {
    // Some generators put a BOM or whitespace before the header
    bytes
        .windows(PDF_MAGIC.len())
        .take(1024)
        .any(|w| w == PDF_MAGIC)
}

/// PDF statements, via pdf-extract
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextSource;

#[async_trait]
impl TextSource for PdfTextSource {
    async fn extract_text(&self, bytes: &[u8]) -> Result<String> {
        let owned = bytes.to_vec();
        let extracted = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem(&owned)
        })
        .await
        .map_err(|e| {
            // pdf-extract panics on some malformed inputs
            Error::UnreadablePdf(format!("extractor aborted: {}", e))
        })?
        .map_err(|e| Error::UnreadablePdf(e.to_string()))?;

        let text = with_page_markers(extracted.split('\u{000C}'));
        if text.trim().is_empty() {
            return Err(Error::UnreadablePdf(
                "no extractable text (scanned or image-only PDF?)".into(),
            ));
        }

        tracing::debug!(
            pages = count_pages(&text),
            chars = text.len(),
            "Extracted PDF text"
        );
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "pdf"
    }
}

/// UTF-8 text statements
///
/// Form feeds are treated as page breaks, same as extracted PDF text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextSource;

#[async_trait]
impl TextSource for PlainTextSource {
    async fn extract_text(&self, bytes: &[u8]) -> Result<String> {
        let raw = std::str::from_utf8(bytes)
            .map_err(|e| Error::InvalidData(format!("Statement is not valid UTF-8: {}", e)))?;
        let raw = raw.strip_prefix('\u{FEFF}').unwrap_or(raw);

        if raw.contains('\u{000C}') {
            Ok(with_page_markers(raw.split('\u{000C}')))
        } else {
            Ok(raw.to_string())
        }
    }

    fn name(&self) -> &'static str {
        "text"
    }
}

/// Join pages with `--- PAGE n ---` marker lines, skipping blank pages
fn with_page_markers<'a>(pages: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for (n, page) in pages
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .enumerate()
    {
        out.push_str(&format!("{}{} ---\n", PAGE_MARKER_PREFIX, n + 1));
        out.push_str(page);
        out.push('\n');
    }
    out
}

fn count_pages(text: &str) -> usize {
    text.lines()
        .filter(|l| l.starts_with(PAGE_MARKER_PREFIX))
        .count()
}
