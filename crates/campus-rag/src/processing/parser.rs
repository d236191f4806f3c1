//! Bytes-to-text conversion for user-uploaded documents.

use std::sync::Arc;

/// Converts a binary document to plain text; `None` when no text could be
/// extracted (scanned PDF, corrupt file).
pub trait DocumentConverter: Send + Sync {
    fn convert(&self, bytes: &[u8], filename: &str) -> Option<String>;
}

/// PDF text layer extraction via `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextConverter;

impl DocumentConverter for PdfTextConverter {
    fn convert(&self, bytes: &[u8], filename: &str) -> Option<String> {
        match pdf_extract::extract_text_from_mem(bytes) {
            Ok(text) => {
                let cleaned = clean_lines(&text);
                if cleaned.is_empty() {
                    tracing::warn!(filename = filename, "PDF contains no extractable text (scanned/image-based)");
                    None
                } else {
                    Some(cleaned)
                }
            }
            Err(e) => {
                tracing::warn!(filename = filename, error = %e, "PDF text extraction failed");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Html,
    PlainText,
    Unsupported,
}

impl DocumentFormat {
    /// MIME type first, file extension when the MIME type is missing or generic.
    pub fn detect(mime_type: &str, filename: &str) -> Self {
        let mime = mime_type.trim().to_lowercase();
        match mime.as_str() {
            "application/pdf" => return Self::Pdf,
            "text/html" | "application/xhtml+xml" => return Self::Html,
            m if m.starts_with("text/") => return Self::PlainText,
            "application/json" => return Self::PlainText,
            _ => {}
        }

        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "pdf" => Self::Pdf,
            "html" | "htm" => Self::Html,
            "txt" | "md" | "markdown" | "csv" | "json" => Self::PlainText,
            _ => Self::Unsupported,
        }
    }
}

/// Routes documents to the right extraction by format.
#[derive(Clone)]
pub struct TextExtractor {
    pdf: Arc<dyn DocumentConverter>,
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new(Arc::new(PdfTextConverter))
    }
}

impl TextExtractor {
    pub fn new(pdf: Arc<dyn DocumentConverter>) -> Self {
        Self { pdf }
    }

    pub fn extract(&self, bytes: &[u8], filename: &str, mime_type: &str) -> Option<String> {
        let text = match DocumentFormat::detect(mime_type, filename) {
            DocumentFormat::Pdf => self.pdf.convert(bytes, filename)?,
            DocumentFormat::Html => strip_html_tags(&String::from_utf8_lossy(bytes)),
            DocumentFormat::PlainText => String::from_utf8_lossy(bytes).into_owned(),
            DocumentFormat::Unsupported => {
                tracing::warn!(filename = filename, mime_type = mime_type, "Unsupported document type, skipping");
                return None;
            }
        };
        let text = clean_lines(&text);
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Trim every line and drop blank ones.
fn clean_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Visible text of an HTML page: tags removed, script/style bodies dropped,
/// block-level closings turned into line breaks.
fn strip_html_tags(html: &str) -> String {
    let mut result = String::with_capacity(html.len() / 2);
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        result.push_str(&rest[..open]);
        let after = &rest[open..];
        let Some(close) = after.find('>') else {
            rest = "";
            break;
        };
        let tag = after[1..close].trim().to_lowercase();
        rest = &after[close + 1..];

        for skipped in ["script", "style"] {
            if tag == skipped || tag.starts_with(&format!("{} ", skipped)) {
                let end_tag = format!("</{}>", skipped);
                rest = match rest.to_ascii_lowercase().find(&end_tag) {
                    Some(pos) => &rest[pos + end_tag.len()..],
                    None => "",
                };
            }
        }

        let name = tag.trim_start_matches('/').split_whitespace().next().unwrap_or("");
        if matches!(name, "br" | "br/" | "p" | "div" | "li" | "tr" | "h1" | "h2" | "h3" | "h4") {
            result.push('\n');
        }
    }
    result.push_str(rest);

    result
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}
