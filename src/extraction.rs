//! Text extraction from uploaded documents.
//!
//! Extraction is CPU-bound and synchronous; the pipeline runs it on the blocking pool.

use lopdf::Document;
use thiserror::Error;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Errors raised while turning uploaded bytes into text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Document format is not one the extractor understands.
    #[error("Unsupported document format (expected PDF)")]
    Unsupported,
    /// Document claimed a supported format but could not be parsed.
    #[error("Malformed document: {0}")]
    Malformed(String),
    /// Document parsed but yielded no text on any page.
    #[error("Document contains no extractable text")]
    NoText,
}

/// Black-box `bytes -> pages of text` extractor.
pub trait TextExtractor: Send + Sync {
    /// Extract the text of each page, in page order.
    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError>;
}

/// PDF extractor backed by `lopdf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        if !looks_like_pdf(bytes) {
            return Err(ExtractionError::Unsupported);
        }

        let document =
            Document::load_mem(bytes).map_err(|err| ExtractionError::Malformed(err.to_string()))?;
        let pages = document.get_pages();
        let mut texts = Vec::with_capacity(pages.len());
        for page_number in pages.keys() {
            match document.extract_text(&[*page_number]) {
                Ok(text) => texts.push(text),
                Err(err) => {
                    tracing::warn!(page = page_number, error = %err, "Skipping unreadable page");
                }
            }
        }

        tracing::debug!(
            pages = pages.len(),
            extracted = texts.len(),
            "PDF text extracted"
        );
        ensure_text(texts)
    }
}

/// Join extracted pages the way downstream normalization expects.
pub fn join_pages(pages: &[String]) -> String {
    pages.join("\n")
}

fn looks_like_pdf(bytes: &[u8]) -> bool {
    // Some producers emit a short preamble before the header.
    let window = &bytes[..bytes.len().min(1024)];
    window
        .windows(PDF_MAGIC.len())
        .any(|candidate| candidate == PDF_MAGIC)
}

fn ensure_text(pages: Vec<String>) -> Result<Vec<String>, ExtractionError> {
    if pages.iter().all(|page| page.trim().is_empty()) {
        Err(ExtractionError::NoText)
    } else {
        Ok(pages)
    }
}
