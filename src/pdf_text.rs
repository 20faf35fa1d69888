// src/pdf_text.rs

use crate::heuristics::{self, DocumentType, ParsedDocument};
use lopdf::{Document, ObjectId};
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{error, info, warn};

/// Fewer non-whitespace characters than this means no usable text layer.
const MIN_TEXT_CHARS: usize = 30;

/// Turns PDF bytes into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<String, String>;
}

/// `lopdf` structural check followed by `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<String, String> {
        let doc = Document::load_mem(pdf_bytes).map_err(|e| format!("Failed to parse PDF: {e}"))?;

        if looks_like_scanned(&doc) {
            info!("PDF structural check: likely scanned / image-only");
            return Err("PDF appears to be scanned; no text layer to extract".to_string());
        }

        let text = pdf_extract::extract_text_from_mem(pdf_bytes).map_err(|e| {
            warn!(error = %e, "pdf-extract failed");
            format!("Text extraction failed: {e}")
        })?;

        let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
        if meaningful < MIN_TEXT_CHARS {
            info!(chars = meaningful, "Extracted text too short");
            return Err(format!(
                "Extracted text too short ({meaningful} characters); PDF may be scanned"
            ));
        }

        info!(chars = meaningful, "Text extracted successfully");
        Ok(text)
    }
}

/// Fraction of pages that must be image-only before the document counts as a scan.
const SCANNED_PAGE_RATIO: f64 = 0.8;

/// A page that draws images but declares no fonts carries no text layer.
fn is_image_only(doc: &Document, page_id: ObjectId) -> bool {
    let resources = doc
        .get_dictionary(page_id)
        .and_then(|page| page.get(b"Resources"))
        .and_then(|r| doc.dereference(r))
        .and_then(|(_, resolved)| resolved.as_dict());
    let Ok(resources) = resources else {
        return false;
    };

    let non_empty = |key: &[u8]| {
        resources
            .get(key)
            .and_then(|obj| doc.dereference(obj))
            .and_then(|(_, resolved)| resolved.as_dict())
            .is_ok_and(|dict| !dict.is_empty())
    };
    non_empty(b"XObject") && !non_empty(b"Font")
}

fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }

    let image_only = pages
        .values()
        .filter(|id| is_image_only(doc, **id))
        .count();
    let ratio = image_only as f64 / pages.len() as f64;
    info!(pages = pages.len(), image_only, "Scanned-page check");
    ratio >= SCANNED_PAGE_RATIO
}

/// Extract text and run the field rules. Never fails: an unreadable PDF
/// yields a zero-confidence document carrying the reason.
pub fn parse_pdf(
    extractor: &dyn TextExtractor,
    pdf_bytes: &[u8],
    document_type: DocumentType,
) -> ParsedDocument {
    match extract_contained(extractor, pdf_bytes) {
        Ok(text) => {
            let doc = heuristics::extract_document(&text, document_type);
            info!(
                confidence = doc.confidence,
                document_number = ?doc.document_number,
                total_amount = ?doc.total_amount,
                errors = doc.extraction_errors.len(),
                "Extraction result"
            );
            doc
        }
        Err(e) => {
            warn!(error = %e, "PDF text extraction failed");
            ParsedDocument::failed(document_type, format!("PDF parsing failed: {e}"))
        }
    }
}

/// Run the extractor with panics turned into errors. pdf-extract panics on some
/// malformed fonts and encodings.
fn extract_contained(extractor: &dyn TextExtractor, pdf_bytes: &[u8]) -> Result<String, String> {
    catch_unwind(AssertUnwindSafe(|| extractor.extract_text(pdf_bytes))).unwrap_or_else(|panic| {
        let message = if let Some(s) = panic.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        error!(panic = %message, "PDF text extractor panicked");
        Err(format!("text extraction panicked: {message}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingExtractor;

    impl TextExtractor for FailingExtractor {
        fn extract_text(&self, _pdf_bytes: &[u8]) -> Result<String, String> {
            Err("boom".to_string())
        }
    }

    struct PanickingExtractor;

    impl TextExtractor for PanickingExtractor {
        fn extract_text(&self, _pdf_bytes: &[u8]) -> Result<String, String> {
            panic!("unsupported font encoding");
        }
    }

    struct Utf8Extractor;

    impl TextExtractor for Utf8Extractor {
        fn extract_text(&self, pdf_bytes: &[u8]) -> Result<String, String> {
            Ok(String::from_utf8_lossy(pdf_bytes).into_owned())
        }
    }

    #[test]
    fn test_garbage_bytes() {
        let result = PdfTextExtractor.extract_text(b"this is not a pdf");
        assert!(result.unwrap_err().starts_with("Failed to parse PDF"));
    }

    #[test]
    fn test_extractor_failure_degrades_to_empty_document() {
        let doc = parse_pdf(&FailingExtractor, b"%PDF-1.4", DocumentType::Estimate);
        assert_eq!(doc.document_type, DocumentType::Estimate);
        assert_eq!(doc.confidence, 0);
        assert_eq!(doc.raw_text, "");
        assert_eq!(doc.extraction_errors, vec!["PDF parsing failed: boom"]);
        assert!(doc.customer_name.is_none() && doc.total_amount.is_none());
    }

    #[test]
    fn test_extractor_panic_degrades_to_empty_document() {
        let doc = parse_pdf(&PanickingExtractor, b"%PDF-1.4", DocumentType::Invoice);
        assert_eq!(doc.confidence, 0);
        assert_eq!(
            doc.extraction_errors,
            vec!["PDF parsing failed: text extraction panicked: unsupported font encoding"]
        );
    }

    #[test]
    fn test_garbage_bytes_through_parse_pdf() {
        let doc = parse_pdf(&PdfTextExtractor, b"not a pdf", DocumentType::Invoice);
        assert_eq!(doc.confidence, 0);
        assert_eq!(doc.extraction_errors.len(), 1);
    }

    #[test]
    fn test_text_flows_into_rules() {
        let doc = parse_pdf(
            &Utf8Extractor,
            b"Estimate #: E-100\nTotal: $1,250.00",
            DocumentType::Estimate,
        );
        assert_eq!(doc.document_number.as_deref(), Some("E-100"));
        assert_eq!(doc.total_amount, Some(125000));
        assert_eq!(doc.confidence, 45);
    }
}
