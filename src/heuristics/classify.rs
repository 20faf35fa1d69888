use super::DocumentType;
use tracing::warn;

const INVOICE_KEYWORDS: &[&str] = &["invoice", "receipt", "payment", "completed job"];
const ESTIMATE_KEYWORDS: &[&str] = &["estimate", "quote", "proposal", "bid"];

/// Keyword verdict for an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Invoice,
    Estimate,
    Unknown,
}

impl Classification {
    /// Resolve to a concrete document type. `Unknown` falls back to
    /// `Invoice` and says so in the log.
    pub fn resolve(self, subject: &str, filename: &str) -> DocumentType {
        match self {
            Classification::Invoice => DocumentType::Invoice,
            Classification::Estimate => DocumentType::Estimate,
            Classification::Unknown => {
                warn!(
                    subject = %subject,
                    filename = %filename,
                    "Could not classify document; defaulting to invoice"
                );
                DocumentType::Invoice
            }
        }
    }
}

/// Invoice keywords are checked before estimate keywords; the first set with a
/// hit in either the subject or the filename wins.
pub fn classify(subject: &str, filename: &str) -> Classification {
    let haystack = format!("{} {}", subject.to_lowercase(), filename.to_lowercase());
    let hit = |keywords: &[&str]| keywords.iter().any(|k| haystack.contains(k));

    if hit(INVOICE_KEYWORDS) {
        Classification::Invoice
    } else if hit(ESTIMATE_KEYWORDS) {
        Classification::Estimate
    } else {
        Classification::Unknown
    }
}
