// src/pipeline.rs

//! Parse, match and trigger for one authenticated PDF. Runs on a blocking
//! thread; every stage writes its result into the request's log entry.

use crate::campaign::{self, SourceInfo, TriggerOutcome, ZERO_AMOUNT};
use crate::heuristics::DocumentType;
use crate::intake_db::{IntakeStore, StoreResult};
use crate::matcher::{self, CustomerMatch};
use crate::pdf_text::{self, TextExtractor};
use crate::processing_log::{LogStatus, ProcessingLogEntry};
use tracing::{error, info, info_span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub confidence: u8,
    pub customer: CustomerMatch,
    pub outcome: TriggerOutcome,
}

impl PipelineReport {
    pub fn job_completion_created(&self) -> bool {
        matches!(self.outcome, TriggerOutcome::JobCompletionCreated { .. })
    }

    pub fn review_request_created(&self) -> bool {
        matches!(
            self.outcome,
            TriggerOutcome::JobCompletionCreated {
                review_request_id: Some(_),
                ..
            }
        )
    }

    pub fn campaign_created(&self) -> bool {
        matches!(self.outcome, TriggerOutcome::FollowupCreated { .. })
    }
}

pub fn process_document(
    store: &IntakeStore,
    extractor: &dyn TextExtractor,
    pdf_bytes: &[u8],
    document_type: DocumentType,
    origin: &SourceInfo<'_>,
    entry: &mut ProcessingLogEntry,
) -> StoreResult<PipelineReport> {
    let span = info_span!(
        "pipeline",
        channel = %entry.channel,
        document_type = document_type.as_str(),
        pdf = ?origin.pdf_filename
    );
    let _guard = span.enter();

    let doc = pdf_text::parse_pdf(extractor, pdf_bytes, document_type);
    let confidence = doc.confidence;
    entry.extracted_data = Some(doc.clone());
    entry.advance(LogStatus::Parsed);

    let result = matcher::match_customer(
        store,
        doc.customer_phone.as_deref(),
        doc.customer_email.as_deref(),
    )
    .and_then(|customer| {
        entry.matched_customer_id = customer.customer_id;
        entry.match_source = customer.source;
        campaign::trigger(store, &doc, customer.customer_id, origin).map(|o| (customer, o))
    });

    let (customer, outcome) = match result {
        Ok(found) => found,
        Err(e) => {
            error!(error = %e, "Downstream processing failed");
            entry.fail(e.to_string());
            return Err(e);
        }
    };

    match &outcome {
        TriggerOutcome::InsufficientData { .. } => {}
        TriggerOutcome::ZeroAmount => entry.skip(Some(ZERO_AMOUNT), None),
        TriggerOutcome::Duplicate => {
            entry.advance(LogStatus::Processed);
        }
        TriggerOutcome::JobCompletionCreated { .. } | TriggerOutcome::FollowupCreated { .. } => {
            entry.advance(LogStatus::Processed);
            entry.advance(LogStatus::Completed);
        }
    }
    info!(status = %entry.status, outcome = ?outcome, "Document processed");

    Ok(PipelineReport {
        confidence,
        customer,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake_db::ContactType;
    use crate::matcher::MatchSource;

    struct TextStub;

    impl TextExtractor for TextStub {
        fn extract_text(&self, pdf_bytes: &[u8]) -> Result<String, String> {
            String::from_utf8(pdf_bytes.to_vec()).map_err(|e| e.to_string())
        }
    }

    const ORIGIN: SourceInfo<'static> = SourceInfo {
        source: "mailgun_inbox",
        email_from: None,
        email_subject: None,
        pdf_filename: Some("doc.pdf"),
    };

    const INVOICE: &str = "Invoice #: 4521\nCustomer: Jane Doe\njane@example.com\nTotal: $350.00\n";

    fn seeded() -> IntakeStore {
        let store = IntakeStore::open_in_memory().unwrap();
        let id = store.insert_customer("Jane Doe").unwrap();
        store
            .add_contact(id, ContactType::Email, "Jane@Example.com")
            .unwrap();
        store
    }

    fn run(store: &IntakeStore, text: &str, doc_type: DocumentType) -> (ProcessingLogEntry, PipelineReport) {
        let mut entry = ProcessingLogEntry::new("inbox");
        let report =
            process_document(store, &TextStub, text.as_bytes(), doc_type, &ORIGIN, &mut entry)
                .unwrap();
        (entry, report)
    }

    #[test]
    fn test_invoice_completes() {
        let store = seeded();
        let (entry, report) = run(&store, INVOICE, DocumentType::Invoice);
        assert_eq!(entry.status, LogStatus::Completed);
        assert_eq!(entry.match_source, Some(MatchSource::Email));
        assert!(report.job_completion_created());
        assert!(report.review_request_created());
        assert!(!report.campaign_created());
    }

    #[test]
    fn test_repeat_invoice_is_processed() {
        let store = seeded();
        run(&store, INVOICE, DocumentType::Invoice);
        let (entry, report) = run(&store, INVOICE, DocumentType::Invoice);
        assert_eq!(entry.status, LogStatus::Processed);
        assert_eq!(report.outcome, TriggerOutcome::Duplicate);
    }

    #[test]
    fn test_unmatched_stays_parsed() {
        let store = seeded();
        let text = INVOICE.replace("jane@example.com", "nobody@example.com");
        let (entry, report) = run(&store, &text, DocumentType::Invoice);
        assert_eq!(entry.status, LogStatus::Parsed);
        assert_eq!(entry.matched_customer_id, None);
        assert!(!report.job_completion_created());
        assert!(entry.extracted_data.is_some());
    }

    #[test]
    fn test_zero_estimate_skipped() {
        let store = seeded();
        let text = "Estimate #: 88\nCustomer: Jane Doe\njane@example.com\nTotal: $0.00\n";
        let (entry, report) = run(&store, text, DocumentType::Estimate);
        assert_eq!(entry.status, LogStatus::Skipped);
        assert_eq!(entry.skip_reason.as_deref(), Some(ZERO_AMOUNT));
        assert!(!report.campaign_created());
        assert!(entry.matched_customer_id.is_some());
    }

    #[test]
    fn test_unreadable_pdf_is_parsed_with_zero_confidence() {
        let store = seeded();
        let mut entry = ProcessingLogEntry::new("invoices");
        let report = process_document(
            &store,
            &TextStub,
            &[0xff, 0xfe, 0x00],
            DocumentType::Invoice,
            &ORIGIN,
            &mut entry,
        )
        .unwrap();
        assert_eq!(report.confidence, 0);
        assert_eq!(entry.status, LogStatus::Parsed);
        assert!(matches!(report.outcome, TriggerOutcome::InsufficientData { .. }));
    }
}
