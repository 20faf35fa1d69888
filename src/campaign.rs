// src/campaign.rs

//! Downstream record creation once a document is parsed and matched.
//!
//! Invoice path: JobCompletion + ReviewRequest. Estimate path:
//! QuoteFollowupCampaign. Each path checks its idempotency key first and
//! relies on the store's uniqueness constraints when two deliveries race.

use crate::heuristics::{DocumentType, ParsedDocument};
use crate::intake_db::{
    InsertOutcome, IntakeStore, NewFollowupCampaign, NewJobCompletion, StoreResult,
};
use serde_json::json;
use tracing::info;

pub const ZERO_AMOUNT: &str = "zero_amount";

/// Terminal state of the trigger for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Missing customer match, document number or (invoices) email.
    InsufficientData { missing: Vec<&'static str> },
    /// Estimate with no or zero total.
    ZeroAmount,
    /// An equivalent record already exists.
    Duplicate,
    JobCompletionCreated {
        job_completion_id: i64,
        review_request_id: Option<i64>,
    },
    FollowupCreated { campaign_id: i64 },
}

/// Where the document came from, recorded on the created rows.
#[derive(Debug, Clone)]
pub struct SourceInfo<'a> {
    pub source: &'a str,
    pub email_from: Option<&'a str>,
    pub email_subject: Option<&'a str>,
    pub pdf_filename: Option<&'a str>,
}

pub fn trigger(
    store: &IntakeStore,
    doc: &ParsedDocument,
    customer_id: Option<i64>,
    origin: &SourceInfo<'_>,
) -> StoreResult<TriggerOutcome> {
    match doc.document_type {
        DocumentType::Invoice => trigger_invoice(store, doc, customer_id, origin),
        DocumentType::Estimate => trigger_estimate(store, doc, customer_id),
    }
}

fn trigger_invoice(
    store: &IntakeStore,
    doc: &ParsedDocument,
    customer_id: Option<i64>,
    origin: &SourceInfo<'_>,
) -> StoreResult<TriggerOutcome> {
    let (Some(customer_id), Some(invoice_number), Some(email)) = (
        customer_id,
        doc.document_number.as_deref(),
        doc.customer_email.as_deref(),
    ) else {
        return Ok(insufficient(doc, customer_id, true));
    };

    if store.find_job_completion(customer_id, invoice_number)?.is_some() {
        info!(customer_id, invoice = %invoice_number, "Invoice already processed");
        return Ok(TriggerOutcome::Duplicate);
    }

    let skip_review = store.active_review_request_exists(customer_id)?;
    if skip_review {
        info!(customer_id, "Customer already has a queued review request");
    }

    let job = NewJobCompletion {
        customer_id,
        invoice_number: invoice_number.to_string(),
        completed_date: doc.document_date,
        total_amount: doc.total_amount,
        customer_email: email.to_string(),
        source: origin.source.to_string(),
        source_metadata: json!({
            "emailFrom": origin.email_from,
            "emailSubject": origin.email_subject,
            "pdfFilename": origin.pdf_filename,
            "confidence": doc.confidence,
            "technicianName": doc.technician_name,
            "serviceDescription": doc.service_description,
        }),
    };

    Ok(match store.create_job_completion(&job, skip_review)? {
        InsertOutcome::Created(ids) => TriggerOutcome::JobCompletionCreated {
            job_completion_id: ids.job_completion_id,
            review_request_id: ids.review_request_id,
        },
        InsertOutcome::Duplicate => TriggerOutcome::Duplicate,
    })
}

fn trigger_estimate(
    store: &IntakeStore,
    doc: &ParsedDocument,
    customer_id: Option<i64>,
) -> StoreResult<TriggerOutcome> {
    let amount = match doc.total_amount {
        Some(amount) if amount != 0 => amount,
        _ => {
            info!(document_number = ?doc.document_number, "Zero-amount estimate; no follow-up");
            return Ok(TriggerOutcome::ZeroAmount);
        }
    };

    let (Some(customer_id), Some(estimate_number)) = (customer_id, doc.document_number.as_deref())
    else {
        return Ok(insufficient(doc, customer_id, false));
    };

    if store.active_followup_exists(customer_id)? {
        info!(customer_id, "Customer already has a live follow-up campaign");
        return Ok(TriggerOutcome::Duplicate);
    }

    let campaign = NewFollowupCampaign {
        customer_id,
        customer_name: doc.customer_name.clone(),
        customer_email: doc.customer_email.clone(),
        customer_phone: doc.customer_phone.clone(),
        estimate_number: estimate_number.to_string(),
        estimate_amount: amount,
    };

    Ok(match store.create_followup_campaign(&campaign)? {
        InsertOutcome::Created(campaign_id) => TriggerOutcome::FollowupCreated { campaign_id },
        InsertOutcome::Duplicate => TriggerOutcome::Duplicate,
    })
}

fn insufficient(doc: &ParsedDocument, customer_id: Option<i64>, needs_email: bool) -> TriggerOutcome {
    let mut missing = Vec::new();
    if customer_id.is_none() {
        missing.push("customer match");
    }
    if doc.document_number.is_none() {
        missing.push("document number");
    }
    if needs_email && doc.customer_email.is_none() {
        missing.push("customer email");
    }
    info!(missing = ?missing, "Insufficient data for downstream records");
    TriggerOutcome::InsufficientData { missing }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: SourceInfo<'static> = SourceInfo {
        source: "mailgun_invoice",
        email_from: Some("office@acme.test"),
        email_subject: Some("Invoice 4521"),
        pdf_filename: Some("4521.pdf"),
    };

    fn doc(document_type: DocumentType) -> ParsedDocument {
        let mut doc = ParsedDocument::failed(document_type, "seed");
        doc.extraction_errors.clear();
        doc.customer_name = Some("Jane Doe".into());
        doc.customer_email = Some("jane@example.com".into());
        doc.document_number = Some("4521".into());
        doc.total_amount = Some(35000);
        doc.confidence = doc.compute_confidence();
        doc
    }

    fn store() -> (IntakeStore, i64) {
        let store = IntakeStore::open_in_memory().unwrap();
        let id = store.insert_customer("Jane Doe").unwrap();
        (store, id)
    }

    #[test]
    fn test_invoice_creates_then_dedupes() {
        let (store, id) = store();
        let invoice = doc(DocumentType::Invoice);

        let first = trigger(&store, &invoice, Some(id), &ORIGIN).unwrap();
        assert!(matches!(
            first,
            TriggerOutcome::JobCompletionCreated {
                review_request_id: Some(_),
                ..
            }
        ));

        let second = trigger(&store, &invoice, Some(id), &ORIGIN).unwrap();
        assert_eq!(second, TriggerOutcome::Duplicate);

        let counts = store.get_counts().unwrap();
        assert_eq!((counts.job_completions, counts.review_requests), (1, 1));
    }

    #[test]
    fn test_invoice_without_email_is_insufficient() {
        let (store, id) = store();
        let mut invoice = doc(DocumentType::Invoice);
        invoice.customer_email = None;
        let outcome = trigger(&store, &invoice, Some(id), &ORIGIN).unwrap();
        assert_eq!(
            outcome,
            TriggerOutcome::InsufficientData {
                missing: vec!["customer email"]
            }
        );
    }

    #[test]
    fn test_unmatched_is_insufficient() {
        let (store, _) = store();
        let outcome = trigger(&store, &doc(DocumentType::Invoice), None, &ORIGIN).unwrap();
        assert!(matches!(outcome, TriggerOutcome::InsufficientData { .. }));
        assert_eq!(store.get_counts().unwrap().job_completions, 0);
    }

    #[test]
    fn test_zero_and_missing_estimate_amounts_skip() {
        let (store, id) = store();
        let mut estimate = doc(DocumentType::Estimate);
        estimate.total_amount = Some(0);
        assert_eq!(
            trigger(&store, &estimate, Some(id), &ORIGIN).unwrap(),
            TriggerOutcome::ZeroAmount
        );
        estimate.total_amount = None;
        assert_eq!(
            trigger(&store, &estimate, Some(id), &ORIGIN).unwrap(),
            TriggerOutcome::ZeroAmount
        );
        assert_eq!(store.get_counts().unwrap().followup_campaigns, 0);
    }

    #[test]
    fn test_estimate_creates_single_live_campaign() {
        let (store, id) = store();
        let estimate = doc(DocumentType::Estimate);
        assert!(matches!(
            trigger(&store, &estimate, Some(id), &ORIGIN).unwrap(),
            TriggerOutcome::FollowupCreated { .. }
        ));

        let mut another = doc(DocumentType::Estimate);
        another.document_number = Some("4522".into());
        assert_eq!(
            trigger(&store, &another, Some(id), &ORIGIN).unwrap(),
            TriggerOutcome::Duplicate
        );
    }

    #[test]
    fn test_estimate_without_email_still_creates() {
        let (store, id) = store();
        let mut estimate = doc(DocumentType::Estimate);
        estimate.customer_email = None;
        assert!(matches!(
            trigger(&store, &estimate, Some(id), &ORIGIN).unwrap(),
            TriggerOutcome::FollowupCreated { .. }
        ));
    }
}
