// src/heuristics/mod.rs

mod classify;
mod fields;

pub use classify::classify;

use serde::{Deserialize, Serialize};
use time::Date;

/// Business classification of an inbound PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Invoice,
    Estimate,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::Estimate => "estimate",
        }
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "invoice" => Ok(DocumentType::Invoice),
            "estimate" => Ok(DocumentType::Estimate),
            other => Err(format!("unknown document type '{other}'")),
        }
    }
}

/// A single billed service line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLine {
    pub description: String,
    /// Cents.
    pub amount: i64,
}

/// All structured data we can extract from an invoice or estimate PDF.
///
/// Money fields are integer cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedDocument {
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub document_number: Option<String>,
    pub document_type: DocumentType,
    pub document_date: Option<Date>,
    pub total_amount: Option<i64>,
    pub subtotal: Option<i64>,
    pub tax: Option<i64>,
    pub service_description: Option<String>,
    pub services: Vec<ServiceLine>,
    pub technician_name: Option<String>,
    pub job_notes: Option<String>,
    pub raw_text: String,
    pub confidence: u8,
    pub extraction_errors: Vec<String>,
}

const NAME_WEIGHT: u8 = 25;
const EMAIL_WEIGHT: u8 = 15;
const PHONE_WEIGHT: u8 = 15;
const NUMBER_WEIGHT: u8 = 20;
const TOTAL_WEIGHT: u8 = 25;

impl ParsedDocument {
    /// Result for a PDF whose text could not be read at all.
    pub fn failed(document_type: DocumentType, reason: impl Into<String>) -> Self {
        Self {
            customer_name: None,
            customer_email: None,
            customer_phone: None,
            document_number: None,
            document_type,
            document_date: None,
            total_amount: None,
            subtotal: None,
            tax: None,
            service_description: None,
            services: Vec::new(),
            technician_name: None,
            job_notes: None,
            raw_text: String::new(),
            confidence: 0,
            extraction_errors: vec![reason.into()],
        }
    }

    /// Weighted score over the five required fields (name 25, email 15,
    /// phone 15, document number 20, total 25).
    pub fn compute_confidence(&self) -> u8 {
        [
            (self.customer_name.is_some(), NAME_WEIGHT),
            (self.customer_email.is_some(), EMAIL_WEIGHT),
            (self.customer_phone.is_some(), PHONE_WEIGHT),
            (self.document_number.is_some(), NUMBER_WEIGHT),
            (self.total_amount.is_some(), TOTAL_WEIGHT),
        ]
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, weight)| weight)
        .sum()
    }
}

/// Extract structured document data from raw PDF text.
pub fn extract_document(text: &str, document_type: DocumentType) -> ParsedDocument {
    fields::extract(text, document_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> ParsedDocument {
        ParsedDocument::failed(DocumentType::Invoice, "nothing")
    }

    #[test]
    fn test_number_and_total_score_45() {
        let mut doc = empty();
        doc.document_number = Some("4521".into());
        doc.total_amount = Some(35000);
        assert_eq!(doc.compute_confidence(), 45);
    }

    #[test]
    fn test_all_required_fields_score_100() {
        let mut doc = empty();
        doc.customer_name = Some("Jane Doe".into());
        doc.customer_email = Some("jane@example.com".into());
        doc.customer_phone = Some("(512) 555-1234".into());
        doc.document_number = Some("4521".into());
        doc.total_amount = Some(35000);
        assert_eq!(doc.compute_confidence(), 100);
    }

    #[test]
    fn test_adding_a_field_never_lowers_confidence() {
        let mut doc = empty();
        let mut last = doc.compute_confidence();
        let steps: [fn(&mut ParsedDocument); 5] = [
            |d| d.total_amount = Some(0),
            |d| d.customer_phone = Some("(512) 555-1234".into()),
            |d| d.customer_name = Some("A".into()),
            |d| d.document_number = Some("E-1".into()),
            |d| d.customer_email = Some("a@b.co".into()),
        ];
        for step in steps {
            step(&mut doc);
            let now = doc.compute_confidence();
            assert!(now > last);
            last = now;
        }
        doc.customer_name = None;
        assert!(doc.compute_confidence() < last);
    }

    #[test]
    fn test_optional_fields_do_not_score() {
        let mut doc = empty();
        doc.subtotal = Some(100);
        doc.tax = Some(8);
        doc.technician_name = Some("Bob".into());
        assert_eq!(doc.compute_confidence(), 0);
    }

    #[test]
    fn test_document_type_parse() {
        assert_eq!("Estimate".parse::<DocumentType>(), Ok(DocumentType::Estimate));
        assert!("receipt".parse::<DocumentType>().is_err());
    }

    #[test]
    fn test_serializes_camel_case() {
        let mut doc = empty();
        doc.document_date = Date::from_calendar_date(2024, time::Month::March, 15).ok();
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["documentType"], "invoice");
        assert_eq!(json["documentDate"], "2024-03-15");
        assert!(json["extractionErrors"].is_array());
    }
}
