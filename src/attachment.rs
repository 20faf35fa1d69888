// src/attachment.rs

use axum::extract::Multipart;
use crate::signature::SignatureError;
use axum::extract::multipart::MultipartError;
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

/// One file part of an inbound email.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn is_pdf(&self) -> bool {
        self.filename.to_lowercase().ends_with(".pdf")
            || self
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.eq_ignore_ascii_case("application/pdf"))
    }
}

/// Form fields and file parts of a Mailgun inbound-route POST.
#[derive(Debug, Default)]
pub struct InboundEmail {
    fields: HashMap<String, String>,
    pub attachments: Vec<Attachment>,
}

impl InboundEmail {
    /// First non-empty value among `names`; Mailgun field casing varies by route.
    pub fn field(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .filter_map(|n| self.fields.get(*n))
            .map(|v| v.as_str())
            .find(|v| !v.trim().is_empty())
    }

    pub fn subject(&self) -> Option<&str> {
        self.field(&["subject", "Subject"])
    }

    pub fn sender(&self) -> Option<&str> {
        self.field(&["sender", "from", "From"])
    }

    pub fn timestamp(&self) -> &str {
        self.field(&["timestamp"]).unwrap_or("")
    }

    pub fn token(&self) -> &str {
        self.field(&["token"]).unwrap_or("")
    }

    pub fn signature(&self) -> &str {
        self.field(&["signature"]).unwrap_or("")
    }

    fn has_signature_fields(&self) -> bool {
        !self.timestamp().is_empty() && !self.token().is_empty() && !self.signature().is_empty()
    }

    /// First PDF part by filename extension or declared content type.
    pub fn into_pdf(self) -> Option<Attachment> {
        self.attachments.into_iter().find(Attachment::is_pdf)
    }

    #[cfg(test)]
    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Error)]
pub enum InboundError {
    #[error("invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// Drain a multipart body. Parts with a filename are attachments; the rest are
/// text fields.
///
/// `authenticate` runs once, as soon as `timestamp`, `token` and `signature`
/// have all arrived, so a forged request is refused before any later
/// attachment is buffered. If the body ends without them it runs on what
/// arrived.
pub async fn read_inbound<F>(
    mut multipart: Multipart,
    authenticate: F,
) -> Result<InboundEmail, InboundError>
where
    F: Fn(&str, &str, &str) -> Result<(), SignatureError>,
{
    let mut email = InboundEmail::default();
    let mut authenticated = false;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await?.to_vec();
                info!(field = %name, filename = %filename, bytes = data.len(), "Attachment received");
                email.attachments.push(Attachment {
                    filename,
                    content_type,
                    data,
                });
            }
            None => {
                let value = field.text().await?;
                email.fields.insert(name, value);
            }
        }

        if !authenticated && email.has_signature_fields() {
            authenticate(email.timestamp(), email.token(), email.signature())?;
            authenticated = true;
        }
    }

    if !authenticated {
        authenticate(email.timestamp(), email.token(), email.signature())?;
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(filename: &str, content_type: Option<&str>) -> Attachment {
        Attachment {
            filename: filename.into(),
            content_type: content_type.map(str::to_string),
            data: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_pdf_by_extension_any_case() {
        assert!(part("INVOICE.PDF", None).is_pdf());
        assert!(part("quote.pdf", Some("application/octet-stream")).is_pdf());
    }

    #[test]
    fn test_pdf_by_content_type() {
        assert!(part("download", Some("application/pdf")).is_pdf());
        assert!(!part("logo.png", Some("image/png")).is_pdf());
    }

    #[test]
    fn test_first_pdf_wins() {
        let email = InboundEmail {
            attachments: vec![
                part("logo.png", Some("image/png")),
                part("a.pdf", None),
                part("b.pdf", None),
            ],
            ..Default::default()
        };
        assert_eq!(email.into_pdf().map(|a| a.filename), Some("a.pdf".to_string()));
    }

    #[test]
    fn test_no_pdf() {
        let email = InboundEmail {
            attachments: vec![part("photo.jpg", Some("image/jpeg"))],
            ..Default::default()
        };
        assert!(email.into_pdf().is_none());
    }

    #[test]
    fn test_field_aliases() {
        let email = InboundEmail::default()
            .with_field("Subject", "Estimate 7")
            .with_field("sender", "")
            .with_field("From", "Office <office@acme.test>");
        assert_eq!(email.subject(), Some("Estimate 7"));
        assert_eq!(email.sender(), Some("Office <office@acme.test>"));
        assert_eq!(email.timestamp(), "");
    }
}
