// src/contact.rs

//! Canonical forms for phone numbers and email addresses.
//!
//! Two phone forms are used: the 10-digit key the customer directory is indexed
//! by, and the `(XXX) XXX-XXXX` display form the parser emits.

/// Digits-only, last 10 digits. Returns `None` when fewer than 10 digits remain.
///
/// A leading country code (`1` for NANP) is dropped by taking the tail.
pub fn phone_key(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 {
        return None;
    }
    Some(digits[digits.len() - 10..].to_string())
}

/// Display form `(512) 555-1234`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let key = phone_key(raw)?;
    Some(format!("({}) {}-{}", &key[..3], &key[3..6], &key[6..]))
}

/// Lower-cased, trimmed email. Empty input yields `None`.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return None;
    }
    Some(email)
}
