// src/matcher.rs

use crate::contact::{normalize_email, phone_key};
use crate::intake_db::StoreResult;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Read-only view of the customer directory.
pub trait CustomerDirectory {
    /// Customer owning a `Phone` or `MobilePhone` contact with this 10-digit key.
    fn customer_by_phone(&self, phone_key: &str) -> StoreResult<Option<i64>>;
    /// Customer owning an `Email` contact with this lower-cased address.
    fn customer_by_email(&self, email: &str) -> StoreResult<Option<i64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Phone,
    Email,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchSource::Phone => "phone",
            MatchSource::Email => "email",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CustomerMatch {
    pub customer_id: Option<i64>,
    pub source: Option<MatchSource>,
}

impl CustomerMatch {
    fn hit(customer_id: i64, source: MatchSource) -> Self {
        Self {
            customer_id: Some(customer_id),
            source: Some(source),
        }
    }
}

/// Phone first, then email. The first hit wins.
pub fn match_customer(
    directory: &dyn CustomerDirectory,
    phone: Option<&str>,
    email: Option<&str>,
) -> StoreResult<CustomerMatch> {
    if let Some(key) = phone.and_then(phone_key) {
        if let Some(id) = directory.customer_by_phone(&key)? {
            info!(customer_id = id, "Matched customer by phone");
            return Ok(CustomerMatch::hit(id, MatchSource::Phone));
        }
    }

    if let Some(email) = email.and_then(normalize_email) {
        if let Some(id) = directory.customer_by_email(&email)? {
            info!(customer_id = id, "Matched customer by email");
            return Ok(CustomerMatch::hit(id, MatchSource::Email));
        }
    }

    info!("No customer match");
    Ok(CustomerMatch::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake_db::{ContactType, IntakeStore};

    fn directory() -> IntakeStore {
        let store = IntakeStore::open_in_memory().unwrap();
        let a = store.insert_customer("Alice").unwrap();
        store.add_contact(a, ContactType::Phone, "(512) 555-1234").unwrap();
        let b = store.insert_customer("Bob").unwrap();
        store.add_contact(b, ContactType::Email, "Bob@Example.com").unwrap();
        store.add_contact(b, ContactType::MobilePhone, "737-555-0000").unwrap();
        store
    }

    #[test]
    fn test_phone_wins_over_email() {
        let store = directory();
        let m = match_customer(&store, Some("512.555.1234"), Some("bob@example.com")).unwrap();
        assert_eq!(m.customer_id, Some(1));
        assert_eq!(m.source, Some(MatchSource::Phone));
    }

    #[test]
    fn test_email_when_phone_unknown() {
        let store = directory();
        let m = match_customer(&store, Some("(999) 555-1234"), Some("BOB@example.COM")).unwrap();
        assert_eq!(m.customer_id, Some(2));
        assert_eq!(m.source, Some(MatchSource::Email));
    }

    #[test]
    fn test_mobile_contacts_match_phone() {
        let store = directory();
        let m = match_customer(&store, Some("+1 737 555 0000"), None).unwrap();
        assert_eq!(m, CustomerMatch::hit(2, MatchSource::Phone));
    }

    #[test]
    fn test_no_match() {
        let store = directory();
        let m = match_customer(&store, None, Some("nobody@example.com")).unwrap();
        assert_eq!(m, CustomerMatch::default());
        let m = match_customer(&store, None, None).unwrap();
        assert_eq!(m.customer_id, None);
    }
}
