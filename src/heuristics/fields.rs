use super::{DocumentType, ParsedDocument, ServiceLine};
use crate::contact::normalize_phone;
use once_cell::sync::Lazy;
use regex::Regex;
use time::{Date, Month};

/// Ordered label patterns for one field. The first pattern that matches wins and
/// its first capture group, trimmed, is the value.
struct FieldRules {
    patterns: Vec<Regex>,
}

impl FieldRules {
    fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .map(|p| Regex::new(p.as_ref()).expect("field pattern must compile"))
                .collect(),
        }
    }

    fn first_capture(&self, text: &str) -> Option<String> {
        self.patterns.iter().find_map(|re| {
            re.captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|v| !v.is_empty())
        })
    }

    /// Every capture of every pattern, in rule order then text order.
    fn all_captures<'t>(&'t self, text: &'t str) -> impl Iterator<Item = &'t str> + 't {
        self.patterns.iter().flat_map(move |re| {
            re.captures_iter(text)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
        })
    }
}

// Money: optional `$`, thousands separators, optional cents.
const MONEY: &str = r"\$?\s*(\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?|\d+(?:\.\d{1,2})?)";

static CUSTOMER_NAME: Lazy<FieldRules> = Lazy::new(|| {
    FieldRules::new(&[
        r"(?im)^[ \t]*Customer(?:[ \t]+Name)?[ \t]*:[ \t]*([^\n]+)",
        r"(?im)^[ \t]*Bill[ \t]+To[ \t]*:[ \t]*([^\n]+)",
        r"(?im)^[ \t]*Bill[ \t]+To[ \t]*:?[ \t]*\n[ \t]*([^\n]+)",
        r"(?im)^[ \t]*Name[ \t]*:[ \t]*([^\n]+)",
    ])
});

static CUSTOMER_EMAIL: Lazy<FieldRules> =
    Lazy::new(|| FieldRules::new(&[r"([A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,})"]));

static CUSTOMER_PHONE: Lazy<FieldRules> = Lazy::new(|| {
    FieldRules::new(&[
        r"(?i)(?:Phone|Tel|Mobile|Cell)[ \t]*(?:#|No\.?)?[ \t]*:?[ \t]*((?:\+?1[\s.\-]?)?\(?\d{3}\)?[\s.\-]?\d{3}[\s.\-]?\d{4})\b",
        r"(?:^|[^\d])((?:\+?1[\s.\-]?)?\(?\d{3}\)?[\s.\-]?\d{3}[\s.\-]?\d{4})\b",
    ])
});

static INVOICE_NUMBER: Lazy<FieldRules> = Lazy::new(|| document_number_rules("Invoice"));
static ESTIMATE_NUMBER: Lazy<FieldRules> = Lazy::new(|| document_number_rules("Estimate"));

fn document_number_rules(label: &str) -> FieldRules {
    let token = r"([A-Za-z0-9\-]*\d[A-Za-z0-9\-]*)";
    FieldRules::new(&[
        &format!(r"(?i)\b{label}[ \t]*(?:#|No\.?|Number)[ \t]*:?[ \t]*#?[ \t]*{token}"),
        &format!(r"(?i)\b{label}[ \t]*:[ \t]*#?[ \t]*{token}"),
        &format!(r"(?i)\b{label}[ \t]+#?{token}\b"),
    ])
}

static DATE_LABELED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Date[ \t]*:[ \t]*(\d{1,2})/(\d{1,2})/(\d{4})").expect("date pattern")
});
static DATE_NUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("date pattern"));
static DATE_WRITTEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sept?|Oct|Nov|Dec)\.?[ \t]+(\d{1,2}),?[ \t]+(\d{4})\b")
        .expect("date pattern")
});

/// Total labels in precedence order. Amount/Balance Due only applies when no
/// `Total` label is present.
static TOTAL_TIERS: Lazy<[FieldRules; 3]> = Lazy::new(|| {
    [
        FieldRules::new(&[&format!(r"(?i)\bGrand[ \t]+Total[ \t]*:?[ \t]*{MONEY}")]),
        FieldRules::new(&[&format!(r"(?i)\bTotal(?:[ \t]+Due)?[ \t]*:?[ \t]*{MONEY}")]),
        FieldRules::new(&[&format!(
            r"(?i)\b(?:Amount|Balance)[ \t]+Due[ \t]*:?[ \t]*{MONEY}"
        )]),
    ]
});

/// `Subtotal`, `Sub Total`, `Sub-Total`. `\bTotal` alone still matches the
/// last two, so such lines are kept away from the total rules.
static SUBTOTAL_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSub[ \t-]?total\b").expect("subtotal label pattern"));

static SUBTOTAL: Lazy<FieldRules> =
    Lazy::new(|| FieldRules::new(&[&format!(r"(?i)\bSub[ \t-]?total[ \t]*:?[ \t]*{MONEY}")]));

static TAX: Lazy<FieldRules> = Lazy::new(|| {
    FieldRules::new(&[&format!(
        r"(?i)\b(?:Sales[ \t]+)?Tax\b[ \t]*(?:\([^)\n]*\))?[ \t]*:?[ \t]*{MONEY}"
    )])
});

static SERVICE_DESCRIPTION: Lazy<FieldRules> = Lazy::new(|| {
    FieldRules::new(&[
        r"(?im)^[ \t]*Work[ \t]+Performed[ \t]*:[ \t]*([^\n]+)",
        r"(?im)^[ \t]*Description[ \t]*:[ \t]*([^\n]+)",
        r"(?im)^[ \t]*Service[ \t]*:[ \t]*([^\n]+)",
    ])
});

static TECHNICIAN: Lazy<FieldRules> = Lazy::new(|| {
    FieldRules::new(&[
        r"(?im)^[ \t]*Technician[ \t]*:[ \t]*([^\n]+)",
        r"(?im)^[ \t]*(?:Tech|Plumber|Serviced[ \t]+By)[ \t]*:[ \t]*([^\n]+)",
    ])
});

static JOB_NOTES: Lazy<FieldRules> = Lazy::new(|| {
    FieldRules::new(&[r"(?im)^[ \t]*(?:Job[ \t]+)?(?:Notes|Comments)[ \t]*:[ \t]*([^\n]+)"])
});

static SERVICE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*([A-Za-z][^\n$]*?)[ \t]+\$[ \t]*(\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?|\d+(?:\.\d{1,2})?)[ \t]*$",
    )
    .expect("service line pattern")
});

/// Labels that carry totals, never a billable service.
const NON_SERVICE_LABELS: &[&str] = &[
    "total", "subtotal", "sub-total", "tax", "amount due", "balance", "paid", "deposit",
    "discount",
];

/// Keyword-anchored regex rules per field.
pub fn extract(text: &str, document_type: DocumentType) -> ParsedDocument {
    let mut errors = Vec::new();

    let customer_name = CUSTOMER_NAME.first_capture(text);
    if customer_name.is_none() {
        errors.push("Could not extract customer name".to_string());
    }

    let customer_email = CUSTOMER_EMAIL
        .first_capture(text)
        .map(|e| e.to_lowercase());
    if customer_email.is_none() {
        errors.push("Could not extract customer email".to_string());
    }

    let customer_phone = CUSTOMER_PHONE
        .all_captures(text)
        .find_map(normalize_phone);
    if customer_phone.is_none() {
        errors.push("Could not extract customer phone".to_string());
    }

    let number_rules = match document_type {
        DocumentType::Invoice => &*INVOICE_NUMBER,
        DocumentType::Estimate => &*ESTIMATE_NUMBER,
    };
    let document_number = number_rules.first_capture(text);
    if document_number.is_none() {
        errors.push(format!("Could not extract {} number", document_type.as_str()));
    }

    let document_date = extract_date(text);
    if document_date.is_none() {
        errors.push(format!("Could not extract {} date", document_type.as_str()));
    }

    let total_amount = extract_total(text);
    if total_amount.is_none() {
        errors.push("Could not extract total amount".to_string());
    }

    let subtotal = SUBTOTAL.first_capture(text).and_then(|v| to_cents(&v));
    let tax = TAX.first_capture(text).and_then(|v| to_cents(&v));

    let services = extract_services(text);
    let service_description = SERVICE_DESCRIPTION.first_capture(text).or_else(|| {
        (!services.is_empty()).then(|| {
            services
                .iter()
                .map(|s| s.description.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        })
    });

    let mut doc = ParsedDocument {
        customer_name,
        customer_email,
        customer_phone,
        document_number,
        document_type,
        document_date,
        total_amount,
        subtotal,
        tax,
        service_description,
        services,
        technician_name: TECHNICIAN.first_capture(text),
        job_notes: JOB_NOTES.first_capture(text),
        raw_text: text.to_string(),
        confidence: 0,
        extraction_errors: errors,
    };
    doc.confidence = doc.compute_confidence();
    doc
}

/// First tier with a hit wins; within a tier, the first line that is not a
/// subtotal line.
fn extract_total(text: &str) -> Option<i64> {
    TOTAL_TIERS.iter().find_map(|rules| {
        text.lines()
            .filter(|line| !SUBTOTAL_LABEL.is_match(line))
            .find_map(|line| rules.first_capture(line))
            .and_then(|v| to_cents(&v))
    })
}

/// `Date: MM/DD/YYYY`, then bare `MM/DD/YYYY`, then `Month DD, YYYY`.
/// A match that is not a real calendar date falls through to the next form.
fn extract_date(text: &str) -> Option<Date> {
    let numeric = |re: &Regex| {
        re.captures_iter(text).find_map(|c| {
            let month: u8 = c[1].parse().ok()?;
            let day: u8 = c[2].parse().ok()?;
            let year: i32 = c[3].parse().ok()?;
            Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()
        })
    };

    numeric(&DATE_LABELED)
        .or_else(|| numeric(&DATE_NUMERIC))
        .or_else(|| {
            DATE_WRITTEN.captures_iter(text).find_map(|c| {
                let month = month_from_name(&c[1])?;
                let day: u8 = c[2].parse().ok()?;
                let year: i32 = c[3].parse().ok()?;
                Date::from_calendar_date(year, month, day).ok()
            })
        })
}

fn month_from_name(name: &str) -> Option<Month> {
    let prefix: String = name.to_ascii_lowercase().chars().take(3).collect();
    let month = match prefix.as_str() {
        "jan" => Month::January,
        "feb" => Month::February,
        "mar" => Month::March,
        "apr" => Month::April,
        "may" => Month::May,
        "jun" => Month::June,
        "jul" => Month::July,
        "aug" => Month::August,
        "sep" => Month::September,
        "oct" => Month::October,
        "nov" => Month::November,
        "dec" => Month::December,
        _ => return None,
    };
    Some(month)
}

/// `"1,234.56"` → `123456`.
fn to_cents(raw: &str) -> Option<i64> {
    let amount: f64 = raw.replace(',', "").parse().ok()?;
    Some((amount * 100.0).round() as i64)
}

fn extract_services(text: &str) -> Vec<ServiceLine> {
    SERVICE_LINE
        .captures_iter(text)
        .filter_map(|c| {
            let description = c[1].trim().trim_end_matches(['.', ':', '-']).trim();
            let lowered = description.to_lowercase();
            if NON_SERVICE_LABELS
                .iter()
                .any(|label| lowered.starts_with(label) || lowered.ends_with(label))
            {
                return None;
            }
            Some(ServiceLine {
                description: description.to_string(),
                amount: to_cents(&c[2])?,
            })
        })
        .collect()
}
