use crate::contact::{normalize_email, phone_key};
use crate::heuristics::DocumentType;
use crate::matcher::{CustomerDirectory, MatchSource};
use crate::processing_log::{LogStatus, ProcessingLogEntry};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database connection lock poisoned")]
    LockPoisoned,
    #[error("invalid contact value '{0}'")]
    InvalidContact(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Kinds of contact rows the customer directory indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactType {
    Phone,
    MobilePhone,
    Email,
}

impl ContactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactType::Phone => "Phone",
            ContactType::MobilePhone => "MobilePhone",
            ContactType::Email => "Email",
        }
    }
}

/// Statuses that count as a live review request or follow-up campaign.
const ACTIVE_STATUSES: &str = "('queued', 'active')";

#[derive(Debug, Clone)]
pub struct NewJobCompletion {
    pub customer_id: i64,
    pub invoice_number: String,
    pub completed_date: Option<Date>,
    pub total_amount: Option<i64>,
    pub customer_email: String,
    pub source: String,
    pub source_metadata: serde_json::Value,
}

/// A stored job completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCompletion {
    pub id: i64,
    pub customer_id: i64,
    pub invoice_number: String,
    pub completed_date: Option<String>,
    pub total_amount: Option<i64>,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct NewFollowupCampaign {
    pub customer_id: i64,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub estimate_number: String,
    pub estimate_amount: i64,
}

/// Outcome of an atomic insert that is guarded by a uniqueness key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome<T> {
    Created(T),
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobCompletionIds {
    pub job_completion_id: i64,
    pub review_request_id: Option<i64>,
}

/// Row counts for the `stats` command.
#[derive(Debug, Default)]
pub struct StoreCounts {
    pub customers: usize,
    pub job_completions: usize,
    pub review_requests: usize,
    pub followup_campaigns: usize,
    pub logs_by_status: Vec<(LogStatus, usize)>,
}

pub struct IntakeStore {
    conn: Mutex<Connection>,
}

impl IntakeStore {
    /// Open (or create) a SQLite-backed store
    pub fn open<P: AsRef<Path>>(db_path: P) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS customers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                display_name TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS customer_contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                customer_id INTEGER NOT NULL,
                contact_type TEXT NOT NULL,
                raw_value TEXT NOT NULL,
                normalized_value TEXT NOT NULL,
                FOREIGN KEY (customer_id) REFERENCES customers(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_contacts_lookup
                ON customer_contacts(normalized_value, contact_type);

            CREATE TABLE IF NOT EXISTS job_completions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                customer_id INTEGER NOT NULL,
                invoice_number TEXT NOT NULL,
                completed_date TEXT,
                total_amount INTEGER,
                source TEXT NOT NULL,
                source_metadata TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (customer_id, invoice_number),
                FOREIGN KEY (customer_id) REFERENCES customers(id)
            );

            CREATE TABLE IF NOT EXISTS review_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_completion_id INTEGER NOT NULL,
                customer_id INTEGER NOT NULL,
                customer_email TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                source TEXT NOT NULL,
                source_metadata TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (job_completion_id) REFERENCES job_completions(id),
                FOREIGN KEY (customer_id) REFERENCES customers(id)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_review_requests_active
                ON review_requests(customer_id) WHERE status IN ('queued', 'active');

            CREATE TABLE IF NOT EXISTS quote_followup_campaigns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                customer_id INTEGER NOT NULL,
                customer_name TEXT,
                customer_email TEXT,
                customer_phone TEXT,
                estimate_number TEXT NOT NULL,
                estimate_amount INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (customer_id) REFERENCES customers(id)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_followups_active
                ON quote_followup_campaigns(customer_id) WHERE status IN ('queued', 'active');

            CREATE TABLE IF NOT EXISTS processing_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                received_at TEXT NOT NULL,
                channel TEXT NOT NULL,
                email_from TEXT,
                email_subject TEXT,
                pdf_filename TEXT,
                attachment_size INTEGER,
                status TEXT NOT NULL,
                document_type TEXT,
                extracted_data TEXT,
                matched_customer_id INTEGER,
                match_source TEXT,
                error_message TEXT,
                skip_reason TEXT,
                processing_ms INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_processing_logs_status ON processing_logs(status);",
        )?;

        info!("Database initialized successfully");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // -----------------------------------------------------------------------
    // Customer directory
    // -----------------------------------------------------------------------

    pub fn insert_customer(&self, display_name: &str) -> StoreResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO customers (display_name) VALUES (?1)",
            params![display_name],
        )?;
        let id = conn.last_insert_rowid();
        info!(customer_id = id, "Customer stored");
        Ok(id)
    }

    /// Add a contact row, indexed by its normalized value.
    pub fn add_contact(
        &self,
        customer_id: i64,
        contact_type: ContactType,
        raw_value: &str,
    ) -> StoreResult<i64> {
        let normalized = match contact_type {
            ContactType::Phone | ContactType::MobilePhone => phone_key(raw_value),
            ContactType::Email => normalize_email(raw_value),
        }
        .ok_or_else(|| StoreError::InvalidContact(raw_value.to_string()))?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO customer_contacts (customer_id, contact_type, raw_value, normalized_value)
             VALUES (?1, ?2, ?3, ?4)",
            params![customer_id, contact_type.as_str(), raw_value, normalized],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn lookup_contact(&self, value: &str, types: &[ContactType]) -> StoreResult<Option<i64>> {
        let placeholders = (0..types.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT customer_id FROM customer_contacts
             WHERE normalized_value = ?1 AND contact_type IN ({placeholders})
             ORDER BY id LIMIT 1"
        );

        let mut values: Vec<&str> = vec![value];
        for contact_type in types {
            values.push(contact_type.as_str());
        }

        let conn = self.conn()?;
        let id = conn
            .query_row(&sql, rusqlite::params_from_iter(values), |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Downstream records
    // -----------------------------------------------------------------------

    pub fn find_job_completion(
        &self,
        customer_id: i64,
        invoice_number: &str,
    ) -> StoreResult<Option<JobCompletion>> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT id, customer_id, invoice_number, completed_date, total_amount, source
                 FROM job_completions
                 WHERE customer_id = ?1 AND invoice_number = ?2",
                params![customer_id, invoice_number],
                |row| {
                    Ok(JobCompletion {
                        id: row.get(0)?,
                        customer_id: row.get(1)?,
                        invoice_number: row.get(2)?,
                        completed_date: row.get(3)?,
                        total_amount: row.get(4)?,
                        source: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }

    pub fn active_review_request_exists(&self, customer_id: i64) -> StoreResult<bool> {
        self.active_row_exists("review_requests", customer_id)
    }

    pub fn active_followup_exists(&self, customer_id: i64) -> StoreResult<bool> {
        self.active_row_exists("quote_followup_campaigns", customer_id)
    }

    fn active_row_exists(&self, table: &str, customer_id: i64) -> StoreResult<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                &format!(
                    "SELECT id FROM {table} WHERE customer_id = ?1 AND status IN {ACTIVE_STATUSES} LIMIT 1"
                ),
                params![customer_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert a job completion and, unless `skip_review` is set, its review
    /// request in one transaction. A uniqueness violation on the job completion
    /// key reports `Duplicate` and leaves nothing behind.
    pub fn create_job_completion(
        &self,
        job: &NewJobCompletion,
        skip_review: bool,
    ) -> StoreResult<InsertOutcome<JobCompletionIds>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let metadata = job.source_metadata.to_string();
        let completed_date = job.completed_date.map(|d| d.to_string());

        let inserted = tx.execute(
            "INSERT INTO job_completions
                (customer_id, invoice_number, completed_date, total_amount, source, source_metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job.customer_id,
                job.invoice_number,
                completed_date,
                job.total_amount,
                job.source,
                metadata,
            ],
        );
        if let Err(e) = inserted {
            return if is_unique_violation(&e) {
                info!(customer_id = job.customer_id, invoice = %job.invoice_number, "Job completion already recorded");
                Ok(InsertOutcome::Duplicate)
            } else {
                Err(e.into())
            };
        }
        let job_completion_id = tx.last_insert_rowid();

        let review_request_id = if skip_review {
            None
        } else {
            let inserted = tx.execute(
                "INSERT INTO review_requests
                    (job_completion_id, customer_id, customer_email, status, source, source_metadata)
                 VALUES (?1, ?2, ?3, 'queued', ?4, ?5)",
                params![
                    job_completion_id,
                    job.customer_id,
                    job.customer_email,
                    job.source,
                    metadata,
                ],
            );
            match inserted {
                Ok(_) => Some(tx.last_insert_rowid()),
                // another delivery queued one first; the job completion still stands
                Err(e) if is_unique_violation(&e) => None,
                Err(e) => return Err(e.into()),
            }
        };

        tx.commit()?;
        info!(
            job_completion_id,
            review_request_id = ?review_request_id,
            "Job completion stored"
        );
        Ok(InsertOutcome::Created(JobCompletionIds {
            job_completion_id,
            review_request_id,
        }))
    }

    /// Insert a queued follow-up campaign. A live campaign for the same
    /// customer reports `Duplicate`.
    pub fn create_followup_campaign(
        &self,
        campaign: &NewFollowupCampaign,
    ) -> StoreResult<InsertOutcome<i64>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO quote_followup_campaigns
                (customer_id, customer_name, customer_email, customer_phone,
                 estimate_number, estimate_amount, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued')",
            params![
                campaign.customer_id,
                campaign.customer_name,
                campaign.customer_email,
                campaign.customer_phone,
                campaign.estimate_number,
                campaign.estimate_amount,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Ok(InsertOutcome::Duplicate),
            Err(e) => return Err(e.into()),
        }
        let id = tx.last_insert_rowid();
        tx.commit()?;
        info!(campaign_id = id, customer_id = campaign.customer_id, "Follow-up campaign stored");
        Ok(InsertOutcome::Created(id))
    }

    // -----------------------------------------------------------------------
    // Processing log
    // -----------------------------------------------------------------------

    pub fn insert_log(&self, entry: &ProcessingLogEntry) -> StoreResult<i64> {
        let received_at = entry
            .received_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| entry.received_at.unix_timestamp().to_string());
        let extracted = entry
            .extracted_data
            .as_ref()
            .and_then(|doc| serde_json::to_string(doc).ok());

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO processing_logs
                (received_at, channel, email_from, email_subject, pdf_filename, attachment_size,
                 status, document_type, extracted_data, matched_customer_id, match_source,
                 error_message, skip_reason, processing_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                received_at,
                entry.channel,
                entry.email_from,
                entry.email_subject,
                entry.pdf_filename,
                entry.attachment_size,
                entry.status.as_str(),
                entry.document_type.map(|t| t.as_str()),
                extracted,
                entry.matched_customer_id,
                entry.match_source.map(|s| s.as_str()),
                entry.error_message,
                entry.skip_reason,
                entry.processing_ms,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(log_id = id, status = %entry.status, "Processing log stored");
        Ok(id)
    }

    /// Newest first, optionally filtered by status.
    pub fn list_logs(
        &self,
        status: Option<LogStatus>,
        limit: usize,
    ) -> StoreResult<Vec<ProcessingLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, received_at, channel, email_from, email_subject, pdf_filename,
                    attachment_size, status, document_type, extracted_data,
                    matched_customer_id, match_source, error_message, skip_reason, processing_ms
             FROM processing_logs
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            params![status.map(|s| s.as_str()), limit as i64],
            Self::row_to_log,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Helper: map a row with the 15-column log projection to `ProcessingLogEntry`.
    fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProcessingLogEntry> {
        let received_at: String = row.get(1)?;
        let status: String = row.get(7)?;
        let document_type: Option<String> = row.get(8)?;
        let extracted: Option<String> = row.get(9)?;
        let match_source: Option<String> = row.get(11)?;

        Ok(ProcessingLogEntry {
            id: Some(row.get(0)?),
            received_at: OffsetDateTime::parse(&received_at, &Rfc3339)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH),
            channel: row.get(2)?,
            email_from: row.get(3)?,
            email_subject: row.get(4)?,
            pdf_filename: row.get(5)?,
            attachment_size: row.get(6)?,
            status: status.parse().unwrap_or(LogStatus::Failed),
            document_type: document_type.and_then(|t| t.parse::<DocumentType>().ok()),
            extracted_data: extracted.and_then(|json| serde_json::from_str(&json).ok()),
            matched_customer_id: row.get(10)?,
            match_source: match_source.as_deref().and_then(|s| match s {
                "phone" => Some(MatchSource::Phone),
                "email" => Some(MatchSource::Email),
                _ => None,
            }),
            error_message: row.get(12)?,
            skip_reason: row.get(13)?,
            processing_ms: row.get(14)?,
        })
    }

    /// Get row counts for the customer directory, downstream records and logs
    pub fn get_counts(&self) -> StoreResult<StoreCounts> {
        let conn = self.conn()?;
        let count = |table: &str| -> rusqlite::Result<usize> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        };

        let mut counts = StoreCounts {
            customers: count("customers")?,
            job_completions: count("job_completions")?,
            review_requests: count("review_requests")?,
            followup_campaigns: count("quote_followup_campaigns")?,
            logs_by_status: Vec::new(),
        };

        for status in LogStatus::ALL {
            let n: usize = conn.query_row(
                "SELECT COUNT(*) FROM processing_logs WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )?;
            counts.logs_by_status.push((status, n));
        }
        Ok(counts)
    }
}

impl CustomerDirectory for IntakeStore {
    fn customer_by_phone(&self, phone_key: &str) -> StoreResult<Option<i64>> {
        self.lookup_contact(phone_key, &[ContactType::Phone, ContactType::MobilePhone])
    }

    fn customer_by_email(&self, email: &str) -> StoreResult<Option<i64>> {
        self.lookup_contact(email, &[ContactType::Email])
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && (err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}
