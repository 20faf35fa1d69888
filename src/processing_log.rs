// src/processing_log.rs

use crate::heuristics::{DocumentType, ParsedDocument};
use crate::matcher::MatchSource;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

/// Lifecycle of one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Parsed,
    Processed,
    Completed,
    Skipped,
    Failed,
}

impl LogStatus {
    pub const ALL: [LogStatus; 6] = [
        LogStatus::Pending,
        LogStatus::Parsed,
        LogStatus::Processed,
        LogStatus::Completed,
        LogStatus::Skipped,
        LogStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Parsed => "parsed",
            LogStatus::Processed => "processed",
            LogStatus::Completed => "completed",
            LogStatus::Skipped => "skipped",
            LogStatus::Failed => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            LogStatus::Pending => 0,
            LogStatus::Parsed => 1,
            LogStatus::Processed => 2,
            LogStatus::Completed | LogStatus::Skipped | LogStatus::Failed => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }
}

impl std::str::FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown log status '{s}'"))
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per inbound webhook call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingLogEntry {
    pub id: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
    pub channel: String,
    pub email_from: Option<String>,
    pub email_subject: Option<String>,
    pub pdf_filename: Option<String>,
    pub attachment_size: Option<i64>,
    pub status: LogStatus,
    pub document_type: Option<DocumentType>,
    pub extracted_data: Option<ParsedDocument>,
    pub matched_customer_id: Option<i64>,
    pub match_source: Option<MatchSource>,
    pub error_message: Option<String>,
    pub skip_reason: Option<String>,
    pub processing_ms: Option<i64>,
}

impl ProcessingLogEntry {
    pub fn new(channel: &str) -> Self {
        Self {
            id: None,
            received_at: OffsetDateTime::now_utc(),
            channel: channel.to_string(),
            email_from: None,
            email_subject: None,
            pdf_filename: None,
            attachment_size: None,
            status: LogStatus::Pending,
            document_type: None,
            extracted_data: None,
            matched_customer_id: None,
            match_source: None,
            error_message: None,
            skip_reason: None,
            processing_ms: None,
        }
    }

    /// Move the status forward. Backward moves and moves out of a terminal
    /// status are ignored.
    pub fn advance(&mut self, next: LogStatus) -> bool {
        if self.status.is_terminal() || next.rank() < self.status.rank() {
            warn!(from = %self.status, to = %next, "Ignoring backward log status transition");
            return false;
        }
        self.status = next;
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.advance(LogStatus::Failed) {
            self.error_message = Some(message);
        }
    }

    pub fn skip(&mut self, reason: Option<&str>, message: Option<String>) {
        if self.advance(LogStatus::Skipped) {
            self.skip_reason = reason.map(str::to_string);
            self.error_message = message;
        }
    }
}
