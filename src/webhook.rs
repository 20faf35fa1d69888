// src/webhook.rs

//! HTTP surface: the two Mailgun inbound routes plus health and log listing.

use crate::attachment::{InboundError, read_inbound};
use crate::campaign::SourceInfo;
use crate::config::Config;
use crate::error::WebhookError;
use crate::heuristics::{self, DocumentType};
use crate::intake_db::IntakeStore;
use crate::matcher::MatchSource;
use crate::pdf_text::TextExtractor;
use crate::pipeline::{self, PipelineReport};
use crate::processing_log::{LogStatus, ProcessingLogEntry};
use crate::signature::{self, SignatureError};
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 500;
const NO_PDF: &str = "no PDF attachment found";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<IntakeStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.server.max_body_bytes;
    Router::new()
        .route("/webhooks/mailgun/invoices", post(invoices_webhook))
        .route("/webhooks/mailgun/inbox", post(inbox_webhook))
        .route("/health", get(health))
        .route("/logs", get(list_logs))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    /// Every message is an invoice; a missing PDF is an error.
    Invoices,
    /// Classified by subject and filename; a missing PDF is skipped.
    Inbox,
}

impl Channel {
    fn as_str(&self) -> &'static str {
        match self {
            Channel::Invoices => "invoices",
            Channel::Inbox => "inbox",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            Channel::Invoices => "mailgun_invoice",
            Channel::Inbox => "mailgun_inbox",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub success: bool,
    pub log_id: Option<i64>,
    pub file_name: Option<String>,
    pub document_type: Option<DocumentType>,
    pub status: LogStatus,
    pub matched: bool,
    pub match_source: Option<MatchSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_completion_created: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_request_created: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_created: Option<bool>,
    pub skip_reason: Option<String>,
    pub confidence: u8,
    pub processing_time: u64,
}

impl WebhookResponse {
    fn new(entry: &ProcessingLogEntry, log_id: Option<i64>, started: Instant) -> Self {
        Self {
            success: true,
            log_id,
            file_name: entry.pdf_filename.clone(),
            document_type: entry.document_type,
            status: entry.status,
            matched: entry.matched_customer_id.is_some(),
            match_source: entry.match_source,
            job_completion_created: None,
            review_request_created: None,
            campaign_created: None,
            skip_reason: entry.skip_reason.clone(),
            confidence: 0,
            processing_time: elapsed_ms(started),
        }
    }

    fn with_report(mut self, report: &PipelineReport) -> Self {
        self.confidence = report.confidence;
        self.matched = report.customer.customer_id.is_some();
        self.match_source = report.customer.source;
        match self.document_type {
            Some(DocumentType::Estimate) => {
                self.campaign_created = Some(report.campaign_created());
            }
            _ => {
                self.job_completion_created = Some(report.job_completion_created());
                self.review_request_created = Some(report.review_request_created());
            }
        }
        self
    }
}

async fn invoices_webhook(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<WebhookResponse>, WebhookError> {
    handle_inbound(state, Channel::Invoices, multipart).await
}

async fn inbox_webhook(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<WebhookResponse>, WebhookError> {
    handle_inbound(state, Channel::Inbox, multipart).await
}

async fn handle_inbound(
    state: AppState,
    channel: Channel,
    multipart: Multipart,
) -> Result<Json<WebhookResponse>, WebhookError> {
    let started = Instant::now();
    let mut entry = ProcessingLogEntry::new(channel.as_str());

    if state.config.signing_key().is_none() {
        warn!(channel = channel.as_str(), "Webhook refused: no signing key configured");
        let err = WebhookError::from(SignatureError::MissingSigningKey);
        return Err(reject(&state, entry, started, err).await);
    }

    let authenticate = |timestamp: &str, token: &str, sig: &str| {
        signature::verify(
            state.config.signing_key(),
            timestamp,
            token,
            sig,
            state.config.webhook.max_timestamp_age_secs,
        )
    };
    let email = match read_inbound(multipart, authenticate).await {
        Ok(email) => email,
        Err(InboundError::Multipart(e)) => {
            warn!(channel = channel.as_str(), error = %e, "Unreadable multipart body");
            let err = WebhookError::Validation(format!("invalid multipart body: {e}"));
            return Err(reject(&state, entry, started, err).await);
        }
        Err(InboundError::Signature(e)) => {
            warn!(channel = channel.as_str(), error = %e, "Webhook rejected");
            return Err(reject(&state, entry, started, e.into()).await);
        }
    };

    entry.email_from = email.sender().map(str::to_string);
    entry.email_subject = email.subject().map(str::to_string);

    let Some(pdf) = email.into_pdf() else {
        warn!(channel = channel.as_str(), "No PDF attachment in message");
        return match channel {
            Channel::Invoices => {
                Err(reject(&state, entry, started, WebhookError::MissingAttachment).await)
            }
            Channel::Inbox => {
                entry.skip(None, Some(NO_PDF.to_string()));
                let log_id = persist(&state, &mut entry, started).await;
                Ok(Json(WebhookResponse::new(&entry, log_id, started)))
            }
        };
    };

    let subject = entry.email_subject.clone().unwrap_or_default();
    let document_type = match channel {
        Channel::Invoices => DocumentType::Invoice,
        Channel::Inbox => heuristics::classify(&subject, &pdf.filename).resolve(&subject, &pdf.filename),
    };
    entry.pdf_filename = Some(pdf.filename.clone());
    entry.attachment_size = i64::try_from(pdf.data.len()).ok();
    entry.document_type = Some(document_type);
    info!(
        channel = channel.as_str(),
        filename = %pdf.filename,
        bytes = pdf.data.len(),
        document_type = document_type.as_str(),
        "Processing attachment"
    );

    let store = Arc::clone(&state.store);
    let extractor = Arc::clone(&state.extractor);
    let mut worker_entry = entry.clone();
    let email_from = entry.email_from.clone();
    let task = tokio::task::spawn_blocking(move || {
        let origin = SourceInfo {
            source: channel.source(),
            email_from: email_from.as_deref(),
            email_subject: Some(subject.as_str()).filter(|s| !s.is_empty()),
            pdf_filename: Some(pdf.filename.as_str()),
        };
        let result = pipeline::process_document(
            &store,
            extractor.as_ref(),
            &pdf.data,
            document_type,
            &origin,
            &mut worker_entry,
        );
        (worker_entry, result)
    });

    let budget = Duration::from_secs(state.config.webhook.processing_timeout_secs);
    match tokio::time::timeout(budget, task).await {
        Err(_) => {
            error!(channel = channel.as_str(), budget_secs = budget.as_secs(), "Processing timed out");
            Err(reject(&state, entry, started, WebhookError::Timeout).await)
        }
        Ok(Err(join_err)) => {
            error!(channel = channel.as_str(), error = %join_err, "Processing task failed");
            let err = WebhookError::Processing(join_err.to_string());
            Err(reject(&state, entry, started, err).await)
        }
        Ok(Ok((mut done, Err(e)))) => {
            persist(&state, &mut done, started).await;
            Err(WebhookError::Processing(e.to_string()))
        }
        Ok(Ok((mut done, Ok(report)))) => {
            let log_id = persist(&state, &mut done, started).await;
            Ok(Json(WebhookResponse::new(&done, log_id, started).with_report(&report)))
        }
    }
}

/// Record a terminal failure and hand back the error for the response.
async fn reject(
    state: &AppState,
    mut entry: ProcessingLogEntry,
    started: Instant,
    err: WebhookError,
) -> WebhookError {
    entry.fail(err.to_string());
    persist(state, &mut entry, started).await;
    err
}

/// Write the log row. A failed write is logged and otherwise ignored.
async fn persist(state: &AppState, entry: &mut ProcessingLogEntry, started: Instant) -> Option<i64> {
    entry.processing_ms = i64::try_from(elapsed_ms(started)).ok();
    let store = Arc::clone(&state.store);
    let row = entry.clone();
    match tokio::task::spawn_blocking(move || store.insert_log(&row)).await {
        Ok(Ok(id)) => {
            entry.id = Some(id);
            Some(id)
        }
        Ok(Err(e)) => {
            error!(error = %e, status = %entry.status, "Failed to write processing log");
            None
        }
        Err(e) => {
            error!(error = %e, "Processing log task failed");
            None
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    status: Option<String>,
    limit: Option<usize>,
}

async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<ProcessingLogEntry>>, WebhookError> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<LogStatus>)
        .transpose()
        .map_err(WebhookError::Validation)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT);

    let store = Arc::clone(&state.store);
    let logs = tokio::task::spawn_blocking(move || store.list_logs(status, limit))
        .await
        .map_err(|e| WebhookError::Processing(e.to_string()))?
        .map_err(|e| WebhookError::Processing(e.to_string()))?;
    Ok(Json(logs))
}
