use crate::signature::SignatureError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Request-level failures, each mapped to the status code the mail relay sees.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Server misconfiguration, e.g. no signing key. Fails closed.
    #[error("{0}")]
    Configuration(String),
    /// Stale timestamp or signature mismatch.
    #[error("{0}")]
    Authentication(String),
    /// Malformed request: bad multipart body, missing signature fields.
    #[error("{0}")]
    Validation(String),
    #[error("no PDF attachment found")]
    MissingAttachment,
    #[error("{0}")]
    Processing(String),
    #[error("processing timed out")]
    Timeout,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::Validation(_) => StatusCode::BAD_REQUEST,
            WebhookError::Authentication(_) => StatusCode::UNAUTHORIZED,
            WebhookError::Configuration(_)
            | WebhookError::MissingAttachment
            | WebhookError::Processing(_)
            | WebhookError::Timeout => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            WebhookError::Configuration(_) => "configuration_error",
            WebhookError::Validation(_) => "invalid_request",
            WebhookError::Authentication(_) => "unauthorized",
            WebhookError::MissingAttachment => "missing_attachment",
            WebhookError::Processing(_) => "processing_failed",
            WebhookError::Timeout => "timeout",
        }
    }
}

impl From<SignatureError> for WebhookError {
    fn from(e: SignatureError) -> Self {
        match e {
            SignatureError::MissingSigningKey => WebhookError::Configuration(e.to_string()),
            SignatureError::MissingFields | SignatureError::InvalidTimestamp(_) => {
                WebhookError::Validation(e.to_string())
            }
            SignatureError::Stale { .. } | SignatureError::Mismatch => {
                WebhookError::Authentication(e.to_string())
            }
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
