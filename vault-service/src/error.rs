use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use vault_core::{ErrorKind, VaultError};

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub hint: String,
}

impl ErrorEnvelope {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            hint: hint.into(),
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub body: ErrorEnvelope,
}

impl AppError {
    pub fn bad_request(msg: impl std::fmt::Display, hint: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorEnvelope::new(ErrorKind::InvalidSpec.as_str(), msg.to_string(), hint),
        }
    }

    pub fn no_vault() -> Self {
        Self::bad_request(
            "No vault is open",
            "POST /scan with a root, or start the service with --root",
        )
    }

    pub fn busy(operation: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            body: ErrorEnvelope::new(
                "operation_in_progress",
                format!("Cannot start {operation}: another scan or export is running"),
                "Wait for it to finish, or POST /cancel",
            ),
        }
    }

    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorEnvelope::new("internal_error", msg.to_string(), "Check service logs for details"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, axum::Json(self.body)).into_response()
    }
}

impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        let kind = err.kind();
        let (status, hint) = match kind {
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "Check the entry ID or vault root"),
            ErrorKind::InvalidSpec => (StatusCode::BAD_REQUEST, "Fix the request and retry"),
            ErrorKind::StaleGeneration => (
                StatusCode::CONFLICT,
                "The vault changed; re-run the search from offset 0",
            ),
            ErrorKind::LockTimeout => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Another scan or bulk operation is running; retry later",
            ),
            ErrorKind::Cancelled => (StatusCode::CONFLICT, "The operation was cancelled"),
            ErrorKind::IoFailure | ErrorKind::Store => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Check service logs for details",
            ),
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        Self {
            status,
            body: ErrorEnvelope::new(kind.as_str(), err.to_string(), hint),
        }
    }
}
