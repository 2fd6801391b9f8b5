use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use kairos_dispatcher::{ActionError, DispatchError, FailureReport};
use tracing::warn;

/// Failed request: `{ "outcome", "error", "code", "timestamp" }` with a
/// status derived from the error kind.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    report: FailureReport,
}

impl ApiError {
    pub fn new(outcome: &str, err: DispatchError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            warn!(%outcome, error = %err, "request failed");
        }
        Self {
            status,
            report: err.report(outcome),
        }
    }

    pub fn internal(outcome: &str, message: String) -> Self {
        warn!(%outcome, error = %message, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            report: FailureReport {
                outcome: outcome.to_string(),
                error: message,
                code: "INTERNAL_ERROR",
                timestamp: Utc::now().to_rfc3339(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn status_for(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::NotFound { .. } => StatusCode::NOT_FOUND,
        DispatchError::Conflict { .. } => StatusCode::CONFLICT,
        DispatchError::Validation(_)
        | DispatchError::Resolve(_)
        | DispatchError::Serialization(_)
        | DispatchError::Scheduler(_) => StatusCode::BAD_REQUEST,
        DispatchError::Remote { .. } | DispatchError::Action(ActionError::Remote { .. }) => {
            StatusCode::BAD_GATEWAY
        }
        DispatchError::Action(_) | DispatchError::Io(_) | DispatchError::Core(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.report)).into_response()
    }
}
