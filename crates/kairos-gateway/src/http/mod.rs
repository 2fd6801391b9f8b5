//! HTTP control plane over the dispatcher.
//!
//! Dispatcher calls take a blocking mutex and may run actions or call peers
//! with a blocking client, so every handler hops onto the blocking pool via
//! [`blocking`].

pub mod actions;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod jobs;
pub mod programs;
pub mod schedulers;
pub mod servers;

use axum::{body::Bytes, Json};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use kairos_dispatcher::{DispatchError, Dispatcher};
use serde_json::Value;

use crate::app::AppState;
pub use error::ApiError;

pub type ApiResult = Result<Json<Value>, ApiError>;

/// Run `f` against the dispatcher on the blocking pool. `outcome` names the
/// request in failure reports.
pub(crate) async fn blocking<T, F>(state: &AppState, outcome: String, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Dispatcher) -> kairos_dispatcher::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let dispatcher = state.dispatcher.clone();
    match tokio::task::spawn_blocking(move || f(&dispatcher)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ApiError::new(&outcome, e)),
        Err(e) => Err(ApiError::internal(&outcome, e.to_string())),
    }
}

/// Decode an optional JSON body; an empty body is `None`.
pub(crate) fn optional_json(outcome: &str, body: &Bytes) -> Result<Option<Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| ApiError::new(outcome, DispatchError::Serialization(e)))
}

/// RFC 3339, or a naive `YYYY-MM-DD[T ]HH:MM:SS` read as local time.
pub(crate) fn parse_instant(raw: &str) -> kairos_dispatcher::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| DispatchError::Validation(format!("unreadable datetime: {raw}")))
}
