use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe, returns node metadata and job counts.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let dispatcher = state.dispatcher.clone();
    let (jobs_running, job_count, counts) = tokio::task::spawn_blocking(move || {
        (dispatcher.jobs_running(), dispatcher.job_count(), dispatcher.counts())
    })
    .await
    .unwrap_or((false, 0, Value::Null));

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git_sha": env!("KAIROS_GIT_SHA"),
        "identity": state.dispatcher.identity().to_string(),
        "home": state.config.home.dir,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "jobs_running": jobs_running,
        "job_count": job_count,
        "counts": counts,
    }))
}
