//! Control of the foreground Timed worker.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::json;

use super::{blocking, ApiResult};
use crate::app::AppState;

/// GET /jobs/run
pub async fn run(State(state): State<Arc<AppState>>) -> ApiResult {
    blocking(&state, "run jobs".into(), |d| d.run_jobs()).await?;
    Ok(Json(json!({ "running": true })))
}

/// GET /jobs/stop
pub async fn stop(State(state): State<Arc<AppState>>) -> ApiResult {
    blocking(&state, "stop jobs".into(), |d| {
        d.stop_jobs();
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "running": false })))
}

/// GET /jobs/count
pub async fn count(State(state): State<Arc<AppState>>) -> ApiResult {
    let count = blocking(&state, "count jobs".into(), |d| Ok(d.job_count())).await?;
    Ok(Json(json!({ "count": count })))
}

/// GET /jobs/are_running
pub async fn are_running(State(state): State<Arc<AppState>>) -> ApiResult {
    let running = blocking(&state, "jobs running".into(), |d| Ok(d.jobs_running())).await?;
    Ok(Json(json!({ "running": running })))
}

/// GET /jobs/clear: drops Timed jobs only; bindings stay until rescheduled.
pub async fn clear(State(state): State<Arc<AppState>>) -> ApiResult {
    let removed = blocking(&state, "clear jobs".into(), |d| Ok(d.clear_jobs())).await?;
    Ok(Json(json!({ "removed": removed })))
}

#[cfg(test)]
mod tests {
    use crate::app::tests::{call, test_app};
    use axum::http::StatusCode;
    use kairos_dispatcher::Action;
    use kairos_scheduler::{Scheduler, Timely};
    use tempfile::TempDir;

    #[tokio::test(flavor = "multi_thread")]
    async fn count_and_clear_follow_bindings() {
        let home = TempDir::new().unwrap();
        let (app, d) = test_app(&home);
        d.add_action("foo", Action::success()).unwrap();
        d.add_scheduler("bar", Scheduler::Timely(Timely::every(60))).unwrap();
        d.schedule_action("bar", "foo").unwrap();

        let (status, body) = call(&app, "GET", "/jobs/count", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (_, body) = call(&app, "GET", "/jobs/clear", None).await;
        assert_eq!(body["removed"], 1);
        assert_eq!(d.job_count(), 0);
        assert_eq!(d.get_scheduled_action_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_then_stop() {
        let home = TempDir::new().unwrap();
        let (app, d) = test_app(&home);

        let (_, body) = call(&app, "GET", "/jobs/run", None).await;
        assert_eq!(body["running"], true);
        let (_, body) = call(&app, "GET", "/jobs/are_running", None).await;
        assert_eq!(body["running"], true);

        call(&app, "GET", "/jobs/stop", None).await;
        assert!(!d.jobs_running());
    }
}
