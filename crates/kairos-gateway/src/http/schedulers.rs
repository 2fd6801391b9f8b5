//! Scheduler inventory, bindings and the deferral tables.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use kairos_dispatcher::Resolver;
use serde_json::{json, Map, Value};

use super::{blocking, optional_json, parse_instant, ApiResult};
use crate::app::AppState;

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult {
    let schedulers = blocking(&state, "list schedulers".into(), |d| {
        let mut out = Map::new();
        for (name, scheduler) in d.snapshot().schedulers {
            out.insert(name, serde_json::to_value(scheduler)?);
        }
        Ok(Value::Object(out))
    })
    .await?;
    Ok(Json(schedulers))
}

pub async fn get_one(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult {
    let outcome = format!("get scheduler {name}");
    let scheduler =
        blocking(&state, outcome, move |d| Ok(serde_json::to_value(d.get_scheduler(&name)?)?)).await?;
    Ok(Json(scheduler))
}

pub async fn add(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    let outcome = format!("add scheduler {name}");
    let added = name.clone();
    blocking(&state, outcome, move |d| {
        d.add_scheduler(&name, Resolver::new().scheduler(body)?)
    })
    .await?;
    Ok(Json(json!({ "added": added })))
}

/// PUT /schedulers/{name}: a live binding is re-primed with the new cadence.
pub async fn set(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    let outcome = format!("set scheduler {name}");
    let set = name.clone();
    blocking(&state, outcome, move |d| {
        d.set_scheduler(&name, Resolver::new().scheduler(body)?)
    })
    .await?;
    Ok(Json(json!({ "set": set })))
}

pub async fn delete(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult {
    let outcome = format!("delete scheduler {name}");
    let deleted = name.clone();
    blocking(&state, outcome, move |d| d.delete_scheduler(&name)).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

pub async fn unschedule(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult {
    let outcome = format!("unschedule scheduler {name}");
    let unscheduled = name.clone();
    blocking(&state, outcome, move |d| d.unschedule_scheduler(&name)).await?;
    Ok(Json(json!({ "unscheduled": unscheduled })))
}

pub async fn reschedule(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult {
    let outcome = format!("reschedule scheduler {name}");
    let rescheduled = name.clone();
    blocking(&state, outcome, move |d| d.reschedule_scheduler(&name)).await?;
    Ok(Json(json!({ "rescheduled": rescheduled })))
}

/// GET /schedulers/{name}/actions/{action}
pub async fn bind(
    State(state): State<Arc<AppState>>,
    Path((name, action)): Path<(String, String)>,
) -> ApiResult {
    let outcome = format!("schedule {name} {action}");
    let reply = json!({ "scheduler": name, "action": action });
    blocking(&state, outcome, move |d| d.schedule_action(&name, &action)).await?;
    Ok(Json(reply))
}

/// DELETE /schedulers/{name}/actions/{action}
pub async fn unbind(
    State(state): State<Arc<AppState>>,
    Path((name, action)): Path<(String, String)>,
) -> ApiResult {
    let outcome = format!("unschedule {name} {action}");
    let reply = json!({ "scheduler": name, "action": action });
    blocking(&state, outcome, move |d| d.unschedule_scheduler_action(&name, &action)).await?;
    Ok(Json(reply))
}

/// `{ "dt": <instant> }`; a missing body or `dt` means now.
fn body_instant(outcome: &str, body: &Bytes) -> Result<DateTime<Utc>, super::ApiError> {
    let dt = optional_json(outcome, body)?
        .and_then(|v| v.get("dt").and_then(Value::as_str).map(str::to_string));
    match dt {
        Some(raw) => parse_instant(&raw).map_err(|e| super::ApiError::new(outcome, e)),
        None => Ok(Utc::now()),
    }
}

/// POST /schedulers/{name}/actions/{action}/defer
pub async fn defer(
    State(state): State<Arc<AppState>>,
    Path((name, action)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult {
    let outcome = format!("defer {name} {action}");
    let at = body_instant(&outcome, &body)?;
    let reply = json!({ "scheduler": name, "action": action, "at": at.to_rfc3339() });
    blocking(&state, outcome, move |d| d.defer_action(&name, &action, at)).await?;
    Ok(Json(reply))
}

/// POST /schedulers/{name}/actions/{action}/expire
pub async fn expire(
    State(state): State<Arc<AppState>>,
    Path((name, action)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult {
    let outcome = format!("expire {name} {action}");
    let at = body_instant(&outcome, &body)?;
    let reply = json!({ "scheduler": name, "action": action, "at": at.to_rfc3339() });
    blocking(&state, outcome, move |d| d.expire_action(&name, &action, at)).await?;
    Ok(Json(reply))
}

// ---- bulk ----

pub async fn reschedule_all(State(state): State<Arc<AppState>>) -> ApiResult {
    let count = blocking(&state, "reschedule all".into(), |d| Ok(d.reschedule_all_schedulers())).await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn unschedule_all(State(state): State<Arc<AppState>>) -> ApiResult {
    let count = blocking(&state, "unschedule all".into(), |d| Ok(d.unschedule_all_schedulers())).await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn action_count(State(state): State<Arc<AppState>>) -> ApiResult {
    let count =
        blocking(&state, "scheduled action count".into(), |d| Ok(d.get_scheduled_action_count())).await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn clear_scheduling(State(state): State<Arc<AppState>>) -> ApiResult {
    blocking(&state, "clear scheduling".into(), |d| {
        d.clear_all_scheduling();
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "cleared": true })))
}

pub async fn deferred_action_count(State(state): State<Arc<AppState>>) -> ApiResult {
    let count =
        blocking(&state, "deferred action count".into(), |d| Ok(d.get_deferred_action_count())).await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn expiring_action_count(State(state): State<Arc<AppState>>) -> ApiResult {
    let count =
        blocking(&state, "expiring action count".into(), |d| Ok(d.get_expiring_action_count())).await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn clear_deferred_actions(State(state): State<Arc<AppState>>) -> ApiResult {
    let count = blocking(&state, "clear deferred actions".into(), |d| Ok(d.clear_deferred_actions())).await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn clear_expiring_actions(State(state): State<Arc<AppState>>) -> ApiResult {
    let count = blocking(&state, "clear expiring actions".into(), |d| Ok(d.clear_expiring_actions())).await?;
    Ok(Json(json!({ "count": count })))
}

#[cfg(test)]
mod tests {
    use crate::app::tests::{call, test_app};
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};
    use kairos_dispatcher::Action;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test(flavor = "multi_thread")]
    async fn bind_and_unbind_over_http() {
        let home = TempDir::new().unwrap();
        let (app, d) = test_app(&home);
        d.add_action("foo", Action::success()).unwrap();

        let (status, _) = call(&app, "POST", "/schedulers/bar", Some(json!({"interval": 30}))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, "GET", "/schedulers/bar", None).await;
        assert_eq!(body["interval"], 30);

        let (status, _) = call(&app, "GET", "/schedulers/bar/actions/foo", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, "GET", "/schedulers/action_count", None).await;
        assert_eq!(body["count"], 1);
        assert_eq!(d.job_count(), 1);

        let (status, _) = call(&app, "DELETE", "/schedulers/bar/actions/foo", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(d.get_scheduled_action_count(), 0);
        assert_eq!(d.job_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bind_unknown_pair_is_404() {
        let home = TempDir::new().unwrap();
        let (app, _) = test_app(&home);
        let (status, body) = call(&app, "GET", "/schedulers/bar/actions/foo", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["outcome"], "schedule bar foo");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn defer_and_expire_fill_the_tables() {
        let home = TempDir::new().unwrap();
        let (app, d) = test_app(&home);
        d.add_action("foo", Action::success()).unwrap();
        call(&app, "POST", "/schedulers/bar", Some(json!({"interval": 5}))).await;

        let later = (Utc::now() + Duration::hours(1)).to_rfc3339();
        let (status, _) = call(
            &app,
            "POST",
            "/schedulers/bar/actions/foo/defer",
            Some(json!({"dt": later})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(
            &app,
            "POST",
            "/schedulers/bar/actions/foo/expire",
            Some(json!({"dt": later})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, "GET", "/schedulers/deferred_action_count", None).await;
        assert_eq!(body["count"], 1);
        let (_, body) = call(&app, "GET", "/schedulers/expiring_action_count", None).await;
        assert_eq!(body["count"], 1);

        let (_, body) = call(&app, "GET", "/schedulers/clear_deferred_actions", None).await;
        assert_eq!(body["count"], 1);
        let (_, body) = call(&app, "GET", "/schedulers/clear_expiring_actions", None).await;
        assert_eq!(body["count"], 1);
        assert_eq!(d.get_deferred_action_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn garbled_instant_is_rejected() {
        let home = TempDir::new().unwrap();
        let (app, d) = test_app(&home);
        d.add_action("foo", Action::success()).unwrap();
        call(&app, "POST", "/schedulers/bar", Some(json!({"interval": 5}))).await;
        let (status, body) = call(
            &app,
            "POST",
            "/schedulers/bar/actions/foo/defer",
            Some(json!({"dt": "whenever"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unschedule_all_then_reschedule_all() {
        let home = TempDir::new().unwrap();
        let (app, d) = test_app(&home);
        d.add_action("foo", Action::success()).unwrap();
        call(&app, "POST", "/schedulers/bar", Some(json!({"interval": 5}))).await;
        call(&app, "GET", "/schedulers/bar/actions/foo", None).await;

        let (_, body) = call(&app, "GET", "/jobs/clear", None).await;
        assert_eq!(body["removed"], 1);
        let (_, body) = call(&app, "GET", "/schedulers/reschedule_all", None).await;
        assert_eq!(body["count"], 1);
        assert_eq!(d.job_count(), 1);

        call(&app, "GET", "/schedulers/unschedule_all", None).await;
        assert_eq!(d.get_scheduled_action_count(), 0);
        assert_eq!(d.job_count(), 0);
    }
}
