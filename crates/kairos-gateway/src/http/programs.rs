use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use chrono::{TimeDelta, Utc};
use kairos_dispatcher::{DispatchError, Resolver};
use serde_json::{json, Map, Value};

use super::{blocking, optional_json, parse_instant, ApiError, ApiResult};
use crate::app::AppState;

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult {
    let programs = blocking(&state, "list programs".into(), |d| {
        let mut out = Map::new();
        for (name, program) in d.snapshot().programs {
            out.insert(name, serde_json::to_value(program)?);
        }
        Ok(Value::Object(out))
    })
    .await?;
    Ok(Json(programs))
}

pub async fn get_one(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult {
    let outcome = format!("get program {name}");
    let program = blocking(&state, outcome, move |d| Ok(serde_json::to_value(d.get_program(&name)?)?)).await?;
    Ok(Json(program))
}

pub async fn add(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    let outcome = format!("add program {name}");
    let added = name.clone();
    blocking(&state, outcome, move |d| d.add_program(&name, Resolver::new().program(body)?)).await?;
    Ok(Json(json!({ "added": added })))
}

pub async fn set(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    let outcome = format!("set program {name}");
    let set = name.clone();
    blocking(&state, outcome, move |d| d.set_program(&name, Resolver::new().program(body)?)).await?;
    Ok(Json(json!({ "set": set })))
}

pub async fn delete(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult {
    let outcome = format!("delete program {name}");
    let deleted = name.clone();
    blocking(&state, outcome, move |d| d.delete_program(&name)).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// POST /programs/{name}/schedule: `{ "dt1"?, "dt2"? | "duration_seconds"? }`.
/// `dt1` defaults to now; one of `dt2` or `duration_seconds` is required.
pub async fn schedule(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult {
    let outcome = format!("schedule program {name}");
    let body = optional_json(&outcome, &body)?.unwrap_or(Value::Null);
    let field = |key: &str| body.get(key).and_then(Value::as_str);
    let invalid = |e: DispatchError| ApiError::new(&outcome, e);

    let start = match field("dt1") {
        Some(raw) => parse_instant(raw).map_err(invalid)?,
        None => Utc::now(),
    };
    let stop = match (field("dt2"), body.get("duration_seconds").and_then(Value::as_i64)) {
        (Some(raw), _) => parse_instant(raw).map_err(invalid)?,
        (None, Some(secs)) => TimeDelta::try_seconds(secs)
            .and_then(|delta| start.checked_add_signed(delta))
            .ok_or_else(|| {
                invalid(DispatchError::Validation(format!(
                    "duration_seconds {secs} is out of range"
                )))
            })?,
        (None, None) => {
            return Err(invalid(DispatchError::Validation(
                "dt2 or duration_seconds is required".into(),
            )))
        }
    };

    let reply = json!({
        "program": name,
        "start": start.to_rfc3339(),
        "stop": stop.to_rfc3339(),
    });
    blocking(&state, outcome, move |d| d.schedule_program(&name, start, stop)).await?;
    Ok(Json(reply))
}

pub async fn deferred_count(State(state): State<Arc<AppState>>) -> ApiResult {
    let count =
        blocking(&state, "deferred program count".into(), |d| Ok(d.get_deferred_program_count())).await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn clear_deferred(State(state): State<Arc<AppState>>) -> ApiResult {
    let count = blocking(&state, "clear deferred programs".into(), |d| Ok(d.clear_deferred_programs())).await?;
    Ok(Json(json!({ "count": count })))
}

#[cfg(test)]
mod tests {
    use crate::app::tests::{call, test_app};
    use axum::http::StatusCode;
    use kairos_dispatcher::{Action, IMMEDIATELY};
    use kairos_scheduler::{Immediately, Scheduler, Timely};
    use serde_json::json;
    use tempfile::TempDir;

    fn seed(d: &kairos_dispatcher::Dispatcher) {
        for name in ["foo1", "foo2", "foo3"] {
            d.add_action(name, Action::success()).unwrap();
        }
        d.add_scheduler("bar", Scheduler::Timely(Timely::every(1))).unwrap();
        d.add_scheduler(IMMEDIATELY, Scheduler::Immediately(Immediately::default()))
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn schedule_defers_the_program() {
        let home = TempDir::new().unwrap();
        let (app, d) = test_app(&home);
        seed(&d);

        let program = json!({
            "prologue_name": "foo1",
            "epilogue_name": "foo3",
            "body": {"bar": ["foo2"]}
        });
        let (status, _) = call(&app, "POST", "/programs/pbe", Some(program)).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, "GET", "/programs/pbe", None).await;
        assert_eq!(body["body"]["bar"], json!(["foo2"]));

        let (status, body) = call(
            &app,
            "POST",
            "/programs/pbe/schedule",
            Some(json!({"dt1": "2030-01-01T10:00:00Z", "duration_seconds": 60})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stop"], "2030-01-01T10:01:00+00:00");

        let (_, body) = call(&app, "GET", "/programs/deferred_count", None).await;
        assert_eq!(body["count"], 1);
        let (_, body) = call(&app, "GET", "/programs/clear_deferred", None).await;
        assert_eq!(body["count"], 1);
        assert_eq!(d.get_deferred_program_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn schedule_needs_an_end() {
        let home = TempDir::new().unwrap();
        let (app, d) = test_app(&home);
        seed(&d);
        call(&app, "POST", "/programs/p", Some(json!({"body": {"bar": ["foo2"]}}))).await;

        let (status, body) = call(&app, "POST", "/programs/p/schedule", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["outcome"], "schedule program p");

        let (status, _) = call(
            &app,
            "POST",
            "/programs/p/schedule",
            Some(json!({"dt1": "2030-01-01T10:00:00Z", "dt2": "2030-01-01T09:00:00Z"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            "POST",
            "/programs/p/schedule",
            Some(json!({"duration_seconds": i64::MAX})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(d.get_deferred_program_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn program_with_unknown_names_is_rejected() {
        let home = TempDir::new().unwrap();
        let (app, _) = test_app(&home);
        let (status, body) = call(&app, "POST", "/programs/p", Some(json!({"body": {"ghost": ["foo"]}}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }
}
