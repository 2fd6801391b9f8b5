//! Action inventory and execution, plus supplied (unregistered) actions.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use kairos_dispatcher::{DispatchError, Resolver};
use serde_json::{json, Map, Value};

use super::{blocking, optional_json, ApiResult};
use crate::app::AppState;

/// GET /actions: name → action.
pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult {
    let actions = blocking(&state, "list actions".into(), |d| {
        let mut out = Map::new();
        for (name, action) in d.snapshot().actions {
            out.insert(name, serde_json::to_value(action)?);
        }
        Ok(Value::Object(out))
    })
    .await?;
    Ok(Json(actions))
}

pub async fn get_one(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult {
    let outcome = format!("get action {name}");
    let action = blocking(&state, outcome, move |d| Ok(serde_json::to_value(d.get_action(&name)?)?)).await?;
    Ok(Json(action))
}

pub async fn add(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    let outcome = format!("add action {name}");
    let added = name.clone();
    blocking(&state, outcome, move |d| d.add_action(&name, Resolver::new().action(body)?)).await?;
    Ok(Json(json!({ "added": added })))
}

pub async fn set(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    let outcome = format!("set action {name}");
    let set = name.clone();
    blocking(&state, outcome, move |d| d.set_action(&name, Resolver::new().action(body)?)).await?;
    Ok(Json(json!({ "set": set })))
}

pub async fn delete(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult {
    let outcome = format!("delete action {name}");
    let deleted = name.clone();
    blocking(&state, outcome, move |d| d.delete_action(&name)).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// GET /actions/{name}/execute
pub async fn execute(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult {
    let outcome = format!("execute action {name}");
    let rez = blocking(&state, outcome, move |d| Ok(serde_json::to_value(d.execute_action(&name)?)?)).await?;
    Ok(Json(rez))
}

/// POST /actions/{name}/execute: body is the incoming Rez; empty or `{}`
/// means none. Peers call this for remote `Exec`.
pub async fn execute_with_rez(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult {
    let outcome = format!("execute action {name}");
    let body = optional_json(&outcome, &body)?;
    let rez = blocking(&state, outcome, move |d| {
        let rez = Resolver::new().optional_rez(body)?;
        Ok(serde_json::to_value(d.execute_action_with_rez(&name, rez)?)?)
    })
    .await?;
    Ok(Json(rez))
}

/// POST /execution: body is the action itself.
pub async fn execute_supplied(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> ApiResult {
    let rez = blocking(&state, "execute supplied action".into(), move |d| {
        let action = Resolver::new().action(body)?;
        Ok(serde_json::to_value(d.execute_supplied_action(&action)?)?)
    })
    .await?;
    Ok(Json(rez))
}

/// POST /execution/with_rez: body is `{ "action": .., "rez": .. }`. Peers
/// call this for remote `ExecSupplied`.
pub async fn execute_supplied_with_rez(
    State(state): State<Arc<AppState>>,
    Json(mut body): Json<Value>,
) -> ApiResult {
    let outcome = "execute supplied action".to_string();
    let rez = blocking(&state, outcome, move |d| {
        let action = body
            .get_mut("action")
            .map(Value::take)
            .ok_or_else(|| DispatchError::Validation("missing field: action".into()))?;
        let resolver = Resolver::new();
        let action = resolver.action(action)?;
        let rez = resolver.optional_rez(body.get_mut("rez").map(Value::take))?;
        Ok(serde_json::to_value(d.execute_supplied_action_with_rez(&action, rez)?)?)
    })
    .await?;
    Ok(Json(rez))
}

#[cfg(test)]
mod tests {
    use crate::app::tests::{call, test_app};
    use axum::http::StatusCode;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test(flavor = "multi_thread")]
    async fn crud_round_trip() {
        let home = TempDir::new().unwrap();
        let (app, d) = test_app(&home);

        let (status, _) = call(&app, "POST", "/actions/foo", Some(json!({"type": "Success"}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, "POST", "/actions/foo", Some(json!({"type": "Success"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["outcome"], "add action foo");

        let (status, body) = call(&app, "GET", "/actions/foo", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "Success");

        let (status, _) = call(&app, "PUT", "/actions/foo", Some(json!({"file": "out.txt"}))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, "GET", "/actions", None).await;
        assert_eq!(body["foo"]["type"], "FileAppend");

        let (status, _) = call(&app, "DELETE", "/actions/foo", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(d.action_names().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unresolvable_body_is_bad_request() {
        let home = TempDir::new().unwrap();
        let (app, _) = test_app(&home);
        let (status, body) = call(&app, "POST", "/actions/foo", Some(json!({"bogus": 1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "RESOLUTION_ERROR");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn execute_with_and_without_rez() {
        let home = TempDir::new().unwrap();
        let (app, _) = test_app(&home);
        call(&app, "POST", "/actions/fail", Some(json!({"type": "Failure", "message": "nope"}))).await;
        call(&app, "POST", "/actions/ok", Some(json!({"type": "Success"}))).await;

        let (status, _) = call(&app, "GET", "/actions/ok/execute", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, "POST", "/actions/ok/execute", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "POST", "/actions/ok/execute", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, "GET", "/actions/fail/execute", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "ACTION_FAILURE");

        let (status, _) = call(&app, "GET", "/actions/ghost/execute", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn supplied_file_append_writes_under_output() {
        let home = TempDir::new().unwrap();
        let (app, _) = test_app(&home);
        let (status, _) = call(
            &app,
            "POST",
            "/execution",
            Some(json!({"file": "supplied.txt", "payload": {"k": 1}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            "POST",
            "/execution/with_rez",
            Some(json!({"action": {"file": "supplied.txt"}, "rez": {"result": {"k": 2}}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let text = std::fs::read_to_string(home.path().join("output/supplied.txt")).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
