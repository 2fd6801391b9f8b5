//! Peer registry, tag maintenance and execution on peers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use kairos_dispatcher::{DispatchError, KeyTags, RemoteTarget, Resolver, TagMode};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{blocking, optional_json, ApiResult};
use crate::app::AppState;

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult {
    let servers = blocking(&state, "list servers".into(), |d| {
        let mut out = Map::new();
        for name in d.server_names() {
            out.insert(name.clone(), serde_json::to_value(d.get_server(&name)?)?);
        }
        Ok(Value::Object(out))
    })
    .await?;
    Ok(Json(servers))
}

pub async fn get_one(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult {
    let outcome = format!("get server {name}");
    let server = blocking(&state, outcome, move |d| Ok(serde_json::to_value(d.get_server(&name)?)?)).await?;
    Ok(Json(server))
}

pub async fn add(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    let outcome = format!("add server {name}");
    let added = name.clone();
    blocking(&state, outcome, move |d| d.add_server(&name, Resolver::new().server(body)?)).await?;
    Ok(Json(json!({ "added": added })))
}

pub async fn set(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    let outcome = format!("set server {name}");
    let set = name.clone();
    blocking(&state, outcome, move |d| d.set_server(&name, Resolver::new().server(body)?)).await?;
    Ok(Json(json!({ "set": set })))
}

pub async fn delete(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult {
    let outcome = format!("delete server {name}");
    let deleted = name.clone();
    blocking(&state, outcome, move |d| d.delete_server(&name)).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// GET /servers/{name}/actions/{action}/execute
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Path((name, action)): Path<(String, String)>,
) -> ApiResult {
    let outcome = format!("execute {action} on {name}");
    let rez = blocking(&state, outcome, move |d| {
        Ok(serde_json::to_value(d.execute_on_server(&name, &action)?)?)
    })
    .await?;
    Ok(Json(rez))
}

/// POST /servers/{name}/actions/{action}/execute[_with_rez]: body is the Rez.
pub async fn execute_with_rez(
    State(state): State<Arc<AppState>>,
    Path((name, action)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult {
    let outcome = format!("execute {action} on {name}");
    let body = optional_json(&outcome, &body)?;
    let rez = blocking(&state, outcome, move |d| {
        let rez = Resolver::new().optional_rez(body)?;
        Ok(serde_json::to_value(d.execute_on_server_with_rez(&name, &action, rez)?)?)
    })
    .await?;
    Ok(Json(rez))
}

/// POST /servers/{name}/execution: `{ "action": .., "rez"?: .. }`.
pub async fn execute_supplied(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(mut body): Json<Value>,
) -> ApiResult {
    let outcome = format!("execute supplied action on {name}");
    let rez = blocking(&state, outcome, move |d| {
        let resolver = Resolver::new();
        let action = body
            .get_mut("action")
            .map(Value::take)
            .ok_or_else(|| DispatchError::Validation("missing field: action".into()))?;
        let action = resolver.action(action)?;
        let rez = resolver.optional_rez(body.get_mut("rez").map(Value::take))?;
        Ok(serde_json::to_value(d.execute_supplied_on_server(&name, &action, rez)?)?)
    })
    .await?;
    Ok(Json(rez))
}

/// POST /servers/{name}/tags/{key}: body is a list of tag values.
pub async fn add_tags(
    State(state): State<Arc<AppState>>,
    Path((name, key)): Path<(String, String)>,
    Json(tags): Json<Vec<String>>,
) -> ApiResult {
    let outcome = format!("add tags {key} to {name}");
    let server = blocking(&state, outcome, move |d| {
        d.add_server_tags(&name, &key, tags)?;
        Ok(serde_json::to_value(d.get_server(&name)?)?)
    })
    .await?;
    Ok(Json(server))
}

pub async fn delete_key(
    State(state): State<Arc<AppState>>,
    Path((name, key)): Path<(String, String)>,
) -> ApiResult {
    let outcome = format!("delete tag key {key} from {name}");
    let removed = blocking(&state, outcome, move |d| d.delete_server_key(&name, &key)).await?;
    Ok(Json(json!({ "removed": removed })))
}

pub async fn delete_tag(
    State(state): State<Arc<AppState>>,
    Path((name, key, tag)): Path<(String, String, String)>,
) -> ApiResult {
    let outcome = format!("delete tag {key}={tag} from {name}");
    let removed = blocking(&state, outcome, move |d| d.delete_server_tag(&name, &key, &tag)).await?;
    Ok(Json(json!({ "removed": removed })))
}

#[derive(Debug, Deserialize)]
pub struct TagQuery {
    key_tags: KeyTags,
    #[serde(default)]
    mode: TagMode,
}

/// POST /servers/by_tags: names of the matching servers.
pub async fn by_tags(State(state): State<Arc<AppState>>, Json(query): Json<TagQuery>) -> ApiResult {
    let names = blocking(&state, "servers by tags".into(), move |d| {
        Ok(d.servers_by_tags(&query.key_tags, query.mode))
    })
    .await?;
    Ok(Json(json!({ "servers": names })))
}

#[derive(Debug, Deserialize)]
pub struct TaggedExecution {
    #[serde(default)]
    action_name: Option<String>,
    #[serde(default)]
    action: Option<Value>,
    key_tags: KeyTags,
    #[serde(default)]
    mode: TagMode,
    #[serde(default)]
    rez: Option<Value>,
}

/// POST /servers/execute_on_tags: server name → Rez, or `{ "error", "detail" }`
/// for servers that failed.
pub async fn execute_on_tags(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TaggedExecution>,
) -> ApiResult {
    let results = blocking(&state, "execute on tagged servers".into(), move |d| {
        let resolver = Resolver::new();
        let rez = resolver.optional_rez(req.rez)?;
        let supplied = req.action.map(|v| resolver.action(v)).transpose()?;
        let target = match (&req.action_name, &supplied) {
            (Some(name), None) => RemoteTarget::Named(name.as_str()),
            (None, Some(action)) => RemoteTarget::Supplied(action),
            _ => {
                return Err(DispatchError::Validation(
                    "exactly one of action_name or action is required".into(),
                ))
            }
        };

        let mut out = Map::new();
        for (server, result) in d.execute_on_servers(target, &req.key_tags, req.mode, rez) {
            let value = match result {
                Ok(rez) => serde_json::to_value(rez)?,
                Err(e) => json!({ "error": e.to_string(), "detail": e.diagnostic() }),
            };
            out.insert(server, value);
        }
        Ok(Value::Object(out))
    })
    .await?;
    Ok(Json(results))
}

#[cfg(test)]
mod tests {
    use crate::app::tests::{call, test_app, PORT};
    use axum::http::StatusCode;
    use kairos_dispatcher::Action;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test(flavor = "multi_thread")]
    async fn tag_maintenance() {
        let home = TempDir::new().unwrap();
        let (app, _) = test_app(&home);
        let (status, _) = call(
            &app,
            "POST",
            "/servers/pi",
            Some(json!({"host": "10.0.0.9", "port": 8181, "tags": {"room": ["kitchen"]}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, "POST", "/servers/pi/tags/room", Some(json!(["hall"]))).await;
        assert_eq!(body["tags"]["room"], json!(["hall", "kitchen"]));

        let (_, body) = call(
            &app,
            "POST",
            "/servers/by_tags",
            Some(json!({"key_tags": {"room": ["hall"]}, "mode": "ANY"})),
        )
        .await;
        assert_eq!(body["servers"], json!(["pi"]));

        let (_, body) = call(&app, "DELETE", "/servers/pi/tags/room/hall", None).await;
        assert_eq!(body["removed"], true);
        let (_, body) = call(&app, "DELETE", "/servers/pi/tags/room", None).await;
        assert_eq!(body["removed"], true);
        let (_, body) = call(&app, "GET", "/servers/pi", None).await;
        assert!(body.get("tags").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_server_runs_in_process() {
        let home = TempDir::new().unwrap();
        let (app, d) = test_app(&home);
        d.add_action("foo", Action::file_append("local.txt")).unwrap();
        call(
            &app,
            "POST",
            "/servers/me",
            Some(json!({"host": "127.0.0.1", "port": PORT, "tags": {"role": ["hub"]}})),
        )
        .await;

        let (status, _) = call(&app, "GET", "/servers/me/actions/foo/execute", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(
            &app,
            "POST",
            "/servers/me/actions/foo/execute_with_rez",
            Some(json!({"result": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(
            &app,
            "POST",
            "/servers/me/execution",
            Some(json!({"action": {"file": "local.txt"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            "POST",
            "/servers/execute_on_tags",
            Some(json!({"action_name": "foo", "key_tags": {"role": ["hub"]}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["me"].get("error").is_none());

        let text = std::fs::read_to_string(home.path().join("output/local.txt")).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("hello"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tagged_execution_needs_one_target() {
        let home = TempDir::new().unwrap();
        let (app, _) = test_app(&home);
        let (status, body) = call(
            &app,
            "POST",
            "/servers/execute_on_tags",
            Some(json!({"key_tags": {"role": ["hub"]}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }
}
