//! Whole-dispatcher administration: snapshots, wipe, introspection.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use kairos_core::config::CURRENT_SNAPSHOT;
use kairos_dispatcher::Resolver;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{blocking, ApiResult};
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    name: Option<String>,
}

impl SnapshotQuery {
    fn name(self) -> String {
        self.name.unwrap_or_else(|| CURRENT_SNAPSHOT.to_string())
    }
}

/// GET|POST /dispatcher/load?name=..
pub async fn load(State(state): State<Arc<AppState>>, Query(query): Query<SnapshotQuery>) -> ApiResult {
    let name = query.name();
    let outcome = format!("load {name}");
    let loaded = name.clone();
    blocking(&state, outcome, move |d| d.load(&name)).await?;
    Ok(Json(json!({ "loaded": loaded })))
}

/// GET|POST /dispatcher/save?name=..
pub async fn save(State(state): State<Arc<AppState>>, Query(query): Query<SnapshotQuery>) -> ApiResult {
    let name = query.name();
    let outcome = format!("save {name}");
    let path = blocking(&state, outcome, move |d| d.save(&name)).await?;
    Ok(Json(json!({ "saved": path.display().to_string() })))
}

/// Empties inventories and tables, and drops every Timed job.
pub async fn clear(State(state): State<Arc<AppState>>) -> ApiResult {
    blocking(&state, "clear dispatcher".into(), |d| {
        d.clear_all();
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "cleared": true })))
}

pub async fn saved_dir(State(state): State<Arc<AppState>>) -> ApiResult {
    let dir = state.dispatcher.saved_dir();
    Ok(Json(json!({ "saved_dir": dir.map(|d| d.display().to_string()) })))
}

#[derive(Debug, Deserialize)]
pub struct SavedDirBody {
    dir: Option<String>,
}

/// POST /dispatcher/saved_dir: `{ "dir": path | null }`.
pub async fn set_saved_dir(State(state): State<Arc<AppState>>, Json(body): Json<SavedDirBody>) -> ApiResult {
    let dir = body.dir.map(PathBuf::from);
    let reply = json!({ "saved_dir": dir.as_ref().map(|d| d.display().to_string()) });
    blocking(&state, "set saved_dir".into(), move |d| {
        d.set_saved_dir(dir);
        Ok(())
    })
    .await?;
    Ok(Json(reply))
}

pub async fn list_saved(State(state): State<Arc<AppState>>) -> ApiResult {
    let names = blocking(&state, "list saved".into(), |d| d.list_saved()).await?;
    Ok(Json(json!({ "saved": names })))
}

pub async fn describe_all(State(state): State<Arc<AppState>>) -> ApiResult {
    let described = blocking(&state, "describe all".into(), |d| Ok(d.describe_all())).await?;
    Ok(Json(described))
}

pub async fn counts(State(state): State<Arc<AppState>>) -> ApiResult {
    let counts = blocking(&state, "counts".into(), |d| Ok(d.counts())).await?;
    Ok(Json(counts))
}

/// GET /dispatcher/state: the document `save` would write.
pub async fn state(State(state): State<Arc<AppState>>) -> ApiResult {
    let doc = blocking(&state, "dump state".into(), |d| d.to_json()).await?;
    Ok(Json(doc))
}

/// POST /dispatcher/replace: swap in a whole state document, then bring its
/// bindings back to life.
pub async fn replace(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> ApiResult {
    let rescheduled = blocking(&state, "replace dispatcher".into(), move |d| {
        let replacement = Resolver::new().state(body)?;
        d.replace_all(replacement);
        Ok(d.reschedule_all_schedulers())
    })
    .await?;
    Ok(Json(json!({ "rescheduled": rescheduled })))
}
