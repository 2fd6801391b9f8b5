use kairos_core::Rez;
use serde_json::{json, Map, Value};
use tracing::warn;

use super::{param_str, Action};
use crate::{
    context::{ActionContext, RemoteTarget},
    error::ActionError,
    server::{KeyTags, TagMode},
};

fn target(action: &Action) -> RemoteTarget<'_> {
    match action {
        Action::Exec { action_name, .. } | Action::ExecKeyTags { action_name, .. } => {
            RemoteTarget::Named(action_name)
        }
        Action::ExecSupplied { action, .. } | Action::ExecSuppliedKeyTags { action, .. } => {
            RemoteTarget::Supplied(action)
        }
        other => RemoteTarget::Supplied(other),
    }
}

/// `Exec` / `ExecSupplied`: one server, or local.
pub(super) fn exec_one(
    action: &Action,
    flds: &Map<String, Value>,
    rez: Option<Rez>,
    ctx: &dyn ActionContext,
) -> Result<Rez, ActionError> {
    let server_name = param_str(flds, "server_name");
    ctx.execute_remote(server_name.as_deref(), target(action), rez)
}

/// `ExecKeyTags` / `ExecSuppliedKeyTags`: broadcast to every matching server.
///
/// The result is the list of per-server results. Per-server failures are
/// collected in `extra`; the action only fails when every target failed.
pub(super) fn exec_tagged(
    action: &Action,
    key_tags: &KeyTags,
    mode: TagMode,
    rez: Option<Rez>,
    ctx: &dyn ActionContext,
) -> Result<Rez, ActionError> {
    let outcomes = ctx.execute_on_tagged(target(action), key_tags, mode, rez.clone());
    let total = outcomes.len();

    let mut results = Vec::new();
    let mut failures = Map::new();
    for (server, outcome) in outcomes {
        match outcome {
            Ok(r) => results.push(json!({
                "server": server,
                "result": r.result.unwrap_or(Value::Null),
            })),
            Err(e) => {
                warn!(%server, error = %e, "broadcast target failed");
                failures.insert(server, e.diagnostic());
            }
        }
    }

    if total > 0 && results.is_empty() {
        return Err(ActionError::Failed {
            message: format!("{}: all {total} targets failed", action.variant_name()),
            rez: Some(Box::new(
                Rez::passthrough(rez).extra(json!({ "failures": failures })),
            )),
        });
    }

    let mut out = Rez::successor(rez).result(Value::Array(results));
    if !failures.is_empty() {
        out.extra = Some(json!({ "failures": failures }));
    }
    Ok(out)
}
