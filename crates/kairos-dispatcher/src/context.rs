//! The typed seam between actions and the dispatcher.
//!
//! Actions never hold dispatcher state. Anything that reaches outside the
//! action tree (running another named action, talking to peers, changing
//! bindings) goes through [`ActionContext`], which the dispatcher implements.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use kairos_core::Rez;
use serde_json::{json, Value};

use crate::{
    action::Action,
    error::{ActionError, DispatchError},
    server::{KeyTags, TagMode},
};

/// What a remote-dispatch action asks a peer to run.
#[derive(Debug, Clone, Copy)]
pub enum RemoteTarget<'a> {
    /// An action registered on the target node.
    Named(&'a str),
    /// An action value shipped with the request.
    Supplied(&'a Action),
}

impl RemoteTarget<'_> {
    pub fn label(&self) -> String {
        match self {
            RemoteTarget::Named(name) => (*name).to_string(),
            RemoteTarget::Supplied(action) => action.variant_name().to_string(),
        }
    }
}

type Outcome = std::result::Result<(), DispatchError>;

pub trait ActionContext {
    /// Run a registered action locally.
    fn execute_action_with_rez(&self, name: &str, rez: Option<Rez>) -> Result<Rez, ActionError>;

    /// Run `target` on the named server, or locally when `server_name` is
    /// `None` or names this node.
    fn execute_remote(
        &self,
        server_name: Option<&str>,
        target: RemoteTarget<'_>,
        rez: Option<Rez>,
    ) -> Result<Rez, ActionError>;

    /// Run `target` on every server selected by `key_tags`/`mode`.
    /// One entry per selected server, keyed by server name.
    fn execute_on_tagged(
        &self,
        target: RemoteTarget<'_>,
        key_tags: &KeyTags,
        mode: TagMode,
        rez: Option<Rez>,
    ) -> Vec<(String, Result<Rez, ActionError>)>;

    fn schedule_action(&self, scheduler_name: &str, action_name: &str) -> Outcome;

    fn unschedule_scheduler_action(&self, scheduler_name: &str, action_name: &str) -> Outcome;

    fn unschedule_scheduler(&self, scheduler_name: &str) -> Outcome;

    fn defer_action(
        &self,
        scheduler_name: &str,
        action_name: &str,
        wait_until: DateTime<Utc>,
    ) -> Outcome;

    fn expire_action(
        &self,
        scheduler_name: &str,
        action_name: &str,
        expire_on: DateTime<Utc>,
    ) -> Outcome;

    fn schedule_program(&self, name: &str, start: DateTime<Utc>, stop: DateTime<Utc>) -> Outcome;

    fn clear_all_scheduling(&self) -> Outcome;

    /// Description of the local node for `LocalInfo`.
    fn local_info(&self) -> Value {
        json!({})
    }

    /// Base directory for relative `FileAppend` targets.
    fn output_dir(&self) -> Option<PathBuf> {
        None
    }

    /// sysfs GPIO root.
    fn gpio_root(&self) -> PathBuf {
        PathBuf::from(kairos_core::config::DEFAULT_GPIO_ROOT)
    }
}
