//! Direct execution, remote dispatch, and the dispatcher's side of the
//! [`ActionContext`] seam.

use std::path::PathBuf;
use std::thread;

use chrono::{DateTime, Utc};
use kairos_core::Rez;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::Dispatcher;
use crate::{
    action::Action,
    context::{ActionContext, RemoteTarget},
    error::{ActionError, Result},
    executor::{Executor, FiringReport},
    server::{KeyTags, Server, TagMode},
};

impl Dispatcher {
    fn run_named(&self, name: &str, rez: Option<Rez>) -> std::result::Result<Rez, ActionError> {
        let action = self.get_action(name)?;
        action.execute(name, rez, self)
    }

    fn run_supplied(&self, action: &Action, rez: Option<Rez>) -> std::result::Result<Rez, ActionError> {
        action.execute(&format!("supplied:{}", action.variant_name()), rez, self)
    }

    /// Run `target` on `server`, locally when it is this node.
    fn run_on(
        &self,
        server: &Server,
        target: RemoteTarget<'_>,
        rez: Option<Rez>,
    ) -> std::result::Result<Rez, ActionError> {
        if server.is_local(&self.inner.identity) {
            debug!(target = %target.label(), "local server, short-circuiting");
            return match target {
                RemoteTarget::Named(name) => self.run_named(name, rez),
                RemoteTarget::Supplied(action) => self.run_supplied(action, rez),
            };
        }
        let peer = server.identity();
        match target {
            RemoteTarget::Named(name) => self.inner.client.execute_action(&peer, name, rez.as_ref()),
            RemoteTarget::Supplied(action) => {
                self.inner.client.execute_supplied(&peer, action, rez.as_ref())
            }
        }
    }

    /// Fire every action bound to `scheduler_name`, as a Timed firing would.
    pub fn fire(&self, scheduler_name: &str) -> FiringReport {
        Executor::fire(self, scheduler_name)
    }

    pub fn execute_action(&self, name: &str) -> Result<Rez> {
        self.execute_action_with_rez(name, None)
    }

    pub fn execute_action_with_rez(&self, name: &str, rez: Option<Rez>) -> Result<Rez> {
        info!(action = %name, "executing action");
        Ok(self.run_named(name, rez)?)
    }

    pub fn execute_supplied_action(&self, action: &Action) -> Result<Rez> {
        self.execute_supplied_action_with_rez(action, None)
    }

    pub fn execute_supplied_action_with_rez(&self, action: &Action, rez: Option<Rez>) -> Result<Rez> {
        info!(action = action.variant_name(), "executing supplied action");
        Ok(self.run_supplied(action, rez)?)
    }

    pub fn execute_on_server(&self, server_name: &str, action_name: &str) -> Result<Rez> {
        self.execute_on_server_with_rez(server_name, action_name, None)
    }

    /// Run a named action on a registered server. The action need not exist
    /// locally unless the server is this node.
    pub fn execute_on_server_with_rez(
        &self,
        server_name: &str,
        action_name: &str,
        rez: Option<Rez>,
    ) -> Result<Rez> {
        let server = self.get_server(server_name)?;
        info!(server = %server_name, action = %action_name, "executing on server");
        Ok(self.run_on(&server, RemoteTarget::Named(action_name), rez)?)
    }

    pub fn execute_supplied_on_server(
        &self,
        server_name: &str,
        action: &Action,
        rez: Option<Rez>,
    ) -> Result<Rez> {
        let server = self.get_server(server_name)?;
        info!(server = %server_name, action = action.variant_name(), "executing supplied action on server");
        Ok(self.run_on(&server, RemoteTarget::Supplied(action), rez)?)
    }

    /// Run `target` on every server selected by `key_tags`/`mode`, in
    /// parallel. Each server gets its own copy of `rez`.
    pub fn execute_on_servers(
        &self,
        target: RemoteTarget<'_>,
        key_tags: &KeyTags,
        mode: TagMode,
        rez: Option<Rez>,
    ) -> Vec<(String, std::result::Result<Rez, ActionError>)> {
        let servers = self.inner.state.lock().servers.get_servers_by_tags(key_tags, mode);
        info!(target = %target.label(), servers = servers.len(), ?mode, "executing on tagged servers");

        thread::scope(|scope| {
            let handles: Vec<_> = servers
                .iter()
                .map(|(name, server)| {
                    let rez = rez.clone();
                    (name, scope.spawn(move || self.run_on(server, target, rez)))
                })
                .collect();
            handles
                .into_iter()
                .map(|(name, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|_| Err(ActionError::failed(format!("{name}: worker panicked"))));
                    (name.clone(), result)
                })
                .collect()
        })
    }
}

impl ActionContext for Dispatcher {
    fn execute_action_with_rez(&self, name: &str, rez: Option<Rez>) -> std::result::Result<Rez, ActionError> {
        self.run_named(name, rez)
    }

    fn execute_remote(
        &self,
        server_name: Option<&str>,
        target: RemoteTarget<'_>,
        rez: Option<Rez>,
    ) -> std::result::Result<Rez, ActionError> {
        match server_name {
            None => match target {
                RemoteTarget::Named(name) => self.run_named(name, rez),
                RemoteTarget::Supplied(action) => self.run_supplied(action, rez),
            },
            Some(name) => {
                let server = self.get_server(name)?;
                self.run_on(&server, target, rez)
            }
        }
    }

    fn execute_on_tagged(
        &self,
        target: RemoteTarget<'_>,
        key_tags: &KeyTags,
        mode: TagMode,
        rez: Option<Rez>,
    ) -> Vec<(String, std::result::Result<Rez, ActionError>)> {
        self.execute_on_servers(target, key_tags, mode, rez)
    }

    fn schedule_action(&self, scheduler_name: &str, action_name: &str) -> Result<()> {
        Dispatcher::schedule_action(self, scheduler_name, action_name)
    }

    fn unschedule_scheduler_action(&self, scheduler_name: &str, action_name: &str) -> Result<()> {
        Dispatcher::unschedule_scheduler_action(self, scheduler_name, action_name)
    }

    fn unschedule_scheduler(&self, scheduler_name: &str) -> Result<()> {
        Dispatcher::unschedule_scheduler(self, scheduler_name)
    }

    fn defer_action(&self, scheduler_name: &str, action_name: &str, wait_until: DateTime<Utc>) -> Result<()> {
        Dispatcher::defer_action(self, scheduler_name, action_name, wait_until)
    }

    fn expire_action(&self, scheduler_name: &str, action_name: &str, expire_on: DateTime<Utc>) -> Result<()> {
        Dispatcher::expire_action(self, scheduler_name, action_name, expire_on)
    }

    fn schedule_program(&self, name: &str, start: DateTime<Utc>, stop: DateTime<Utc>) -> Result<()> {
        Dispatcher::schedule_program(self, name, start, stop)
    }

    fn clear_all_scheduling(&self) -> Result<()> {
        Dispatcher::clear_all_scheduling(self);
        Ok(())
    }

    fn local_info(&self) -> Value {
        let identity = &self.inner.identity;
        let name = self
            .inner
            .state
            .lock()
            .servers
            .find_identity(identity)
            .map(str::to_string);
        json!({
            "host": identity.host,
            "port": identity.port,
            "server_name": name,
            "version": env!("CARGO_PKG_VERSION"),
        })
    }

    fn output_dir(&self) -> Option<PathBuf> {
        self.inner.output_dir.clone()
    }

    fn gpio_root(&self) -> PathBuf {
        self.inner.gpio_root.clone()
    }
}
