use kairos_scheduler::Scheduler;
use tracing::info;

use super::Dispatcher;
use crate::{
    action::Action,
    error::{DispatchError, EntityKind, Result},
    program::Program,
    server::{KeyTags, Server, TagMode},
    state::DispatcherState,
};

/// Programs are only accepted when every name they use exists.
pub(super) fn validate_program(state: &DispatcherState, name: &str, program: &Program) -> Result<()> {
    if program.is_empty() {
        return Err(DispatchError::Validation(format!(
            "program {name} expands to no items"
        )));
    }
    if program.offset().is_none() {
        return Err(DispatchError::Validation(format!(
            "program {name}: offset_seconds {} is out of range",
            program.offset_seconds
        )));
    }
    if let Some(a) = program.action_names().into_iter().find(|a| !state.actions.contains_key(*a)) {
        return Err(DispatchError::Validation(format!(
            "program {name} references unknown action {a}"
        )));
    }
    if let Some(s) = program
        .scheduler_names()
        .into_iter()
        .find(|s| !state.schedulers.contains_key(*s))
    {
        return Err(DispatchError::Validation(format!(
            "program {name} references unknown scheduler {s}"
        )));
    }
    Ok(())
}

/// Drop every program matching `doomed`, with its pending entries.
fn delete_programs_where(state: &mut DispatcherState, doomed: impl Fn(&Program) -> bool) -> Vec<String> {
    let names: Vec<String> = state
        .programs
        .iter()
        .filter(|(_, p)| doomed(p))
        .map(|(n, _)| n.clone())
        .collect();
    for name in &names {
        state.programs.remove(name);
        state.tables.remove_program(name);
    }
    names
}

impl Dispatcher {
    // ---- actions ----

    pub fn add_action(&self, name: &str, action: Action) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.actions.contains_key(name) {
                return Err(DispatchError::conflict(EntityKind::Action, name));
            }
            state.actions.insert(name.to_string(), action);
        }
        info!(action = %name, "action added");
        self.autosave();
        Ok(())
    }

    /// Replace an action. Live bindings pick up the new definition on their
    /// next firing.
    pub fn set_action(&self, name: &str, action: Action) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            let slot = state
                .actions
                .get_mut(name)
                .ok_or_else(|| DispatchError::not_found(EntityKind::Action, name))?;
            *slot = action;
        }
        info!(action = %name, "action updated");
        self.autosave();
        Ok(())
    }

    pub fn get_action(&self, name: &str) -> Result<Action> {
        self.inner
            .state
            .lock()
            .actions
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::not_found(EntityKind::Action, name))
    }

    pub fn action_names(&self) -> Vec<String> {
        self.inner.state.lock().actions.keys().cloned().collect()
    }

    /// Delete an action, unbinding it everywhere and deleting programs that use it.
    pub fn delete_action(&self, name: &str) -> Result<()> {
        let dropped = {
            let mut state = self.inner.state.lock();
            if state.actions.remove(name).is_none() {
                return Err(DispatchError::not_found(EntityKind::Action, name));
            }
            for s in state.tables.remove_action(name) {
                Scheduler::unschedule(&s, &self.inner.timed);
            }
            delete_programs_where(&mut state, |p| p.references_action(name))
        };
        info!(action = %name, ?dropped, "action deleted");
        self.autosave();
        Ok(())
    }

    // ---- schedulers ----

    pub fn add_scheduler(&self, name: &str, scheduler: Scheduler) -> Result<()> {
        scheduler
            .validate()
            .map_err(|e| DispatchError::Validation(e.to_string()))?;
        {
            let mut state = self.inner.state.lock();
            if state.schedulers.contains_key(name) {
                return Err(DispatchError::conflict(EntityKind::Scheduler, name));
            }
            state.schedulers.insert(name.to_string(), scheduler);
        }
        info!(scheduler = %name, "scheduler added");
        self.autosave();
        Ok(())
    }

    /// Replace a scheduler and re-prime its live binding, if any.
    pub fn set_scheduler(&self, name: &str, scheduler: Scheduler) -> Result<()> {
        scheduler
            .validate()
            .map_err(|e| DispatchError::Validation(e.to_string()))?;
        {
            let mut state = self.inner.state.lock();
            if !state.schedulers.contains_key(name) {
                return Err(DispatchError::not_found(EntityKind::Scheduler, name));
            }
            if state.tables.scheduled_actions.has_scheduler(name) {
                if scheduler.is_immediate() {
                    // Immediately never holds bindings
                    state.tables.scheduled_actions.remove_scheduler(name);
                    Scheduler::unschedule(name, &self.inner.timed);
                } else {
                    scheduler.schedule(name, &self.inner.timed, self.executor())?;
                }
            }
            state.schedulers.insert(name.to_string(), scheduler);
        }
        info!(scheduler = %name, "scheduler updated");
        self.autosave();
        Ok(())
    }

    pub fn get_scheduler(&self, name: &str) -> Result<Scheduler> {
        self.inner
            .state
            .lock()
            .schedulers
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::not_found(EntityKind::Scheduler, name))
    }

    pub fn scheduler_names(&self) -> Vec<String> {
        self.inner.state.lock().schedulers.keys().cloned().collect()
    }

    /// Delete a scheduler, unbinding it and deleting programs that use it.
    pub fn delete_scheduler(&self, name: &str) -> Result<()> {
        let dropped = {
            let mut state = self.inner.state.lock();
            if state.schedulers.remove(name).is_none() {
                return Err(DispatchError::not_found(EntityKind::Scheduler, name));
            }
            Scheduler::unschedule(name, &self.inner.timed);
            state.tables.remove_scheduler(name);
            delete_programs_where(&mut state, |p| p.references_scheduler(name))
        };
        info!(scheduler = %name, ?dropped, "scheduler deleted");
        self.autosave();
        Ok(())
    }

    // ---- programs ----

    pub fn add_program(&self, name: &str, program: Program) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.programs.contains_key(name) {
                return Err(DispatchError::conflict(EntityKind::Program, name));
            }
            validate_program(&state, name, &program)?;
            state.programs.insert(name.to_string(), program);
        }
        info!(program = %name, "program added");
        self.autosave();
        Ok(())
    }

    pub fn set_program(&self, name: &str, program: Program) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if !state.programs.contains_key(name) {
                return Err(DispatchError::not_found(EntityKind::Program, name));
            }
            validate_program(&state, name, &program)?;
            state.programs.insert(name.to_string(), program);
        }
        info!(program = %name, "program updated");
        self.autosave();
        Ok(())
    }

    pub fn get_program(&self, name: &str) -> Result<Program> {
        self.inner
            .state
            .lock()
            .programs
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::not_found(EntityKind::Program, name))
    }

    pub fn program_names(&self) -> Vec<String> {
        self.inner.state.lock().programs.keys().cloned().collect()
    }

    /// Delete a program and its pending deferred entries. Items it already
    /// expanded into the tables stay.
    pub fn delete_program(&self, name: &str) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.programs.remove(name).is_none() {
                return Err(DispatchError::not_found(EntityKind::Program, name));
            }
            state.tables.remove_program(name);
        }
        info!(program = %name, "program deleted");
        self.autosave();
        Ok(())
    }

    // ---- servers ----

    pub fn add_server(&self, name: &str, server: Server) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.servers.contains(name) {
                return Err(DispatchError::conflict(EntityKind::Server, name));
            }
            state.servers.insert(name, server);
        }
        info!(server = %name, "server added");
        self.autosave();
        Ok(())
    }

    pub fn set_server(&self, name: &str, server: Server) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if !state.servers.contains(name) {
                return Err(DispatchError::not_found(EntityKind::Server, name));
            }
            state.servers.insert(name, server);
        }
        info!(server = %name, "server updated");
        self.autosave();
        Ok(())
    }

    pub fn get_server(&self, name: &str) -> Result<Server> {
        self.inner
            .state
            .lock()
            .servers
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::not_found(EntityKind::Server, name))
    }

    /// Names of the servers selected by `key_tags` under `mode`.
    pub fn servers_by_tags(&self, key_tags: &KeyTags, mode: TagMode) -> Vec<String> {
        let state = self.inner.state.lock();
        state
            .servers
            .get_servers_by_tags(key_tags, mode)
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    pub fn server_names(&self) -> Vec<String> {
        self.inner.state.lock().servers.names()
    }

    pub fn delete_server(&self, name: &str) -> Result<()> {
        if self.inner.state.lock().servers.remove(name).is_none() {
            return Err(DispatchError::not_found(EntityKind::Server, name));
        }
        info!(server = %name, "server deleted");
        self.autosave();
        Ok(())
    }

    fn with_server<T>(&self, name: &str, f: impl FnOnce(&mut Server) -> T) -> Result<T> {
        let out = {
            let mut state = self.inner.state.lock();
            let server = state
                .servers
                .get_mut(name)
                .ok_or_else(|| DispatchError::not_found(EntityKind::Server, name))?;
            f(server)
        };
        self.autosave();
        Ok(out)
    }

    pub fn add_server_tags(&self, name: &str, key: &str, tags: Vec<String>) -> Result<()> {
        self.with_server(name, |s| s.add_tags(key, tags))
    }

    /// Returns whether the tag was present.
    pub fn delete_server_tag(&self, name: &str, key: &str, tag: &str) -> Result<bool> {
        self.with_server(name, |s| s.delete_tag(key, tag))
    }

    /// Returns whether the key was present.
    pub fn delete_server_key(&self, name: &str, key: &str) -> Result<bool> {
        self.with_server(name, |s| s.delete_key(key))
    }
}
