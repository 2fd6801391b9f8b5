//! Binding, unbinding, deferral and expiration.

use chrono::{DateTime, Utc};
use kairos_core::binding_tag;
use kairos_scheduler::Scheduler;
use tracing::{debug, error, info, warn};

use super::{inventory::validate_program, Dispatcher};
use crate::{
    action::Action,
    error::{DispatchError, EntityKind, Result},
    state::DispatcherState,
};

/// An action to run once the dispatcher lock is released. Produced when an
/// `Immediately` scheduler is bound.
#[derive(Debug, Clone)]
pub struct PendingRun {
    pub tag: String,
    pub action: Action,
}

fn require_pair(state: &DispatcherState, s: &str, a: &str) -> Result<()> {
    if !state.schedulers.contains_key(s) {
        return Err(DispatchError::not_found(EntityKind::Scheduler, s));
    }
    if !state.actions.contains_key(a) {
        return Err(DispatchError::not_found(EntityKind::Action, a));
    }
    Ok(())
}

impl Dispatcher {
    /// Bind `(s, a)` on locked state. The first action bound to a scheduler
    /// installs its Timed job.
    pub(super) fn bind_locked(
        &self,
        state: &mut DispatcherState,
        s: &str,
        a: &str,
    ) -> Result<Option<PendingRun>> {
        require_pair(state, s, a)?;
        let scheduler = &state.schedulers[s];

        if scheduler.is_immediate() {
            if !scheduler.gate_open_now() {
                debug!(scheduler = %s, action = %a, "immediate run outside daily gate, dropped");
                return Ok(None);
            }
            return Ok(Some(PendingRun {
                tag: binding_tag(s, a),
                action: state.actions[a].clone(),
            }));
        }

        if state.tables.scheduled_actions.contains(s, a) {
            return Ok(None);
        }
        if !state.tables.scheduled_actions.has_scheduler(s) {
            scheduler.schedule(s, &self.inner.timed, self.executor())?;
        }
        state.tables.scheduled_actions.insert(s, a);
        info!(scheduler = %s, action = %a, "action scheduled");
        Ok(None)
    }

    /// Unbind `(s, a)` on locked state; the last action out removes the job.
    pub(super) fn unbind_locked(&self, state: &mut DispatcherState, s: &str, a: &str) -> bool {
        if !state.tables.scheduled_actions.remove(s, a) {
            return false;
        }
        if !state.tables.scheduled_actions.has_scheduler(s) {
            Scheduler::unschedule(s, &self.inner.timed);
        }
        info!(scheduler = %s, action = %a, "action unscheduled");
        true
    }

    pub(super) fn run_pending(&self, runs: Vec<PendingRun>) {
        for run in runs {
            info!(tag = %run.tag, "running immediate action");
            if let Err(e) = run.action.execute(&run.tag, None, self) {
                error!(tag = %run.tag, error = %e, "immediate action failed");
            }
        }
    }

    /// Actions currently bound to `scheduler_name`, in binding order.
    pub fn bound_actions(&self, scheduler_name: &str) -> Vec<(String, Action)> {
        let state = self.inner.state.lock();
        state
            .tables
            .scheduled_actions
            .actions_for(scheduler_name)
            .iter()
            .filter_map(|a| state.actions.get(a).map(|action| (a.clone(), action.clone())))
            .collect()
    }

    /// Bind an action to a scheduler. Binding the same pair twice is a no-op.
    /// For an `Immediately` scheduler the action runs once, now, instead.
    pub fn schedule_action(&self, scheduler_name: &str, action_name: &str) -> Result<()> {
        let pending = {
            let mut state = self.inner.state.lock();
            self.bind_locked(&mut state, scheduler_name, action_name)?
        };
        self.run_pending(pending.into_iter().collect());
        self.autosave();
        Ok(())
    }

    pub fn unschedule_scheduler_action(&self, scheduler_name: &str, action_name: &str) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            require_pair(&state, scheduler_name, action_name)?;
            self.unbind_locked(&mut state, scheduler_name, action_name);
        }
        self.autosave();
        Ok(())
    }

    /// Drop every live binding of a scheduler. Inventories, deferrals and
    /// expirations are untouched.
    pub fn unschedule_scheduler(&self, scheduler_name: &str) -> Result<()> {
        let dropped = {
            let mut state = self.inner.state.lock();
            if !state.schedulers.contains_key(scheduler_name) {
                return Err(DispatchError::not_found(EntityKind::Scheduler, scheduler_name));
            }
            Scheduler::unschedule(scheduler_name, &self.inner.timed);
            state.tables.scheduled_actions.remove_scheduler(scheduler_name)
        };
        if !dropped.is_empty() {
            info!(scheduler = %scheduler_name, actions = ?dropped, "scheduler unscheduled");
        }
        self.autosave();
        Ok(())
    }

    pub fn unschedule_all_schedulers(&self) -> usize {
        let names = {
            let mut state = self.inner.state.lock();
            let names: Vec<String> = state.tables.scheduled_actions.schedulers().cloned().collect();
            for s in &names {
                Scheduler::unschedule(s, &self.inner.timed);
            }
            state.tables.scheduled_actions.clear();
            names
        };
        info!(schedulers = names.len(), "all schedulers unscheduled");
        self.autosave();
        names.len()
    }

    /// Re-prime the Timed job of a bound scheduler.
    pub fn reschedule_scheduler(&self, scheduler_name: &str) -> Result<()> {
        let state = self.inner.state.lock();
        let scheduler = state
            .schedulers
            .get(scheduler_name)
            .ok_or_else(|| DispatchError::not_found(EntityKind::Scheduler, scheduler_name))?;
        if state.tables.scheduled_actions.has_scheduler(scheduler_name) && !scheduler.is_immediate() {
            scheduler.schedule(scheduler_name, &self.inner.timed, self.executor())?;
        }
        Ok(())
    }

    /// Install a Timed job for every scheduler with live bindings. Used after
    /// a load, when the tables arrive without jobs. Returns how many were
    /// installed.
    pub fn reschedule_all_schedulers(&self) -> usize {
        let state = self.inner.state.lock();
        let mut installed = 0;
        for s in state.tables.scheduled_actions.schedulers() {
            let Some(scheduler) = state.schedulers.get(s) else {
                warn!(scheduler = %s, "bindings reference an unknown scheduler, skipped");
                continue;
            };
            if scheduler.is_immediate() {
                warn!(scheduler = %s, "immediate scheduler holds bindings, skipped");
                continue;
            }
            match scheduler.schedule(s, &self.inner.timed, self.executor()) {
                Ok(()) => installed += 1,
                Err(e) => error!(scheduler = %s, error = %e, "reschedule failed"),
            }
        }
        info!(installed, "schedulers rescheduled");
        installed
    }

    /// Bind `(s, a)` once the sweeper sees `wait_until` in the past.
    pub fn defer_action(
        &self,
        scheduler_name: &str,
        action_name: &str,
        wait_until: DateTime<Utc>,
    ) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            require_pair(&state, scheduler_name, action_name)?;
            state.tables.defer(scheduler_name, action_name, wait_until);
        }
        info!(scheduler = %scheduler_name, action = %action_name, %wait_until, "action deferred");
        self.autosave();
        Ok(())
    }

    /// Unbind `(s, a)` once the sweeper sees `expire_on` in the past.
    pub fn expire_action(
        &self,
        scheduler_name: &str,
        action_name: &str,
        expire_on: DateTime<Utc>,
    ) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            require_pair(&state, scheduler_name, action_name)?;
            state.tables.expire(scheduler_name, action_name, expire_on);
        }
        info!(scheduler = %scheduler_name, action = %action_name, %expire_on, "action set to expire");
        self.autosave();
        Ok(())
    }

    /// Queue a program for expansion at `start`.
    pub fn schedule_program(&self, name: &str, start: DateTime<Utc>, stop: DateTime<Utc>) -> Result<()> {
        if stop < start {
            return Err(DispatchError::Validation(format!(
                "program {name}: stop {stop} is before start {start}"
            )));
        }
        {
            let mut state = self.inner.state.lock();
            let program = state
                .programs
                .get(name)
                .ok_or_else(|| DispatchError::not_found(EntityKind::Program, name))?;
            validate_program(&state, name, program)?;
            if program.compute_program_items(start, stop).is_none() {
                return Err(DispatchError::Validation(format!(
                    "program {name}: offset {}s does not fit the window {start} .. {stop}",
                    program.offset_seconds
                )));
            }
            state.tables.defer_program(name, start, stop);
        }
        info!(program = %name, %start, %stop, "program scheduled");
        self.autosave();
        Ok(())
    }

    /// Empty every scheduling table and remove every foreground job.
    /// Inventories stay. Idempotent.
    pub fn clear_all_scheduling(&self) {
        {
            let mut state = self.inner.state.lock();
            self.inner.timed.clear(None);
            state.tables.clear();
        }
        info!("all scheduling cleared");
        self.autosave();
    }

    /// Scheduling plus every inventory.
    pub fn clear_all(&self) {
        {
            let mut state = self.inner.state.lock();
            self.inner.timed.clear(None);
            *state = DispatcherState::default();
        }
        info!("dispatcher cleared");
        self.autosave();
    }

    /// Swap in `other` wholesale. The foreground Timed is left empty; call
    /// [`Dispatcher::reschedule_all_schedulers`] to bring bindings back to life.
    pub fn replace_all(&self, other: DispatcherState) {
        {
            let mut state = self.inner.state.lock();
            self.inner.timed.clear(None);
            *state = other;
        }
        info!("dispatcher state replaced");
        self.autosave();
    }

    pub fn clear_deferred_actions(&self) -> usize {
        let removed = {
            let mut state = self.inner.state.lock();
            let n = state.tables.deferred_count();
            state.tables.deferred_scheduled_actions.clear();
            n
        };
        info!(removed, "deferred actions cleared");
        self.autosave();
        removed
    }

    pub fn clear_expiring_actions(&self) -> usize {
        let removed = {
            let mut state = self.inner.state.lock();
            let n = state.tables.expiring_count();
            state.tables.expiring_scheduled_actions.clear();
            n
        };
        info!(removed, "expiring actions cleared");
        self.autosave();
        removed
    }

    pub fn clear_deferred_programs(&self) -> usize {
        let removed = {
            let mut state = self.inner.state.lock();
            let n = state.tables.deferred_program_count();
            state.tables.deferred_programs.clear();
            n
        };
        info!(removed, "deferred programs cleared");
        self.autosave();
        removed
    }

    pub fn get_scheduled_action_count(&self) -> usize {
        self.inner.state.lock().tables.scheduled_count()
    }

    pub fn get_deferred_action_count(&self) -> usize {
        self.inner.state.lock().tables.deferred_count()
    }

    pub fn get_expiring_action_count(&self) -> usize {
        self.inner.state.lock().tables.expiring_count()
    }

    pub fn get_deferred_program_count(&self) -> usize {
        self.inner.state.lock().tables.deferred_program_count()
    }
}
