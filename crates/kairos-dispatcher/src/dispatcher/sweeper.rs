//! The once-per-second sweep over the time-keyed tables.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::{Dispatcher, PendingRun};
use crate::{program::ProgramItemKind, state::DispatcherState};

/// What one sweep changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Deferred programs expanded into the tables.
    pub programs: usize,
    /// Deferred bindings promoted to live.
    pub promoted: usize,
    /// Live bindings retired by expiration.
    pub retired: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.programs == 0 && self.promoted == 0 && self.retired == 0
    }
}

impl Dispatcher {
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    /// Promote due programs, then due deferrals, then retire due expirations,
    /// all against `now`. Entries are due when their instant is strictly
    /// before `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut pending = Vec::new();
        let report = {
            let mut state = self.inner.state.lock();
            SweepReport {
                programs: promote_due_programs(&mut state, now),
                promoted: self.promote_due_deferrals(&mut state, now, &mut pending),
                retired: self.retire_due_expirations(&mut state, now),
            }
        };
        self.run_pending(pending);

        if !report.is_empty() {
            debug!(?report, "sweep applied");
            self.autosave();
        }
        report
    }

    fn promote_due_deferrals(
        &self,
        state: &mut DispatcherState,
        now: DateTime<Utc>,
        pending: &mut Vec<PendingRun>,
    ) -> usize {
        let mut promoted = 0;
        for (s, a) in state.tables.take_due_deferrals(now) {
            match self.bind_locked(state, &s, &a) {
                Ok(run) => {
                    pending.extend(run);
                    promoted += 1;
                }
                Err(e) => warn!(scheduler = %s, action = %a, error = %e, "deferred binding dropped"),
            }
        }
        promoted
    }

    fn retire_due_expirations(&self, state: &mut DispatcherState, now: DateTime<Utc>) -> usize {
        state
            .tables
            .take_due_expirations(now)
            .into_iter()
            .filter(|(s, a)| self.unbind_locked(state, s, a))
            .count()
    }
}

/// Expand every due program into ordinary deferrals and expirations.
fn promote_due_programs(state: &mut DispatcherState, now: DateTime<Utc>) -> usize {
    let due = state.tables.take_due_programs(now);
    let mut expanded = 0;
    for entry in due {
        let Some(program) = state.programs.get(&entry.name) else {
            warn!(program = %entry.name, "deferred program no longer exists, dropped");
            continue;
        };
        let Some(items) = program.compute_program_items(entry.start, entry.stop) else {
            warn!(program = %entry.name, offset = program.offset_seconds, "offset does not fit the window, dropped");
            continue;
        };
        for item in items {
            match item.kind {
                ProgramItemKind::Defer => {
                    state.tables.defer(&item.scheduler_name, &item.action_name, item.dt)
                }
                ProgramItemKind::Expire => {
                    state.tables.expire(&item.scheduler_name, &item.action_name, item.dt)
                }
            }
        }
        debug!(program = %entry.name, start = %entry.start, stop = %entry.stop, "program expanded");
        expanded += 1;
    }
    expanded
}
