use std::collections::BTreeMap;

use kairos_scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{action::Action, program::Program, server::ServerRegistry, tables::SchedulingTables};

/// Everything a dispatcher owns: four inventories plus the scheduling tables.
///
/// This is also the on-disk snapshot format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatcherState {
    #[serde(default)]
    pub actions: BTreeMap<String, Action>,
    #[serde(default)]
    pub schedulers: BTreeMap<String, Scheduler>,
    #[serde(default)]
    pub programs: BTreeMap<String, Program>,
    #[serde(default)]
    pub servers: ServerRegistry,
    #[serde(default)]
    pub tables: SchedulingTables,
}

impl DispatcherState {
    /// Table sizes, as reported by `describe_all` and `/dispatcher/counts`.
    pub fn counts(&self) -> Value {
        json!({
            "actions": self.actions.len(),
            "schedulers": self.schedulers.len(),
            "programs": self.programs.len(),
            "servers": self.servers.len(),
            "scheduled_actions": self.tables.scheduled_count(),
            "deferred_actions": self.tables.deferred_count(),
            "expiring_actions": self.tables.expiring_count(),
            "deferred_programs": self.tables.deferred_program_count(),
        })
    }

    /// Human-readable listing of every inventory and binding.
    pub fn describe(&self) -> Value {
        let actions: BTreeMap<&String, String> =
            self.actions.iter().map(|(n, a)| (n, a.describe())).collect();
        let schedulers: BTreeMap<&String, String> = self
            .schedulers
            .iter()
            .map(|(n, s)| (n, format!("{}: {}", s.variant_name(), s.description())))
            .collect();
        let programs: BTreeMap<&String, String> =
            self.programs.iter().map(|(n, p)| (n, p.to_string())).collect();
        let servers: BTreeMap<&String, String> = self
            .servers
            .iter()
            .map(|(n, s)| (n, s.to_string()))
            .collect();
        let bindings: Vec<String> = self
            .tables
            .scheduled_actions
            .pairs()
            .map(|(s, a)| kairos_core::binding_tag(s, a))
            .collect();
        json!({
            "actions": actions,
            "schedulers": schedulers,
            "programs": programs,
            "servers": servers,
            "scheduled": bindings,
            "counts": self.counts(),
        })
    }
}
