//! Turns a scheduler firing into action executions.

use std::sync::Weak;

use kairos_core::binding_tag;
use kairos_scheduler::Push;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::dispatcher::{Dispatcher, Inner};

/// Outcome of one firing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FiringReport {
    pub scheduler: String,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// Set when an action asked for the scheduler to be unscheduled.
    pub terminated_by: Option<String>,
}

/// The [`Push`] target installed with every scheduler binding.
///
/// Holds the dispatcher weakly: Timed jobs live inside the dispatcher, so a
/// strong handle here would keep it alive forever.
pub(crate) struct Executor {
    dispatcher: Weak<Inner>,
}

impl Executor {
    pub(crate) fn new(dispatcher: Weak<Inner>) -> Self {
        Self { dispatcher }
    }

    /// Run every action bound to `scheduler_name`, in binding order.
    ///
    /// A failing action is logged and the next one runs. A terminate request
    /// unschedules the scheduler and ends the firing.
    pub(crate) fn fire(dispatcher: &Dispatcher, scheduler_name: &str) -> FiringReport {
        let mut report = FiringReport {
            scheduler: scheduler_name.to_string(),
            ..FiringReport::default()
        };

        for (action_name, action) in dispatcher.bound_actions(scheduler_name) {
            let tag = binding_tag(scheduler_name, &action_name);
            match action.execute(&tag, None, dispatcher) {
                Ok(_) => {
                    debug!(%tag, "action ran");
                    report.succeeded.push(action_name);
                }
                Err(e) if e.is_terminate() => {
                    info!(%tag, "action requested termination of its scheduler");
                    if let Err(e) = dispatcher.unschedule_scheduler(scheduler_name) {
                        error!(%tag, error = %e, "unscheduling after terminate failed");
                    }
                    report.terminated_by = Some(action_name);
                    break;
                }
                Err(e) => {
                    error!(%tag, error = %e, "action failed");
                    report.failed.push(action_name);
                }
            }
        }
        report
    }
}

impl Push for Executor {
    fn push(&self, scheduler_name: &str) {
        match Dispatcher::upgrade(&self.dispatcher) {
            Some(dispatcher) => {
                Self::fire(&dispatcher, scheduler_name);
            }
            None => debug!(scheduler = %scheduler_name, "dispatcher gone, firing dropped"),
        }
    }
}
