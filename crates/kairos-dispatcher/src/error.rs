use std::fmt;

use chrono::Utc;
use kairos_core::{KairosError, Rez};
use kairos_scheduler::SchedulerError;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Which inventory an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Action,
    Scheduler,
    Program,
    Server,
    Snapshot,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Action => "action",
            EntityKind::Scheduler => "scheduler",
            EntityKind::Program => "program",
            EntityKind::Server => "server",
            EntityKind::Snapshot => "snapshot",
        };
        write!(f, "{s}")
    }
}

/// Raised by `Action::execute`.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// The action (or a composed child) failed. `rez` is the record at the
    /// point of failure, when one exists.
    #[error("{message}")]
    Failed {
        message: String,
        rez: Option<Box<Rez>>,
    },

    /// Control-flow signal: unschedule the scheduler whose firing raised it.
    #[error("terminate scheduler requested")]
    Terminate { rez: Option<Box<Rez>> },

    /// A peer answered with a non-success status or could not be reached.
    #[error("remote call to {server} failed: {message}")]
    Remote {
        server: String,
        status: Option<u16>,
        message: String,
    },
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        ActionError::Failed {
            message: message.into(),
            rez: None,
        }
    }

    pub fn terminate() -> Self {
        ActionError::Terminate { rez: None }
    }

    pub fn is_terminate(&self) -> bool {
        matches!(self, ActionError::Terminate { .. })
    }

    /// The record carried by the error, if any.
    pub fn rez(&self) -> Option<&Rez> {
        match self {
            ActionError::Failed { rez, .. } | ActionError::Terminate { rez } => rez.as_deref(),
            ActionError::Remote { .. } => None,
        }
    }

    /// Diagnostic dict attached to composer output.
    pub fn diagnostic(&self) -> Value {
        match self {
            ActionError::Failed { message, .. } => json!({
                "kind": "failure",
                "error": message,
            }),
            ActionError::Terminate { .. } => json!({ "kind": "terminate" }),
            ActionError::Remote {
                server,
                status,
                message,
            } => json!({
                "kind": "remote",
                "server": server,
                "status": status,
                "error": message,
            }),
        }
    }
}

/// Errors surfaced by dispatcher operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: EntityKind, name: String },

    #[error("{kind} already exists: {name}")]
    Conflict { kind: EntityKind, name: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Remote failure on {server}: {message}")]
    Remote {
        server: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Action failed: {0}")]
    Action(ActionError),

    #[error("Resolution failed: {0}")]
    Resolve(String),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] KairosError),
}

impl DispatchError {
    pub fn not_found(kind: EntityKind, name: &str) -> Self {
        DispatchError::NotFound {
            kind,
            name: name.to_string(),
        }
    }

    pub fn conflict(kind: EntityKind, name: &str) -> Self {
        DispatchError::Conflict {
            kind,
            name: name.to_string(),
        }
    }

    /// Short error code string returned to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::NotFound { .. } => "NOT_FOUND",
            DispatchError::Conflict { .. } => "CONFLICT",
            DispatchError::Validation(_) => "VALIDATION_ERROR",
            DispatchError::Remote { .. } => "REMOTE_FAILURE",
            DispatchError::Action(ActionError::Terminate { .. }) => "TERMINATE",
            DispatchError::Action(ActionError::Remote { .. }) => "REMOTE_FAILURE",
            DispatchError::Action(_) => "ACTION_FAILURE",
            DispatchError::Resolve(_) => "RESOLUTION_ERROR",
            DispatchError::Scheduler(_) => "SCHEDULER_ERROR",
            DispatchError::Serialization(_) => "SERIALIZATION_ERROR",
            DispatchError::Io(_) => "IO_ERROR",
            DispatchError::Core(e) => e.code(),
        }
    }

    /// User-visible failure record: outcome line, original error text, timestamp.
    pub fn report(&self, outcome: &str) -> FailureReport {
        FailureReport {
            outcome: outcome.to_string(),
            error: self.to_string(),
            code: self.code(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl From<ActionError> for DispatchError {
    fn from(e: ActionError) -> Self {
        match e {
            ActionError::Remote {
                server,
                status,
                message,
            } => DispatchError::Remote {
                server,
                status,
                message,
            },
            other => DispatchError::Action(other),
        }
    }
}

impl From<DispatchError> for ActionError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Action(inner) => inner,
            DispatchError::Remote {
                server,
                status,
                message,
            } => ActionError::Remote {
                server,
                status,
                message,
            },
            other => ActionError::failed(other.to_string()),
        }
    }
}

/// Serialized body of every failed HTTP call.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub outcome: String,
    pub error: String,
    pub code: &'static str,
    pub timestamp: String,
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_round_trips_between_error_kinds() {
        let action = ActionError::Remote {
            server: "pi:8181".into(),
            status: Some(500),
            message: "boom".into(),
        };
        let dispatch: DispatchError = action.into();
        assert_eq!(dispatch.code(), "REMOTE_FAILURE");
        let back: ActionError = dispatch.into();
        assert!(matches!(back, ActionError::Remote { status: Some(500), .. }));
    }

    #[test]
    fn not_found_becomes_plain_failure_inside_actions() {
        let e: ActionError = DispatchError::not_found(EntityKind::Action, "foo").into();
        assert_eq!(e.to_string(), "action not found: foo");
        assert!(!e.is_terminate());
    }

    #[test]
    fn report_carries_outcome_error_and_timestamp() {
        let report = DispatchError::conflict(EntityKind::Scheduler, "bar").report("add scheduler bar");
        assert_eq!(report.outcome, "add scheduler bar");
        assert_eq!(report.error, "scheduler already exists: bar");
        assert_eq!(report.code, "CONFLICT");
        assert!(!report.timestamp.is_empty());
    }
}
