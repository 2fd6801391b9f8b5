//! The action tree.
//!
//! | Group      | Variants                                                     |
//! |------------|--------------------------------------------------------------|
//! | leaf       | FileAppend, GpioSet, GpioToggle, GpioCleanup, Sleep, SysInfo, LocalInfo |
//! | constant   | Success, Failure, Terminate, Vals, Result                     |
//! | composer   | Fail, RaiseCmp, All, UntilSuccess, UntilFailure, IfElse, Compose |
//! | remote     | Exec, ExecSupplied, ExecKeyTags, ExecSuppliedKeyTags         |
//! | control    | ScheduleAction, UnscheduleAction, UnscheduleScheduler, DeferAction, ExpireAction, ScheduleProgram, ClearAllScheduling |
//!
//! Every action receives an optional incoming [`Rez`] and returns a new one
//! (or an [`ActionError`]). Parameters are late-bound: the field bag of the
//! incoming record overlaid with the action's own non-null fields.

mod compose;
mod control;
mod leaf;
mod registry;
mod remote;

use chrono::{DateTime, Utc};
use kairos_core::Rez;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

pub use registry::{Nesting, VariantSpec, ACTION_VARIANTS};

use crate::{
    context::ActionContext,
    error::ActionError,
    server::{KeyTags, TagMode},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    /// Append the incoming result (or `payload`) to a text file.
    FileAppend {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        header: Option<String>,
    },
    GpioSet {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pin: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<bool>,
    },
    GpioToggle {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pin: Option<u32>,
    },
    /// Unexport the given pins, or every exported pin.
    GpioCleanup {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pins: Option<Vec<u32>>,
    },
    Sleep {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seconds: Option<f64>,
    },
    SysInfo {},
    LocalInfo {},
    Success {},
    Failure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Terminate {},
    /// Merge constants into the field bag.
    Vals {
        #[serde(default)]
        vals: Map<String, Value>,
    },
    /// Constant result.
    #[serde(rename = "Result")]
    SetResult { value: Value },

    /// Negate the operand: succeed iff it fails.
    Fail { operand: Box<Action> },
    /// Fail when the incoming result compares to `value` as `cmp` (-1, 0, 1).
    RaiseCmp { value: Value, cmp: i8 },
    All {
        actions: Vec<Action>,
        #[serde(default)]
        exception_on_no_success: bool,
        #[serde(default)]
        include_processing_info: bool,
    },
    UntilSuccess {
        actions: Vec<Action>,
        #[serde(default)]
        exception_on_no_success: bool,
        #[serde(default)]
        include_processing_info: bool,
    },
    UntilFailure {
        actions: Vec<Action>,
        #[serde(default)]
        exception_on_no_success: bool,
        #[serde(default)]
        include_processing_info: bool,
    },
    IfElse {
        test: Box<Action>,
        else_action: Box<Action>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        if_action: Option<Box<Action>>,
    },
    /// Thread the Rez through each child; stop at the first failure.
    Compose { actions: Vec<Action> },

    Exec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_name: Option<String>,
        action_name: String,
    },
    ExecSupplied {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_name: Option<String>,
        action: Box<Action>,
    },
    ExecKeyTags {
        action_name: String,
        #[serde(default)]
        key_tags: KeyTags,
        #[serde(default)]
        mode: TagMode,
    },
    ExecSuppliedKeyTags {
        action: Box<Action>,
        #[serde(default)]
        key_tags: KeyTags,
        #[serde(default)]
        mode: TagMode,
    },

    ScheduleAction {
        scheduler_name: String,
        action_name: String,
    },
    UnscheduleAction {
        scheduler_name: String,
        action_name: String,
    },
    UnscheduleScheduler { scheduler_name: String },
    DeferAction {
        scheduler_name: String,
        action_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_until: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay_seconds: Option<i64>,
    },
    ExpireAction {
        scheduler_name: String,
        action_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expire_on: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay_seconds: Option<i64>,
    },
    ScheduleProgram {
        program_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_seconds: Option<i64>,
    },
    ClearAllScheduling {},
}

impl Action {
    pub fn success() -> Self {
        Action::Success {}
    }

    pub fn failure(message: &str) -> Self {
        Action::Failure {
            message: Some(message.to_string()),
        }
    }

    pub fn file_append(file: &str) -> Self {
        Action::FileAppend {
            file: Some(file.to_string()),
            payload: None,
            header: None,
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Action::FileAppend { .. } => "FileAppend",
            Action::GpioSet { .. } => "GpioSet",
            Action::GpioToggle { .. } => "GpioToggle",
            Action::GpioCleanup { .. } => "GpioCleanup",
            Action::Sleep { .. } => "Sleep",
            Action::SysInfo {} => "SysInfo",
            Action::LocalInfo {} => "LocalInfo",
            Action::Success {} => "Success",
            Action::Failure { .. } => "Failure",
            Action::Terminate {} => "Terminate",
            Action::Vals { .. } => "Vals",
            Action::SetResult { .. } => "Result",
            Action::Fail { .. } => "Fail",
            Action::RaiseCmp { .. } => "RaiseCmp",
            Action::All { .. } => "All",
            Action::UntilSuccess { .. } => "UntilSuccess",
            Action::UntilFailure { .. } => "UntilFailure",
            Action::IfElse { .. } => "IfElse",
            Action::Compose { .. } => "Compose",
            Action::Exec { .. } => "Exec",
            Action::ExecSupplied { .. } => "ExecSupplied",
            Action::ExecKeyTags { .. } => "ExecKeyTags",
            Action::ExecSuppliedKeyTags { .. } => "ExecSuppliedKeyTags",
            Action::ScheduleAction { .. } => "ScheduleAction",
            Action::UnscheduleAction { .. } => "UnscheduleAction",
            Action::UnscheduleScheduler { .. } => "UnscheduleScheduler",
            Action::DeferAction { .. } => "DeferAction",
            Action::ExpireAction { .. } => "ExpireAction",
            Action::ScheduleProgram { .. } => "ScheduleProgram",
            Action::ClearAllScheduling {} => "ClearAllScheduling",
        }
    }

    /// Direct children, in execution order.
    pub fn children(&self) -> Vec<&Action> {
        match self {
            Action::Fail { operand } => vec![operand.as_ref()],
            Action::All { actions, .. }
            | Action::UntilSuccess { actions, .. }
            | Action::UntilFailure { actions, .. }
            | Action::Compose { actions } => actions.iter().collect(),
            Action::IfElse {
                test,
                else_action,
                if_action,
            } => {
                let mut out = vec![test.as_ref()];
                out.extend(if_action.as_deref());
                out.push(else_action.as_ref());
                out
            }
            Action::ExecSupplied { action, .. } | Action::ExecSuppliedKeyTags { action, .. } => {
                vec![action.as_ref()]
            }
            _ => Vec::new(),
        }
    }

    /// Names of registered actions this tree refers to by name.
    pub fn referenced_action_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_action_names(&mut out);
        out
    }

    fn collect_action_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Action::Exec { action_name, .. }
            | Action::ExecKeyTags { action_name, .. }
            | Action::ScheduleAction { action_name, .. }
            | Action::UnscheduleAction { action_name, .. }
            | Action::DeferAction { action_name, .. }
            | Action::ExpireAction { action_name, .. } => out.push(action_name),
            _ => {}
        }
        for child in self.children() {
            child.collect_action_names(out);
        }
    }

    /// The action's own non-null parameters, as a field map.
    ///
    /// Child actions and the `vals` map are not parameters and are left out.
    pub fn declared_params(&self) -> Map<String, Value> {
        let spec = registry::spec_for(self.variant_name());
        let Ok(Value::Object(mut map)) = serde_json::to_value(self) else {
            return Map::new();
        };
        map.remove("type");
        map.remove("vals");
        if let Some(spec) = spec {
            for (field, _) in spec.nested {
                map.remove(*field);
            }
        }
        map.retain(|_, v| !v.is_null());
        map
    }

    /// Incoming field bag overlaid with this action's declared parameters.
    pub fn compute_flds(&self, rez: Option<&Rez>) -> Map<String, Value> {
        let mut flds = rez.map(|r| r.flds.clone()).unwrap_or_default();
        for (k, v) in self.declared_params() {
            flds.insert(k, v);
        }
        flds
    }

    /// One-line description used by listings.
    pub fn describe(&self) -> String {
        let params: Vec<String> = self
            .declared_params()
            .iter()
            .map(|(k, v)| format!("{k}={}", kairos_core::rez::render_value(v)))
            .collect();
        let children = self.children().len();
        let mut out = self.variant_name().to_string();
        if !params.is_empty() {
            out.push(' ');
            out.push_str(&params.join(" "));
        }
        if children > 0 {
            out.push_str(&format!(" ({children} children)"));
        }
        out
    }

    /// Run this action. `tag` identifies the firing (`scheduler:action` when
    /// run by the executor).
    pub fn execute(
        &self,
        tag: &str,
        rez: Option<Rez>,
        ctx: &dyn ActionContext,
    ) -> Result<Rez, ActionError> {
        debug!(%tag, action = self.variant_name(), "executing action");
        let flds = self.compute_flds(rez.as_ref());

        match self {
            Action::FileAppend { .. } => leaf::file_append(tag, &flds, rez, ctx),
            Action::GpioSet { .. } => leaf::gpio_set(&flds, rez, ctx),
            Action::GpioToggle { .. } => leaf::gpio_toggle(&flds, rez, ctx),
            Action::GpioCleanup { .. } => leaf::gpio_cleanup(&flds, rez, ctx),
            Action::Sleep { .. } => leaf::sleep(&flds, rez),
            Action::SysInfo {} => Ok(leaf::sys_info(rez)),
            Action::LocalInfo {} => Ok(Rez::successor(rez).result(ctx.local_info())),

            Action::Success {} => Ok(Rez::passthrough(rez)),
            Action::Failure { .. } => {
                let message = param_str(&flds, "message").unwrap_or_else(|| "Failure".to_string());
                Err(ActionError::Failed {
                    message,
                    rez: Some(Box::new(Rez::passthrough(rez))),
                })
            }
            Action::Terminate {} => Err(ActionError::Terminate {
                rez: Some(Box::new(Rez::passthrough(rez))),
            }),
            Action::Vals { vals } => {
                let mut out = Rez::passthrough(rez);
                for (k, v) in vals {
                    out.flds.insert(k.clone(), v.clone());
                }
                Ok(out)
            }
            Action::SetResult { value } => Ok(Rez::successor(rez).result(value.clone())),

            Action::Fail { operand } => compose::fail(operand, tag, rez, ctx),
            Action::RaiseCmp { value, cmp } => compose::raise_cmp(value, *cmp, rez),
            Action::All {
                actions,
                exception_on_no_success,
                include_processing_info,
            } => compose::run_sequence(
                compose::Policy::All,
                actions,
                compose::Flags {
                    exception_on_no_success: *exception_on_no_success,
                    include_processing_info: *include_processing_info,
                },
                tag,
                rez,
                ctx,
            ),
            Action::UntilSuccess {
                actions,
                exception_on_no_success,
                include_processing_info,
            } => compose::run_sequence(
                compose::Policy::UntilSuccess,
                actions,
                compose::Flags {
                    exception_on_no_success: *exception_on_no_success,
                    include_processing_info: *include_processing_info,
                },
                tag,
                rez,
                ctx,
            ),
            Action::UntilFailure {
                actions,
                exception_on_no_success,
                include_processing_info,
            } => compose::run_sequence(
                compose::Policy::UntilFailure,
                actions,
                compose::Flags {
                    exception_on_no_success: *exception_on_no_success,
                    include_processing_info: *include_processing_info,
                },
                tag,
                rez,
                ctx,
            ),
            Action::IfElse {
                test,
                else_action,
                if_action,
            } => compose::if_else(test, else_action, if_action.as_deref(), tag, rez, ctx),
            Action::Compose { actions } => compose::run_sequence(
                compose::Policy::Compose,
                actions,
                compose::Flags::default(),
                tag,
                rez,
                ctx,
            ),

            Action::Exec { .. } | Action::ExecSupplied { .. } => {
                remote::exec_one(self, &flds, rez, ctx)
            }
            Action::ExecKeyTags { key_tags, mode, .. }
            | Action::ExecSuppliedKeyTags { key_tags, mode, .. } => {
                remote::exec_tagged(self, key_tags, *mode, rez, ctx)
            }

            _ => control::execute(self, &flds, rez, ctx),
        }
    }
}

pub(crate) fn param_str(flds: &Map<String, Value>, key: &str) -> Option<String> {
    match flds.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub(crate) fn param_u32(flds: &Map<String, Value>, key: &str) -> Option<u32> {
    match flds.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn param_i64(flds: &Map<String, Value>, key: &str) -> Option<i64> {
    match flds.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn param_f64(flds: &Map<String, Value>, key: &str) -> Option<f64> {
    match flds.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn param_bool(flds: &Map<String, Value>, key: &str) -> Option<bool> {
    match flds.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "high" => Some(true),
            "0" | "false" | "off" | "low" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn param_datetime(flds: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    match flds.get(key)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}
