use std::cmp::Ordering;
use std::fmt;

use kairos_core::Rez;
use serde_json::{json, Value};
use tracing::debug;

use super::Action;
use crate::{context::ActionContext, error::ActionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Policy {
    /// Run every child; failures are captured and execution proceeds.
    All,
    /// Stop at the first success.
    UntilSuccess,
    /// Stop at the first failure.
    UntilFailure,
    /// Like `UntilFailure`, without flags.
    Compose,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Policy::All => "All",
            Policy::UntilSuccess => "UntilSuccess",
            Policy::UntilFailure => "UntilFailure",
            Policy::Compose => "Compose",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(super) struct Flags {
    pub exception_on_no_success: bool,
    pub include_processing_info: bool,
}

/// Record handed onward after a captured child failure.
fn recover(current: Option<Rez>, e: &ActionError) -> Rez {
    let base = e.rez().cloned().or(current);
    Rez::passthrough(base).extra(json!({ "failure": e.diagnostic() }))
}

fn processing_info(policy: Policy, successes: usize, failures: usize, children: Vec<Value>) -> Value {
    json!({
        "policy": policy.to_string(),
        "successes": successes,
        "failures": failures,
        "children": children,
    })
}

pub(super) fn run_sequence(
    policy: Policy,
    actions: &[Action],
    flags: Flags,
    tag: &str,
    rez: Option<Rez>,
    ctx: &dyn ActionContext,
) -> Result<Rez, ActionError> {
    let mut current = rez;
    let mut last_ok: Option<Rez> = None;
    let mut successes = 0usize;
    let mut failures = 0usize;
    let mut children: Vec<Value> = Vec::new();

    for (index, child) in actions.iter().enumerate() {
        match child.execute(tag, current.clone(), ctx) {
            Ok(out) => {
                successes += 1;
                children.push(json!({"index": index, "action": child.variant_name(), "ok": true}));
                current = Some(out.clone());
                last_ok = Some(out);
                if policy == Policy::UntilSuccess {
                    break;
                }
            }
            Err(ActionError::Terminate { rez: carried }) => {
                debug!(%tag, %policy, index, "terminate raised inside sequence");
                let mut carried = carried.or_else(|| current.map(Box::new));
                if flags.include_processing_info {
                    children.push(json!({
                        "index": index,
                        "action": child.variant_name(),
                        "ok": false,
                        "terminate": true,
                    }));
                    let at_terminate = carried.get_or_insert_with(Box::default);
                    at_terminate.extra = Some(processing_info(policy, successes, failures, children));
                }
                return Err(ActionError::Terminate { rez: carried });
            }
            Err(e) => {
                failures += 1;
                debug!(%tag, %policy, index, error = %e, "child failed");
                children.push(json!({
                    "index": index,
                    "action": child.variant_name(),
                    "ok": false,
                    "error": e.diagnostic(),
                }));
                match policy {
                    Policy::All | Policy::UntilSuccess => current = Some(recover(current, &e)),
                    Policy::UntilFailure | Policy::Compose => break,
                }
            }
        }
    }

    let processing = processing_info(policy, successes, failures, children);

    if flags.exception_on_no_success && successes == 0 {
        let mut at_failure = current.unwrap_or_default();
        if flags.include_processing_info {
            at_failure.extra = Some(processing);
        }
        return Err(ActionError::Failed {
            message: format!("{policy}: no child succeeded"),
            rez: Some(Box::new(at_failure)),
        });
    }

    let mut out = last_ok.or(current).unwrap_or_default();
    if flags.include_processing_info {
        out.extra = Some(processing);
    }
    Ok(out)
}

pub(super) fn fail(
    operand: &Action,
    tag: &str,
    rez: Option<Rez>,
    ctx: &dyn ActionContext,
) -> Result<Rez, ActionError> {
    match operand.execute(tag, rez.clone(), ctx) {
        Ok(_) => Err(ActionError::Failed {
            message: format!("Fail: {} succeeded", operand.variant_name()),
            rez: rez.map(Box::new),
        }),
        Err(e) if e.is_terminate() => Err(e),
        Err(e) => Ok(Rez::passthrough(rez).extra(json!({ "negated": e.diagnostic() }))),
    }
}

/// Ordering between the incoming result and the reference value.
///
/// Numbers compare numerically, strings and booleans by their natural order;
/// anything else only compares equal or not at all.
fn compare(result: &Value, reference: &Value) -> Option<Ordering> {
    match (result, reference) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

pub(super) fn raise_cmp(reference: &Value, cmp: i8, rez: Option<Rez>) -> Result<Rez, ActionError> {
    let result = rez
        .as_ref()
        .and_then(|r| r.result.clone())
        .unwrap_or(Value::Null);
    let wanted = cmp.signum().cmp(&0);
    if compare(&result, reference) == Some(wanted) {
        return Err(ActionError::Failed {
            message: format!("RaiseCmp: {result} compares {cmp} to {reference}"),
            rez: rez.map(Box::new),
        });
    }
    Ok(Rez::passthrough(rez))
}

pub(super) fn if_else(
    test: &Action,
    else_action: &Action,
    if_action: Option<&Action>,
    tag: &str,
    rez: Option<Rez>,
    ctx: &dyn ActionContext,
) -> Result<Rez, ActionError> {
    match test.execute(tag, rez.clone(), ctx) {
        Ok(passed) => match if_action {
            Some(action) => action.execute(tag, Some(passed), ctx),
            None => Ok(passed),
        },
        Err(e) if e.is_terminate() => Err(e),
        Err(e) => {
            debug!(%tag, error = %e, "test failed, running else branch");
            else_action.execute(tag, Some(recover(rez, &e)), ctx)
        }
    }
}
