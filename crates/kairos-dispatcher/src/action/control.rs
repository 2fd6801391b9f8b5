use chrono::{DateTime, TimeDelta, Utc};
use kairos_core::Rez;
use serde_json::{json, Map, Value};

use super::{param_datetime, param_i64, param_str, Action};
use crate::{context::ActionContext, error::ActionError};

type Flds = Map<String, Value>;

fn required(flds: &Flds, key: &str, action: &Action) -> Result<String, ActionError> {
    param_str(flds, key)
        .ok_or_else(|| ActionError::failed(format!("{}: missing {key}", action.variant_name())))
}

/// `from + secs`, failing when chrono cannot represent the result.
fn shifted(from: DateTime<Utc>, secs: i64, key: &str, action: &Action) -> Result<DateTime<Utc>, ActionError> {
    TimeDelta::try_seconds(secs)
        .and_then(|delta| from.checked_add_signed(delta))
        .ok_or_else(|| ActionError::failed(format!("{}: {key} {secs} is out of range", action.variant_name())))
}

/// Absolute instant from `at_key`, else now + `delay_seconds`, else now.
fn instant(flds: &Flds, at_key: &str, action: &Action) -> Result<DateTime<Utc>, ActionError> {
    if let Some(at) = param_datetime(flds, at_key) {
        return Ok(at);
    }
    let delay = param_i64(flds, "delay_seconds").unwrap_or(0);
    shifted(Utc::now(), delay, "delay_seconds", action)
}

/// Actions that change the dispatcher's bindings.
pub(super) fn execute(
    action: &Action,
    flds: &Flds,
    rez: Option<Rez>,
    ctx: &dyn ActionContext,
) -> Result<Rez, ActionError> {
    let info = match action {
        Action::ScheduleAction { .. } => {
            let s = required(flds, "scheduler_name", action)?;
            let a = required(flds, "action_name", action)?;
            ctx.schedule_action(&s, &a)?;
            json!({"scheduled": {"scheduler": s, "action": a}})
        }
        Action::UnscheduleAction { .. } => {
            let s = required(flds, "scheduler_name", action)?;
            let a = required(flds, "action_name", action)?;
            ctx.unschedule_scheduler_action(&s, &a)?;
            json!({"unscheduled": {"scheduler": s, "action": a}})
        }
        Action::UnscheduleScheduler { .. } => {
            let s = required(flds, "scheduler_name", action)?;
            ctx.unschedule_scheduler(&s)?;
            json!({"unscheduled": {"scheduler": s}})
        }
        Action::DeferAction { .. } => {
            let s = required(flds, "scheduler_name", action)?;
            let a = required(flds, "action_name", action)?;
            let at = instant(flds, "wait_until", action)?;
            ctx.defer_action(&s, &a, at)?;
            json!({"deferred": {"scheduler": s, "action": a, "wait_until": at}})
        }
        Action::ExpireAction { .. } => {
            let s = required(flds, "scheduler_name", action)?;
            let a = required(flds, "action_name", action)?;
            let at = instant(flds, "expire_on", action)?;
            ctx.expire_action(&s, &a, at)?;
            json!({"expiring": {"scheduler": s, "action": a, "expire_on": at}})
        }
        Action::ScheduleProgram { .. } => {
            let name = required(flds, "program_name", action)?;
            let start = param_datetime(flds, "start").unwrap_or_else(Utc::now);
            let stop = match (param_datetime(flds, "stop"), param_i64(flds, "duration_seconds")) {
                (Some(stop), _) => stop,
                (None, Some(secs)) => shifted(start, secs, "duration_seconds", action)?,
                (None, None) => {
                    return Err(ActionError::failed(
                        "ScheduleProgram: give stop or duration_seconds",
                    ))
                }
            };
            ctx.schedule_program(&name, start, stop)?;
            json!({"program": {"name": name, "start": start, "stop": stop}})
        }
        Action::ClearAllScheduling {} => {
            ctx.clear_all_scheduling()?;
            json!({"cleared": true})
        }
        other => {
            return Err(ActionError::failed(format!(
                "{} is not a control action",
                other.variant_name()
            )))
        }
    };
    Ok(Rez::passthrough(rez).info(info))
}
