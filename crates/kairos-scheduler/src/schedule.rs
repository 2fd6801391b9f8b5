use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use rand::Rng;

use crate::types::{JobPolicy, TimeUnit};

/// Compute the next local execution time for `policy` strictly *after* `from`.
///
/// `last` is the previously planned firing, if any. Aligned policies with an
/// interval above one step from it by `interval` units; missed steps are
/// skipped rather than replayed. Returns `None` only when a wall-clock
/// component is out of range.
pub fn compute_next_run(
    policy: &JobPolicy,
    from: NaiveDateTime,
    last: Option<NaiveDateTime>,
) -> Option<NaiveDateTime> {
    if let JobPolicy::Random { unit, low, high } = policy {
        return Some(next_random(*unit, *low, *high, from, &mut rand::rng()));
    }

    let step = policy.step()?;
    if let Some(last) = last {
        if policy.interval() > 1 {
            let mut next = last + step;
            while next <= from {
                next += step;
            }
            return Some(next);
        }
    }

    match policy {
        JobPolicy::Every { interval } => Some(from + Duration::seconds(i64::from(*interval))),

        JobPolicy::Minutely { second, .. } => {
            // This minute's candidate at :SS.
            let candidate = from.date().and_time(NaiveTime::from_hms_opt(
                from.hour(),
                from.minute(),
                *second,
            )?);
            Some(roll_forward(candidate, from, Duration::minutes(1)))
        }

        JobPolicy::Hourly { minute, second, .. } => {
            let candidate = from
                .date()
                .and_time(NaiveTime::from_hms_opt(from.hour(), *minute, *second)?);
            Some(roll_forward(candidate, from, Duration::hours(1)))
        }

        JobPolicy::Daily {
            hour,
            minute,
            second,
            ..
        } => {
            // Build today's candidate at HH:MM:SS.
            let candidate = from
                .date()
                .and_time(NaiveTime::from_hms_opt(*hour, *minute, *second)?);
            Some(roll_forward(candidate, from, Duration::days(1)))
        }

        JobPolicy::Random { .. } => None,
    }
}

/// Today's window has passed: advance by one unit.
fn roll_forward(candidate: NaiveDateTime, from: NaiveDateTime, unit: Duration) -> NaiveDateTime {
    if candidate > from {
        candidate
    } else {
        candidate + unit
    }
}

/// Sample a delay uniformly from `[low, high]` units. Never less than one second.
pub fn next_random<R: Rng + ?Sized>(
    unit: TimeUnit,
    low: u32,
    high: u32,
    from: NaiveDateTime,
    rng: &mut R,
) -> NaiveDateTime {
    let (low, high) = if low <= high { (low, high) } else { (high, low) };
    let units = rng.random_range(low..=high);
    let secs = (i64::from(units) * unit.seconds()).max(1);
    from + Duration::seconds(secs)
}
