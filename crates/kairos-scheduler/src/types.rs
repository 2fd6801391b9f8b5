use std::fmt;

use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Granularity used by `Randomly` delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    pub fn seconds(self) -> i64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 3_600,
            TimeUnit::Day => 86_400,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeUnit::Second => "seconds",
            TimeUnit::Minute => "minutes",
            TimeUnit::Hour => "hours",
            TimeUnit::Day => "days",
        };
        write!(f, "{s}")
    }
}

/// How a Timed job computes its due-time stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPolicy {
    /// Every `interval` seconds, unaligned.
    Every { interval: u32 },
    /// At `:SS` every `interval` minutes.
    Minutely { interval: u32, second: u32 },
    /// At `:MM:SS` every `interval` hours.
    Hourly {
        interval: u32,
        minute: u32,
        second: u32,
    },
    /// At `HH:MM:SS` every `interval` days.
    Daily {
        interval: u32,
        hour: u32,
        minute: u32,
        second: u32,
    },
    /// After each firing, wait a uniform `[low, high]` number of `unit`s.
    Random { unit: TimeUnit, low: u32, high: u32 },
}

impl JobPolicy {
    /// The most specific time part present selects the alignment unit.
    pub fn timely(
        interval: u32,
        hour: Option<u32>,
        minute: Option<u32>,
        second: Option<u32>,
    ) -> Self {
        let interval = interval.max(1);
        match (hour, minute, second) {
            (Some(hour), minute, second) => JobPolicy::Daily {
                interval,
                hour,
                minute: minute.unwrap_or(0),
                second: second.unwrap_or(0),
            },
            (None, Some(minute), second) => JobPolicy::Hourly {
                interval,
                minute,
                second: second.unwrap_or(0),
            },
            (None, None, Some(second)) => JobPolicy::Minutely { interval, second },
            (None, None, None) => JobPolicy::Every { interval },
        }
    }

    pub fn interval(&self) -> u32 {
        match self {
            JobPolicy::Every { interval }
            | JobPolicy::Minutely { interval, .. }
            | JobPolicy::Hourly { interval, .. }
            | JobPolicy::Daily { interval, .. } => *interval,
            JobPolicy::Random { .. } => 1,
        }
    }

    /// Distance between consecutive aligned firings; `None` for random delays.
    pub fn step(&self) -> Option<Duration> {
        let n = i64::from(self.interval());
        match self {
            JobPolicy::Every { .. } => Some(Duration::seconds(n)),
            JobPolicy::Minutely { .. } => Some(Duration::minutes(n)),
            JobPolicy::Hourly { .. } => Some(Duration::hours(n)),
            JobPolicy::Daily { .. } => Some(Duration::days(n)),
            JobPolicy::Random { .. } => None,
        }
    }
}

/// Time-of-day window outside of which firings are dropped.
///
/// `start <= stop` is the half-open window `[start, stop)`; `start > stop`
/// wraps midnight: `[start, 24:00) ∪ [00:00, stop)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyGate {
    pub start: NaiveTime,
    pub stop: NaiveTime,
}

impl DailyGate {
    pub fn allows(&self, t: NaiveTime) -> bool {
        if self.start <= self.stop {
            self.start <= t && t < self.stop
        } else {
            t >= self.start || t < self.stop
        }
    }
}

fn one() -> u32 {
    1
}

/// Fixed cadence, optionally aligned to a wall-clock part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timely {
    #[serde(default = "one")]
    pub interval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_of_day: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_of_day: Option<NaiveTime>,
}

impl Timely {
    pub fn every(interval: u32) -> Self {
        Self {
            interval,
            hour: None,
            minute: None,
            second: None,
            start_of_day: None,
            stop_of_day: None,
        }
    }
}

/// Random delay between firings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Randomly {
    pub unit: TimeUnit,
    pub low: u32,
    pub high: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_of_day: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_of_day: Option<NaiveTime>,
}

/// One-shot: runs its action synchronously when bound, never holds a Timed job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Immediately {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_of_day: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_of_day: Option<NaiveTime>,
}

/// Named firing policy registered with the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Scheduler {
    Timely(Timely),
    Randomly(Randomly),
    Immediately(Immediately),
}

/// Declared field names per variant, used to infer a variant for untagged input.
pub const SCHEDULER_FIELDS: &[(&str, &[&str])] = &[
    (
        "Timely",
        &["interval", "hour", "minute", "second", "start_of_day", "stop_of_day"],
    ),
    (
        "Randomly",
        &["unit", "low", "high", "start_of_day", "stop_of_day"],
    ),
    ("Immediately", &["start_of_day", "stop_of_day"]),
];

impl Scheduler {
    pub fn is_immediate(&self) -> bool {
        matches!(self, Scheduler::Immediately(_))
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Scheduler::Timely(_) => "Timely",
            Scheduler::Randomly(_) => "Randomly",
            Scheduler::Immediately(_) => "Immediately",
        }
    }

    /// The Timed policy for this scheduler; `None` for `Immediately`.
    pub fn policy(&self) -> Option<JobPolicy> {
        match self {
            Scheduler::Timely(t) => Some(JobPolicy::timely(t.interval, t.hour, t.minute, t.second)),
            Scheduler::Randomly(r) => Some(JobPolicy::Random {
                unit: r.unit,
                low: r.low,
                high: r.high,
            }),
            Scheduler::Immediately(_) => None,
        }
    }

    /// The daily gate, if either bound is set. A missing bound is open-ended.
    pub fn gate(&self) -> Option<DailyGate> {
        let (start, stop) = match self {
            Scheduler::Timely(t) => (t.start_of_day, t.stop_of_day),
            Scheduler::Randomly(r) => (r.start_of_day, r.stop_of_day),
            Scheduler::Immediately(i) => (i.start_of_day, i.stop_of_day),
        };
        match (start, stop) {
            (None, None) => None,
            (start, stop) => Some(DailyGate {
                start: start.unwrap_or(NaiveTime::MIN),
                // 23:59:59.999… stands in for 24:00
                stop: stop.unwrap_or_else(|| {
                    NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or(NaiveTime::MIN)
                }),
            }),
        }
    }

    /// Reject out-of-range time parts and inverted random bounds.
    pub fn validate(&self) -> Result<()> {
        match self {
            Scheduler::Timely(t) => {
                if t.interval == 0 {
                    return Err(SchedulerError::InvalidSchedule(
                        "interval must be at least 1".to_string(),
                    ));
                }
                check_range("hour", t.hour, 24)?;
                check_range("minute", t.minute, 60)?;
                check_range("second", t.second, 60)?;
            }
            Scheduler::Randomly(r) => {
                if r.low > r.high {
                    return Err(SchedulerError::InvalidSchedule(format!(
                        "low ({}) is greater than high ({})",
                        r.low, r.high
                    )));
                }
            }
            Scheduler::Immediately(_) => {}
        }
        Ok(())
    }

    /// Human-readable cadence, e.g. `daily at 09:30:00`.
    pub fn description(&self) -> String {
        let cadence = match self {
            Scheduler::Timely(t) => match JobPolicy::timely(t.interval, t.hour, t.minute, t.second)
            {
                JobPolicy::Every { interval: 1 } => "every second".to_string(),
                JobPolicy::Every { interval } => format!("every {interval} seconds"),
                JobPolicy::Minutely { interval, second } => {
                    format!("{} at :{second:02}", every_n(interval, "minute"))
                }
                JobPolicy::Hourly {
                    interval,
                    minute,
                    second,
                } => format!("{} at :{minute:02}:{second:02}", every_n(interval, "hour")),
                JobPolicy::Daily {
                    interval,
                    hour,
                    minute,
                    second,
                } => {
                    let every = if interval == 1 {
                        "daily".to_string()
                    } else {
                        format!("every {interval} days")
                    };
                    format!("{every} at {hour:02}:{minute:02}:{second:02}")
                }
                JobPolicy::Random { .. } => unreachable!("timely never yields a random policy"),
            },
            Scheduler::Randomly(r) => format!("randomly every {}..{} {}", r.low, r.high, r.unit),
            Scheduler::Immediately(_) => "immediately, once".to_string(),
        };
        match self.gate() {
            Some(g) => format!(
                "{cadence} between {} and {}",
                g.start.format("%H:%M:%S"),
                g.stop.format("%H:%M:%S")
            ),
            None => cadence,
        }
    }
}

fn every_n(n: u32, unit: &str) -> String {
    if n == 1 {
        format!("every {unit}")
    } else {
        format!("every {n} {unit}s")
    }
}

fn check_range(name: &str, value: Option<u32>, bound: u32) -> Result<()> {
    match value {
        Some(v) if v >= bound => Err(SchedulerError::InvalidSchedule(format!(
            "{name} must be below {bound}, got {v}"
        ))),
        _ => Ok(()),
    }
}
