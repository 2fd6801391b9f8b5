//! `kairos-scheduler`: the Timed ticker and the scheduler policies it runs.
//!
//! # Overview
//!
//! A [`timed::Timed`] instance owns one worker thread that wakes on every
//! wall-clock second and fires the tagged jobs whose due time has arrived.
//! A [`types::Scheduler`] turns a named policy into a Timed job whose
//! callable pushes the scheduler name to an executor.
//!
//! # Scheduler variants
//!
//! | Variant       | Behaviour                                                   |
//! |---------------|-------------------------------------------------------------|
//! | `Timely`      | Every N seconds, or aligned to `:SS`, `:MM:SS` or `HH:MM:SS` |
//! | `Randomly`    | Uniform random delay in `[low, high]` units after each fire  |
//! | `Immediately` | No Timed job; the dispatcher runs the action once on binding |
//!
//! Every variant may carry a `(start_of_day, stop_of_day)` gate; firings
//! outside the window are dropped, not postponed.

pub mod binding;
pub mod error;
pub mod schedule;
pub mod timed;
pub mod types;

pub use error::{Result, SchedulerError};
pub use timed::{Callable, Push, Timed};
pub use types::{DailyGate, Immediately, JobPolicy, Randomly, Scheduler, TimeUnit, Timely};
