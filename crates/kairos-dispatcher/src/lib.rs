//! `kairos-dispatcher`: actions, programs, peers, and the dispatcher that
//! binds them to schedulers.
//!
//! # Overview
//!
//! A [`Dispatcher`] owns four inventories (actions, schedulers, programs,
//! servers) and the scheduling tables. Binding `(scheduler, action)` installs
//! the scheduler on a foreground [`kairos_scheduler::Timed`]; each firing goes
//! through the executor, which runs the bound actions in binding order. A
//! second Timed runs the sweeper once per second, promoting deferred bindings
//! and programs and retiring expired ones.
//!
//! Actions reach back into the dispatcher only through [`ActionContext`].

pub mod action;
pub mod client;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod program;
pub mod resolver;
pub mod server;
pub mod state;
pub mod tables;

pub use action::Action;
pub use context::{ActionContext, RemoteTarget};
pub use dispatcher::{Dispatcher, DispatcherOptions, PendingRun, SweepReport};
pub use error::{ActionError, DispatchError, EntityKind, FailureReport, Result};
pub use executor::FiringReport;
pub use program::{Program, ProgramItem, ProgramItemKind, IMMEDIATELY};
pub use resolver::{Resolved, Resolver, Root};
pub use server::{KeyTags, Server, ServerRegistry, TagMode};
pub use state::DispatcherState;
pub use tables::{Bindings, SchedulingTables};
