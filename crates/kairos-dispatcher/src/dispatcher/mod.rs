//! The dispatcher facade.
//!
//! All state (inventories and scheduling tables) lives in one
//! [`DispatcherState`] behind a single `parking_lot::Mutex`. Public methods take
//! the lock once; the sweeper and other internal paths work on the locked state
//! through `*_locked` helpers and never re-enter the public API. Actions are
//! always executed after the lock is released, and peers are only called from
//! outside it.
//!
//! Lock order: dispatcher state, then a `Timed` job list. `Timed` never holds
//! its job list while firing, so callables may take the dispatcher lock.

mod binding;
mod execution;
mod inventory;
mod persist;
mod sweeper;

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use kairos_core::{KairosConfig, NodeIdentity};
use kairos_scheduler::{JobPolicy, Push, Timed};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, warn};

pub use binding::PendingRun;
pub use sweeper::SweepReport;

use crate::{client::PeerClient, error::Result, executor::Executor, state::DispatcherState};

const SWEEPER_TAG: &str = "sweeper";

/// Construction parameters.
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub identity: NodeIdentity,
    /// Snapshot directory; persistence is off when unset.
    pub saved_dir: Option<PathBuf>,
    /// Base for relative `FileAppend` targets.
    pub output_dir: Option<PathBuf>,
    pub gpio_root: PathBuf,
    /// Write `current.json` after every mutation.
    pub autosave: bool,
}

impl DispatcherOptions {
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            saved_dir: None,
            output_dir: None,
            gpio_root: PathBuf::from(kairos_core::config::DEFAULT_GPIO_ROOT),
            autosave: false,
        }
    }

    pub fn from_config(config: &KairosConfig) -> Self {
        Self {
            identity: config.identity(),
            saved_dir: Some(config.saved_dir()),
            output_dir: Some(config.output_dir()),
            gpio_root: config.gpio_root(),
            autosave: config.dispatcher.autosave,
        }
    }

    pub fn saved_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.saved_dir = Some(dir.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn gpio_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.gpio_root = dir.into();
        self
    }

    pub fn autosave(mut self, on: bool) -> Self {
        self.autosave = on;
        self
    }
}

pub(crate) struct Inner {
    state: Mutex<DispatcherState>,
    /// Foreground Timed: scheduler bindings.
    timed: Timed,
    /// Out-of-band Timed: the once-per-second sweeper.
    sweeper: Timed,
    client: PeerClient,
    identity: NodeIdentity,
    saved_dir: Mutex<Option<PathBuf>>,
    output_dir: Option<PathBuf>,
    gpio_root: PathBuf,
    autosave: bool,
    /// Serializes snapshot writes.
    persist: Mutex<()>,
}

/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(options: DispatcherOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(DispatcherState::default()),
                timed: Timed::new("foreground"),
                sweeper: Timed::new("sweeper"),
                client: PeerClient::new(),
                identity: options.identity,
                saved_dir: Mutex::new(options.saved_dir),
                output_dir: options.output_dir,
                gpio_root: options.gpio_root,
                autosave: options.autosave,
                persist: Mutex::new(()),
            }),
        }
    }

    pub(crate) fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn executor(&self) -> Arc<dyn Push> {
        Arc::new(Executor::new(Arc::downgrade(&self.inner)))
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.inner.identity
    }

    /// Start the foreground Timed and the sweeper.
    pub fn start(&self) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        self.inner.sweeper.clear(Some(SWEEPER_TAG));
        self.inner.sweeper.schedule(
            SWEEPER_TAG,
            Arc::new(move || {
                if let Some(dispatcher) = Dispatcher::upgrade(&weak) {
                    dispatcher.sweep();
                }
            }),
            JobPolicy::Every { interval: 1 },
        )?;
        self.inner.timed.run()?;
        self.inner.sweeper.run()?;
        info!(identity = %self.inner.identity, "dispatcher started");
        Ok(())
    }

    /// Stop both workers. In-flight actions finish; bindings are kept.
    pub fn shutdown(&self) {
        self.inner.sweeper.stop();
        self.inner.timed.stop();
        info!(identity = %self.inner.identity, "dispatcher stopped");
    }

    // Timed control. These touch the foreground worker only; bindings in
    // the tables are left alone.

    pub fn run_jobs(&self) -> Result<()> {
        self.inner.timed.run()?;
        Ok(())
    }

    pub fn stop_jobs(&self) {
        self.inner.timed.stop();
    }

    pub fn jobs_running(&self) -> bool {
        self.inner.timed.is_running()
    }

    pub fn job_count(&self) -> usize {
        self.inner.timed.job_count()
    }

    pub fn clear_jobs(&self) -> usize {
        let removed = self.inner.timed.clear(None);
        if removed > 0 {
            warn!(removed, "timed jobs cleared; bindings remain until rescheduled");
        }
        removed
    }

    /// Tags of the live Timed jobs (one per bound scheduler).
    pub fn job_tags(&self) -> Vec<String> {
        self.inner.timed.tags()
    }

    /// Fire every foreground job due at `now`, as one worker tick would.
    pub fn tick_jobs_at(&self, now: chrono::NaiveDateTime) -> usize {
        self.inner.timed.tick_at(now)
    }

    /// A copy of the full state.
    pub fn snapshot(&self) -> DispatcherState {
        self.inner.state.lock().clone()
    }

    pub fn counts(&self) -> Value {
        self.inner.state.lock().counts()
    }

    pub fn describe_all(&self) -> Value {
        self.inner.state.lock().describe()
    }
}
