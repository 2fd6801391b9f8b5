use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    schedule::compute_next_run,
    types::{JobPolicy, TimeUnit},
};

/// Callable fired by a Timed job.
pub type Callable = Arc<dyn Fn() + Send + Sync>;

/// Receives a scheduler firing. Implemented by the dispatcher's executor.
pub trait Push: Send + Sync {
    fn push(&self, scheduler_name: &str);
}

struct Job {
    tag: String,
    callable: Callable,
    policy: JobPolicy,
    next_run: NaiveDateTime,
}

struct Worker {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Background ticker: holds tagged jobs and fires the due ones once per second.
///
/// Firing is sequential on one worker thread, so a slow callable delays every
/// other job on the same instance. Missed firings are never replayed: after a
/// pause each job fires at most once and is re-planned from the current time.
pub struct Timed {
    name: String,
    jobs: Arc<Mutex<Vec<Job>>>,
    worker: Mutex<Option<Worker>>,
}

impl Timed {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            jobs: Arc::new(Mutex::new(Vec::new())),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a job with an explicit policy.
    pub fn schedule(&self, tag: &str, callable: Callable, policy: JobPolicy) -> Result<()> {
        let now = Local::now().naive_local();
        let next_run = compute_next_run(&policy, now, None).ok_or_else(|| {
            SchedulerError::InvalidSchedule(format!("no next run for {policy:?}"))
        })?;
        debug!(timed = %self.name, %tag, %next_run, "job added");
        self.jobs.lock().push(Job {
            tag: tag.to_string(),
            callable,
            policy,
            next_run,
        });
        Ok(())
    }

    /// `hour` ⇒ daily at HH:MM:SS, `minute` ⇒ hourly at :MM:SS, `second` ⇒
    /// minutely at :SS, none ⇒ every `interval` seconds.
    pub fn schedule_timely(
        &self,
        tag: &str,
        callable: Callable,
        interval: u32,
        hour: Option<u32>,
        minute: Option<u32>,
        second: Option<u32>,
    ) -> Result<()> {
        self.schedule(
            tag,
            callable,
            JobPolicy::timely(interval, hour, minute, second),
        )
    }

    pub fn schedule_random(
        &self,
        tag: &str,
        callable: Callable,
        unit: TimeUnit,
        low: u32,
        high: u32,
    ) -> Result<()> {
        self.schedule(tag, callable, JobPolicy::Random { unit, low, high })
    }

    /// Remove every job carrying `tag`, or all jobs when `tag` is `None`.
    /// Returns the number of jobs removed.
    pub fn clear(&self, tag: Option<&str>) -> usize {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        match tag {
            Some(tag) => jobs.retain(|j| j.tag != tag),
            None => jobs.clear(),
        }
        let removed = before - jobs.len();
        if removed > 0 {
            debug!(timed = %self.name, tag = tag.unwrap_or("*"), removed, "jobs cleared");
        }
        removed
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn has_job(&self, tag: &str) -> bool {
        self.jobs.lock().iter().any(|j| j.tag == tag)
    }

    pub fn tags(&self) -> Vec<String> {
        self.jobs.lock().iter().map(|j| j.tag.clone()).collect()
    }

    /// Start the worker thread. No-op when already running.
    pub fn run(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if let Some(w) = worker.as_ref() {
            if !w.handle.is_finished() {
                return Ok(());
            }
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let jobs = Arc::clone(&self.jobs);
        let name = self.name.clone();
        let handle = thread::Builder::new()
            .name(format!("timed-{}", self.name))
            .spawn(move || {
                info!(timed = %name, "timed worker started");
                loop {
                    match stop_rx.recv_timeout(until_next_second()) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    fire_due(&name, &jobs, Local::now().naive_local());
                }
                info!(timed = %name, "timed worker stopped");
            })
            .map_err(|e| SchedulerError::Worker(e.to_string()))?;

        *worker = Some(Worker { stop_tx, handle });
        Ok(())
    }

    /// Stop the worker. In-flight callables finish; future firings stop.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = worker.stop_tx.send(());
        // A callable stopping its own Timed cannot join itself.
        if worker.handle.thread().id() == thread::current().id() {
            return;
        }
        if worker.handle.join().is_err() {
            warn!(timed = %self.name, "timed worker panicked during shutdown");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Fire every job due at `now`. Returns how many fired.
    ///
    /// The worker calls this once per second; tests call it directly.
    pub fn tick_at(&self, now: NaiveDateTime) -> usize {
        fire_due(&self.name, &self.jobs, now)
    }
}

impl Drop for Timed {
    fn drop(&mut self) {
        self.stop();
    }
}

fn until_next_second() -> Duration {
    let millis = u64::from(Local::now().nanosecond() / 1_000_000).min(999);
    Duration::from_millis(1_000 - millis)
}

fn fire_due(name: &str, jobs: &Mutex<Vec<Job>>, now: NaiveDateTime) -> usize {
    // Collect under the lock, fire after releasing it: callables re-enter the
    // dispatcher, which may clear or add jobs on this instance.
    let due: Vec<(String, Callable)> = {
        let mut jobs = jobs.lock();
        let mut due = Vec::new();
        for job in jobs.iter_mut().filter(|j| j.next_run <= now) {
            let planned = job.next_run;
            job.next_run = compute_next_run(&job.policy, now, Some(planned))
                // keep the job alive; a broken policy retries in a day
                .unwrap_or(now + chrono::Duration::days(1));
            due.push((job.tag.clone(), Arc::clone(&job.callable)));
        }
        due
    };

    for (tag, callable) in &due {
        debug!(timed = %name, %tag, "firing job");
        if catch_unwind(AssertUnwindSafe(|| callable())).is_err() {
            error!(timed = %name, %tag, "job callable panicked");
        }
    }
    due.len()
}
