use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info};

use crate::{
    error::Result,
    timed::{Push, Timed},
    types::Scheduler,
};

impl Scheduler {
    /// Install this scheduler on `timed` under the tag `name`.
    ///
    /// Any previous job with the same tag is removed first, so calling this
    /// again re-primes the binding. The installed callable checks the daily
    /// gate and then pushes `name` to `executor`. `Immediately` installs
    /// nothing; the dispatcher runs its action at bind time instead.
    pub fn schedule(&self, name: &str, timed: &Timed, executor: Arc<dyn Push>) -> Result<()> {
        timed.clear(Some(name));
        let Some(policy) = self.policy() else {
            return Ok(());
        };

        let gate = self.gate();
        let tag = name.to_string();
        let callable = Arc::new(move || {
            let now = Local::now().time();
            if gate.is_some_and(|g| !g.allows(now)) {
                debug!(scheduler = %tag, %now, "firing outside daily gate, dropped");
                return;
            }
            executor.push(&tag);
        });

        timed.schedule(name, callable, policy)?;
        info!(scheduler = %name, cadence = %self.description(), "scheduler bound");
        Ok(())
    }

    /// Remove this scheduler's job from `timed`.
    pub fn unschedule(name: &str, timed: &Timed) {
        if timed.clear(Some(name)) > 0 {
            info!(scheduler = %name, "scheduler unbound");
        }
    }

    /// Whether the gate (if any) admits the current local time.
    pub fn gate_open_now(&self) -> bool {
        self.gate().map_or(true, |g| g.allows(Local::now().time()))
    }
}
