use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::program::DeferredProgram;

/// scheduler name → bound action names (unique, insertion order).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bindings(BTreeMap<String, Vec<String>>);

impl Bindings {
    /// Returns `false` when the pair was already present.
    pub fn insert(&mut self, scheduler_name: &str, action_name: &str) -> bool {
        let actions = self.0.entry(scheduler_name.to_string()).or_default();
        if actions.iter().any(|a| a == action_name) {
            return false;
        }
        actions.push(action_name.to_string());
        true
    }

    pub fn remove(&mut self, scheduler_name: &str, action_name: &str) -> bool {
        let Some(actions) = self.0.get_mut(scheduler_name) else {
            return false;
        };
        let before = actions.len();
        actions.retain(|a| a != action_name);
        let removed = actions.len() != before;
        if actions.is_empty() {
            self.0.remove(scheduler_name);
        }
        removed
    }

    pub fn remove_scheduler(&mut self, scheduler_name: &str) -> Vec<String> {
        self.0.remove(scheduler_name).unwrap_or_default()
    }

    /// Remove `action_name` under every scheduler. Returns the schedulers
    /// left with no actions.
    pub fn remove_action(&mut self, action_name: &str) -> Vec<String> {
        let mut emptied = Vec::new();
        for (s, actions) in self.0.iter_mut() {
            let before = actions.len();
            actions.retain(|a| a != action_name);
            if before > 0 && actions.is_empty() {
                emptied.push(s.clone());
            }
        }
        self.0.retain(|_, actions| !actions.is_empty());
        emptied
    }

    pub fn contains(&self, scheduler_name: &str, action_name: &str) -> bool {
        self.0
            .get(scheduler_name)
            .is_some_and(|actions| actions.iter().any(|a| a == action_name))
    }

    pub fn has_scheduler(&self, scheduler_name: &str) -> bool {
        self.0.contains_key(scheduler_name)
    }

    pub fn actions_for(&self, scheduler_name: &str) -> &[String] {
        self.0.get(scheduler_name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn schedulers(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(s, actions)| actions.iter().map(move |a| (s.as_str(), a.as_str())))
    }

    /// Number of `(scheduler, action)` pairs.
    pub fn count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

type Buckets = BTreeMap<DateTime<Utc>, Bindings>;

fn bucket_insert(buckets: &mut Buckets, dt: DateTime<Utc>, s: &str, a: &str) {
    buckets.entry(dt).or_default().insert(s, a);
}

/// Drain every bucket strictly before `now`, oldest first.
fn take_due(buckets: &mut Buckets, now: DateTime<Utc>) -> Vec<(String, String)> {
    let later = buckets.split_off(&now);
    let due = std::mem::replace(buckets, later);
    due.into_values()
        .flat_map(|b| {
            b.pairs()
                .map(|(s, a)| (s.to_string(), a.to_string()))
                .collect::<Vec<_>>()
        })
        .collect()
}

fn bucket_count(buckets: &Buckets) -> usize {
    buckets.values().map(Bindings::count).sum()
}

fn buckets_remove(buckets: &mut Buckets, keep: impl Fn(&str, &str) -> bool) {
    for bindings in buckets.values_mut() {
        let doomed: Vec<(String, String)> = bindings
            .pairs()
            .filter(|(s, a)| !keep(*s, *a))
            .map(|(s, a)| (s.to_string(), a.to_string()))
            .collect();
        for (s, a) in doomed {
            bindings.remove(&s, &a);
        }
    }
    buckets.retain(|_, b| !b.is_empty());
}

/// Live bindings plus the three time-keyed tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingTables {
    #[serde(default)]
    pub scheduled_actions: Bindings,
    #[serde(default)]
    pub deferred_scheduled_actions: Buckets,
    #[serde(default)]
    pub expiring_scheduled_actions: Buckets,
    #[serde(default)]
    pub deferred_programs: BTreeSet<DeferredProgram>,
}

impl SchedulingTables {
    pub fn defer(&mut self, s: &str, a: &str, wait_until: DateTime<Utc>) {
        bucket_insert(&mut self.deferred_scheduled_actions, wait_until, s, a);
    }

    pub fn expire(&mut self, s: &str, a: &str, expire_on: DateTime<Utc>) {
        bucket_insert(&mut self.expiring_scheduled_actions, expire_on, s, a);
    }

    pub fn defer_program(&mut self, name: &str, start: DateTime<Utc>, stop: DateTime<Utc>) {
        self.deferred_programs.insert(DeferredProgram {
            start,
            stop,
            name: name.to_string(),
        });
    }

    pub fn take_due_deferrals(&mut self, now: DateTime<Utc>) -> Vec<(String, String)> {
        take_due(&mut self.deferred_scheduled_actions, now)
    }

    pub fn take_due_expirations(&mut self, now: DateTime<Utc>) -> Vec<(String, String)> {
        take_due(&mut self.expiring_scheduled_actions, now)
    }

    /// Remove and return the programs whose start has passed.
    pub fn take_due_programs(&mut self, now: DateTime<Utc>) -> Vec<DeferredProgram> {
        let (due, waiting): (BTreeSet<_>, BTreeSet<_>) = std::mem::take(&mut self.deferred_programs)
            .into_iter()
            .partition(|p| p.start < now);
        self.deferred_programs = waiting;
        due.into_iter().collect()
    }

    /// Drop `action_name` everywhere. Returns schedulers left with no live actions.
    pub fn remove_action(&mut self, action_name: &str) -> Vec<String> {
        let emptied = self.scheduled_actions.remove_action(action_name);
        buckets_remove(&mut self.deferred_scheduled_actions, |_, a| a != action_name);
        buckets_remove(&mut self.expiring_scheduled_actions, |_, a| a != action_name);
        emptied
    }

    pub fn remove_scheduler(&mut self, scheduler_name: &str) {
        self.scheduled_actions.remove_scheduler(scheduler_name);
        buckets_remove(&mut self.deferred_scheduled_actions, |s, _| s != scheduler_name);
        buckets_remove(&mut self.expiring_scheduled_actions, |s, _| s != scheduler_name);
    }

    pub fn remove_program(&mut self, name: &str) {
        self.deferred_programs.retain(|p| p.name != name);
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled_actions.count()
    }

    pub fn deferred_count(&self) -> usize {
        bucket_count(&self.deferred_scheduled_actions)
    }

    pub fn expiring_count(&self) -> usize {
        bucket_count(&self.expiring_scheduled_actions)
    }

    pub fn deferred_program_count(&self) -> usize {
        self.deferred_programs.len()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn bindings_are_unique_and_ordered() {
        let mut b = Bindings::default();
        assert!(b.insert("bar", "foo"));
        assert!(b.insert("bar", "baz"));
        assert!(!b.insert("bar", "foo"));
        assert_eq!(b.actions_for("bar"), ["foo".to_string(), "baz".to_string()]);
        assert_eq!(b.count(), 2);

        assert!(b.remove("bar", "foo"));
        assert!(b.remove("bar", "baz"));
        assert!(!b.has_scheduler("bar"));
    }

    #[test]
    fn due_deferrals_are_strictly_before_now() {
        let now = Utc::now();
        let mut t = SchedulingTables::default();
        t.defer("s", "past", now - Duration::seconds(1));
        t.defer("s", "exact", now);
        t.defer("s", "future", now + Duration::seconds(1));

        let due = t.take_due_deferrals(now);
        assert_eq!(due, vec![("s".to_string(), "past".to_string())]);
        assert_eq!(t.deferred_count(), 2);
    }

    #[test]
    fn due_programs_leave_future_ones() {
        let now = Utc::now();
        let mut t = SchedulingTables::default();
        t.defer_program("early", now - Duration::seconds(5), now + Duration::seconds(5));
        t.defer_program("late", now + Duration::seconds(5), now + Duration::seconds(9));

        let due = t.take_due_programs(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "early");
        assert_eq!(t.deferred_program_count(), 1);
    }

    #[test]
    fn removing_an_action_cascades_through_every_table() {
        let now = Utc::now();
        let mut t = SchedulingTables::default();
        t.scheduled_actions.insert("bar", "foo");
        t.scheduled_actions.insert("baz", "foo");
        t.scheduled_actions.insert("baz", "other");
        t.defer("bar", "foo", now);
        t.expire("bar", "foo", now);

        let emptied = t.remove_action("foo");
        assert_eq!(emptied, vec!["bar".to_string()]);
        assert_eq!(t.scheduled_count(), 1);
        assert_eq!(t.deferred_count(), 0);
        assert!(t.expiring_scheduled_actions.is_empty());
    }

    #[test]
    fn tables_round_trip_through_json() {
        let now = Utc::now();
        let mut t = SchedulingTables::default();
        t.scheduled_actions.insert("bar", "foo");
        t.defer("bar", "foo", now);
        t.expire("bar", "foo", now + Duration::seconds(3));
        t.defer_program("p", now, now + Duration::seconds(4));

        let text = serde_json::to_string(&t).unwrap();
        let back: SchedulingTables = serde_json::from_str(&text).unwrap();
        assert_eq!(back, t);
    }
}
