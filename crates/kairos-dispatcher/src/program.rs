use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Scheduler name conventionally bound to an `Immediately` scheduler; programs
/// fire their prologue and epilogue through it.
pub const IMMEDIATELY: &str = "immediately";

/// A time-bounded plan over existing scheduler/action names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prologue_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epilogue_name: Option<String>,
    /// scheduler name → action names, in insertion order.
    #[serde(default, with = "ordered_body")]
    pub body: Vec<(String, Vec<String>)>,
    #[serde(default)]
    pub offset_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramItemKind {
    Defer,
    Expire,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramItem {
    #[serde(rename = "type")]
    pub kind: ProgramItemKind,
    pub dt: DateTime<Utc>,
    pub scheduler_name: String,
    pub action_name: String,
}

impl ProgramItem {
    fn new(kind: ProgramItemKind, dt: DateTime<Utc>, scheduler_name: &str, action_name: &str) -> Self {
        Self {
            kind,
            dt,
            scheduler_name: scheduler_name.to_string(),
            action_name: action_name.to_string(),
        }
    }
}

impl Program {
    pub fn with_body(mut self, scheduler_name: &str, action_names: &[&str]) -> Self {
        self.body.push((
            scheduler_name.to_string(),
            action_names.iter().map(|a| a.to_string()).collect(),
        ));
        self
    }

    /// Every `(scheduler, action)` pair in the body, in order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.body
            .iter()
            .flat_map(|(s, actions)| actions.iter().map(move |a| (s.as_str(), a.as_str())))
    }

    /// `offset_seconds` as a delta, `None` when chrono cannot represent it.
    pub fn offset(&self) -> Option<TimeDelta> {
        TimeDelta::try_seconds(self.offset_seconds)
    }

    /// Expand against `[start, stop]`: prologue, body defer/expire pairs, epilogue.
    ///
    /// `None` when the offset pushes a body instant out of chrono's range.
    pub fn compute_program_items(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> Option<Vec<ProgramItem>> {
        let offset = self.offset()?;
        let body_start = start.checked_add_signed(offset)?;
        let body_stop = stop.checked_sub_signed(offset)?;
        let mut items = Vec::new();
        if let Some(prologue) = &self.prologue_name {
            items.push(ProgramItem::new(ProgramItemKind::Defer, start, IMMEDIATELY, prologue));
        }
        for (s, a) in self.pairs() {
            items.push(ProgramItem::new(ProgramItemKind::Defer, body_start, s, a));
            items.push(ProgramItem::new(ProgramItemKind::Expire, body_stop, s, a));
        }
        if let Some(epilogue) = &self.epilogue_name {
            items.push(ProgramItem::new(ProgramItemKind::Defer, stop, IMMEDIATELY, epilogue));
        }
        Some(items)
    }

    /// Action names referenced anywhere in the program.
    pub fn action_names(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.prologue_name.as_deref().into_iter().collect();
        out.extend(self.pairs().map(|(_, a)| a));
        out.extend(self.epilogue_name.as_deref());
        out
    }

    /// Scheduler names referenced anywhere, including `immediately` when the
    /// program has a prologue or epilogue.
    pub fn scheduler_names(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.body.iter().map(|(s, _)| s.as_str()).collect();
        if self.prologue_name.is_some() || self.epilogue_name.is_some() {
            out.push(IMMEDIATELY);
        }
        out
    }

    pub fn references_action(&self, name: &str) -> bool {
        self.action_names().contains(&name)
    }

    pub fn references_scheduler(&self, name: &str) -> bool {
        self.scheduler_names().contains(&name)
    }

    pub fn is_empty(&self) -> bool {
        self.prologue_name.is_none() && self.epilogue_name.is_none() && self.pairs().next().is_none()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body: Vec<String> = self
            .body
            .iter()
            .map(|(s, actions)| format!("{s}:[{}]", actions.join(",")))
            .collect();
        write!(
            f,
            "prologue={} body={{{}}} epilogue={} offset={}s",
            self.prologue_name.as_deref().unwrap_or("-"),
            body.join(" "),
            self.epilogue_name.as_deref().unwrap_or("-"),
            self.offset_seconds
        )
    }
}

/// A program waiting for its start instant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeferredProgram {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub name: String,
}

/// (De)serialize the body as a JSON object while keeping key order.
mod ordered_body {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::{Deserializer, Serializer};

    type Body = Vec<(String, Vec<String>)>;

    pub fn serialize<S: Serializer>(body: &Body, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(body.iter().map(|(k, v)| (k, v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Body, D::Error> {
        struct BodyVisitor;

        impl<'de> Visitor<'de> for BodyVisitor {
            type Value = Body;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of scheduler name to action names")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Body, A::Error> {
                let mut body = Vec::new();
                while let Some((k, v)) = map.next_entry::<String, Vec<String>>()? {
                    match body.iter_mut().find(|entry: &&mut (String, Vec<String>)| entry.0 == k) {
                        Some((_, actions)) => actions.extend(v),
                        None => body.push((k, v)),
                    }
                }
                Ok(body)
            }
        }

        deserializer.deserialize_map(BodyVisitor)
    }
}
