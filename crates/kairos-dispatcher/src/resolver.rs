//! Rebuilds typed values from decoded JSON.
//!
//! A `"type"` field names the variant directly. Without one, the variant is
//! inferred from the keys: candidates are variants whose declared fields
//! include every key and whose required fields are all present; the one with
//! the fewest declared fields wins. A tie or no candidate is an error, unless
//! the resolver is lenient, in which case the raw value is handed back.

use kairos_core::{rez::REZ_FIELDS, Rez};
use kairos_scheduler::{types::SCHEDULER_FIELDS, Scheduler};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{
    action::{Action, Nesting, ACTION_VARIANTS},
    error::{DispatchError, Result},
    program::Program,
    server::Server,
    state::DispatcherState,
};

const PROGRAM_FIELDS: &[&str] = &["prologue_name", "epilogue_name", "body", "offset_seconds"];
const SERVER_FIELDS: &[&str] = &["host", "port", "tags"];
const STATE_FIELDS: &[&str] = &["actions", "schedulers", "programs", "servers", "tables"];

/// Which interface a value is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Action,
    Scheduler,
    Program,
    Server,
    Rez,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Action(Action),
    Scheduler(Scheduler),
    Program(Program),
    Server(Server),
    Rez(Rez),
    /// Returned by a lenient resolver when no unique variant fits.
    Raw(Value),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver {
    lenient: bool,
}

struct Shape {
    name: &'static str,
    fields: &'static [&'static str],
    required: &'static [&'static str],
}

fn scheduler_required(name: &str) -> &'static [&'static str] {
    match name {
        "Randomly" => &["unit", "low", "high"],
        _ => &[],
    }
}

fn scheduler_shapes() -> Vec<Shape> {
    SCHEDULER_FIELDS
        .iter()
        .map(|&(name, fields)| Shape {
            name,
            fields,
            required: scheduler_required(name),
        })
        .collect()
}

fn action_shapes() -> Vec<Shape> {
    ACTION_VARIANTS
        .iter()
        .map(|v| Shape {
            name: v.name,
            fields: v.fields,
            required: v.required,
        })
        .collect()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Pick the tightest variant for the keys of `map` (ignoring `type`).
fn infer(map: &Map<String, Value>, shapes: &[Shape], root: &str) -> Result<&'static str> {
    let keys: Vec<&str> = map.keys().map(String::as_str).filter(|k| *k != "type").collect();
    let candidates: Vec<&Shape> = shapes
        .iter()
        .filter(|s| keys.iter().all(|k| s.fields.contains(k)))
        .filter(|s| s.required.iter().all(|r| keys.contains(r)))
        .collect();

    let Some(tightest) = candidates.iter().map(|s| s.fields.len()).min() else {
        return Err(DispatchError::Resolve(format!(
            "no {root} variant accepts fields {keys:?}"
        )));
    };
    let tied: Vec<&str> = candidates
        .iter()
        .filter(|s| s.fields.len() == tightest)
        .map(|s| s.name)
        .collect();
    match tied.as_slice() {
        [one] => Ok(*one),
        many => Err(DispatchError::Resolve(format!(
            "fields {keys:?} are ambiguous between {root} variants {many:?}"
        ))),
    }
}

fn explicit_type<'a>(map: &'a Map<String, Value>, root: &str) -> Result<Option<&'a str>> {
    match map.get("type") {
        None => Ok(None),
        Some(Value::String(t)) => Ok(Some(t)),
        Some(other) => Err(DispatchError::Resolve(format!(
            "{root} type must be a string, got {}",
            kind_of(other)
        ))),
    }
}

fn check_fields(map: &Map<String, Value>, allowed: &[&str], root: &str) -> Result<()> {
    match map.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(k) => Err(DispatchError::Resolve(format!("unknown {root} field: {k}"))),
        None => Ok(()),
    }
}

fn expect_object(value: Value, root: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DispatchError::Resolve(format!(
            "expected {root} object, got {}",
            kind_of(&other)
        ))),
    }
}

fn decode<T: DeserializeOwned>(value: Value, root: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| DispatchError::Resolve(format!("{root}: {e}")))
}

/// Add `type` to an action object and every nested child that lacks one.
fn tag_action(value: Value, shapes: &[Shape]) -> Result<Value> {
    let mut map = expect_object(value, "action")?;
    let name = match explicit_type(&map, "action")? {
        Some(t) => ACTION_VARIANTS
            .iter()
            .find(|v| v.name == t)
            .map(|v| v.name)
            .ok_or_else(|| DispatchError::Resolve(format!("unknown action type: {t}")))?,
        None => {
            let name = infer(&map, shapes, "action")?;
            map.insert("type".to_string(), Value::String(name.to_string()));
            name
        }
    };
    let Some(spec) = ACTION_VARIANTS.iter().find(|v| v.name == name) else {
        return Err(DispatchError::Resolve(format!("unknown action type: {name}")));
    };

    for (field, nesting) in spec.nested {
        let Some(child) = map.get_mut(*field) else {
            continue;
        };
        let taken = std::mem::take(child);
        *child = match (nesting, taken) {
            (_, Value::Null) => Value::Null,
            (Nesting::One, v) => tag_action(v, shapes)?,
            (Nesting::Many, Value::Array(items)) => Value::Array(
                items
                    .into_iter()
                    .map(|v| tag_action(v, shapes))
                    .collect::<Result<Vec<_>>>()?,
            ),
            (Nesting::Many, other) => {
                return Err(DispatchError::Resolve(format!(
                    "{name}.{field} must be a list, got {}",
                    kind_of(&other)
                )))
            }
        };
    }
    Ok(Value::Object(map))
}

fn check_rez(value: &Value) -> Result<()> {
    let Value::Object(map) = value else {
        return Err(DispatchError::Resolve(format!("expected rez object, got {}", kind_of(value))));
    };
    check_fields(map, REZ_FIELDS, "rez")?;
    match map.get("rez") {
        Some(Value::Null) | None => Ok(()),
        Some(inner) => check_rez(inner),
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand back the raw value instead of failing when no variant fits.
    pub fn lenient() -> Self {
        Self { lenient: true }
    }

    pub fn resolve(&self, root: Root, value: Value) -> Result<Resolved> {
        let outcome = match root {
            Root::Action => self.action(value.clone()).map(Resolved::Action),
            Root::Scheduler => self.scheduler(value.clone()).map(Resolved::Scheduler),
            Root::Program => self.program(value.clone()).map(Resolved::Program),
            Root::Server => self.server(value.clone()).map(Resolved::Server),
            Root::Rez => self.rez(value.clone()).map(Resolved::Rez),
        };
        match outcome {
            Err(DispatchError::Resolve(_)) if self.lenient => Ok(Resolved::Raw(value)),
            other => other,
        }
    }

    pub fn action(&self, value: Value) -> Result<Action> {
        let tagged = tag_action(value, &action_shapes())?;
        decode(tagged, "action")
    }

    pub fn scheduler(&self, value: Value) -> Result<Scheduler> {
        let mut map = expect_object(value, "scheduler")?;
        match explicit_type(&map, "scheduler")? {
            Some(t) => {
                if !SCHEDULER_FIELDS.iter().any(|(name, _)| *name == t) {
                    return Err(DispatchError::Resolve(format!("unknown scheduler type: {t}")));
                }
            }
            None => {
                let name = infer(&map, &scheduler_shapes(), "scheduler")?;
                map.insert("type".to_string(), Value::String(name.to_string()));
            }
        }
        decode(Value::Object(map), "scheduler")
    }

    pub fn program(&self, value: Value) -> Result<Program> {
        let map = expect_object(value, "program")?;
        check_fields(&map, PROGRAM_FIELDS, "program")?;
        decode(Value::Object(map), "program")
    }

    pub fn server(&self, value: Value) -> Result<Server> {
        let map = expect_object(value, "server")?;
        check_fields(&map, SERVER_FIELDS, "server")?;
        decode(Value::Object(map), "server")
    }

    pub fn rez(&self, value: Value) -> Result<Rez> {
        check_rez(&value)?;
        decode(value, "rez")
    }

    /// An optional Rez: `null`, `{}` and a missing body all mean "none".
    pub fn optional_rez(&self, value: Option<Value>) -> Result<Option<Rez>> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) if map.is_empty() => Ok(None),
            Some(v) => self.rez(v).map(Some),
        }
    }

    /// A full dispatcher snapshot.
    pub fn state(&self, value: Value) -> Result<DispatcherState> {
        let mut map = expect_object(value, "snapshot")?;
        check_fields(&map, STATE_FIELDS, "snapshot")?;
        let mut state = DispatcherState::default();

        if let Some(actions) = map.remove("actions") {
            for (name, v) in expect_object(actions, "actions")? {
                let action = self.action(v)?;
                state.actions.insert(name, action);
            }
        }
        if let Some(schedulers) = map.remove("schedulers") {
            for (name, v) in expect_object(schedulers, "schedulers")? {
                let scheduler = self.scheduler(v)?;
                state.schedulers.insert(name, scheduler);
            }
        }
        if let Some(programs) = map.remove("programs") {
            for (name, v) in expect_object(programs, "programs")? {
                let program = self.program(v)?;
                state.programs.insert(name, program);
            }
        }
        if let Some(servers) = map.remove("servers") {
            for (name, v) in expect_object(servers, "servers")? {
                let server = self.server(v)?;
                state.servers.insert(&name, server);
            }
        }
        if let Some(tables) = map.remove("tables") {
            state.tables = decode(tables, "tables")?;
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kairos_scheduler::{Immediately, Randomly, TimeUnit, Timely};
    use serde_json::json;

    #[test]
    fn typed_values_round_trip() {
        let r = Resolver::new();
        let action = Action::IfElse {
            test: Box::new(Action::RaiseCmp {
                value: json!(3),
                cmp: -1,
            }),
            else_action: Box::new(Action::file_append("/tmp/x")),
            if_action: None,
        };
        assert_eq!(r.action(serde_json::to_value(&action).unwrap()).unwrap(), action);

        let scheduler = Scheduler::Randomly(Randomly {
            unit: TimeUnit::Minute,
            low: 2,
            high: 5,
            start_of_day: None,
            stop_of_day: None,
        });
        assert_eq!(
            r.scheduler(serde_json::to_value(&scheduler).unwrap()).unwrap(),
            scheduler
        );

        let rez = Rez::successor(Some(Rez::with_result(json!(1)))).result(json!(2));
        assert_eq!(r.rez(serde_json::to_value(&rez).unwrap()).unwrap(), rez);
    }

    #[test]
    fn untagged_action_picks_tightest_variant() {
        let r = Resolver::new();
        assert_eq!(
            r.action(json!({"file": "/tmp/o.txt"})).unwrap(),
            Action::file_append("/tmp/o.txt")
        );
        assert_eq!(
            r.action(json!({"action_name": "foo"})).unwrap(),
            Action::Exec {
                server_name: None,
                action_name: "foo".into()
            }
        );
    }

    #[test]
    fn nested_children_are_inferred_but_vals_are_not() {
        let r = Resolver::new();
        let action = r
            .action(json!({
                "actions": [
                    {"vals": {"file": "/tmp/x", "actions": "not a child"}},
                    {"file": "/tmp/y"}
                ]
            }))
            .unwrap();
        let Action::Compose { actions } = action else {
            panic!("expected Compose, got {action:?}");
        };
        assert!(matches!(&actions[0], Action::Vals { vals } if vals["actions"] == json!("not a child")));
        assert_eq!(actions[1], Action::file_append("/tmp/y"));
    }

    #[test]
    fn ambiguous_and_unknown_shapes_fail_unless_lenient() {
        let ambiguous = json!({"scheduler_name": "s", "action_name": "a"});
        assert!(matches!(
            Resolver::new().action(ambiguous.clone()),
            Err(DispatchError::Resolve(_))
        ));
        assert!(Resolver::new().action(json!({"bogus": 1})).is_err());

        let raw = Resolver::lenient().resolve(Root::Action, ambiguous.clone()).unwrap();
        assert_eq!(raw, Resolved::Raw(ambiguous));
    }

    #[test]
    fn untagged_schedulers() {
        let r = Resolver::new();
        assert_eq!(
            r.scheduler(json!({"interval": 1})).unwrap(),
            Scheduler::Timely(Timely::every(1))
        );
        assert_eq!(
            r.scheduler(json!({})).unwrap(),
            Scheduler::Immediately(Immediately::default())
        );
        assert!(matches!(
            r.scheduler(json!({"unit": "second", "low": 1, "high": 3})).unwrap(),
            Scheduler::Randomly(_)
        ));
    }

    #[test]
    fn rez_rejects_unknown_fields_and_accepts_legacy_name() {
        let r = Resolver::new();
        assert!(r.rez(json!({"result": 1, "nope": 2})).is_err());
        let rez = r.rez(json!({"scheduler_info": {"file": "/tmp/x"}})).unwrap();
        assert_eq!(rez.flds["file"], json!("/tmp/x"));
        assert_eq!(r.optional_rez(Some(json!({}))).unwrap(), None);
    }
}
