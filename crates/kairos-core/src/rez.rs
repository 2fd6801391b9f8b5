//! `Rez`: the result/context record threaded through action compositions.
//!
//! Each successful action returns a new `Rez` whose `rez` field points at the
//! record it received, so the history of a composition is a singly-linked
//! list. Links are owned boxes, which rules out cycles.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rez {
    /// Opaque outcome; a non-null value overrides a sink's static payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Late-binding field bag. `scheduler_info` is the legacy name.
    #[serde(default, alias = "scheduler_info", skip_serializing_if = "Map::is_empty")]
    pub flds: Map<String, Value>,
    /// Predecessor in the chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rez: Option<Box<Rez>>,
    /// Diagnostics (processing counts, captured child failures).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
    /// Self-description of the action that produced this record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
}

/// Field names accepted when decoding a `Rez`.
pub const REZ_FIELDS: &[&str] = &["result", "flds", "scheduler_info", "rez", "extra", "info"];

impl Rez {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn with_flds(flds: Map<String, Value>) -> Self {
        Self {
            flds,
            ..Self::default()
        }
    }

    /// Start a new record that inherits `prev`'s field bag and links to it.
    pub fn successor(prev: Option<Rez>) -> Self {
        match prev {
            Some(prev) => Self {
                flds: prev.flds.clone(),
                rez: Some(Box::new(prev)),
                ..Self::default()
            },
            None => Self::default(),
        }
    }

    /// Like [`Rez::successor`] but also carries the predecessor's result forward.
    pub fn passthrough(prev: Option<Rez>) -> Self {
        let result = prev.as_ref().and_then(|p| p.result.clone());
        Self {
            result,
            ..Self::successor(prev)
        }
    }

    pub fn result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn info(mut self, info: Value) -> Self {
        self.info = Some(info);
        self
    }

    pub fn extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    /// The result, ignoring an explicit JSON null.
    pub fn result_value(&self) -> Option<&Value> {
        self.result.as_ref().filter(|v| !v.is_null())
    }

    /// This record followed by every predecessor, newest first.
    pub fn history(&self) -> Vec<&Rez> {
        let mut out = vec![self];
        let mut cur = self.rez.as_deref();
        while let Some(r) = cur {
            out.push(r);
            cur = r.rez.as_deref();
        }
        out
    }

    /// Number of links in the chain, this record included.
    pub fn depth(&self) -> usize {
        self.history().len()
    }
}

/// Render a result for a text sink: strings verbatim, everything else as JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
