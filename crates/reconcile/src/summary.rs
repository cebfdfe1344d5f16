//! State summaries - what the remote system reports about one object
//!
//! Remote responses come in many shapes. Each object type converts its
//! response into values implementing [`StateSummary`] so the partitioner
//! only ever sees a name, usage counters and (optionally) attributes.

use crate::intent::Attributes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Read-only view of one remote object
pub trait StateSummary: Send + Sync + fmt::Debug {
    /// Declared name of the object (exact, case-sensitive)
    fn name(&self) -> &str;

    /// Value of a usage counter; missing counters read as zero
    fn counter(&self, key: &str) -> u64;

    /// Current attributes, when the remote reports them
    fn attributes(&self) -> Option<&Attributes> {
        None
    }
}

/// Generic summary used by most object types
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub name: String,
    #[serde(default)]
    pub usage_counters: BTreeMap<String, u64>,
    #[serde(default)]
    pub raw: Value,
}

impl Summary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set a usage counter
    pub fn with_counter(mut self, key: impl Into<String>, value: u64) -> Self {
        self.usage_counters.insert(key.into(), value);
        self
    }

    /// Set the raw remote object; object-shaped values double as attributes
    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }
}

impl StateSummary for Summary {
    fn name(&self) -> &str {
        &self.name
    }

    fn counter(&self, key: &str) -> u64 {
        self.usage_counters.get(key).copied().unwrap_or(0)
    }

    fn attributes(&self) -> Option<&Attributes> {
        self.raw.as_object()
    }
}

/// Usage predicate: the object is in use when any listed counter is non-zero.
pub fn any_counter<S: StateSummary + ?Sized>(keys: &[&str]) -> impl Fn(&S) -> bool + use<S> {
    let keys: Vec<String> = keys.iter().map(|k| (*k).to_string()).collect();
    move |summary: &S| keys.iter().any(|k| summary.counter(k) > 0)
}

/// Usage predicate for objects that can never be in use.
pub fn never_in_use<S: StateSummary + ?Sized>(_summary: &S) -> bool {
    false
}

/// Read a counter out of a JSON object, accepting integers, floats and
/// numeric strings. Anything else reads as zero.
pub fn counter_from_json(value: &Value, key: &str) -> u64 {
    match value.get(key) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}
