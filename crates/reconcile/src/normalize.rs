//! Attribute normalization and subset-equality
//!
//! Intended and existing attribute trees are normalized the same way before
//! being compared, so that presentation differences in the remote response
//! (list order, one-field wrapper records, numbers sent as strings) never
//! read as a change.

use crate::intent::Attributes;
use serde_json::Value;

/// Normalization rules for one object type
#[derive(Debug, Clone)]
pub struct Normalizer {
    sort_lists: bool,
    unwrap: Vec<(String, String)>,
    stringify: Vec<String>,
    ignore: Vec<String>,
    aliases: Vec<(String, String)>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            sort_lists: true,
            unwrap: Vec::new(),
            stringify: Vec::new(),
            ignore: Vec::new(),
            aliases: Vec::new(),
        }
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep list order significant
    pub fn ordered_lists(mut self) -> Self {
        self.sort_lists = false;
        self
    }

    /// Replace `{ key: { inner: x } }` with `{ key: x }`
    pub fn unwrap(mut self, key: &str, inner: &str) -> Self {
        self.unwrap.push((key.to_string(), inner.to_string()));
        self
    }

    /// Compare scalars under `key` by their string form
    pub fn stringify(mut self, key: &str) -> Self {
        self.stringify.push(key.to_string());
        self
    }

    /// Drop `key` wherever it appears (write-only fields such as secrets)
    pub fn ignore(mut self, key: &str) -> Self {
        self.ignore.push(key.to_string());
        self
    }

    /// Rename `from` to `to` when `to` is not already present
    pub fn alias(mut self, from: &str, to: &str) -> Self {
        self.aliases.push((from.to_string(), to.to_string()));
        self
    }

    /// Normalize a value tree
    pub fn normalize(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.normalize_map(map)),
            Value::Array(items) => {
                let mut items: Vec<Value> = items.iter().map(|v| self.normalize(v)).collect();
                if self.sort_lists {
                    items.sort_by_cached_key(canonical_key);
                }
                Value::Array(items)
            }
            other => other.clone(),
        }
    }

    /// Normalize an attribute map
    pub fn normalize_map(&self, map: &Attributes) -> Attributes {
        let mut out = Attributes::new();
        for (key, value) in map {
            if self.ignore.iter().any(|k| k == key) {
                continue;
            }
            let key = self
                .aliases
                .iter()
                .find(|(from, to)| from == key && !map.contains_key(to))
                .map_or(key.as_str(), |(_, to)| to.as_str());

            let mut value = self.normalize(value);
            if let Some((_, inner)) = self.unwrap.iter().find(|(k, _)| k == key)
                && let Value::Object(wrapper) = &value
                && let Some(bare) = wrapper.get(inner)
            {
                value = bare.clone();
            }
            if self.stringify.iter().any(|k| k == key) {
                value = stringify_scalar(value);
            }
            out.insert(key.to_string(), value);
        }
        out
    }

    /// Whether `intended` already holds on `existing` after normalization
    pub fn matches(&self, intended: &Attributes, existing: &Attributes) -> bool {
        subset_eq(
            &Value::Object(self.normalize_map(intended)),
            &Value::Object(self.normalize_map(existing)),
        )
    }

    /// Top-level intended keys whose values differ from `existing`
    pub fn changed_keys(&self, intended: &Attributes, existing: &Attributes) -> Vec<String> {
        let intended = self.normalize_map(intended);
        let existing = self.normalize_map(existing);
        intended
            .iter()
            .filter(|(k, v)| !subset_eq(v, existing.get(*k).unwrap_or(&Value::Null)))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// Stable sort key for a normalized value (map keys in sorted order)
pub fn canonical_key(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn stringify_scalar(value: Value) -> Value {
    match value {
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        other => other,
    }
}

/// Subset equality.
///
/// Every key present in `intended` must equal the same key in `existing`;
/// keys only `existing` has are ignored. A null intended value matches an
/// absent or null existing value. Lists must have the same length and match
/// element-wise.
pub fn subset_eq(intended: &Value, existing: &Value) -> bool {
    match (intended, existing) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) => false,
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(k, v)| subset_eq(v, have.get(k).unwrap_or(&Value::Null))),
        (Value::Object(_), _) => false,
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| subset_eq(w, h))
        }
        (Value::Number(a), Value::Number(b)) => a == b || a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_extra_existing_keys_ignored() {
        assert!(subset_eq(
            &json!({"domains": ["a"]}),
            &json!({"domains": ["a"], "id": 7})
        ));
    }

    #[test]
    fn test_missing_existing_key_differs() {
        assert!(!subset_eq(&json!({"port": 161}), &json!({})));
    }

    #[test]
    fn test_null_matches_absent() {
        assert!(subset_eq(&json!({"route": null}), &json!({})));
        assert!(!subset_eq(&json!({"route": null}), &json!({"route": {"x": 1}})));
    }

    #[test]
    fn test_list_order_ignored_after_normalize() {
        let normalizer = Normalizer::new();
        assert!(normalizer.matches(
            &attrs(json!({"domains": ["b.example", "a.example"]})),
            &attrs(json!({"domains": ["a.example", "b.example"]}))
        ));
    }

    #[test]
    fn test_ordered_lists_keep_order() {
        let normalizer = Normalizer::new().ordered_lists();
        assert!(!normalizer.matches(
            &attrs(json!({"members": ["b", "a"]})),
            &attrs(json!({"members": ["a", "b"]}))
        ));
    }

    #[test]
    fn test_unwrap_and_stringify() {
        let normalizer = Normalizer::new()
            .unwrap("administrativeDistance", "distance")
            .stringify("administrativeDistance");
        assert!(normalizer.matches(
            &attrs(json!({"administrativeDistance": 10})),
            &attrs(json!({"administrativeDistance": {"distance": "10"}}))
        ));
        assert!(!normalizer.matches(
            &attrs(json!({"administrativeDistance": 20})),
            &attrs(json!({"administrativeDistance": {"distance": 10}}))
        ));
    }

    #[test]
    fn test_list_of_objects_sorted_canonically() {
        let normalizer = Normalizer::new();
        let intended = attrs(json!({"nextHops": [
            {"outgoingInterface": "ge-0/0/2"},
            {"nextHopAddress": "10.0.0.1"}
        ]}));
        let existing = attrs(json!({"nextHops": [
            {"nextHopAddress": "10.0.0.1"},
            {"outgoingInterface": "ge-0/0/2"}
        ]}));
        assert!(normalizer.matches(&intended, &existing));
    }

    #[test]
    fn test_ignore_secrets() {
        let normalizer = Normalizer::new().ignore("presharedKey");
        assert!(normalizer.matches(
            &attrs(json!({"peer": "1.1.1.1", "presharedKey": "s3cret"})),
            &attrs(json!({"peer": "1.1.1.1"}))
        ));
    }

    #[test]
    fn test_alias() {
        let normalizer = Normalizer::new().alias("circuit", "outgoingInterface");
        assert!(normalizer.matches(
            &attrs(json!({"hop": {"circuit": "c1"}})),
            &attrs(json!({"hop": {"outgoingInterface": "c1"}}))
        ));
    }

    #[test]
    fn test_changed_keys() {
        let normalizer = Normalizer::new();
        let changed = normalizer.changed_keys(
            &attrs(json!({"a": 1, "b": [2, 1], "c": "x"})),
            &attrs(json!({"a": 1, "b": [1, 2], "c": "y"})),
        );
        assert_eq!(changed, vec!["c".to_string()]);
    }

    #[test]
    fn test_canonical_key_ignores_key_order() {
        let a = json!({"b": 1, "a": [true, null]});
        let b = json!({"a": [true, null], "b": 1});
        assert_eq!(canonical_key(&a), canonical_key(&b));
        assert_eq!(canonical_key(&a), r#"{"a":[true,null],"b":1}"#);
    }

    #[test]
    fn test_number_forms() {
        assert!(subset_eq(&json!(1), &json!(1.0)));
        assert!(!subset_eq(&json!(1), &json!("1")));
    }
}
