//! Intent records - desired state of one object

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute tree of an object
pub type Attributes = Map<String, Value>;

/// Desired state of one named object.
///
/// The name is the unique key within an object type and target. The
/// attributes are everything else the document says about the object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRecord {
    pub name: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl IntentRecord {
    pub fn new(name: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            name: name.into(),
            attributes,
        }
    }

    /// A record with no attributes (e.g. a bare name in a delete list)
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, Attributes::new())
    }

    /// Build a record from a document entry.
    ///
    /// Accepts either a bare string (the name) or a map holding `name_key`.
    /// The name key is removed from the attributes.
    pub fn from_value(value: &Value, name_key: &str) -> Result<Self> {
        match value {
            Value::String(name) if !name.trim().is_empty() => Ok(Self::named(name.trim())),
            Value::Object(map) => {
                let name = map
                    .get(name_key)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| {
                        Error::load(format!("object is missing required '{name_key}' field"))
                    })?;
                let mut attributes = map.clone();
                attributes.remove(name_key);
                Ok(Self::new(name, attributes))
            }
            other => Err(Error::load(format!(
                "expected a name or a map with '{name_key}', got {}",
                value_kind(other)
            ))),
        }
    }

    /// Get a single attribute
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Get a string attribute
    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.attr(key).and_then(Value::as_str)
    }

    /// Attributes with the name folded back in, as most payloads expect
    pub fn to_object(&self, name_key: &str) -> Value {
        let mut map = self.attributes.clone();
        map.insert(name_key.to_string(), Value::String(self.name.clone()));
        Value::Object(map)
    }
}

/// Parse a document section into records.
///
/// The section may be a list of entries or a map keyed by name. Duplicate
/// names are a load error.
pub fn records_from_section(section: &Value, name_key: &str) -> Result<Vec<IntentRecord>> {
    let records = match section {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .map(|item| IntentRecord::from_value(item, name_key))
            .collect::<Result<Vec<_>>>()?,
        Value::Object(map) => map
            .iter()
            .map(|(name, cfg)| match cfg {
                Value::Null => Ok(IntentRecord::named(name.clone())),
                Value::Object(attrs) => {
                    let mut attributes = attrs.clone();
                    attributes.remove(name_key);
                    Ok(IntentRecord::new(name.clone(), attributes))
                }
                other => Err(Error::load(format!(
                    "entry '{name}' must be a map, got {}",
                    value_kind(other)
                ))),
            })
            .collect::<Result<Vec<_>>>()?,
        other => {
            return Err(Error::load(format!(
                "expected a list or a map, got {}",
                value_kind(other)
            )));
        }
    };

    let mut seen = std::collections::HashSet::new();
    for record in &records {
        if !seen.insert(record.name.as_str()) {
            return Err(Error::load(format!(
                "duplicate object name '{}'",
                record.name
            )));
        }
    }

    Ok(records)
}

/// Human name of a JSON value's type, for error messages
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_string() {
        let record = IntentRecord::from_value(&json!("ntp-1"), "name").unwrap();
        assert_eq!(record.name, "ntp-1");
        assert!(record.attributes.is_empty());
    }

    #[test]
    fn test_from_map_strips_name() {
        let record =
            IntentRecord::from_value(&json!({"name": "snmp-a", "port": 161}), "name").unwrap();
        assert_eq!(record.name, "snmp-a");
        assert_eq!(record.attr("port"), Some(&json!(161)));
        assert!(record.attr("name").is_none());
    }

    #[test]
    fn test_missing_name_is_load_error() {
        let err = IntentRecord::from_value(&json!({"port": 161}), "name").unwrap_err();
        assert!(matches!(err, Error::Load(_)));
        assert!(err.to_string().contains("'name'"));
    }

    #[test]
    fn test_blank_name_is_load_error() {
        assert!(IntentRecord::from_value(&json!({"name": "  "}), "name").is_err());
        assert!(IntentRecord::from_value(&json!(""), "name").is_err());
    }

    #[test]
    fn test_section_as_map() {
        let section = json!({"a": {"domains": ["x"]}, "b": null});
        let records = records_from_section(&section, "name").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "a");
        assert_eq!(records[1].name, "b");
    }

    #[test]
    fn test_section_rejects_duplicates() {
        let section = json!([{"name": "a"}, "a"]);
        let err = records_from_section(&section, "name").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_to_object_round_trips_name() {
        let record = IntentRecord::from_value(&json!({"name": "p", "x": 1}), "name").unwrap();
        assert_eq!(record.to_object("name"), json!({"name": "p", "x": 1}));
    }
}
