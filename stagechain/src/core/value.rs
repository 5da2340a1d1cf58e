//! Terraform-compatible variable values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A value passed to or read from a Terraform configuration.
///
/// Serialises to plain JSON so a map of values can be written directly as a
/// `.tfvars.json` file, and deserialises from the `value` field of
/// `terraform output -json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(serde_json::Number),
    /// A string.
    String(String),
    /// A list of values.
    List(Vec<VarValue>),
    /// A string-keyed map, e.g. resource labels.
    Map(BTreeMap<String, VarValue>),
}

impl VarValue {
    /// Returns the string content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean, if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Wraps the value into a one-element list.
    #[must_use]
    pub fn into_list(self) -> Self {
        Self::List(vec![self])
    }

    /// Builds a string map value.
    #[must_use]
    pub fn string_map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), Self::String(v.into())))
                .collect(),
        )
    }

    /// Converts a JSON value, returning `None` for `null`.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Self::Bool(b)),
            serde_json::Value::Number(n) => Some(Self::Number(n)),
            serde_json::Value::String(s) => Some(Self::String(s)),
            serde_json::Value::Array(items) => Some(Self::List(
                items.into_iter().filter_map(Self::from_json).collect(),
            )),
            serde_json::Value::Object(map) => Some(Self::Map(
                map.into_iter()
                    .filter_map(|(k, v)| Self::from_json(v).map(|v| (k, v)))
                    .collect(),
            )),
        }
    }
}

impl fmt::Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            other => match serde_json::to_string(other) {
                Ok(json) => write!(f, "{json}"),
                Err(_) => Err(fmt::Error),
            },
        }
    }
}

impl From<&str> for VarValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for VarValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for VarValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for VarValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<Vec<String>> for VarValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value.into_iter().map(Self::String).collect())
    }
}

impl From<BTreeMap<String, String>> for VarValue {
    fn from(value: BTreeMap<String, String>) -> Self {
        Self::string_map(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tfvars_serialization_is_plain_json() {
        let mut vars = BTreeMap::new();
        vars.insert("cluster_name".to_string(), VarValue::from("terratest-complete-abcd1234"));
        vars.insert("create_bastion".to_string(), VarValue::from(false));
        vars.insert("max_pods_per_node_system".to_string(), VarValue::from(110_i64));
        vars.insert(
            "kubernetes_api_authorized_networks".to_string(),
            VarValue::from(vec!["203.0.113.7/32".to_string()]),
        );

        let json = serde_json::to_value(&vars).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "cluster_name": "terratest-complete-abcd1234",
                "create_bastion": false,
                "kubernetes_api_authorized_networks": ["203.0.113.7/32"],
                "max_pods_per_node_system": 110,
            })
        );
    }

    #[test]
    fn test_from_json_drops_nulls() {
        assert_eq!(VarValue::from_json(serde_json::Value::Null), None);

        let value = VarValue::from_json(serde_json::json!({"a": "x", "b": null})).unwrap();
        assert_eq!(value, VarValue::string_map([("a", "x")]));
    }

    #[test]
    fn test_into_list_wraps_scalar() {
        let wrapped = VarValue::from("10.0.0.1/32").into_list();
        assert_eq!(wrapped, VarValue::from(vec!["10.0.0.1/32".to_string()]));
    }

    #[test]
    fn test_display() {
        assert_eq!(VarValue::from("plain").to_string(), "plain");
        assert_eq!(VarValue::from(true).to_string(), "true");
        assert_eq!(
            VarValue::from(vec!["a".to_string()]).to_string(),
            r#"["a"]"#
        );
    }

    #[test]
    fn test_accessors() {
        assert_eq!(VarValue::from("x").as_str(), Some("x"));
        assert_eq!(VarValue::from(true).as_str(), None);
        assert_eq!(VarValue::from(true).as_bool(), Some(true));
    }
}
