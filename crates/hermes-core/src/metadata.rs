//! Typed metadata shared between hooks, sessions and API definitions.
//!
//! Hooks see metadata as plain JSON, so [`MetaValue`] serializes untagged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// String-keyed metadata bag.
pub type Metadata = BTreeMap<String, MetaValue>;

/// A single metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum MetaValue {
    /// JSON `null`.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A number. Integers are stored exactly up to 2^53.
    Number(f64),
    /// A string.
    String(String),
    /// An ordered list.
    List(Vec<MetaValue>),
    /// A nested map.
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    /// Returns the string content if this is a [`MetaValue::String`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the nested map if this is a [`MetaValue::Map`].
    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<String, MetaValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns `true` for [`MetaValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Renders the value the way it appears in a templated header.
///
/// Strings render bare, integral numbers without a fractional part, and
/// composite values as compact JSON.
impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            #[allow(clippy::cast_possible_truncation)]
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 => {
                write!(f, "{}", *n as i64)
            }
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::List(_) | Self::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for MetaValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<BTreeMap<String, MetaValue>> for MetaValue {
    fn from(value: BTreeMap<String, MetaValue>) -> Self {
        Self::Map(value)
    }
}

impl From<Vec<MetaValue>> for MetaValue {
    fn from(value: Vec<MetaValue>) -> Self {
        Self::List(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_maps_survive_json() {
        let json = r#"{"testkey":{"nestedkey":"nestedvalue"},"testkey2":"testvalue"}"#;
        let meta: Metadata = serde_json::from_str(json).unwrap();

        let nested = meta["testkey"].as_map().unwrap();
        assert_eq!(nested["nestedkey"].as_str(), Some("nestedvalue"));
        assert_eq!(meta["testkey2"].as_str(), Some("testvalue"));
        assert_eq!(serde_json::to_string(&meta).unwrap(), json);
    }

    #[test]
    fn scalar_kinds_are_distinguished() {
        let meta: Metadata =
            serde_json::from_str(r#"{"a":true,"b":3,"c":"3","d":null,"e":[1,"x"]}"#).unwrap();
        assert_eq!(meta["a"], MetaValue::Bool(true));
        assert_eq!(meta["b"], MetaValue::Number(3.0));
        assert_eq!(meta["c"], MetaValue::from("3"));
        assert!(meta["d"].is_null());
        assert_eq!(
            meta["e"],
            MetaValue::List(vec![MetaValue::Number(1.0), MetaValue::from("x")])
        );
    }

    #[test]
    fn display_for_header_templating() {
        assert_eq!(MetaValue::from("abc").to_string(), "abc");
        assert_eq!(MetaValue::Number(200.0).to_string(), "200");
        assert_eq!(MetaValue::Number(1.5).to_string(), "1.5");
        assert_eq!(MetaValue::Bool(false).to_string(), "false");
        assert_eq!(MetaValue::Null.to_string(), "");

        let mut map = BTreeMap::new();
        map.insert("k".to_string(), MetaValue::from("v"));
        assert_eq!(MetaValue::Map(map).to_string(), r#"{"k":"v"}"#);
    }
}
