use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// MetadataValue – a single attribute value (units, conventions, history...)
// ---------------------------------------------------------------------------

/// A dynamically-typed attribute value.
///
/// Serialized untagged, so attributes read naturally as JSON:
/// `{"flux_units": "e-", "nexp": 12, "gain": 1.5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

impl MetadataValue {
    /// Try to interpret the value as an `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Borrow the value as text, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Integer(i)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Attribute map attached to datasets, variables and coordinates.
pub type Attrs = BTreeMap<String, MetadataValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attrs_survive_json() {
        let mut attrs = Attrs::new();
        attrs.insert("flux_units".into(), "e-".into());
        attrs.insert("nexp".into(), 12i64.into());
        attrs.insert("gain".into(), 1.5.into());
        attrs.insert("calibrated".into(), true.into());
        attrs.insert("note".into(), MetadataValue::Null);

        let text = serde_json::to_string(&attrs).unwrap();
        let back: Attrs = serde_json::from_str(&text).unwrap();
        assert_eq!(back, attrs);
        assert_eq!(back["nexp"], MetadataValue::Integer(12));
    }

    #[test]
    fn whole_floats_stay_floats() {
        let text = serde_json::to_string(&MetadataValue::Float(2.0)).unwrap();
        let back: MetadataValue = serde_json::from_str(&text).unwrap();
        assert_eq!(back, MetadataValue::Float(2.0));
        assert_eq!(back.as_f64(), Some(2.0));
    }
}
