//! Values exchanged with engines: properties, parameters, query results.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::{Node, Path, Relationship};

/// A value a backend stores or returns.
///
/// Property values are booleans, integers, floats, strings, the four
/// temporal kinds, and homogeneous lists of those (see
/// [`Value::is_property_value`]). Maps and graph values only appear in
/// parameters and query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Zoned timestamps are normalised to UTC on the way in.
    DateTime(DateTime<Utc>),
    LocalDateTime(NaiveDateTime),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    Node(Box<Node>),
    Relationship(Box<Relationship>),
    Path(Box<Path>),
}

// ============================================================================
// Kinds and accessors
// ============================================================================

impl Value {
    /// Kind name used in coercion errors, matching [`crate::ScalarKind::name`].
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "STRING",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::DateTime(_) => "DATETIME",
            Value::LocalDateTime(_) => "LOCAL DATETIME",
            Value::List(_) => "LIST",
            Value::Map(_) => "MAP",
            Value::Node(_) => "NODE",
            Value::Relationship(_) => "RELATIONSHIP",
            Value::Path(_) => "PATH",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// Scalar kinds that may be stored as a property on their own or inside a list.
    pub fn is_scalar_property(&self) -> bool {
        matches!(
            self,
            Value::Bool(_)
                | Value::Int(_)
                | Value::Float(_)
                | Value::String(_)
                | Value::Date(_)
                | Value::Time(_)
                | Value::DateTime(_)
                | Value::LocalDateTime(_)
        )
    }

    /// True if this value can be written as a node/relationship property:
    /// a supported scalar, or a flat list whose items all share one scalar kind.
    pub fn is_property_value(&self) -> bool {
        match self {
            Value::List(items) => {
                let Some(first) = items.first() else { return true };
                first.is_scalar_property()
                    && items.iter().all(|v| std::mem::discriminant(v) == std::mem::discriminant(first))
            }
            other => other.is_scalar_property(),
        }
    }

    /// Integers, and floats with no fractional part.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }
}

// ============================================================================
// JSON bridge
// ============================================================================

impl Value {
    /// Plain JSON rendering. Temporal values become ISO 8601 strings in the
    /// formats chrono's serde impls read back; graph values become objects.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::List(l) => Json::Array(l.iter().map(Value::to_json).collect()),
            Value::Map(m) => Json::Object(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
            Value::Node(n) => serde_json::json!({
                "labels": n.labels,
                "properties": n.properties.iter().map(|(k, v)| (k.clone(), v.to_json())).collect::<serde_json::Map<_, _>>(),
            }),
            Value::Relationship(r) => serde_json::json!({
                "type": r.rel_type,
                "properties": r.properties.iter().map(|(k, v)| (k.clone(), v.to_json())).collect::<serde_json::Map<_, _>>(),
            }),
            Value::Path(p) => Json::Array(
                p.relationships.iter().map(|r| Value::Relationship(Box::new(r.clone())).to_json()).collect(),
            ),
            Value::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => Json::String(t.format("%H:%M:%S%.f").to_string()),
            Value::DateTime(dt) => Json::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::LocalDateTime(dt) => Json::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        }
    }

    /// Structural conversion from JSON. Strings stay strings; callers that
    /// know a field is temporal parse it themselves.
    pub fn from_json(json: &serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s.clone()),
            Json::Array(a) => Value::List(a.iter().map(Value::from_json).collect()),
            Json::Object(o) => Value::Map(o.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect()),
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::Int(v as i64) } }
impl From<u32> for Value { fn from(v: u32) -> Self { Value::Int(v as i64) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::Int(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::Float(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::String(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::String(v.to_owned()) } }
impl From<NaiveDate> for Value { fn from(v: NaiveDate) -> Self { Value::Date(v) } }
impl From<NaiveTime> for Value { fn from(v: NaiveTime) -> Self { Value::Time(v) } }
impl From<DateTime<Utc>> for Value { fn from(v: DateTime<Utc>) -> Self { Value::DateTime(v) } }
impl From<NaiveDateTime> for Value { fn from(v: NaiveDateTime) -> Self { Value::LocalDateTime(v) } }
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self { Value::List(v.into_iter().map(Into::into).collect()) }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(Value::Null) }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for Value {
    /// Strings are quoted so error messages show `"42"` and `42` apart.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::List(_) | Value::Map(_) => {
                write!(f, "{}", self.to_json())
            }
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::LocalDateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::Node(n) => write!(f, "(#{}:{})", n.id, n.labels.join(":")),
            Value::Relationship(r) => write!(f, "(#{})-[:{}]->(#{})", r.src, r.rel_type, r.dst),
            Value::Path(p) => write!(f, "<path of {} hops>", p.len()),
        }
    }
}

// ============================================================================
// Comparison
// ============================================================================

impl Value {
    /// Ordering used by filters and ORDER BY. `None` when either side is null
    /// or the kinds are not comparable.
    pub fn graph_cmp(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
            (Value::Time(a), Value::Time(b)) => a.partial_cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.partial_cmp(b),
            (Value::LocalDateTime(a), Value::LocalDateTime(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Key equality: integers and floats compare numerically, null equals nothing.
    pub fn graph_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.graph_cmp(other) == Some(std::cmp::Ordering::Equal)
            }
            _ => self == other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from("hello"), Value::String("hello".into()));
        assert_eq!(Value::from(42), Value::Int(42));
        assert_eq!(Value::from(3.5), Value::Float(3.5));
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_null_comparison() {
        assert_eq!(Value::Null.graph_cmp(&Value::Null), None);
        assert_eq!(Value::Null.graph_cmp(&Value::Int(1)), None);
        assert!(!Value::Null.graph_eq(&Value::Null));
    }

    #[test]
    fn test_numeric_comparison() {
        assert_eq!(
            Value::Int(1).graph_cmp(&Value::Float(1.5)),
            Some(std::cmp::Ordering::Less)
        );
        assert!(Value::Int(40).graph_eq(&Value::Float(40.0)));
    }

    #[test]
    fn test_property_value_kinds() {
        assert!(Value::from("x").is_property_value());
        assert!(Value::List(vec![]).is_property_value());
        assert!(Value::from(vec![1, 2, 3]).is_property_value());
        assert!(!Value::List(vec![Value::Int(1), Value::from("a")]).is_property_value());
        assert!(!Value::List(vec![Value::from(vec![1])]).is_property_value());
        assert!(!Value::Map(HashMap::new()).is_property_value());
        assert!(!Value::Null.is_property_value());
    }

    #[test]
    fn test_temporal_json_is_serde_compatible() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap().and_hms_opt(13, 5, 0).unwrap();
        let json = Value::LocalDateTime(dt).to_json();
        let back: NaiveDateTime = serde_json::from_value(json).unwrap();
        assert_eq!(back, dt);

        let utc = dt.and_utc();
        let back: DateTime<Utc> = serde_json::from_value(Value::DateTime(utc).to_json()).unwrap();
        assert_eq!(back, utc);
    }
}
