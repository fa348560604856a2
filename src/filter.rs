//! Field filters (`age__gte`, `name__icontains`, ...), paging and ordering.
//!
//! Filters are parsed against a node schema before any statement runs, so
//! unknown fields and modifiers fail fast. A parsed [`Predicate`] can
//! render itself as a Cypher condition or be evaluated directly against a
//! property map by the in-memory engines.

use serde::{Deserialize, Serialize};

use crate::coerce::to_property_value;
use crate::model::{PropertyMap, Value};
use crate::schema::{FieldKind, NodeSchema};
use crate::{Error, Result};

/// Filter comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Exact,
    IExact,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    IsNull,
}

impl FilterOp {
    pub fn parse(modifier: &str) -> Option<Self> {
        Some(match modifier {
            "exact" => FilterOp::Exact,
            "iexact" => FilterOp::IExact,
            "contains" => FilterOp::Contains,
            "icontains" => FilterOp::IContains,
            "startswith" => FilterOp::StartsWith,
            "istartswith" => FilterOp::IStartsWith,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "in" => FilterOp::In,
            "isnull" => FilterOp::IsNull,
            _ => return None,
        })
    }

    fn is_string_op(&self) -> bool {
        matches!(
            self,
            FilterOp::IExact | FilterOp::Contains | FilterOp::IContains | FilterOp::StartsWith | FilterOp::IStartsWith
        )
    }
}

/// Ordered `field__modifier => value` pairs. A bare field name means `exact`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters(Vec<(String, Value)>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.0.iter()
    }

    /// Resolve every filter against the schema.
    pub fn parse(&self, schema: &NodeSchema) -> Result<Vec<Predicate>> {
        self.0.iter().map(|(key, value)| Predicate::parse(key, value, schema)).collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// One resolved filter: stored property, operator, comparison value.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub property: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Predicate {
    pub fn parse(key: &str, value: &Value, schema: &NodeSchema) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidFilter { key: key.to_owned(), reason };
        // A declared field may itself contain `__`; only a known modifier splits.
        let (field_name, op) = match key.rsplit_once("__") {
            _ if schema.field(key).is_some() => (key, FilterOp::Exact),
            Some((field, modifier)) => match FilterOp::parse(modifier) {
                Some(op) => (field, op),
                None if schema.field(field).is_some() => {
                    return Err(invalid(format!("unknown modifier '{modifier}'")));
                }
                None => (key, FilterOp::Exact),
            },
            None => (key, FilterOp::Exact),
        };
        let field = schema
            .field(field_name)
            .ok_or_else(|| invalid(format!("'{field_name}' is not a field of {}", schema.entity())))?;

        let value = match op {
            FilterOp::IsNull => match value {
                Value::Bool(_) => value.clone(),
                _ => return Err(invalid("isnull expects a boolean".into())),
            },
            FilterOp::In => match value {
                Value::List(items) => Value::List(
                    items.iter().map(|v| coerce_operand(v, field, key)).collect::<Result<Vec<_>>>()?,
                ),
                _ => return Err(invalid("in expects a list".into())),
            },
            op if op.is_string_op() => match value {
                Value::String(_) => value.clone(),
                _ => return Err(invalid("string modifiers expect a string".into())),
            },
            _ => coerce_operand(value, field, key)?,
        };

        Ok(Predicate { property: field.property_name().to_owned(), op, value })
    }

    /// Cypher condition on `var`, binding the operand as `$param`.
    pub fn to_cypher(&self, var: &str, param: &str) -> String {
        let prop = format!("{var}.{}", self.property);
        match self.op {
            FilterOp::Exact => format!("{prop} = ${param}"),
            FilterOp::IExact => format!("toLower({prop}) = toLower(${param})"),
            FilterOp::Contains => format!("{prop} CONTAINS ${param}"),
            FilterOp::IContains => format!("toLower({prop}) CONTAINS toLower(${param})"),
            FilterOp::StartsWith => format!("{prop} STARTS WITH ${param}"),
            FilterOp::IStartsWith => format!("toLower({prop}) STARTS WITH toLower(${param})"),
            FilterOp::Gt => format!("{prop} > ${param}"),
            FilterOp::Gte => format!("{prop} >= ${param}"),
            FilterOp::Lt => format!("{prop} < ${param}"),
            FilterOp::Lte => format!("{prop} <= ${param}"),
            FilterOp::In => format!("{prop} IN ${param}"),
            FilterOp::IsNull => match self.value {
                Value::Bool(false) => format!("{prop} IS NOT NULL"),
                _ => format!("{prop} IS NULL"),
            },
        }
    }

    /// True if the property map satisfies this predicate.
    pub fn matches(&self, properties: &PropertyMap) -> bool {
        let prop = properties.get(&self.property).filter(|v| !v.is_null());
        if self.op == FilterOp::IsNull {
            let want_null = self.value.as_bool().unwrap_or(true);
            return prop.is_none() == want_null;
        }
        let Some(prop) = prop else { return false };
        let text = || Some((prop.as_str()?, self.value.as_str()?));
        match self.op {
            FilterOp::Exact => prop.graph_eq(&self.value),
            FilterOp::IExact => text().is_some_and(|(a, b)| a.to_lowercase() == b.to_lowercase()),
            FilterOp::Contains => text().is_some_and(|(a, b)| a.contains(b)),
            FilterOp::IContains => text().is_some_and(|(a, b)| a.to_lowercase().contains(&b.to_lowercase())),
            FilterOp::StartsWith => text().is_some_and(|(a, b)| a.starts_with(b)),
            FilterOp::IStartsWith => text().is_some_and(|(a, b)| a.to_lowercase().starts_with(&b.to_lowercase())),
            FilterOp::Gt => prop.graph_cmp(&self.value).is_some_and(|o| o.is_gt()),
            FilterOp::Gte => prop.graph_cmp(&self.value).is_some_and(|o| o.is_ge()),
            FilterOp::Lt => prop.graph_cmp(&self.value).is_some_and(|o| o.is_lt()),
            FilterOp::Lte => prop.graph_cmp(&self.value).is_some_and(|o| o.is_le()),
            FilterOp::In => self.value.as_list().is_some_and(|items| items.iter().any(|v| prop.graph_eq(v))),
            FilterOp::IsNull => false,
        }
    }
}

/// Temporal fields accept ISO strings as filter operands.
fn coerce_operand(value: &Value, field: &crate::schema::FieldSpec, key: &str) -> Result<Value> {
    let temporal = match field.kind {
        FieldKind::Scalar(k) | FieldKind::List(k) => k.is_temporal(),
        FieldKind::Inferred => false,
    };
    if temporal && value.is_string() {
        let scalar = crate::schema::FieldSpec::new(field.name.clone(), match field.kind {
            FieldKind::List(k) => FieldKind::Scalar(k),
            kind => kind,
        });
        return to_property_value(&value.to_json(), &scalar).map_err(|e| Error::InvalidFilter {
            key: key.to_owned(),
            reason: e.to_string(),
        });
    }
    Ok(value.clone())
}

// ============================================================================
// Paging and ordering
// ============================================================================

/// Sort key: a stored property name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub property: String,
    pub descending: bool,
}

/// Result window applied after filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub order: Option<OrderBy>,
}

impl Page {
    /// Apply skip and limit to an already ordered sequence.
    pub fn window<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let skip = self.skip.unwrap_or(0) as usize;
        let limit = self.limit.map_or(usize::MAX, |l| l as usize);
        items.into_iter().skip(skip).take(limit).collect()
    }
}

/// Typed match request: filters plus window, with fields named as declared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchQuery {
    pub filters: Filters,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// Field name and whether to sort descending.
    pub order_by: Option<(String, bool)>,
}

impl MatchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters = self.filters.with(key, value);
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some((field.into(), false));
        self
    }

    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some((field.into(), true));
        self
    }

    /// Resolve field names to stored properties.
    pub fn resolve(&self, schema: &NodeSchema) -> Result<(Vec<Predicate>, Page)> {
        let predicates = self.filters.parse(schema)?;
        let order = match &self.order_by {
            Some((field, descending)) => {
                let spec = schema.field(field).ok_or_else(|| Error::InvalidFilter {
                    key: field.clone(),
                    reason: format!("cannot order by '{field}': not a field of {}", schema.entity()),
                })?;
                Some(OrderBy { property: spec.property_name().to_owned(), descending: *descending })
            }
            None => None,
        };
        Ok((predicates, Page { skip: self.skip, limit: self.limit, order }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;
    use pretty_assertions::assert_eq;

    fn schema() -> NodeSchema {
        NodeSchema::builder("Person", "name")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::integer("age").optional())
            .field(FieldSpec::date("born").optional())
            .field(FieldSpec::string("first__name").optional())
            .build()
            .unwrap()
    }

    #[test]
    fn test_field_names_with_double_underscore() {
        let exact = Predicate::parse("first__name", &Value::from("Ada"), &schema()).unwrap();
        assert_eq!((exact.property.as_str(), exact.op), ("first__name", FilterOp::Exact));
        let starts = Predicate::parse("first__name__startswith", &Value::from("A"), &schema()).unwrap();
        assert_eq!((starts.property.as_str(), starts.op), ("first__name", FilterOp::StartsWith));
        let unknown = Predicate::parse("nick__name", &Value::from("A"), &schema());
        assert!(matches!(unknown, Err(Error::InvalidFilter { ref reason, .. }) if reason.contains("nick__name")));
    }

    #[test]
    fn test_parse_modifiers() {
        let p = Predicate::parse("age__gte", &Value::Int(40), &schema()).unwrap();
        assert_eq!(p.op, FilterOp::Gte);
        assert_eq!(p.property, "age");
        assert_eq!(p.to_cypher("n", "f0"), "n.age >= $f0");

        let bare = Predicate::parse("name", &Value::from("Ada"), &schema()).unwrap();
        assert_eq!(bare.op, FilterOp::Exact);
    }

    #[test]
    fn test_unknown_modifier_and_field() {
        let bad_mod = Predicate::parse("age__between", &Value::Int(1), &schema());
        assert!(matches!(bad_mod, Err(Error::InvalidFilter { .. })));
        let bad_field = Predicate::parse("height__gt", &Value::Int(1), &schema());
        assert!(matches!(bad_field, Err(Error::InvalidFilter { .. })));
    }

    #[test]
    fn test_gte_is_inclusive() {
        let p = Predicate::parse("age__gte", &Value::Int(40), &schema()).unwrap();
        assert!(p.matches(&crate::props! { "age" => 40 }));
        assert!(p.matches(&crate::props! { "age" => 41 }));
        assert!(!p.matches(&crate::props! { "age" => 39 }));
        assert!(!p.matches(&crate::props! { "name" => "no age" }));
    }

    #[test]
    fn test_case_insensitive_and_isnull() {
        let p = Predicate::parse("name__icontains", &Value::from("ADA"), &schema()).unwrap();
        assert!(p.matches(&crate::props! { "name" => "Lovelace, Ada" }));

        let missing = Predicate::parse("age__isnull", &Value::Bool(true), &schema()).unwrap();
        assert!(missing.matches(&crate::props! { "name" => "x" }));
        assert_eq!(missing.to_cypher("n", "f1"), "n.age IS NULL");
    }

    #[test]
    fn test_temporal_operand_coerced() {
        let p = Predicate::parse("born__lt", &Value::from("2000-01-01"), &schema()).unwrap();
        assert!(matches!(p.value, Value::Date(_)));
    }

    #[test]
    fn test_page_window() {
        let page = Page { skip: Some(1), limit: Some(2), order: None };
        assert_eq!(page.window(vec![1, 2, 3, 4]), vec![2, 3]);
    }
}
