//! Conversion between entity field values and stored property values.
//!
//! Entities reach this layer through serde as JSON trees. Write-side
//! conversion turns each declared field into a [`Value`] the backend can
//! store; read-side conversion validates stored values against the
//! declared kind and rebuilds the JSON tree serde deserializes from.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::model::{Node, PropertyMap, Relationship, Value};
use crate::schema::{Edge, FieldKind, FieldSpec, NodeSchema, RelationshipEntity, RelationshipSchema, ScalarKind};
use crate::{Error, Result};

// ============================================================================
// Write side
// ============================================================================

/// Convert one field value to a storable property. JSON null becomes
/// `Value::Null`, which callers omit from writes.
pub fn to_property_value(value: &Json, field: &FieldSpec) -> Result<Value> {
    if let Some(serializer) = &field.serializer {
        let out = serializer(value)?;
        if !out.is_null() && !out.is_property_value() {
            return Err(unsupported(&field.name, &out.to_json()));
        }
        return Ok(out);
    }
    if value.is_null() {
        return Ok(Value::Null);
    }
    if value.is_object() {
        return Err(unsupported(&field.name, value));
    }
    match field.kind {
        FieldKind::Scalar(kind) => {
            if value.is_array() {
                return Err(mismatch(&field.name, &field.kind.to_string(), value));
            }
            scalar_to_value(value, kind, &field.name)
        }
        FieldKind::List(kind) => {
            let items = value
                .as_array()
                .ok_or_else(|| mismatch(&field.name, &field.kind.to_string(), value))?;
            items
                .iter()
                .map(|item| {
                    if item.is_array() || item.is_object() {
                        return Err(unsupported(&field.name, value));
                    }
                    scalar_to_value(item, kind, &field.name)
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::List)
        }
        FieldKind::Inferred => {
            let out = Value::from_json(value);
            if out.is_property_value() { Ok(out) } else { Err(unsupported(&field.name, value)) }
        }
    }
}

fn scalar_to_value(value: &Json, kind: ScalarKind, field: &str) -> Result<Value> {
    let expected = kind.name();
    let out = match kind {
        ScalarKind::String => value.as_str().map(|s| Value::String(s.to_owned())),
        ScalarKind::Integer => value.as_i64().map(Value::Int),
        ScalarKind::Float => value.as_f64().map(Value::Float),
        ScalarKind::Boolean => value.as_bool().map(Value::Bool),
        ScalarKind::Date => value.as_str().and_then(parse_date).map(Value::Date),
        ScalarKind::Time => value.as_str().and_then(parse_time).map(Value::Time),
        ScalarKind::DateTime => value.as_str().and_then(parse_datetime).map(Value::DateTime),
        ScalarKind::LocalDateTime => value.as_str().and_then(parse_local_datetime).map(Value::LocalDateTime),
    };
    out.ok_or_else(|| mismatch(field, expected, value))
}

/// Serialize an entity and convert every writable field it declares.
/// Null values are left out.
pub(crate) fn entity_properties<'a, T: Serialize>(
    entity: &T,
    entity_name: &str,
    fields: impl Iterator<Item = &'a FieldSpec>,
) -> Result<Vec<(&'a FieldSpec, Value)>> {
    let json = entity_json(entity, entity_name)?;
    let mut out = Vec::new();
    for field in fields {
        let raw = json.get(&field.name).unwrap_or(&Json::Null);
        let value = to_property_value(raw, field)?;
        if !value.is_null() {
            out.push((field, value));
        }
    }
    Ok(out)
}

pub(crate) fn entity_json<T: Serialize>(entity: &T, entity_name: &str) -> Result<Map<String, Json>> {
    match serde_json::to_value(entity)? {
        Json::Object(map) => Ok(map),
        other => Err(Error::InvalidSchema {
            entity: entity_name.to_owned(),
            reason: format!("entities must serialize to a map of fields, got {other}"),
        }),
    }
}

/// Full property map of a node entity: every writable field, nulls omitted.
pub fn node_properties<T: Serialize>(entity: &T, schema: &NodeSchema) -> Result<PropertyMap> {
    Ok(entity_properties(entity, schema.entity(), schema.writable_fields())?
        .into_iter()
        .map(|(f, v)| (f.property_name().to_owned(), v))
        .collect())
}

/// Value of the node field stored under `property`, required non-null.
pub(crate) fn node_key<T: Serialize>(entity: &T, schema: &NodeSchema, property: &str) -> Result<Value> {
    let field = schema.field_by_property(property).ok_or_else(|| Error::InvalidSchema {
        entity: schema.entity().to_owned(),
        reason: format!("no field is stored as '{property}'"),
    })?;
    let json = entity_json(entity, schema.entity())?;
    let value = to_property_value(json.get(&field.name).unwrap_or(&Json::Null), field)?;
    if value.is_null() {
        return Err(Error::TypeCoercion {
            field: field.name.clone(),
            expected: field.kind.to_string(),
            got: "null (key properties cannot be null)".into(),
        });
    }
    Ok(value)
}

// ============================================================================
// Read side
// ============================================================================

/// Validate a stored value against the field's kind and convert it to JSON.
pub fn from_property_value(value: &Value, field: &FieldSpec) -> Result<Json> {
    if let Some(deserializer) = &field.deserializer {
        return deserializer(value);
    }
    if value.is_null() {
        return Ok(Json::Null);
    }
    match field.kind {
        FieldKind::Scalar(kind) => scalar_from_value(value, kind, &field.name),
        FieldKind::List(kind) => match value {
            Value::List(items) => items
                .iter()
                .map(|item| scalar_from_value(item, kind, &field.name))
                .collect::<Result<Vec<_>>>()
                .map(Json::Array),
            other => Err(read_mismatch(&field.name, &field.kind.to_string(), other)),
        },
        FieldKind::Inferred => Ok(value.to_json()),
    }
}

fn scalar_from_value(value: &Value, kind: ScalarKind, field: &str) -> Result<Json> {
    let ok = match (kind, value) {
        (ScalarKind::String, Value::String(_))
        | (ScalarKind::Boolean, Value::Bool(_))
        | (ScalarKind::Float, Value::Int(_) | Value::Float(_))
        | (ScalarKind::Date, Value::Date(_))
        | (ScalarKind::Time, Value::Time(_))
        | (ScalarKind::DateTime, Value::DateTime(_))
        | (ScalarKind::LocalDateTime, Value::LocalDateTime(_)) => true,
        (ScalarKind::Integer, Value::Int(_)) => true,
        (ScalarKind::Integer, Value::Float(f)) => f.fract() == 0.0,
        // Temporal values that travelled as ISO strings.
        (ScalarKind::Date, Value::String(s)) => parse_date(s).is_some(),
        (ScalarKind::Time, Value::String(s)) => parse_time(s).is_some(),
        (ScalarKind::DateTime, Value::String(s)) => parse_datetime(s).is_some(),
        (ScalarKind::LocalDateTime, Value::String(s)) => parse_local_datetime(s).is_some(),
        _ => false,
    };
    if !ok {
        return Err(read_mismatch(field, kind.name(), value));
    }
    Ok(match (kind, value) {
        (ScalarKind::Integer, Value::Float(f)) => Json::from(*f as i64),
        (ScalarKind::Float, Value::Int(i)) => Json::from(*i as f64),
        (ScalarKind::DateTime, Value::String(s)) => parse_datetime(s).map(|dt| Value::DateTime(dt).to_json()).unwrap_or(Json::Null),
        _ => value.to_json(),
    })
}

/// Rebuild the entity's JSON tree from stored properties: aliases mapped
/// back to field names, defaults injected for absent properties. Fields
/// with neither are left out so serde's own defaults apply.
pub(crate) fn fields_from_properties<'a>(
    properties: &PropertyMap,
    fields: impl Iterator<Item = &'a FieldSpec>,
) -> Result<Map<String, Json>> {
    let mut out = Map::new();
    for field in fields {
        let stored = properties.get(field.property_name()).filter(|v| !v.is_null());
        let value = match (stored, &field.default) {
            (Some(v), _) => from_property_value(v, field)?,
            (None, Some(default)) => from_property_value(default, field)?,
            (None, None) => continue,
        };
        out.insert(field.name.clone(), value);
    }
    Ok(out)
}

pub(crate) fn deserialize_entity<T: DeserializeOwned>(entity_name: &str, json: Map<String, Json>) -> Result<T> {
    serde_json::from_value(Json::Object(json)).map_err(|e| Error::TypeCoercion {
        field: entity_name.to_owned(),
        expected: "a record matching the declared fields".into(),
        got: e.to_string(),
    })
}

/// Rebuild a typed node from an engine node. The element id, when the
/// schema binds one, is injected into its field.
pub fn node_entity<T: DeserializeOwned>(node: &Node, schema: &NodeSchema) -> Result<T> {
    let mut json = fields_from_properties(&node.properties, schema.writable_fields())?;
    if let (Some(field), Some(eid)) = (schema.element_id_property(), &node.element_id) {
        json.insert(field.to_owned(), Json::String(eid.clone()));
    }
    deserialize_entity(schema.entity(), json)
}

/// Rebuild a typed relationship from an engine triple.
pub fn edge_entity<R: RelationshipEntity>(
    source: &Node,
    relationship: &Relationship,
    target: &Node,
    schema: &RelationshipSchema,
) -> Result<Edge<R>> {
    let source_schema = <R::Source as crate::NodeEntity>::schema()?;
    let target_schema = <R::Target as crate::NodeEntity>::schema()?;
    let json = fields_from_properties(&relationship.properties, schema.fields().iter())?;
    Ok(Edge {
        source: node_entity(source, &source_schema)?,
        target: node_entity(target, &target_schema)?,
        properties: deserialize_entity(schema.relationship_type(), json)?,
        element_id: relationship.element_id.clone(),
    })
}

// ============================================================================
// Temporal parsing
// ============================================================================

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

pub(crate) fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn parse_local_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

// ============================================================================
// Errors
// ============================================================================

fn unsupported(field: &str, value: &Json) -> Error {
    let found = match value {
        Json::Object(_) => "map values cannot be stored as properties".to_owned(),
        Json::Array(items) if items.iter().any(|i| i.is_array() || i.is_object()) => {
            "nested collections cannot be stored as properties".to_owned()
        }
        Json::Array(_) => "lists must hold a single scalar kind".to_owned(),
        other => format!("{other} is not a storable property"),
    };
    Error::UnsupportedType { field: field.to_owned(), found }
}

fn mismatch(field: &str, expected: &str, got: &Json) -> Error {
    Error::TypeCoercion { field: field.to_owned(), expected: expected.to_owned(), got: got.to_string() }
}

fn read_mismatch(field: &str, expected: &str, got: &Value) -> Error {
    Error::TypeCoercion {
        field: field.to_owned(),
        expected: expected.to_owned(),
        got: format!("{got} ({})", got.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_temporal_strings_become_typed_values() {
        let d = to_property_value(&json!("2024-03-01"), &FieldSpec::date("born")).unwrap();
        assert_eq!(d, Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));

        let dt = to_property_value(&json!("2024-03-01T10:00:00Z"), &FieldSpec::datetime("at")).unwrap();
        assert!(matches!(dt, Value::DateTime(_)));

        let back = from_property_value(&d, &FieldSpec::date("born")).unwrap();
        assert_eq!(back, json!("2024-03-01"));
    }

    #[test]
    fn test_maps_and_nested_lists_unsupported() {
        let map = to_property_value(&json!({"a": 1}), &FieldSpec::inferred("meta"));
        assert!(matches!(map, Err(Error::UnsupportedType { .. })));

        let nested = to_property_value(&json!([[1, 2], [3]]), &FieldSpec::inferred("grid"));
        assert!(matches!(nested, Err(Error::UnsupportedType { .. })));

        let mixed = to_property_value(&json!([1, "a"]), &FieldSpec::inferred("mixed"));
        assert!(matches!(mixed, Err(Error::UnsupportedType { .. })));
    }

    #[test]
    fn test_serializer_hook_makes_map_storable() {
        let field = FieldSpec::inferred("meta").serializer(|v| Ok(Value::String(v.to_string())));
        let out = to_property_value(&json!({"a": 1}), &field).unwrap();
        assert_eq!(out, Value::String("{\"a\":1}".into()));
    }

    #[test]
    fn test_read_side_kind_mismatch() {
        let err = from_property_value(&Value::String("forty".into()), &FieldSpec::integer("age")).unwrap_err();
        match err {
            Error::TypeCoercion { field, expected, .. } => {
                assert_eq!(field, "age");
                assert_eq!(expected, "INTEGER");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_defaults_and_aliases_on_read() {
        let fields = vec![
            FieldSpec::string("name"),
            FieldSpec::string("display").alias("displayName"),
            FieldSpec::integer("score").default_value(0),
        ];
        let props = crate::props! { "name" => "Ada", "displayName" => "Countess" };
        let json = fields_from_properties(&props, fields.iter()).unwrap();
        assert_eq!(json["display"], json!("Countess"));
        assert_eq!(json["score"], json!(0));
    }

    proptest! {
        #[test]
        fn prop_integer_lists_roundtrip(items in proptest::collection::vec(any::<i64>(), 0..16)) {
            let field = FieldSpec::list("nums", ScalarKind::Integer);
            let stored = to_property_value(&json!(items), &field).unwrap();
            prop_assert!(stored.is_property_value());
            prop_assert_eq!(from_property_value(&stored, &field).unwrap(), json!(items));
        }

        #[test]
        fn prop_strings_never_coerce_to_integer(s in "[a-z]{1,12}") {
            let res = to_property_value(&json!(s), &FieldSpec::integer("age"));
            prop_assert!(
                matches!(res, Err(Error::TypeCoercion { .. })),
                "expected a coercion error"
            );
        }
    }
}
