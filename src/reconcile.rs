//! Write plans: partition an entity's fields into merge buckets.
//!
//! A merge locates an entity by its identity (primary property for nodes,
//! endpoints plus merge-on fields for relationships) and then applies
//! three property buckets: set on create, set on match, always set.
//! Absent (null) values never appear in any bucket.

use serde::Serialize;

use crate::coerce::{entity_properties, node_key};
use crate::cypher::is_identifier;
use crate::model::{PropertyMap, Value};
use crate::schema::{Edge, FieldSpec, NodeEntity, NodeSchema, RelationshipEntity, RelationshipSchema};
use crate::{Error, Result};

// ============================================================================
// Node plans
// ============================================================================

/// Where node rows land: all labels, and the primary label/key pair that
/// identifies a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTarget {
    pub primary_label: String,
    pub labels: Vec<String>,
    pub key: String,
}

impl NodeTarget {
    pub fn of(schema: &NodeSchema) -> Result<Self> {
        Ok(Self {
            primary_label: schema.require_label()?.to_owned(),
            labels: schema.all_labels().into_iter().map(str::to_owned).collect(),
            key: schema.primary_key().to_owned(),
        })
    }
}

/// Plain create: identity plus every present non-key property.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCreateRow {
    pub key: Value,
    pub properties: PropertyMap,
}

/// Merge: identity plus the three buckets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeMergeRow {
    pub key: Value,
    pub always_set: PropertyMap,
    pub set_on_create: PropertyMap,
    pub set_on_match: PropertyMap,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Buckets {
    always_set: PropertyMap,
    set_on_create: PropertyMap,
    set_on_match: PropertyMap,
    merge_on: PropertyMap,
}

fn partition(values: Vec<(&FieldSpec, Value)>, skip: &str) -> Buckets {
    let mut buckets = Buckets::default();
    for (field, value) in values {
        let name = field.property_name();
        if name == skip {
            continue;
        }
        let bucket = if field.policy.merge_on {
            &mut buckets.merge_on
        } else if field.policy.set_on_create {
            &mut buckets.set_on_create
        } else if field.policy.set_on_match {
            &mut buckets.set_on_match
        } else {
            &mut buckets.always_set
        };
        bucket.insert(name.to_owned(), value);
    }
    buckets
}

pub fn node_merge_row<T: NodeEntity>(entity: &T, schema: &NodeSchema) -> Result<NodeMergeRow> {
    let key = node_key(entity, schema, schema.primary_key())?;
    let values = entity_properties(entity, schema.entity(), schema.writable_fields())?;
    let b = partition(values, schema.primary_key());
    Ok(NodeMergeRow {
        key,
        always_set: b.always_set,
        set_on_create: b.set_on_create,
        set_on_match: b.set_on_match,
    })
}

/// Create rows carry always-set and set-on-create properties; set-on-match
/// fields have no meaning for a plain create.
pub fn node_create_row<T: NodeEntity>(entity: &T, schema: &NodeSchema) -> Result<NodeCreateRow> {
    let row = node_merge_row(entity, schema)?;
    let mut properties = row.always_set;
    properties.extend(row.set_on_create);
    Ok(NodeCreateRow { key: row.key, properties })
}

impl NodeMergeRow {
    pub fn to_param(&self) -> Value {
        Value::Map(PropertyMap::from([
            ("key".to_owned(), self.key.clone()),
            ("always_set".to_owned(), Value::Map(self.always_set.clone())),
            ("set_on_create".to_owned(), Value::Map(self.set_on_create.clone())),
            ("set_on_match".to_owned(), Value::Map(self.set_on_match.clone())),
        ]))
    }
}

impl NodeCreateRow {
    pub fn to_param(&self) -> Value {
        Value::Map(PropertyMap::from([
            ("key".to_owned(), self.key.clone()),
            ("properties".to_owned(), Value::Map(self.properties.clone())),
        ]))
    }
}

// ============================================================================
// Relationship plans
// ============================================================================

/// How to find one endpoint: a label and the property its key is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub label: String,
    pub property: String,
}

/// Where relationship rows land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipTarget {
    pub rel_type: String,
    pub source: Endpoint,
    pub target: Endpoint,
    /// Stored names of the merge-on properties, in declaration order.
    pub merge_on: Vec<String>,
}

impl RelationshipTarget {
    /// Endpoints from the relationship schema; a label here must be one of
    /// the declared source/target labels.
    pub fn of(schema: &RelationshipSchema, source_label: &str, target_label: &str) -> Result<Self> {
        let check = |label: &str, allowed: &[String], end: &str| {
            if allowed.iter().any(|l| l == label) {
                Ok(())
            } else {
                Err(Error::InvalidSchema {
                    entity: schema.relationship_type().to_owned(),
                    reason: format!("{end} label '{label}' is not one of {allowed:?}"),
                })
            }
        };
        check(source_label, schema.source_labels(), "source")?;
        check(target_label, schema.target_labels(), "target")?;
        Ok(Self {
            rel_type: schema.relationship_type().to_owned(),
            source: Endpoint { label: source_label.to_owned(), property: schema.source_property().to_owned() },
            target: Endpoint { label: target_label.to_owned(), property: schema.target_property().to_owned() },
            merge_on: schema.merge_on_fields().map(|f| f.property_name().to_owned()).collect(),
        })
    }

    /// Look endpoints up by other properties. Both names end up in
    /// statement text, so each must be an identifier.
    pub fn with_endpoint_properties(mut self, source: Option<&str>, target: Option<&str>) -> Result<Self> {
        for (endpoint, property) in [(&mut self.source, source), (&mut self.target, target)] {
            let Some(property) = property else { continue };
            if !is_identifier(property) {
                return Err(Error::InvalidSchema {
                    entity: self.rel_type.clone(),
                    reason: format!("endpoint property '{property}' is not an identifier"),
                });
            }
            endpoint.property = property.to_owned();
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipMergeRow {
    pub source_key: Value,
    pub target_key: Value,
    pub merge_on: PropertyMap,
    pub always_set: PropertyMap,
    pub set_on_create: PropertyMap,
    pub set_on_match: PropertyMap,
}

impl RelationshipMergeRow {
    /// Row from already-coerced endpoint keys and a relationship entity.
    pub fn from_properties<R: Serialize>(
        source_key: Value,
        target_key: Value,
        properties: &R,
        schema: &RelationshipSchema,
    ) -> Result<Self> {
        let values = entity_properties(properties, schema.relationship_type(), schema.fields().iter())?;
        let b = partition(values, "");
        if let Some(missing) = schema.merge_on_fields().find(|f| !b.merge_on.contains_key(f.property_name())) {
            return Err(Error::TypeCoercion {
                field: missing.name.clone(),
                expected: missing.kind.to_string(),
                got: "null (merge_on properties cannot be null)".into(),
            });
        }
        Ok(Self {
            source_key,
            target_key,
            merge_on: b.merge_on,
            always_set: b.always_set,
            set_on_create: b.set_on_create,
            set_on_match: b.set_on_match,
        })
    }

    pub fn to_param(&self) -> Value {
        Value::Map(PropertyMap::from([
            ("source_key".to_owned(), self.source_key.clone()),
            ("target_key".to_owned(), self.target_key.clone()),
            ("merge_on".to_owned(), Value::Map(self.merge_on.clone())),
            ("always_set".to_owned(), Value::Map(self.always_set.clone())),
            ("set_on_create".to_owned(), Value::Map(self.set_on_create.clone())),
            ("set_on_match".to_owned(), Value::Map(self.set_on_match.clone())),
        ]))
    }
}

/// Plan for a typed edge: endpoint labels come from the endpoint types.
pub fn edge_merge_row<R: RelationshipEntity>(
    edge: &Edge<R>,
    schema: &RelationshipSchema,
) -> Result<(RelationshipTarget, RelationshipMergeRow)> {
    let source_schema = <R::Source as NodeEntity>::schema()?;
    let target_schema = <R::Target as NodeEntity>::schema()?;
    let target = RelationshipTarget::of(schema, source_schema.require_label()?, target_schema.require_label()?)?;
    let source_key = node_key(&edge.source, &source_schema, &target.source.property)?;
    let target_key = node_key(&edge.target, &target_schema, &target.target.property)?;
    let row = RelationshipMergeRow::from_properties(source_key, target_key, &edge.properties, schema)?;
    Ok((target, row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Visitor {
        name: String,
        first_seen: Option<String>,
        last_seen: Option<String>,
        visits: Option<i64>,
    }

    impl NodeEntity for Visitor {
        fn schema() -> Result<NodeSchema> {
            NodeSchema::builder("Visitor", "name")
                .field(FieldSpec::string("name"))
                .field(FieldSpec::string("first_seen").optional().set_on_create())
                .field(FieldSpec::string("last_seen").optional().set_on_match())
                .field(FieldSpec::integer("visits").optional())
                .build()
        }
    }

    #[test]
    fn test_node_buckets() {
        let v = Visitor {
            name: "ada".into(),
            first_seen: Some("mon".into()),
            last_seen: Some("tue".into()),
            visits: None,
        };
        let row = node_merge_row(&v, &Visitor::schema().unwrap()).unwrap();
        assert_eq!(row.key, Value::from("ada"));
        assert_eq!(row.set_on_create, crate::props! { "first_seen" => "mon" });
        assert_eq!(row.set_on_match, crate::props! { "last_seen" => "tue" });
        // Key never appears in a SET bucket; absent values are omitted.
        assert!(row.always_set.is_empty());
    }

    #[test]
    fn test_create_row_drops_match_only() {
        let v = Visitor { name: "ada".into(), first_seen: Some("mon".into()), last_seen: Some("tue".into()), visits: Some(2) };
        let row = node_create_row(&v, &Visitor::schema().unwrap()).unwrap();
        assert_eq!(row.properties, crate::props! { "first_seen" => "mon", "visits" => 2 });
    }

    #[test]
    fn test_relationship_target_rejects_foreign_label() {
        let schema = RelationshipSchema::builder("KNOWS")
            .source(["Person"], "name")
            .target(["Person"], "name")
            .build()
            .unwrap();
        assert!(RelationshipTarget::of(&schema, "Person", "Person").is_ok());
        assert!(matches!(RelationshipTarget::of(&schema, "Team", "Person"), Err(Error::InvalidSchema { .. })));
    }

    #[test]
    fn test_endpoint_property_must_be_identifier() {
        let schema = RelationshipSchema::builder("KNOWS")
            .source(["Person"], "name")
            .target(["Person"], "name")
            .build()
            .unwrap();
        let target = RelationshipTarget::of(&schema, "Person", "Person").unwrap();
        let moved = target.clone().with_endpoint_properties(Some("email"), None).unwrap();
        assert_eq!(moved.source.property, "email");
        assert_eq!(moved.target.property, "name");
        let injected = target.with_endpoint_properties(None, Some("name = row.source_key DETACH DELETE source //"));
        assert!(matches!(injected, Err(Error::InvalidSchema { .. })));
    }
}
