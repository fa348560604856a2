//! Tabular ingestion: merge rows of loosely typed records as nodes or
//! relationships.
//!
//! Every record in a batch is validated and coerced before anything is
//! written, so a bad row rejects the whole batch.

use hashbrown::HashSet;
use serde_json::{Map, Value as Json};

use crate::coerce::{deserialize_entity, fields_from_properties, node_key, to_property_value};
use crate::model::{PropertyMap, Value};
use crate::reconcile::{RelationshipMergeRow, RelationshipTarget};
use crate::registry::Registry;
use crate::schema::{FieldSpec, NodeEntity, NodeSchema, RelationshipEntity};
use crate::session::Session;
use crate::{Error, Result};

/// One row keyed by field name.
pub type Record = Map<String, Json>;

/// Column names plus positional rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Json>>,
}

impl Table {
    pub fn new(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { columns: columns.into_iter().map(Into::into).collect(), rows: Vec::new() }
    }

    pub fn with_row(mut self, row: impl IntoIterator<Item = impl Into<Json>>) -> Self {
        self.rows.push(row.into_iter().map(Into::into).collect());
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as records. Missing trailing cells read as null.
    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.rows.iter().map(|row| {
            self.columns
                .iter()
                .enumerate()
                .map(|(i, c)| (c.clone(), row.get(i).cloned().unwrap_or(Json::Null)))
                .collect()
        })
    }
}

/// Where relationship record endpoints are looked up, when not at the
/// primary label and key of the relationship's declared endpoint types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointOverrides {
    pub source_label: Option<String>,
    pub source_property: Option<String>,
    pub target_label: Option<String>,
    pub target_property: Option<String>,
}

impl Session {
    /// Merge each record as a node of type `T`, in input order.
    pub fn merge_records<T: NodeEntity>(&self, records: &[Record]) -> Result<Vec<T>> {
        let schema = T::schema()?;
        let entities = records
            .iter()
            .map(|r| record_entity::<T>(r, &schema))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(entity = schema.entity(), count = entities.len(), "merge records");
        self.merge_nodes(&entities)
    }

    /// Merge a table as nodes of type `T`. With `deduplicate`, identical
    /// rows are merged once, keeping the first occurrence's position.
    pub fn merge_table<T: NodeEntity>(&self, table: &Table, deduplicate: bool) -> Result<Vec<T>> {
        let mut records: Vec<Record> = table.records().collect();
        if deduplicate {
            let mut seen = HashSet::new();
            let mut unique = Vec::with_capacity(records.len());
            for record in records {
                if seen.insert(serde_json::to_string(&record)?) {
                    unique.push(record);
                }
            }
            records = unique;
        }
        self.merge_records(&records)
    }

    /// Merge relationship records. Each record carries `source` and
    /// `target` key values plus the relationship's own fields. Returns the
    /// number of relationships merged.
    pub fn merge_relationship_records<R: RelationshipEntity>(
        &self,
        records: &[Record],
        endpoints: &EndpointOverrides,
    ) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let (target, rows) = relationship_rows::<R>(&self.shared_registry(), records, endpoints)?;
        tracing::debug!(rel_type = %target.rel_type, count = rows.len(), "merge relationship records");
        Ok(self.engine().merge_relationships(&target, &rows)?.len())
    }
}

// ============================================================================
// Record coercion
// ============================================================================

/// Primary key value of a record coerced as `T`.
pub(crate) fn node_record_key<T: NodeEntity>(record: &Record) -> Result<Value> {
    let schema = T::schema()?;
    let entity: T = record_entity(record, &schema)?;
    node_key(&entity, &schema, schema.primary_key())
}

pub(crate) fn merge_node_records<T: NodeEntity>(session: &Session, records: &[Record]) -> Result<usize> {
    Ok(session.merge_records::<T>(records)?.len())
}

pub(crate) fn check_relationship_record<R: RelationshipEntity>(
    registry: &Registry,
    record: &Record,
    endpoints: &EndpointOverrides,
) -> Result<()> {
    relationship_rows::<R>(registry, std::slice::from_ref(record), endpoints).map(drop)
}

/// Resolve the endpoint lookup and coerce every record into a merge row.
fn relationship_rows<R: RelationshipEntity>(
    registry: &Registry,
    records: &[Record],
    endpoints: &EndpointOverrides,
) -> Result<(RelationshipTarget, Vec<RelationshipMergeRow>)> {
    let schema = R::schema()?;
    let source_schema = <R::Source as NodeEntity>::schema()?;
    let target_schema = <R::Target as NodeEntity>::schema()?;
    let source_label = match &endpoints.source_label {
        Some(label) => label.clone(),
        None => source_schema.require_label()?.to_owned(),
    };
    let target_label = match &endpoints.target_label {
        Some(label) => label.clone(),
        None => target_schema.require_label()?.to_owned(),
    };
    let target = RelationshipTarget::of(&schema, &source_label, &target_label)?
        .with_endpoint_properties(endpoints.source_property.as_deref(), endpoints.target_property.as_deref())?;

    let source_field = endpoint_field(registry.node_schema(&source_label).unwrap_or(&source_schema), &target.source.property);
    let target_field = endpoint_field(registry.node_schema(&target_label).unwrap_or(&target_schema), &target.target.property);

    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let source_key = endpoint_key(record, "source", source_field)?;
        let target_key = endpoint_key(record, "target", target_field)?;
        let properties: R = record_fields(record, schema.relationship_type(), schema.fields())?;
        rows.push(RelationshipMergeRow::from_properties(source_key, target_key, &properties, &schema)?);
    }
    Ok((target, rows))
}

fn record_entity<T: NodeEntity>(record: &Record, schema: &NodeSchema) -> Result<T> {
    let fields: Vec<&FieldSpec> = schema.writable_fields().collect();
    record_fields(record, schema.entity(), fields)
}

/// Coerce each declared field out of the record, applying defaults, then
/// deserialize. Columns the entity does not declare are ignored.
fn record_fields<'a, T: serde::de::DeserializeOwned>(
    record: &Record,
    entity: &str,
    fields: impl IntoIterator<Item = &'a FieldSpec>,
) -> Result<T> {
    let fields: Vec<&FieldSpec> = fields.into_iter().collect();
    let mut properties = PropertyMap::new();
    for field in &fields {
        let raw = record
            .get(&field.name)
            .or_else(|| field.alias.as_ref().and_then(|a| record.get(a)))
            .unwrap_or(&Json::Null);
        let value = to_property_value(raw, field)?;
        if !value.is_null() {
            properties.insert(field.property_name().to_owned(), value);
        }
    }
    let json = fields_from_properties(&properties, fields.into_iter())?;
    deserialize_entity(entity, json)
}

pub(crate) fn endpoint_field<'a>(schema: &'a NodeSchema, property: &str) -> Option<&'a FieldSpec> {
    schema.field_by_property(property)
}

pub(crate) fn endpoint_key(record: &Record, column: &str, field: Option<&FieldSpec>) -> Result<Value> {
    let raw = record.get(column).unwrap_or(&Json::Null);
    if raw.is_null() {
        return Err(Error::TypeCoercion {
            field: column.to_owned(),
            expected: "an endpoint key".into(),
            got: "null".into(),
        });
    }
    match field {
        Some(field) => to_property_value(raw, field),
        None => Ok(Value::from_json(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_table_records() {
        let table = Table::new(["name", "age"]).with_row([json!("Ada"), json!(36)]).with_row([json!("Bob")]);
        let records: Vec<Record> = table.records().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["age"], json!(36));
        assert_eq!(records[1]["age"], Json::Null);
    }

    #[test]
    fn test_endpoint_key_rejects_null() {
        let record: Record = serde_json::from_value(json!({"source": null, "target": "b"})).unwrap();
        assert!(matches!(endpoint_key(&record, "source", None), Err(Error::TypeCoercion { .. })));
        assert_eq!(endpoint_key(&record, "target", None).unwrap(), Value::from("b"));
    }
}
