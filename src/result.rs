//! Query results: raw rows from an engine and their rehydrated, typed view.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::model::{Node, NodeId, Relationship, RelId, Value};
use crate::registry::Registry;
use crate::schema::{Edge, NodeEntity, NodeSchema, RelationshipEntity};
use crate::{Error, Result};

// ============================================================================
// Raw results
// ============================================================================

/// Rows exactly as an engine returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
}

/// A single row in the result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    pub values: HashMap<String, Value>,
}

impl ResultRow {
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Get a typed value from the row.
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T> {
        let val = self.values.get(key).ok_or_else(|| Error::TypeCoercion {
            field: key.to_owned(),
            expected: "a column in the result".into(),
            got: "nothing".into(),
        })?;
        T::from_value(val).map_err(|expected| Error::TypeCoercion {
            field: key.to_owned(),
            expected: expected.into(),
            got: val.type_name().into(),
        })
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Convert from Value to concrete types. The error names the expected kind.
pub trait FromValue: Sized {
    fn from_value(val: &Value) -> std::result::Result<Self, &'static str>;
}

impl FromValue for Value {
    fn from_value(val: &Value) -> std::result::Result<Self, &'static str> {
        Ok(val.clone())
    }
}

impl FromValue for Node {
    fn from_value(val: &Value) -> std::result::Result<Self, &'static str> {
        match val {
            Value::Node(n) => Ok(*n.clone()),
            _ => Err("NODE"),
        }
    }
}

impl FromValue for Relationship {
    fn from_value(val: &Value) -> std::result::Result<Self, &'static str> {
        match val {
            Value::Relationship(r) => Ok(*r.clone()),
            _ => Err("RELATIONSHIP"),
        }
    }
}

impl FromValue for String {
    fn from_value(val: &Value) -> std::result::Result<Self, &'static str> {
        val.as_str().map(str::to_owned).ok_or("STRING")
    }
}

impl FromValue for i64 {
    fn from_value(val: &Value) -> std::result::Result<Self, &'static str> {
        val.as_int().ok_or("INTEGER")
    }
}

impl FromValue for f64 {
    fn from_value(val: &Value) -> std::result::Result<Self, &'static str> {
        val.as_float().ok_or("FLOAT")
    }
}

impl FromValue for bool {
    fn from_value(val: &Value) -> std::result::Result<Self, &'static str> {
        val.as_bool().ok_or("BOOLEAN")
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(val: &Value) -> std::result::Result<Self, &'static str> {
        if val.is_null() { Ok(None) } else { T::from_value(val).map(Some) }
    }
}

// ============================================================================
// Typed views
// ============================================================================

/// A raw node together with the registered entity it rehydrated into.
#[derive(Debug, Clone)]
pub struct TypedNode {
    pub node: Node,
    pub schema: Arc<NodeSchema>,
    pub type_name: &'static str,
    entity: Arc<dyn Any + Send + Sync>,
}

impl TypedNode {
    pub(crate) fn new(node: Node, schema: Arc<NodeSchema>, type_name: &'static str, entity: Arc<dyn Any + Send + Sync>) -> Self {
        Self { node, schema, type_name, entity }
    }

    pub fn label(&self) -> &str {
        self.schema.primary_label().unwrap_or_default()
    }

    /// Stored value of the primary property.
    pub fn primary_value(&self) -> &Value {
        self.node.get(self.schema.primary_key()).unwrap_or(&Value::Null)
    }

    pub fn downcast_ref<T: NodeEntity>(&self) -> Option<&T> {
        self.entity.downcast_ref::<T>()
    }

    pub fn is<T: NodeEntity>(&self) -> bool {
        self.entity.is::<T>()
    }
}

/// A raw relationship with both typed endpoints and its rehydrated edge.
#[derive(Debug, Clone)]
pub struct TypedRelationship {
    pub relationship: Relationship,
    pub source: TypedNode,
    pub target: TypedNode,
    pub type_name: &'static str,
    entity: Arc<dyn Any + Send + Sync>,
}

impl TypedRelationship {
    pub(crate) fn new(
        relationship: Relationship,
        source: TypedNode,
        target: TypedNode,
        type_name: &'static str,
        entity: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self { relationship, source, target, type_name, entity }
    }

    pub fn rel_type(&self) -> &str {
        &self.relationship.rel_type
    }

    pub fn downcast_ref<R: RelationshipEntity>(&self) -> Option<&Edge<R>> {
        self.entity.downcast_ref::<Edge<R>>()
    }
}

/// One column value after rehydration.
#[derive(Debug, Clone)]
pub enum Hydrated {
    Node(TypedNode),
    Relationship(TypedRelationship),
    Path(Vec<TypedRelationship>),
    /// Scalars, unregistered entities, and anything else passed through.
    Raw(Value),
}

/// One row after rehydration, columns in result order.
#[derive(Debug, Clone, Default)]
pub struct TypedRow {
    pub values: Vec<(String, Hydrated)>,
}

impl TypedRow {
    pub fn get(&self, column: &str) -> Option<&Hydrated> {
        self.values.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn node(&self, column: &str) -> Option<&TypedNode> {
        match self.get(column)? {
            Hydrated::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn relationship(&self, column: &str) -> Option<&TypedRelationship> {
        match self.get(column)? {
            Hydrated::Relationship(r) => Some(r),
            _ => None,
        }
    }
}

// ============================================================================
// QueryResult
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub records_raw: Vec<ResultRow>,
    pub records: Vec<TypedRow>,
    /// Rehydrated nodes across all records, first occurrence kept.
    pub nodes: Vec<TypedNode>,
    pub relationships: Vec<TypedRelationship>,
    pub paths: Vec<Vec<TypedRelationship>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.records_raw.is_empty()
    }

    /// Rehydrated nodes of one type.
    pub fn nodes_of<T: NodeEntity>(&self) -> Vec<&T> {
        self.nodes.iter().filter_map(TypedNode::downcast_ref::<T>).collect()
    }

    pub fn relationships_of<R: RelationshipEntity>(&self) -> Vec<&Edge<R>> {
        self.relationships.iter().filter_map(TypedRelationship::downcast_ref::<R>).collect()
    }

    /// Node-link rendering of the rehydrated nodes and relationships.
    pub fn node_link_data(&self) -> NodeLinkData {
        let mut data = NodeLinkData::default();
        for n in &self.nodes {
            let entry = NodeLinkNode {
                id: n.primary_value().to_json(),
                label: n.label().to_owned(),
                name: display_key(n.primary_value()),
            };
            if !data.nodes.contains(&entry) {
                data.nodes.push(entry);
            }
        }
        for r in &self.relationships {
            let link = NodeLinkEdge {
                source: r.source.primary_value().to_json(),
                target: r.target.primary_value().to_json(),
                rel_type: r.rel_type().to_owned(),
            };
            if !data.links.contains(&link) {
                data.links.push(link);
            }
        }
        data
    }
}

fn display_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeLinkData {
    pub nodes: Vec<NodeLinkNode>,
    pub links: Vec<NodeLinkEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeLinkNode {
    pub id: serde_json::Value,
    pub label: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeLinkEdge {
    pub source: serde_json::Value,
    pub target: serde_json::Value,
    pub rel_type: String,
}

// ============================================================================
// Rehydration
// ============================================================================

/// Turn raw rows into typed records using the registry.
///
/// Nodes with no registered type, and relationships whose type is not
/// registered or whose endpoints are not both present in the result, pass
/// through as [`Hydrated::Raw`]. A registered type that fails to
/// deserialize is an error.
pub fn rehydrate(raw: RawResult, registry: &Registry) -> Result<QueryResult> {
    let mut index: HashMap<NodeId, Node> = HashMap::new();
    for row in &raw.rows {
        for value in row.values.values() {
            collect_nodes(value, &mut index);
        }
    }

    let columns = if raw.columns.is_empty() {
        let mut cols: Vec<String> = raw.rows.first().map(|r| r.values.keys().cloned().collect()).unwrap_or_default();
        cols.sort();
        cols
    } else {
        raw.columns.clone()
    };

    let mut hydrator = Hydrator { registry, index: &index, nodes: HashMap::new() };
    let mut result = QueryResult { columns: columns.clone(), ..Default::default() };
    let mut seen_nodes: Vec<(String, Value)> = Vec::new();
    let mut seen_rels: Vec<RelId> = Vec::new();

    for row in &raw.rows {
        let mut typed = TypedRow::default();
        for column in &columns {
            let Some(value) = row.values.get(column) else { continue };
            let hydrated = hydrator.hydrate(value)?;
            match &hydrated {
                Hydrated::Node(n) => {
                    let key = (n.label().to_owned(), n.primary_value().clone());
                    if !seen_nodes.contains(&key) {
                        seen_nodes.push(key);
                        result.nodes.push(n.clone());
                    }
                }
                Hydrated::Relationship(r) => {
                    if !seen_rels.contains(&r.relationship.id) {
                        seen_rels.push(r.relationship.id);
                        result.relationships.push(r.clone());
                    }
                }
                Hydrated::Path(p) => result.paths.push(p.clone()),
                Hydrated::Raw(_) => {}
            }
            typed.values.push((column.clone(), hydrated));
        }
        result.records.push(typed);
    }
    result.records_raw = raw.rows;
    Ok(result)
}

fn collect_nodes(value: &Value, index: &mut HashMap<NodeId, Node>) {
    match value {
        Value::Node(n) => {
            index.entry(n.id).or_insert_with(|| (**n).clone());
        }
        Value::Path(p) => {
            for n in &p.nodes {
                index.entry(n.id).or_insert_with(|| n.clone());
            }
        }
        Value::List(items) => items.iter().for_each(|v| collect_nodes(v, index)),
        _ => {}
    }
}

struct Hydrator<'a> {
    registry: &'a Registry,
    index: &'a HashMap<NodeId, Node>,
    nodes: HashMap<NodeId, Option<TypedNode>>,
}

impl Hydrator<'_> {
    fn node(&mut self, node: &Node) -> Result<Option<TypedNode>> {
        if let Some(cached) = self.nodes.get(&node.id) {
            return Ok(cached.clone());
        }
        let typed = self.registry.hydrate_node(node)?;
        if typed.is_none() {
            tracing::warn!(labels = ?node.labels, "no registered type for node; passing through raw");
        }
        self.nodes.insert(node.id, typed.clone());
        Ok(typed)
    }

    fn relationship(&mut self, rel: &Relationship) -> Result<Option<TypedRelationship>> {
        let (Some(source), Some(target)) = (self.index.get(&rel.src), self.index.get(&rel.dst)) else {
            tracing::warn!(rel_type = %rel.rel_type, "relationship endpoints not in result; passing through raw");
            return Ok(None);
        };
        // Endpoints must hydrate before the relationship can.
        if self.node(source)?.is_none() || self.node(target)?.is_none() {
            return Ok(None);
        }
        let typed = self.registry.hydrate_relationship(source, rel, target)?;
        if typed.is_none() {
            tracing::warn!(rel_type = %rel.rel_type, "no registered type for relationship; passing through raw");
        }
        Ok(typed)
    }

    fn hydrate(&mut self, value: &Value) -> Result<Hydrated> {
        Ok(match value {
            Value::Node(n) => match self.node(n)? {
                Some(typed) => Hydrated::Node(typed),
                None => Hydrated::Raw(value.clone()),
            },
            Value::Relationship(r) => match self.relationship(r)? {
                Some(typed) => Hydrated::Relationship(typed),
                None => Hydrated::Raw(value.clone()),
            },
            Value::Path(p) => {
                let mut typed = Vec::with_capacity(p.relationships.len());
                for rel in &p.relationships {
                    match self.relationship(rel)? {
                        Some(t) => typed.push(t),
                        None => return Ok(Hydrated::Raw(value.clone())),
                    }
                }
                Hydrated::Path(typed)
            }
            other => Hydrated::Raw(other.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_get_typed() {
        let row = ResultRow::new(HashMap::from([
            ("count".to_owned(), Value::Int(3)),
            ("name".to_owned(), Value::from("ada")),
        ]));
        assert_eq!(row.get::<i64>("count").unwrap(), 3);
        assert_eq!(row.get::<String>("name").unwrap(), "ada");
        assert!(matches!(row.get::<i64>("name"), Err(Error::TypeCoercion { .. })));
        assert!(row.get::<i64>("missing").is_err());
    }

    #[test]
    fn test_unregistered_values_pass_through() {
        let node = Node::new(NodeId(1)).with_labels(["Ghost"]);
        let raw = RawResult {
            columns: vec!["n".into(), "x".into()],
            rows: vec![ResultRow::new(HashMap::from([
                ("n".to_owned(), Value::Node(Box::new(node))),
                ("x".to_owned(), Value::Int(1)),
            ]))],
        };
        let result = rehydrate(raw, &Registry::empty()).unwrap();
        assert_eq!(result.records_raw.len(), 1);
        assert!(result.nodes.is_empty());
        assert!(matches!(result.records[0].get("n"), Some(Hydrated::Raw(Value::Node(_)))));
        assert_eq!(result.node_link_data(), NodeLinkData::default());
    }
}
