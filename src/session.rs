//! Session: one engine plus one registry, and the typed operation surface.
//!
//! A `Session` is owned by the caller and passed wherever graph work
//! happens. [`crate::connection`] keeps an optional process-wide default
//! for code that prefers not to thread one through.

use std::sync::Arc;

use crate::coerce::{edge_entity, node_entity, node_key};
use crate::config::EngineConfig;
use crate::engine::{self, EdgeRecord, GraphEngine, MemoryEngine};
use crate::filter::{Filters, MatchQuery, Page};
use crate::model::{Node, PropertyMap, Value};
use crate::reconcile::{edge_merge_row, node_create_row, node_merge_row, NodeTarget, RelationshipMergeRow, RelationshipTarget};
use crate::registry::Registry;
use crate::result::{rehydrate, QueryResult};
use crate::schema::{Edge, FieldSpec, NodeEntity, NodeSchema, RelationshipEntity};
use crate::{Error, Result};

pub struct Session {
    engine: Box<dyn GraphEngine>,
    registry: Arc<Registry>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("engine", &self.engine.kind()).finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(engine: Box<dyn GraphEngine>, registry: impl Into<Arc<Registry>>) -> Self {
        Self { engine, registry: registry.into() }
    }

    /// Open the configured engine and verify it answers.
    pub fn open(config: &EngineConfig, registry: impl Into<Arc<Registry>>) -> Result<Self> {
        let engine = engine::open(config)?;
        engine.verify_connection()?;
        tracing::info!(engine = %engine.kind(), "session opened");
        Ok(Self::new(engine, registry))
    }

    pub fn open_memory(registry: impl Into<Arc<Registry>>) -> Self {
        Self::new(Box::new(MemoryEngine::new()), registry)
    }

    pub fn engine(&self) -> &dyn GraphEngine {
        self.engine.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn shared_registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn close(&self) -> Result<()> {
        self.engine.close()
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Create a node; `EntityExists` if its primary key is already taken.
    pub fn create<T: NodeEntity>(&self, entity: &T) -> Result<T> {
        let mut out = self.create_nodes(std::slice::from_ref(entity))?;
        out.pop().ok_or_else(|| empty("create"))
    }

    pub fn create_nodes<T: NodeEntity>(&self, entities: &[T]) -> Result<Vec<T>> {
        let schema = T::schema()?;
        let target = NodeTarget::of(&schema)?;
        let rows = entities.iter().map(|e| node_create_row(e, &schema)).collect::<Result<Vec<_>>>()?;
        let nodes = self.engine.create_nodes(&target, &rows)?;
        typed_nodes(&nodes, &schema)
    }

    /// Upsert a node by primary key and return it as stored.
    pub fn merge<T: NodeEntity>(&self, entity: &T) -> Result<T> {
        let mut out = self.merge_nodes(std::slice::from_ref(entity))?;
        out.pop().ok_or_else(|| empty("merge"))
    }

    /// Upsert many nodes in one engine call, returned in input order.
    pub fn merge_nodes<T: NodeEntity>(&self, entities: &[T]) -> Result<Vec<T>> {
        let schema = T::schema()?;
        let target = NodeTarget::of(&schema)?;
        let rows = entities.iter().map(|e| node_merge_row(e, &schema)).collect::<Result<Vec<_>>>()?;
        tracing::debug!(label = %target.primary_label, count = rows.len(), "merge nodes");
        let nodes = self.engine.merge_nodes(&target, &rows)?;
        typed_nodes(&nodes, &schema)
    }

    /// Node with this primary key, if any.
    pub fn match_node<T: NodeEntity>(&self, key: impl Into<Value>) -> Result<Option<T>> {
        let schema = T::schema()?;
        let key = primary_key_value(&schema, key.into())?;
        self.engine
            .match_node(schema.require_label()?, schema.primary_key(), &key)?
            .map(|n| node_entity(&n, &schema))
            .transpose()
    }

    /// Like [`match_node`](Self::match_node) but absence is `EntityNotFound`.
    pub fn get<T: NodeEntity>(&self, key: impl Into<Value>) -> Result<T> {
        let key = key.into();
        let schema = T::schema()?;
        self.match_node::<T>(key.clone())?.ok_or_else(|| Error::EntityNotFound {
            label: schema.entity().to_owned(),
            key: schema.primary_key().to_owned(),
            value: key.to_string(),
        })
    }

    pub fn match_nodes<T: NodeEntity>(&self, query: &MatchQuery) -> Result<Vec<T>> {
        let schema = T::schema()?;
        let (predicates, page) = query.resolve(&schema)?;
        let nodes = self.engine.match_nodes(schema.require_label()?, &predicates, &page)?;
        typed_nodes(&nodes, &schema)
    }

    pub fn count<T: NodeEntity>(&self, filters: &Filters) -> Result<u64> {
        let schema = T::schema()?;
        let predicates = filters.parse(&schema)?;
        self.engine.count_nodes(schema.require_label()?, &predicates)
    }

    /// Detach-delete the node with this entity's primary key.
    /// Returns false if no such node existed.
    pub fn delete<T: NodeEntity>(&self, entity: &T) -> Result<bool> {
        let schema = T::schema()?;
        let key = node_key(entity, &schema, schema.primary_key())?;
        Ok(self.delete_keys::<T>(&[key])? > 0)
    }

    pub fn delete_keys<T: NodeEntity>(&self, keys: &[Value]) -> Result<u64> {
        let schema = T::schema()?;
        let keys = keys.iter().map(|k| primary_key_value(&schema, k.clone())).collect::<Result<Vec<_>>>()?;
        self.engine.delete_nodes(schema.require_label()?, schema.primary_key(), &keys)
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    /// Upsert one relationship; both endpoints must already exist.
    pub fn merge_relationship<R: RelationshipEntity>(&self, edge: &Edge<R>) -> Result<Edge<R>> {
        let mut out = self.merge_relationships(std::slice::from_ref(edge))?;
        out.pop().ok_or_else(|| empty("merge_relationship"))
    }

    pub fn merge_relationships<R: RelationshipEntity>(&self, edges: &[Edge<R>]) -> Result<Vec<Edge<R>>> {
        if edges.is_empty() {
            return Ok(Vec::new());
        }
        let schema = R::schema()?;
        let mut target = None;
        let mut rows = Vec::with_capacity(edges.len());
        for edge in edges {
            let (t, row) = edge_merge_row(edge, &schema)?;
            target.get_or_insert(t);
            rows.push(row);
        }
        let Some(target) = target else { return Ok(Vec::new()) };
        self.merge_relationship_rows::<R>(&target, &rows)
    }

    pub(crate) fn merge_relationship_rows<R: RelationshipEntity>(
        &self,
        target: &RelationshipTarget,
        rows: &[RelationshipMergeRow],
    ) -> Result<Vec<Edge<R>>> {
        tracing::debug!(rel_type = %target.rel_type, count = rows.len(), "merge relationships");
        let records = self.engine.merge_relationships(target, rows)?;
        typed_edges::<R>(&records)
    }

    /// Every relationship of type `R`, windowed by `page`.
    pub fn match_relationships<R: RelationshipEntity>(&self, page: &Page) -> Result<Vec<Edge<R>>> {
        let schema = R::schema()?;
        let records = self.engine.match_relationships(schema.relationship_type(), page)?;
        let accepted: Vec<EdgeRecord> = records
            .into_iter()
            .filter(|r| schema.accepts(&r.source.labels, &r.target.labels))
            .collect();
        typed_edges::<R>(&accepted)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Run query text and rehydrate the rows through the registry.
    pub fn evaluate_query(&self, statement: &str, params: PropertyMap) -> Result<QueryResult> {
        tracing::debug!(statement, "evaluate query");
        let raw = self.engine.execute(statement, params)?;
        rehydrate(raw, &self.registry)
    }

    /// First column of the first row; `EmptyResult` when there is no row.
    /// Without column names the alphabetically first key stands in.
    pub fn evaluate_query_single(&self, statement: &str, params: PropertyMap) -> Result<Value> {
        let raw = self.engine.execute(statement, params)?;
        let row = raw.rows.first().ok_or_else(|| Error::EmptyResult { statement: statement.to_owned() })?;
        let column = match raw.columns.first() {
            Some(column) => Some(column),
            None => row.values.keys().min(),
        };
        Ok(column.and_then(|c| row.value(c)).cloned().unwrap_or(Value::Null))
    }

    /// Like [`evaluate_query_single`](Self::evaluate_query_single), with a
    /// fallback instead of `EmptyResult`.
    pub fn evaluate_query_single_or(&self, statement: &str, params: PropertyMap, default: Value) -> Result<Value> {
        match self.evaluate_query_single(statement, params) {
            Err(Error::EmptyResult { .. }) => Ok(default),
            other => other,
        }
    }

    /// Query relative to one node: `$key` in `template` is bound to `key`.
    pub fn related(&self, key: impl Into<Value>, template: &str, mut params: PropertyMap) -> Result<QueryResult> {
        if !template.contains("$key") {
            return Err(Error::InvalidFilter {
                key: "key".into(),
                reason: "related-node templates must reference $key".into(),
            });
        }
        params.insert("key".into(), key.into());
        self.evaluate_query(template, params)
    }

    /// Typed nodes of type `N` found by a [`related`](Self::related) query.
    pub fn related_nodes<N: NodeEntity + Clone>(&self, key: impl Into<Value>, template: &str, params: PropertyMap) -> Result<Vec<N>> {
        Ok(self.related(key, template, params)?.nodes_of::<N>().into_iter().cloned().collect())
    }

    // ========================================================================
    // Constraints
    // ========================================================================

    /// Uniqueness constraint on `T`'s primary label and key.
    pub fn apply_constraint<T: NodeEntity>(&self) -> Result<()> {
        let schema = T::schema()?;
        self.apply_schema_constraint(&schema)
    }

    pub fn drop_constraint<T: NodeEntity>(&self) -> Result<()> {
        let schema = T::schema()?;
        self.engine.drop_constraint(schema.require_label()?, schema.primary_key())
    }

    /// Constrain every registered concrete node type.
    pub fn auto_constrain(&self) -> Result<()> {
        let registry = self.registry.clone();
        for label in registry.node_types() {
            if let Some(schema) = registry.node_schema(label) {
                self.apply_schema_constraint(schema)?;
            }
        }
        Ok(())
    }

    fn apply_schema_constraint(&self, schema: &NodeSchema) -> Result<()> {
        if !self.engine.capabilities().unique_constraints {
            tracing::debug!(engine = %self.engine.kind(), "engine has no uniqueness constraints; skipping");
            return Ok(());
        }
        let label = schema.require_label()?;
        tracing::debug!(label, key = schema.primary_key(), "apply uniqueness constraint");
        self.engine.apply_constraint(label, schema.primary_key())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn empty(operation: &str) -> Error {
    Error::EmptyResult { statement: operation.to_owned() }
}

fn typed_nodes<T: NodeEntity>(nodes: &[Node], schema: &NodeSchema) -> Result<Vec<T>> {
    nodes.iter().map(|n| node_entity(n, schema)).collect()
}

fn typed_edges<R: RelationshipEntity>(records: &[EdgeRecord]) -> Result<Vec<Edge<R>>> {
    let schema = R::schema()?;
    records
        .iter()
        .map(|r| edge_entity::<R>(&r.source, &r.relationship, &r.target, &schema))
        .collect()
}

/// Coerce a caller-supplied key through the primary field so that, for
/// example, an ISO string matches a stored date key.
fn primary_key_value(schema: &NodeSchema, key: Value) -> Result<Value> {
    let Some(field) = schema.primary_field() else { return Ok(key) };
    let scalar = FieldSpec::new(field.name.clone(), field.kind);
    match crate::coerce::to_property_value(&key.to_json(), &scalar) {
        Ok(v) if !v.is_null() => Ok(v),
        _ => Ok(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Team {
        slug: String,
        size: Option<i64>,
    }

    impl NodeEntity for Team {
        fn schema() -> Result<NodeSchema> {
            NodeSchema::builder("Team", "slug")
                .field(FieldSpec::string("slug"))
                .field(FieldSpec::integer("size").optional())
                .build()
        }
    }

    fn session() -> Session {
        Session::open_memory(Registry::builder().node::<Team>().unwrap().build())
    }

    #[test]
    fn test_get_and_delete_absent() {
        let s = session();
        assert!(matches!(s.get::<Team>("core"), Err(Error::EntityNotFound { .. })));
        let team = Team { slug: "core".into(), size: None };
        assert!(!s.delete(&team).unwrap());
        s.merge(&team).unwrap();
        assert!(s.delete(&team).unwrap());
    }

    #[test]
    fn test_query_text_runs_on_memory_engine() {
        let s = session();
        s.merge(&Team { slug: "core".into(), size: Some(4) }).unwrap();
        let size = s.evaluate_query_single("MATCH (t:Team {slug: $slug}) RETURN t.size", crate::props! { "slug" => "core" });
        assert_eq!(size.unwrap(), Value::Int(4));
        let missing = s.evaluate_query_single_or("MATCH (t:Team {slug: 'x'}) RETURN t", PropertyMap::new(), Value::Null);
        assert_eq!(missing.unwrap(), Value::Null);
        assert!(matches!(s.evaluate_query("CREATE (t:Team)", PropertyMap::new()), Err(Error::ReadOnlyQuery { .. })));
    }

    #[test]
    fn test_related_requires_key_placeholder() {
        let s = session();
        let err = s.related("core", "MATCH (n) RETURN n", PropertyMap::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter { .. }));
    }

    #[test]
    fn test_auto_constrain_registered_types() {
        let s = session();
        s.auto_constrain().unwrap();
        assert_eq!(s.engine().constraints().unwrap(), vec![("Team".to_string(), "slug".to_string())]);
        s.drop_constraint::<Team>().unwrap();
        assert!(s.engine().constraints().unwrap().is_empty());
    }
}
