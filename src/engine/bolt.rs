//! Bolt engine: Neo4j or Memgraph through the `neo4rs` driver.
//!
//! The engine owns a current-thread tokio runtime and drives the async
//! driver with `block_on`, so every [`GraphEngine`] call is blocking.
//! Calling it from inside another tokio runtime panics; wrap it in
//! `spawn_blocking` there.
//!
//! Each call sends a single auto-commit statement, so a batch is
//! all-or-nothing on the server.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use neo4rs::{
    BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph,
    Query,
};
use tokio::runtime::{Builder, Runtime};

use super::{EngineKind, GraphEngine};
use crate::config::BoltConfig;
use crate::cypher::Dialect;
use crate::model::{Node, NodeId, Path, PropertyMap, RelId, Relationship, Value};
use crate::result::{RawResult, ResultRow};
use crate::{Error, Result};

pub struct BoltEngine {
    kind: EngineKind,
    runtime: Runtime,
    graph: Graph,
}

impl std::fmt::Debug for BoltEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltEngine").field("kind", &self.kind).finish_non_exhaustive()
    }
}

impl BoltEngine {
    /// Build the connection pool and ping the server.
    pub fn connect(config: &BoltConfig, kind: EngineKind) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::EngineConnection(format!("cannot start runtime: {e}")))?;

        let mut builder = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.username)
            .password(&config.password);
        if let Some(db) = &config.database {
            builder = builder.db(db.as_str());
        }
        let driver_config = builder.build().map_err(connection_error)?;
        let graph = runtime.block_on(Graph::connect(driver_config)).map_err(connection_error)?;

        let engine = Self { kind, runtime, graph };
        engine.verify_connection()?;
        tracing::info!(engine = %kind, uri = %config.uri, "connected");
        Ok(engine)
    }
}

impl GraphEngine for BoltEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn dialect(&self) -> Dialect {
        match self.kind {
            EngineKind::Memgraph => Dialect::Memgraph,
            _ => Dialect::Neo4j,
        }
    }

    fn verify_connection(&self) -> Result<()> {
        self.execute("RETURN 1 AS ok", PropertyMap::new()).map(|_| ())
    }

    fn execute(&self, statement: &str, params: PropertyMap) -> Result<RawResult> {
        let mut query = Query::new(statement.to_owned());
        for (key, value) in params {
            query = query.param(&key, to_bolt(&value));
        }
        self.runtime.block_on(async {
            let mut stream = self.graph.execute(query).await.map_err(driver_error)?;
            let mut rows = Vec::new();
            let mut columns: Vec<String> = Vec::new();
            while let Some(row) = stream.next().await.map_err(driver_error)? {
                if columns.is_empty() {
                    columns = row.keys().iter().map(|k| k.value.clone()).collect();
                }
                let mut values = HashMap::with_capacity(columns.len());
                for column in &columns {
                    let bolt: BoltType = row.get(column).map_err(|e| Error::TypeCoercion {
                        field: column.clone(),
                        expected: "a Bolt value".into(),
                        got: e.to_string(),
                    })?;
                    values.insert(column.clone(), from_bolt(&bolt));
                }
                rows.push(ResultRow::new(values));
            }
            Ok(RawResult { columns, rows })
        })
    }
}

fn connection_error(e: neo4rs::Error) -> Error {
    Error::EngineConnection(e.to_string())
}

fn driver_error(e: neo4rs::Error) -> Error {
    let message = e.to_string();
    constraint_violation(&message).unwrap_or(Error::EngineConnection(message))
}

/// `EntityExists` from a uniqueness failure, naming the label, property and
/// value when the server message carries them.
///
/// Neo4j: ``Node(7) already exists with label `Person` and property `name` = 'Ada'``
/// Memgraph: `Unable to commit due to unique constraint violation on :Person(name)`
fn constraint_violation(message: &str) -> Option<Error> {
    if let Some((_, rest)) = message.split_once("already exists with label `") {
        let (label, rest) = rest.split_once('`')?;
        let (_, rest) = rest.split_once("property `")?;
        let (key, rest) = rest.split_once('`')?;
        let value = rest.trim_start().trim_start_matches('=').trim();
        let value = value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')).unwrap_or(value);
        return Some(Error::EntityExists { label: label.into(), key: key.into(), value: value.into() });
    }
    if let Some((_, rest)) = message.split_once("unique constraint violation on :") {
        let (label, rest) = rest.split_once('(')?;
        let (key, _) = rest.split_once(')')?;
        return Some(Error::EntityExists { label: label.into(), key: key.into(), value: message.into() });
    }
    if message.contains("ConstraintValidationFailed") {
        return Some(Error::EntityExists { label: String::new(), key: String::new(), value: message.into() });
    }
    None
}

// ============================================================================
// Value <-> BoltType
// ============================================================================

fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::Boolean(BoltBoolean::new(*b)),
        Value::Int(i) => BoltType::Integer(BoltInteger::new(*i)),
        Value::Float(f) => BoltType::Float(BoltFloat::new(*f)),
        Value::String(s) => BoltType::String(BoltString::new(s)),
        Value::List(items) => BoltType::List(BoltList { value: items.iter().map(to_bolt).collect() }),
        Value::Map(map) => BoltType::Map(BoltMap {
            value: map.iter().map(|(k, v)| (BoltString::new(k), to_bolt(v))).collect(),
        }),
        Value::Date(d) => BoltType::from(*d),
        Value::Time(t) => BoltType::from(*t),
        Value::DateTime(dt) => BoltType::from(dt.fixed_offset()),
        Value::LocalDateTime(dt) => BoltType::from(*dt),
        // Graph values are never sent as parameters.
        other => BoltType::String(BoltString::new(&other.to_string())),
    }
}

fn from_bolt(bolt: &BoltType) -> Value {
    match bolt {
        BoltType::Null(_) => Value::Null,
        BoltType::Boolean(b) => Value::Bool(b.value),
        BoltType::Integer(i) => Value::Int(i.value),
        BoltType::Float(f) => Value::Float(f.value),
        BoltType::String(s) => Value::String(s.value.clone()),
        BoltType::List(l) => Value::List(l.value.iter().map(from_bolt).collect()),
        BoltType::Map(m) => Value::Map(map_properties(m)),
        BoltType::Node(n) => Value::Node(Box::new(Node {
            id: NodeId(n.id.value as u64),
            element_id: None,
            labels: n.labels.value.iter().filter_map(|l| match l {
                BoltType::String(s) => Some(s.value.clone()),
                _ => None,
            }).collect(),
            properties: map_properties(&n.properties),
        })),
        BoltType::Relation(r) => Value::Relationship(Box::new(Relationship {
            id: RelId(r.id.value as u64),
            element_id: None,
            src: NodeId(r.start_node_id.value as u64),
            dst: NodeId(r.end_node_id.value as u64),
            rel_type: r.typ.value.clone(),
            properties: map_properties(&r.properties),
        })),
        BoltType::Path(p) => {
            let nodes: Vec<Node> = p.nodes.value.iter().filter_map(|n| match from_bolt(n) {
                Value::Node(n) => Some(*n),
                _ => None,
            }).collect();
            let relationships = path_relationships(p, &nodes);
            Value::Path(Box::new(Path { nodes, relationships }))
        }
        BoltType::Date(d) => {
            let date: std::result::Result<NaiveDate, _> = d.try_into();
            date.map(Value::Date).unwrap_or(Value::Null)
        }
        BoltType::LocalTime(t) => {
            let time: std::result::Result<NaiveTime, _> = t.try_into();
            time.map(Value::Time).unwrap_or(Value::Null)
        }
        BoltType::Time(t) => {
            let time: std::result::Result<(NaiveTime, FixedOffset), _> = t.try_into();
            time.map(|(t, _)| Value::Time(t)).unwrap_or(Value::Null)
        }
        BoltType::DateTime(dt) => {
            let dt: std::result::Result<DateTime<FixedOffset>, _> = dt.try_into();
            dt.map(|dt| Value::DateTime(dt.with_timezone(&Utc))).unwrap_or(Value::Null)
        }
        BoltType::LocalDateTime(dt) => {
            let dt: std::result::Result<NaiveDateTime, _> = dt.try_into();
            dt.map(Value::LocalDateTime).unwrap_or(Value::Null)
        }
        other => {
            tracing::warn!(value = ?other, "unsupported Bolt value; returned as null");
            Value::Null
        }
    }
}

fn map_properties(map: &BoltMap) -> PropertyMap {
    map.value.iter().map(|(k, v)| (k.value.clone(), from_bolt(v))).collect()
}

/// Bolt paths carry unbound relationships plus an index sequence
/// (rel index, node index) pairs; rebuild directed relationships from it.
fn path_relationships(path: &neo4rs::BoltPath, nodes: &[Node]) -> Vec<Relationship> {
    let indices: Vec<i64> = path.indices.value.iter().filter_map(|i| match i {
        BoltType::Integer(i) => Some(i.value),
        _ => None,
    }).collect();
    let mut out = Vec::new();
    let mut prev = 0usize;
    for pair in indices.chunks(2) {
        let [rel_index, node_index] = pair else { break };
        let Some(rel) = (rel_index.unsigned_abs() as usize).checked_sub(1).and_then(|i| path.rels.value.get(i)) else { break };
        let BoltType::UnboundedRelation(rel) = rel else { continue };
        let next = *node_index as usize;
        let (Some(a), Some(b)) = (nodes.get(prev), nodes.get(next)) else { break };
        let (src, dst) = if *rel_index > 0 { (a.id, b.id) } else { (b.id, a.id) };
        out.push(Relationship {
            id: RelId(rel.id.value as u64),
            element_id: None,
            src,
            dst,
            rel_type: rel.typ.value.clone(),
            properties: map_properties(&rel.properties),
        });
        prev = next;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neo4j_constraint_message() {
        let msg = "Neo.ClientError.Schema.ConstraintValidationFailed: Node(7) already exists with label `Person` and property `name` = 'Ada'";
        match constraint_violation(msg) {
            Some(Error::EntityExists { label, key, value }) => {
                assert_eq!((label.as_str(), key.as_str(), value.as_str()), ("Person", "name", "Ada"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_memgraph_constraint_message() {
        let msg = "Unable to commit due to unique constraint violation on :Team(slug)";
        match constraint_violation(msg) {
            Some(Error::EntityExists { label, key, value }) => {
                assert_eq!((label.as_str(), key.as_str()), ("Team", "slug"));
                assert_eq!(value, msg);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_other_failures_are_not_violations() {
        assert!(constraint_violation("connection reset by peer").is_none());
        let bare = constraint_violation("Neo.ClientError.Schema.ConstraintValidationFailed");
        assert!(matches!(bare, Some(Error::EntityExists { ref value, .. }) if value.contains("ConstraintValidationFailed")));
    }
}
