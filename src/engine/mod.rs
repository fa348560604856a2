//! # Graph Engine Trait
//!
//! This is THE contract between the mapping layer and any graph backend.
//! Every structured operation a session performs is defined here.
//!
//! The structured operations have default implementations that generate
//! Cypher ([`crate::cypher::statements`]) and run it through
//! [`GraphEngine::execute`]. A Cypher-speaking engine only implements
//! `execute` and the connection methods; an engine with no query language
//! overrides every structured operation natively.
//!
//! ## Implementations
//!
//! | Engine | Module | Description |
//! |--------|--------|-------------|
//! | `MemoryEngine` | `memory` | In-memory for testing/embedding |
//! | `FileEngine` | `file` | In-memory graph persisted to a snapshot plus commit journal |
//! | `BoltEngine` | `bolt` | External Neo4j or Memgraph via the Bolt protocol |

pub mod memory;
pub mod file;
mod query;
#[cfg(feature = "bolt")]
pub mod bolt;

use std::fmt;
use std::str::FromStr;

use crate::config::EngineConfig;
use crate::cypher::{statements, Dialect, Statement};
use crate::filter::{Page, Predicate};
use crate::model::{Node, PropertyMap, Relationship, Value};
use crate::reconcile::{NodeCreateRow, NodeMergeRow, NodeTarget, RelationshipMergeRow, RelationshipTarget};
use crate::result::RawResult;
use crate::{Error, Result};

pub use memory::{Change, Commit, CommitLog, MemoryEngine, Snapshot};
pub use file::FileEngine;
#[cfg(feature = "bolt")]
pub use bolt::BoltEngine;

// ============================================================================
// Engine kind
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Neo4j,
    Memgraph,
    Memory,
    File,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineKind::Neo4j => "NEO4J",
            EngineKind::Memgraph => "MEMGRAPH",
            EngineKind::Memory => "MEMORY",
            EngineKind::File => "FILE",
        })
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEO4J" => Ok(EngineKind::Neo4j),
            "MEMGRAPH" => Ok(EngineKind::Memgraph),
            "MEMORY" => Ok(EngineKind::Memory),
            "FILE" => Ok(EngineKind::File),
            other => Err(Error::EngineConnection(format!("unknown engine '{other}'"))),
        }
    }
}

// ============================================================================
// Engine capabilities
// ============================================================================

/// What an engine can do. Sessions consult this before optional work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineCapabilities {
    /// `execute` accepts arbitrary query text.
    pub raw_queries: bool,
    /// Uniqueness constraints are enforced; otherwise constraint calls are no-ops.
    pub unique_constraints: bool,
    /// A structured batch either applies completely or not at all.
    pub atomic_batches: bool,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self { raw_queries: true, unique_constraints: true, atomic_batches: true }
    }
}

// ============================================================================
// Edge records
// ============================================================================

/// A relationship with its endpoint nodes, as returned by relationship operations.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    pub source: Node,
    pub relationship: Relationship,
    pub target: Node,
}

// ============================================================================
// GraphEngine Trait
// ============================================================================

/// The universal engine contract.
///
/// All methods are synchronous; each call is independently atomic where
/// [`EngineCapabilities::atomic_batches`] says so.
pub trait GraphEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    fn dialect(&self) -> Dialect {
        Dialect::Neo4j
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities::default()
    }

    /// Round-trip to the backend; fails with `EngineConnection` if unreachable.
    fn verify_connection(&self) -> Result<()>;

    /// Release the backend. Calling twice is harmless.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Run query text with parameters.
    fn execute(&self, statement: &str, params: PropertyMap) -> Result<RawResult>;

    /// Run a generated statement.
    fn run(&self, statement: Statement) -> Result<RawResult> {
        tracing::debug!(engine = %self.kind(), statement = %statement.text, "execute");
        self.execute(&statement.text, statement.params)
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Create nodes; fails with `EntityExists`, writing nothing, if any key
    /// already exists under the primary label or repeats within the batch.
    fn create_nodes(&self, target: &NodeTarget, rows: &[NodeCreateRow]) -> Result<Vec<Node>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        check_batch_keys(target, rows.iter().map(|r| &r.key))?;
        let keys = rows.iter().map(|r| r.key.clone()).collect();
        let existing = self.run(statements::existing_keys(&target.primary_label, &target.key, keys))?;
        if let Some(value) = existing.rows.first().and_then(|r| r.value("key")) {
            return Err(exists(target, value));
        }
        nodes_from(self.run(statements::create_nodes(target, rows, self.dialect()))?, "n")
    }

    /// Merge nodes by primary key, applying the row buckets.
    fn merge_nodes(&self, target: &NodeTarget, rows: &[NodeMergeRow]) -> Result<Vec<Node>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        nodes_from(self.run(statements::merge_nodes(target, rows, self.dialect()))?, "n")
    }

    fn match_node(&self, label: &str, key: &str, value: &Value) -> Result<Option<Node>> {
        let result = self.run(statements::match_node(label, key, value.clone(), self.dialect()))?;
        Ok(nodes_from(result, "n")?.into_iter().next())
    }

    fn match_nodes(&self, label: &str, predicates: &[Predicate], page: &Page) -> Result<Vec<Node>> {
        nodes_from(self.run(statements::match_nodes(label, predicates, page, self.dialect()))?, "n")
    }

    fn count_nodes(&self, label: &str, predicates: &[Predicate]) -> Result<u64> {
        let result = self.run(statements::count_nodes(label, predicates))?;
        first_count(&result, "count")
    }

    /// Detach-delete nodes by key; returns how many were removed.
    fn delete_nodes(&self, label: &str, key: &str, values: &[Value]) -> Result<u64> {
        if values.is_empty() {
            return Ok(0);
        }
        let result = self.run(statements::delete_nodes(label, key, values.to_vec()))?;
        first_count(&result, "deleted")
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    /// Merge relationships; fails with `EntityNotFound`, writing nothing,
    /// if any endpoint is missing.
    fn merge_relationships(&self, target: &RelationshipTarget, rows: &[RelationshipMergeRow]) -> Result<Vec<EdgeRecord>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        for (endpoint, keys) in [
            (&target.source, rows.iter().map(|r| r.source_key.clone()).collect::<Vec<_>>()),
            (&target.target, rows.iter().map(|r| r.target_key.clone()).collect::<Vec<_>>()),
        ] {
            let missing = self.run(statements::missing_endpoints(&endpoint.label, &endpoint.property, keys))?;
            if let Some(value) = missing.rows.first().and_then(|r| r.value("key")) {
                return Err(Error::EntityNotFound {
                    label: endpoint.label.clone(),
                    key: endpoint.property.clone(),
                    value: value.to_string(),
                });
            }
        }
        edges_from(self.run(statements::merge_relationships(target, rows, self.dialect()))?)
    }

    fn match_relationships(&self, rel_type: &str, page: &Page) -> Result<Vec<EdgeRecord>> {
        edges_from(self.run(statements::match_relationships(rel_type, page, self.dialect()))?)
    }

    // ========================================================================
    // Constraints
    // ========================================================================

    /// Idempotent uniqueness constraint on `label.property`.
    fn apply_constraint(&self, label: &str, property: &str) -> Result<()> {
        self.run(statements::create_constraint(label, property, self.dialect())).map(|_| ())
    }

    fn drop_constraint(&self, label: &str, property: &str) -> Result<()> {
        self.run(statements::drop_constraint(label, property, self.dialect())).map(|_| ())
    }

    /// Uniqueness constraints as `(label, property)` pairs.
    fn constraints(&self) -> Result<Vec<(String, String)>> {
        let result = self.run(statements::list_constraints(self.dialect()))?;
        let mut out = Vec::new();
        for row in &result.rows {
            let label = row.value("label").and_then(Value::as_str);
            let property = match row.value("property").or_else(|| row.value("properties")) {
                Some(Value::List(items)) => items.first().and_then(Value::as_str),
                Some(v) => v.as_str(),
                None => None,
            };
            if let (Some(l), Some(p)) = (label, property) {
                out.push((l.to_owned(), p.to_owned()));
            }
        }
        Ok(out)
    }
}

/// Open the engine a configuration names.
pub fn open(config: &EngineConfig) -> Result<Box<dyn GraphEngine>> {
    match config {
        EngineConfig::Memory => Ok(Box::new(MemoryEngine::new())),
        EngineConfig::File { path } => Ok(Box::new(FileEngine::open(path)?)),
        #[cfg(feature = "bolt")]
        EngineConfig::Neo4j(bolt) => Ok(Box::new(BoltEngine::connect(bolt, EngineKind::Neo4j)?)),
        #[cfg(feature = "bolt")]
        EngineConfig::Memgraph(bolt) => Ok(Box::new(BoltEngine::connect(bolt, EngineKind::Memgraph)?)),
        #[cfg(not(feature = "bolt"))]
        EngineConfig::Neo4j(_) | EngineConfig::Memgraph(_) => Err(Error::EngineConnection(
            "Neo4j and Memgraph engines need the `bolt` feature".into(),
        )),
    }
}

// ============================================================================
// Helpers shared by engines
// ============================================================================

pub(crate) fn exists(target: &NodeTarget, value: &Value) -> Error {
    Error::EntityExists {
        label: target.primary_label.clone(),
        key: target.key.clone(),
        value: value.to_string(),
    }
}

pub(crate) fn check_batch_keys<'a>(target: &NodeTarget, keys: impl Iterator<Item = &'a Value>) -> Result<()> {
    let mut seen: Vec<&Value> = Vec::new();
    for key in keys {
        if seen.iter().any(|k| k.graph_eq(key)) {
            return Err(exists(target, key));
        }
        seen.push(key);
    }
    Ok(())
}

/// Nodes from `column`, with the `element_id` column folded in.
pub(crate) fn nodes_from(result: RawResult, column: &str) -> Result<Vec<Node>> {
    result
        .rows
        .into_iter()
        .map(|mut row| {
            let mut node: Node = row.get(column)?;
            if let Some(Value::String(eid)) = row.values.remove("element_id") {
                node.element_id = Some(eid);
            }
            Ok(node)
        })
        .collect()
}

pub(crate) fn edges_from(result: RawResult) -> Result<Vec<EdgeRecord>> {
    result
        .rows
        .into_iter()
        .map(|mut row| {
            let mut relationship: Relationship = row.get("r")?;
            if let Some(Value::String(eid)) = row.values.remove("element_id") {
                relationship.element_id = Some(eid);
            }
            Ok(EdgeRecord { source: row.get("source")?, relationship, target: row.get("target")? })
        })
        .collect()
}

/// Non-negative integer in `column` of the first row.
pub(crate) fn first_count(result: &RawResult, column: &str) -> Result<u64> {
    let value = result.rows.first().and_then(|r| r.value(column));
    match value {
        Some(Value::Int(n)) if *n >= 0 => Ok(*n as u64),
        other => Err(Error::TypeCoercion {
            field: column.to_owned(),
            expected: "a non-negative count".into(),
            got: other.map_or("nothing", Value::type_name).into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!("neo4j".parse::<EngineKind>().unwrap(), EngineKind::Neo4j);
        assert_eq!(" Memgraph ".parse::<EngineKind>().unwrap(), EngineKind::Memgraph);
        assert!("sqlite".parse::<EngineKind>().is_err());
        assert_eq!(EngineKind::File.to_string(), "FILE");
    }

    #[test]
    fn test_batch_key_duplicates() {
        let target = NodeTarget { primary_label: "P".into(), labels: vec!["P".into()], key: "k".into() };
        let keys = [Value::Int(1), Value::Float(1.0)];
        assert!(matches!(check_batch_keys(&target, keys.iter()), Err(Error::EntityExists { .. })));
        let distinct = [Value::Int(1), Value::Int(2)];
        assert!(check_batch_keys(&target, distinct.iter()).is_ok());
    }

    #[test]
    fn test_first_count_rejects_missing_and_non_integer() {
        let row = |v: Value| crate::result::ResultRow::new([("count".to_string(), v)].into_iter().collect());
        let result = |rows| RawResult { columns: vec!["count".into()], rows };
        assert_eq!(first_count(&result(vec![row(Value::Int(4))]), "count").unwrap(), 4);
        for bad in [result(vec![]), result(vec![row(Value::from("4"))]), result(vec![row(Value::Int(-1))])] {
            assert!(matches!(first_count(&bad, "count"), Err(Error::TypeCoercion { .. })));
        }
    }
}
