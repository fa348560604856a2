//! In-memory graph engine.
//!
//! The reference implementation of the structured [`GraphEngine`]
//! operations. One `RwLock` guards the whole graph. Writes are applied in
//! place through a [`Tx`] that records the prior state of everything it
//! touches; if the call fails midway the undo log is replayed backwards,
//! so every structured call is all-or-nothing without copying the graph.
//!
//! Each successful write can also be handed to a [`CommitLog`] as a
//! [`Commit`]: the final state of every touched node, relationship and
//! the constraint list. The file engine journals these.
//!
//! `execute()` evaluates read-only query text (see [`super::query`]);
//! clauses that write are rejected with `ReadOnlyQuery`.
//!
//! ## Limitations
//!
//! - **No property indexes**: lookups scan the label index.
//!
//! Use this engine for:
//! - Tests of entity declarations and merge semantics
//! - Embedding without a database server

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::query::{self, GraphView};
use super::{check_batch_keys, exists, EdgeRecord, EngineCapabilities, EngineKind, GraphEngine};
use crate::filter::{Page, Predicate};
use crate::model::{Node, NodeId, PropertyMap, RelId, Relationship, Value};
use crate::reconcile::{NodeCreateRow, NodeMergeRow, NodeTarget, RelationshipMergeRow, RelationshipTarget};
use crate::result::RawResult;
use crate::{Error, Result};

// ============================================================================
// Graph state
// ============================================================================

/// Serializable image of a memory graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
    pub constraints: Vec<(String, String)>,
    pub next_node_id: u64,
    pub next_rel_id: u64,
}

/// Final state of one entity after a write; `None` means deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    Node { id: NodeId, node: Option<Node> },
    Relationship { id: RelId, relationship: Option<Relationship> },
    Constraints { constraints: Vec<(String, String)> },
}

/// Everything one successful write changed. Replaying a commit twice
/// leaves the graph as replaying it once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub changes: Vec<Change>,
    pub next_node_id: u64,
    pub next_rel_id: u64,
}

impl Commit {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Durable sink for commits. Called with the graph write lock held; an
/// error rolls the write back.
pub trait CommitLog: Send + Sync + fmt::Debug {
    fn append(&self, commit: &Commit) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryGraph {
    nodes: BTreeMap<NodeId, Node>,
    relationships: BTreeMap<RelId, Relationship>,
    outgoing: HashMap<NodeId, BTreeSet<RelId>>,
    incoming: HashMap<NodeId, BTreeSet<RelId>>,
    /// label → node IDs; ids are allocated in creation order
    label_index: HashMap<String, BTreeSet<NodeId>>,
    constraints: Vec<(String, String)>,
    next_node_id: u64,
    next_rel_id: u64,
}

impl MemoryGraph {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut graph = MemoryGraph {
            constraints: snapshot.constraints,
            next_node_id: snapshot.next_node_id,
            next_rel_id: snapshot.next_rel_id,
            ..Default::default()
        };
        for node in snapshot.nodes {
            graph.next_node_id = graph.next_node_id.max(node.id.0);
            graph.put_node(node);
        }
        for rel in snapshot.relationships {
            graph.next_rel_id = graph.next_rel_id.max(rel.id.0);
            graph.put_relationship(rel);
        }
        graph
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            nodes: self.nodes.values().cloned().collect(),
            relationships: self.relationships.values().cloned().collect(),
            constraints: self.constraints.clone(),
            next_node_id: self.next_node_id,
            next_rel_id: self.next_rel_id,
        }
    }

    /// Replay a journalled commit.
    fn apply(&mut self, commit: Commit) {
        for change in commit.changes {
            match change {
                Change::Node { id, node: Some(node) } if node.id == id => {
                    self.put_node(node);
                }
                Change::Node { id, .. } => {
                    self.take_node(id);
                }
                Change::Relationship { id, relationship: Some(rel) } if rel.id == id => {
                    self.put_relationship(rel);
                }
                Change::Relationship { id, .. } => {
                    self.take_relationship(id);
                }
                Change::Constraints { constraints } => self.constraints = constraints,
            }
        }
        self.next_node_id = self.next_node_id.max(commit.next_node_id);
        self.next_rel_id = self.next_rel_id.max(commit.next_rel_id);
    }

    // ------------------------------------------------------------------------
    // Index maintenance. Every structural change goes through these four.
    // ------------------------------------------------------------------------

    fn put_node(&mut self, node: Node) -> Option<Node> {
        let prior = self.take_node(node.id);
        for label in &node.labels {
            self.label_index.entry(label.clone()).or_default().insert(node.id);
        }
        self.nodes.insert(node.id, node);
        prior
    }

    fn take_node(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&id)?;
        for label in &node.labels {
            if let Some(ids) = self.label_index.get_mut(label) {
                ids.remove(&id);
            }
        }
        Some(node)
    }

    fn put_relationship(&mut self, rel: Relationship) -> Option<Relationship> {
        let prior = self.take_relationship(rel.id);
        self.outgoing.entry(rel.src).or_default().insert(rel.id);
        self.incoming.entry(rel.dst).or_default().insert(rel.id);
        self.relationships.insert(rel.id, rel);
        prior
    }

    fn take_relationship(&mut self, id: RelId) -> Option<Relationship> {
        let rel = self.relationships.remove(&id)?;
        if let Some(out) = self.outgoing.get_mut(&rel.src) {
            out.remove(&id);
        }
        if let Some(inc) = self.incoming.get_mut(&rel.dst) {
            inc.remove(&id);
        }
        Some(rel)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    fn labelled(&self, label: &str) -> impl Iterator<Item = &Node> {
        self.label_index
            .get(label)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.nodes.get(id))
    }

    fn by_key<'a>(&'a self, label: &str, key: &'a str, value: &'a Value) -> impl Iterator<Item = &'a Node> {
        self.labelled(label)
            .filter(move |n| n.get(key).is_some_and(|v| v.graph_eq(value)))
    }

    fn touching(&self, id: NodeId) -> BTreeSet<RelId> {
        let out = self.outgoing.get(&id).into_iter().flatten();
        let inc = self.incoming.get(&id).into_iter().flatten();
        out.chain(inc).copied().collect()
    }

    /// Uniqueness constraints that cover this node, checked against every other node.
    fn check_unique(&self, id: Option<NodeId>, labels: &[String], properties: &PropertyMap) -> Result<()> {
        for (label, property) in &self.constraints {
            if !labels.contains(label) {
                continue;
            }
            let Some(value) = properties.get(property).filter(|v| !v.is_null()) else { continue };
            if self.by_key(label, property, value).any(|n| Some(n.id) != id) {
                return Err(Error::EntityExists {
                    label: label.clone(),
                    key: property.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    fn endpoint_ids(&self, label: &str, property: &str, value: &Value) -> Vec<NodeId> {
        self.by_key(label, property, value).map(|n| n.id).collect()
    }

    fn edge(&self, rel: &Relationship) -> Option<EdgeRecord> {
        Some(EdgeRecord {
            source: self.nodes.get(&rel.src)?.clone(),
            relationship: rel.clone(),
            target: self.nodes.get(&rel.dst)?.clone(),
        })
    }
}

impl GraphView for MemoryGraph {
    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    fn all_nodes(&self) -> Box<dyn Iterator<Item = &Node> + '_> {
        Box::new(self.nodes.values())
    }

    fn labelled_nodes(&self, label: &str) -> Box<dyn Iterator<Item = &Node> + '_> {
        let ids = self.label_index.get(label).into_iter().flatten();
        Box::new(ids.filter_map(|id| self.nodes.get(id)))
    }

    fn outgoing(&self, id: NodeId) -> Box<dyn Iterator<Item = &Relationship> + '_> {
        Box::new(self.outgoing.get(&id).into_iter().flatten().filter_map(|r| self.relationships.get(r)))
    }

    fn incoming(&self, id: NodeId) -> Box<dyn Iterator<Item = &Relationship> + '_> {
        Box::new(self.incoming.get(&id).into_iter().flatten().filter_map(|r| self.relationships.get(r)))
    }
}

// ============================================================================
// Write transactions
// ============================================================================

enum Prior {
    Node(NodeId, Option<Node>),
    Relationship(RelId, Option<Relationship>),
    Constraints(Vec<(String, String)>),
}

/// In-place writer over a [`MemoryGraph`] that can undo itself.
///
/// Reads go through `Deref`; every mutation records what it replaced.
pub(crate) struct Tx<'g> {
    graph: &'g mut MemoryGraph,
    undo: Vec<Prior>,
    counters: (u64, u64),
}

impl Deref for Tx<'_> {
    type Target = MemoryGraph;

    fn deref(&self) -> &MemoryGraph {
        self.graph
    }
}

impl<'g> Tx<'g> {
    fn new(graph: &'g mut MemoryGraph) -> Self {
        let counters = (graph.next_node_id, graph.next_rel_id);
        Self { graph, undo: Vec::new(), counters }
    }

    fn rollback(self) {
        let Tx { graph, undo, counters } = self;
        for prior in undo.into_iter().rev() {
            match prior {
                Prior::Node(_, Some(node)) => {
                    graph.put_node(node);
                }
                Prior::Node(id, None) => {
                    graph.take_node(id);
                }
                Prior::Relationship(_, Some(rel)) => {
                    graph.put_relationship(rel);
                }
                Prior::Relationship(id, None) => {
                    graph.take_relationship(id);
                }
                Prior::Constraints(constraints) => graph.constraints = constraints,
            }
        }
        (graph.next_node_id, graph.next_rel_id) = counters;
    }

    /// Final state of everything this transaction touched.
    fn commit_record(&self) -> Commit {
        let mut nodes = BTreeSet::new();
        let mut rels = BTreeSet::new();
        let mut constraints = false;
        for prior in &self.undo {
            match prior {
                Prior::Node(id, _) => {
                    nodes.insert(*id);
                }
                Prior::Relationship(id, _) => {
                    rels.insert(*id);
                }
                Prior::Constraints(_) => constraints = true,
            }
        }
        let mut changes: Vec<Change> = nodes
            .into_iter()
            .map(|id| Change::Node { id, node: self.graph.nodes.get(&id).cloned() })
            .collect();
        changes.extend(rels.into_iter().map(|id| Change::Relationship { id, relationship: self.graph.relationships.get(&id).cloned() }));
        if constraints {
            changes.push(Change::Constraints { constraints: self.graph.constraints.clone() });
        }
        Commit { changes, next_node_id: self.graph.next_node_id, next_rel_id: self.graph.next_rel_id }
    }

    fn set_node(&mut self, node: Node) {
        let id = node.id;
        let prior = self.graph.put_node(node);
        self.undo.push(Prior::Node(id, prior));
    }

    fn set_relationship(&mut self, rel: Relationship) {
        let id = rel.id;
        let prior = self.graph.put_relationship(rel);
        self.undo.push(Prior::Relationship(id, prior));
    }

    fn set_constraints(&mut self, constraints: Vec<(String, String)>) {
        let prior = std::mem::replace(&mut self.graph.constraints, constraints);
        self.undo.push(Prior::Constraints(prior));
    }

    fn insert_node(&mut self, labels: &[String], properties: PropertyMap) -> NodeId {
        self.graph.next_node_id += 1;
        let id = NodeId(self.graph.next_node_id);
        self.set_node(Node { id, element_id: Some(id.to_string()), labels: labels.to_vec(), properties });
        id
    }

    fn insert_relationship(&mut self, src: NodeId, dst: NodeId, rel_type: &str, properties: PropertyMap) -> RelId {
        self.graph.next_rel_id += 1;
        let id = RelId(self.graph.next_rel_id);
        let mut rel = Relationship::new(id, src, dst, rel_type);
        rel.element_id = Some(id.to_string());
        rel.properties = properties;
        self.set_relationship(rel);
        id
    }

    fn detach_delete(&mut self, id: NodeId) -> bool {
        if !self.graph.nodes.contains_key(&id) {
            return false;
        }
        for rel_id in self.graph.touching(id) {
            let prior = self.graph.take_relationship(rel_id);
            self.undo.push(Prior::Relationship(rel_id, prior));
        }
        let prior = self.graph.take_node(id);
        self.undo.push(Prior::Node(id, prior));
        true
    }

    fn merge_node(&mut self, target: &NodeTarget, row: &NodeMergeRow) -> Result<Node> {
        let found = self
            .by_key(&target.primary_label, &target.key, &row.key)
            .find(|n| n.has_labels(target.labels.iter().map(String::as_str)))
            .cloned();
        let id = match found {
            Some(mut node) => {
                node.properties.extend(row.set_on_match.clone());
                node.properties.extend(row.always_set.clone());
                self.check_unique(Some(node.id), &target.labels, &node.properties)?;
                let id = node.id;
                self.set_node(node);
                id
            }
            None => {
                let mut props = PropertyMap::from([(target.key.clone(), row.key.clone())]);
                props.extend(row.set_on_create.clone());
                props.extend(row.always_set.clone());
                self.check_unique(None, &target.labels, &props)?;
                self.insert_node(&target.labels, props)
            }
        };
        Ok(self.nodes[&id].clone())
    }

    fn merge_relationship(&mut self, target: &RelationshipTarget, row: &RelationshipMergeRow) -> Vec<EdgeRecord> {
        let sources = self.endpoint_ids(&target.source.label, &target.source.property, &row.source_key);
        let targets = self.endpoint_ids(&target.target.label, &target.target.property, &row.target_key);
        let mut out = Vec::new();
        for &src in &sources {
            for &dst in &targets {
                let existing = self.outgoing(src).find(|r| {
                    r.connects(src, dst)
                        && r.rel_type == target.rel_type
                        && row.merge_on.iter().all(|(k, v)| r.get(k).is_some_and(|x| x.graph_eq(v)))
                });
                let rel_id = match existing.cloned() {
                    Some(mut rel) => {
                        rel.properties.extend(row.set_on_match.clone());
                        rel.properties.extend(row.always_set.clone());
                        let id = rel.id;
                        self.set_relationship(rel);
                        id
                    }
                    None => {
                        let mut props = row.merge_on.clone();
                        props.extend(row.set_on_create.clone());
                        props.extend(row.always_set.clone());
                        self.insert_relationship(src, dst, &target.rel_type, props)
                    }
                };
                out.extend(self.edge(&self.relationships[&rel_id]));
            }
        }
        out
    }
}

/// Cypher ordering for ORDER BY: nulls sort last ascending.
fn order_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.filter(|v| !v.is_null()), b.filter(|v| !v.is_null())) {
        (Some(a), Some(b)) => a.graph_cmp(b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn apply_order<T>(items: &mut [T], page: &Page, props: impl Fn(&T) -> &PropertyMap) {
    if let Some(order) = &page.order {
        items.sort_by(|a, b| {
            let o = order_cmp(props(a).get(&order.property), props(b).get(&order.property));
            if order.descending { o.reverse() } else { o }
        });
    }
}

// ============================================================================
// MemoryEngine
// ============================================================================

/// In-memory property graph engine.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    graph: RwLock<MemoryGraph>,
    log: Option<Arc<dyn CommitLog>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self { graph: RwLock::new(MemoryGraph::from_snapshot(snapshot)), log: None }
    }

    /// Restore `snapshot`, replay `commits` on top, and hand every later
    /// write to `log`.
    pub fn with_log(snapshot: Snapshot, commits: impl IntoIterator<Item = Commit>, log: Arc<dyn CommitLog>) -> Self {
        let mut graph = MemoryGraph::from_snapshot(snapshot);
        for commit in commits {
            graph.apply(commit);
        }
        Self { graph: RwLock::new(graph), log: Some(log) }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.graph.read().snapshot()
    }

    /// Run `f` on a snapshot while writes are held off.
    pub(crate) fn with_snapshot<T>(&self, f: impl FnOnce(Snapshot) -> T) -> T {
        let graph = self.graph.read();
        f(graph.snapshot())
    }

    pub fn node_count(&self) -> usize {
        self.graph.read().nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.graph.read().relationships.len()
    }

    /// Run `f` in a transaction; undo it if `f` or the commit log fails.
    fn write<T>(&self, f: impl FnOnce(&mut Tx<'_>) -> Result<T>) -> Result<T> {
        let mut graph = self.graph.write();
        let mut tx = Tx::new(&mut *graph);
        let out = match f(&mut tx) {
            Ok(out) => out,
            Err(e) => {
                tx.rollback();
                return Err(e);
            }
        };
        if let Some(log) = &self.log {
            let commit = tx.commit_record();
            if !commit.is_empty() {
                if let Err(e) = log.append(&commit) {
                    tracing::warn!(error = %e, "commit log append failed, rolling back");
                    tx.rollback();
                    return Err(e);
                }
            }
        }
        Ok(out)
    }
}

impl GraphEngine for MemoryEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Memory
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities { raw_queries: true, unique_constraints: true, atomic_batches: true }
    }

    fn verify_connection(&self) -> Result<()> {
        Ok(())
    }

    fn execute(&self, statement: &str, params: PropertyMap) -> Result<RawResult> {
        let result = query::run(&*self.graph.read(), statement, &params)?;
        tracing::debug!(rows = result.rows.len(), "evaluated query");
        Ok(result)
    }

    fn create_nodes(&self, target: &NodeTarget, rows: &[NodeCreateRow]) -> Result<Vec<Node>> {
        check_batch_keys(target, rows.iter().map(|r| &r.key))?;
        self.write(|tx| {
            let mut created = Vec::with_capacity(rows.len());
            for row in rows {
                if tx.by_key(&target.primary_label, &target.key, &row.key).next().is_some() {
                    return Err(exists(target, &row.key));
                }
                let mut props = row.properties.clone();
                props.insert(target.key.clone(), row.key.clone());
                tx.check_unique(None, &target.labels, &props)?;
                let id = tx.insert_node(&target.labels, props);
                created.push(tx.nodes[&id].clone());
            }
            tracing::debug!(label = %target.primary_label, count = created.len(), "created nodes");
            Ok(created)
        })
    }

    fn merge_nodes(&self, target: &NodeTarget, rows: &[NodeMergeRow]) -> Result<Vec<Node>> {
        self.write(|tx| {
            let merged = rows.iter().map(|row| tx.merge_node(target, row)).collect::<Result<Vec<_>>>()?;
            tracing::debug!(label = %target.primary_label, count = merged.len(), "merged nodes");
            Ok(merged)
        })
    }

    fn match_node(&self, label: &str, key: &str, value: &Value) -> Result<Option<Node>> {
        Ok(self.graph.read().by_key(label, key, value).next().cloned())
    }

    fn match_nodes(&self, label: &str, predicates: &[Predicate], page: &Page) -> Result<Vec<Node>> {
        let graph = self.graph.read();
        let mut nodes: Vec<Node> = graph
            .labelled(label)
            .filter(|n| predicates.iter().all(|p| p.matches(&n.properties)))
            .cloned()
            .collect();
        apply_order(&mut nodes, page, |n| &n.properties);
        Ok(page.window(nodes))
    }

    fn count_nodes(&self, label: &str, predicates: &[Predicate]) -> Result<u64> {
        let graph = self.graph.read();
        Ok(graph.labelled(label).filter(|n| predicates.iter().all(|p| p.matches(&n.properties))).count() as u64)
    }

    fn delete_nodes(&self, label: &str, key: &str, values: &[Value]) -> Result<u64> {
        self.write(|tx| {
            let ids: Vec<NodeId> = values.iter().flat_map(|v| tx.endpoint_ids(label, key, v)).collect();
            let mut deleted = 0;
            for id in ids {
                if tx.detach_delete(id) {
                    deleted += 1;
                }
            }
            tracing::debug!(label, deleted, "deleted nodes");
            Ok(deleted)
        })
    }

    fn merge_relationships(&self, target: &RelationshipTarget, rows: &[RelationshipMergeRow]) -> Result<Vec<EdgeRecord>> {
        self.write(|tx| {
            for (endpoint, key) in rows
                .iter()
                .map(|r| (&target.source, &r.source_key))
                .chain(rows.iter().map(|r| (&target.target, &r.target_key)))
            {
                if tx.by_key(&endpoint.label, &endpoint.property, key).next().is_none() {
                    return Err(Error::EntityNotFound {
                        label: endpoint.label.clone(),
                        key: endpoint.property.clone(),
                        value: key.to_string(),
                    });
                }
            }
            let merged: Vec<EdgeRecord> = rows.iter().flat_map(|row| tx.merge_relationship(target, row)).collect();
            tracing::debug!(rel_type = %target.rel_type, count = merged.len(), "merged relationships");
            Ok(merged)
        })
    }

    fn match_relationships(&self, rel_type: &str, page: &Page) -> Result<Vec<EdgeRecord>> {
        let graph = self.graph.read();
        let mut rels: Vec<&Relationship> = graph.relationships.values().filter(|r| r.rel_type == rel_type).collect();
        apply_order(&mut rels, page, |r| &r.properties);
        Ok(page.window(rels).into_iter().filter_map(|r| graph.edge(r)).collect())
    }

    fn apply_constraint(&self, label: &str, property: &str) -> Result<()> {
        self.write(|tx| {
            let pair = (label.to_owned(), property.to_owned());
            if tx.constraints.contains(&pair) {
                return Ok(());
            }
            let mut seen: Vec<&Value> = Vec::new();
            for node in tx.labelled(label) {
                if let Some(v) = node.get(property).filter(|v| !v.is_null()) {
                    if seen.iter().any(|s| s.graph_eq(v)) {
                        return Err(Error::EntityExists { label: pair.0, key: pair.1, value: v.to_string() });
                    }
                    seen.push(v);
                }
            }
            let mut constraints = tx.constraints.clone();
            constraints.push(pair);
            tx.set_constraints(constraints);
            Ok(())
        })
    }

    fn drop_constraint(&self, label: &str, property: &str) -> Result<()> {
        self.write(|tx| {
            if tx.constraints.iter().any(|(l, p)| l == label && p == property) {
                let kept = tx.constraints.iter().filter(|(l, p)| l != label || p != property).cloned().collect();
                tx.set_constraints(kept);
            }
            Ok(())
        })
    }

    fn constraints(&self) -> Result<Vec<(String, String)>> {
        Ok(self.graph.read().constraints.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterOp, OrderBy};
    use crate::props;
    use crate::reconcile::Endpoint;
    use parking_lot::Mutex;

    fn person() -> NodeTarget {
        NodeTarget { primary_label: "Person".into(), labels: vec!["Person".into()], key: "name".into() }
    }

    fn merge_row(name: &str, always: PropertyMap) -> NodeMergeRow {
        NodeMergeRow { key: Value::from(name), always_set: always, ..Default::default() }
    }

    fn knows() -> RelationshipTarget {
        RelationshipTarget {
            rel_type: "KNOWS".into(),
            source: Endpoint { label: "Person".into(), property: "name".into() },
            target: Endpoint { label: "Person".into(), property: "name".into() },
            merge_on: vec![],
        }
    }

    fn rel_row(src: &str, dst: &str) -> RelationshipMergeRow {
        RelationshipMergeRow { source_key: Value::from(src), target_key: Value::from(dst), ..Default::default() }
    }

    fn people(engine: &MemoryEngine, names: &[&str]) {
        let rows: Vec<NodeMergeRow> = names.iter().map(|n| merge_row(n, PropertyMap::new())).collect();
        engine.merge_nodes(&person(), &rows).unwrap();
    }

    #[derive(Debug, Default)]
    struct Recorder {
        commits: Mutex<Vec<Commit>>,
        fail: bool,
    }

    impl CommitLog for Recorder {
        fn append(&self, commit: &Commit) -> Result<()> {
            if self.fail {
                return Err(Error::EngineConnection("disk full".into()));
            }
            self.commits.lock().push(commit.clone());
            Ok(())
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let engine = MemoryEngine::new();
        engine.merge_nodes(&person(), &[merge_row("ada", props! { "age" => 36 })]).unwrap();
        let again = engine.merge_nodes(&person(), &[merge_row("ada", props! { "age" => 37 })]).unwrap();
        assert_eq!(engine.node_count(), 1);
        assert_eq!(again[0].get("age"), Some(&Value::Int(37)));
        assert_eq!(again[0].element_id.as_deref(), Some("1"));
    }

    #[test]
    fn test_on_create_and_on_match_buckets() {
        let engine = MemoryEngine::new();
        let row = NodeMergeRow {
            key: Value::from("ada"),
            set_on_create: props! { "first" => "mon" },
            set_on_match: props! { "last" => "tue" },
            ..Default::default()
        };
        let created = engine.merge_nodes(&person(), &[row.clone()]).unwrap();
        assert_eq!(created[0].get("first"), Some(&Value::from("mon")));
        assert!(created[0].get("last").is_none());

        let matched = engine.merge_nodes(&person(), &[row]).unwrap();
        assert_eq!(matched[0].get("last"), Some(&Value::from("tue")));
    }

    #[test]
    fn test_create_conflict_writes_nothing() {
        let engine = MemoryEngine::new();
        let rows = [
            NodeCreateRow { key: Value::from("a"), properties: PropertyMap::new() },
            NodeCreateRow { key: Value::from("b"), properties: PropertyMap::new() },
        ];
        engine.create_nodes(&person(), &rows[..1]).unwrap();
        let err = engine.create_nodes(&person(), &rows).unwrap_err();
        assert!(matches!(err, Error::EntityExists { .. }));
        assert_eq!(engine.node_count(), 1);
    }

    #[test]
    fn test_missing_endpoint_writes_nothing() {
        let engine = MemoryEngine::new();
        people(&engine, &["a", "b"]);
        let err = engine.merge_relationships(&knows(), &[rel_row("a", "b"), rel_row("a", "zed")]).unwrap_err();
        match err {
            Error::EntityNotFound { value, .. } => assert_eq!(value, "\"zed\""),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(engine.relationship_count(), 0);
    }

    #[test]
    fn test_failed_merge_restores_updated_nodes_and_ids() {
        let engine = MemoryEngine::new();
        engine.apply_constraint("Person", "email").unwrap();
        engine.merge_nodes(&person(), &[merge_row("a", props! { "email" => "a@x" })]).unwrap();
        let before = engine.snapshot();
        // Row 1 updates "a" in place, row 2 creates "b", row 3 collides with "a".
        let rows = [
            merge_row("a", props! { "age" => 1 }),
            merge_row("b", props! { "email" => "b@x" }),
            merge_row("c", props! { "email" => "a@x" }),
        ];
        assert!(engine.merge_nodes(&person(), &rows).is_err());
        assert_eq!(engine.snapshot(), before);
        let next = engine.merge_nodes(&person(), &[merge_row("d", PropertyMap::new())]).unwrap();
        assert_eq!(next[0].id, NodeId(2));
    }

    #[test]
    fn test_merge_on_distinguishes_relationships() {
        let engine = MemoryEngine::new();
        people(&engine, &["a", "b"]);
        let mut target = knows();
        target.merge_on = vec!["context".into()];
        let mut work = rel_row("a", "b");
        work.merge_on = props! { "context" => "work" };
        let mut home = rel_row("a", "b");
        home.merge_on = props! { "context" => "home" };
        engine.merge_relationships(&target, &[work.clone(), home]).unwrap();
        engine.merge_relationships(&target, &[work]).unwrap();
        assert_eq!(engine.relationship_count(), 2);
    }

    #[test]
    fn test_detach_delete_removes_relationships() {
        let engine = MemoryEngine::new();
        people(&engine, &["a", "b", "c"]);
        engine.merge_relationships(&knows(), &[rel_row("a", "b"), rel_row("c", "a")]).unwrap();
        assert_eq!(engine.delete_nodes("Person", "name", &[Value::from("a")]).unwrap(), 1);
        assert_eq!(engine.relationship_count(), 0);
        assert_eq!(engine.delete_nodes("Person", "name", &[Value::from("a")]).unwrap(), 0);
        let graph = engine.graph.read();
        assert!(graph.outgoing.values().chain(graph.incoming.values()).all(BTreeSet::is_empty));
    }

    #[test]
    fn test_match_nodes_filter_order_window() {
        let engine = MemoryEngine::new();
        let rows: Vec<NodeMergeRow> = [("a", 50), ("b", 40), ("c", 30), ("d", 45)]
            .iter()
            .map(|(n, age)| merge_row(n, props! { "age" => *age }))
            .collect();
        engine.merge_nodes(&person(), &rows).unwrap();
        let gte = [Predicate { property: "age".into(), op: FilterOp::Gte, value: Value::Int(40) }];
        let page = Page { skip: Some(1), limit: Some(5), order: Some(OrderBy { property: "age".into(), descending: false }) };
        let names: Vec<Value> = engine
            .match_nodes("Person", &gte, &page)
            .unwrap()
            .into_iter()
            .filter_map(|n| n.get("name").cloned())
            .collect();
        assert_eq!(names, vec![Value::from("d"), Value::from("a")]);
        assert_eq!(engine.count_nodes("Person", &gte).unwrap(), 3);
    }

    #[test]
    fn test_constraints_enforced_on_merge() {
        let engine = MemoryEngine::new();
        engine.apply_constraint("Person", "email").unwrap();
        engine.apply_constraint("Person", "email").unwrap();
        assert_eq!(engine.constraints().unwrap().len(), 1);
        engine.merge_nodes(&person(), &[merge_row("a", props! { "email" => "x@y" })]).unwrap();
        let err = engine.merge_nodes(&person(), &[merge_row("b", props! { "email" => "x@y" })]).unwrap_err();
        assert!(matches!(err, Error::EntityExists { .. }));
        assert_eq!(engine.node_count(), 1);
    }

    #[test]
    fn test_execute_matches_patterns() {
        let engine = MemoryEngine::new();
        people(&engine, &["a", "b", "c"]);
        engine.merge_relationships(&knows(), &[rel_row("a", "b"), rel_row("b", "c")]).unwrap();
        let result = engine
            .execute(
                "MATCH (p:Person {name: $name})-[:KNOWS*1..2]->(f) RETURN f.name AS friend ORDER BY friend",
                props! { "name" => "a" },
            )
            .unwrap();
        let friends: Vec<String> = result.rows.iter().map(|r| r.get::<String>("friend").unwrap()).collect();
        assert_eq!(friends, vec!["b", "c"]);

        let incoming = engine.execute("MATCH (p:Person)<-[r:KNOWS]-(q) RETURN p.name AS p, type(r) AS t", PropertyMap::new()).unwrap();
        assert_eq!(incoming.rows.len(), 2);
        assert_eq!(incoming.columns, vec!["p".to_string(), "t".to_string()]);
    }

    #[test]
    fn test_execute_rejects_writes() {
        let engine = MemoryEngine::new();
        let err = engine.execute("MATCH (n) DETACH DELETE n", PropertyMap::new()).unwrap_err();
        assert!(matches!(err, Error::ReadOnlyQuery { .. }));
    }

    #[test]
    fn test_commit_log_sees_final_state() {
        let recorder = Arc::new(Recorder::default());
        let engine = MemoryEngine::with_log(Snapshot::default(), [], recorder.clone());
        people(&engine, &["a", "b"]);
        engine.merge_relationships(&knows(), &[rel_row("a", "b")]).unwrap();
        engine.delete_nodes("Person", "name", &[Value::from("b")]).unwrap();
        // A no-op write logs nothing.
        engine.drop_constraint("Person", "missing").unwrap();

        let commits = recorder.commits.lock().clone();
        assert_eq!(commits.len(), 3);
        assert!(commits[2].changes.contains(&Change::Node { id: NodeId(2), node: None }));
        assert!(commits[2].changes.contains(&Change::Relationship { id: RelId(1), relationship: None }));

        let mut replayed = MemoryGraph::default();
        for commit in commits.iter().chain(&commits).cloned() {
            replayed.apply(commit);
        }
        assert_eq!(replayed.snapshot(), engine.snapshot());
    }

    #[test]
    fn test_failed_log_append_rolls_back() {
        let recorder = Arc::new(Recorder { fail: true, ..Default::default() });
        let engine = MemoryEngine::with_log(Snapshot::default(), [], recorder);
        let err = engine.merge_nodes(&person(), &[merge_row("a", PropertyMap::new())]).unwrap_err();
        assert!(matches!(err, Error::EngineConnection(_)));
        assert_eq!(engine.node_count(), 0);
        assert_eq!(engine.snapshot().next_node_id, 0);
    }

    #[test]
    fn test_snapshot_roundtrip_keeps_ids_moving_forward() {
        let engine = MemoryEngine::new();
        engine.merge_nodes(&person(), &[merge_row("a", PropertyMap::new())]).unwrap();
        let restored = MemoryEngine::from_snapshot(engine.snapshot());
        let b = restored.merge_nodes(&person(), &[merge_row("b", PropertyMap::new())]).unwrap();
        assert_eq!(b[0].id, NodeId(2));
        assert!(restored.match_node("Person", "name", &Value::from("a")).unwrap().is_some());
    }
}
