//! Type registry: which Rust type a raw node or relationship rehydrates into.
//!
//! Built explicitly at startup and passed to a [`crate::Session`]; nothing
//! registers itself. Node types are indexed by primary label, relationship
//! types by relationship type.
//!
//! Resolution rules:
//! - node: among registered types whose labels are all present on the node,
//!   one whose label set equals the node's label set exactly wins;
//!   otherwise the first registered candidate wins.
//! - relationship: the first registered type for the relationship type
//!   whose declared source and target labels accept the endpoint nodes.

use std::any::Any;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::coerce;
use crate::ingest::{self, EndpointOverrides, Record};
use crate::model::{Node, Relationship, Value};
use crate::result::{TypedNode, TypedRelationship};
use crate::schema::{NodeEntity, NodeSchema, RelationshipEntity, RelationshipSchema};
use crate::session::Session;
use crate::Result;

type Entity = Arc<dyn Any + Send + Sync>;
type NodeHydrator = fn(&Node, &NodeSchema) -> Result<Entity>;
type EdgeHydrator = fn(&Node, &Relationship, &Node, &RelationshipSchema) -> Result<Entity>;
type RecordKey = fn(&Record) -> Result<Value>;
type NodeRecordMerger = fn(&Session, &[Record]) -> Result<usize>;
type EdgeRecordCheck = fn(&Registry, &Record, &EndpointOverrides) -> Result<()>;
type EdgeRecordMerger = fn(&Session, &[Record], &EndpointOverrides) -> Result<usize>;

fn hydrate_node<T: NodeEntity>(node: &Node, schema: &NodeSchema) -> Result<Entity> {
    Ok(Arc::new(coerce::node_entity::<T>(node, schema)?))
}

fn hydrate_edge<R: RelationshipEntity>(
    source: &Node,
    rel: &Relationship,
    target: &Node,
    schema: &RelationshipSchema,
) -> Result<Entity> {
    Ok(Arc::new(coerce::edge_entity::<R>(source, rel, target, schema)?))
}

#[derive(Debug, Clone)]
pub struct NodeBinding {
    pub schema: Arc<NodeSchema>,
    pub type_name: &'static str,
    hydrate: NodeHydrator,
    record_key: RecordKey,
    merge_records: NodeRecordMerger,
}

impl NodeBinding {
    /// Coerce a loosely typed record into this type and return its
    /// primary key value. Nothing is written.
    pub fn record_key(&self, record: &Record) -> Result<Value> {
        (self.record_key)(record)
    }

    /// Merge records as this type. Returns the number of nodes merged.
    pub fn merge_records(&self, session: &Session, records: &[Record]) -> Result<usize> {
        (self.merge_records)(session, records)
    }
}

#[derive(Debug, Clone)]
pub struct RelationshipBinding {
    pub schema: Arc<RelationshipSchema>,
    pub type_name: &'static str,
    hydrate: EdgeHydrator,
    check_record: EdgeRecordCheck,
    merge_records: EdgeRecordMerger,
}

impl RelationshipBinding {
    /// Validate a relationship record and its endpoint lookup without
    /// writing.
    pub fn check_record(&self, registry: &Registry, record: &Record, endpoints: &EndpointOverrides) -> Result<()> {
        (self.check_record)(registry, record, endpoints)
    }

    pub fn merge_records(&self, session: &Session, records: &[Record], endpoints: &EndpointOverrides) -> Result<usize> {
        (self.merge_records)(session, records, endpoints)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    nodes: Vec<NodeBinding>,
    by_label: HashMap<String, Vec<usize>>,
    relationships: Vec<RelationshipBinding>,
    by_type: HashMap<String, Vec<usize>>,
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: Registry,
}

impl RegistryBuilder {
    /// Register a node type. Abstract schemas are accepted but never
    /// resolved to, since no node carries their (absent) primary label.
    pub fn node<T: NodeEntity>(mut self) -> Result<Self> {
        let schema = T::schema()?;
        let idx = self.registry.nodes.len();
        if let Some(label) = schema.primary_label() {
            self.registry.by_label.entry(label.to_owned()).or_default().push(idx);
        }
        tracing::debug!(entity = schema.entity(), type_name = std::any::type_name::<T>(), "registered node type");
        self.registry.nodes.push(NodeBinding {
            schema: Arc::new(schema),
            type_name: std::any::type_name::<T>(),
            hydrate: hydrate_node::<T>,
            record_key: ingest::node_record_key::<T>,
            merge_records: ingest::merge_node_records::<T>,
        });
        Ok(self)
    }

    pub fn relationship<R: RelationshipEntity>(mut self) -> Result<Self> {
        let schema = R::schema()?;
        let idx = self.registry.relationships.len();
        self.registry.by_type.entry(schema.relationship_type().to_owned()).or_default().push(idx);
        tracing::debug!(rel_type = schema.relationship_type(), type_name = std::any::type_name::<R>(), "registered relationship type");
        self.registry.relationships.push(RelationshipBinding {
            schema: Arc::new(schema),
            type_name: std::any::type_name::<R>(),
            hydrate: hydrate_edge::<R>,
            check_record: ingest::check_relationship_record::<R>,
            merge_records: Session::merge_relationship_records::<R>,
        });
        Ok(self)
    }

    pub fn build(self) -> Registry {
        self.registry
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn resolve_node(&self, node: &Node) -> Option<&NodeBinding> {
        let mut candidates: Vec<usize> = node
            .labels
            .iter()
            .filter_map(|l| self.by_label.get(l))
            .flatten()
            .copied()
            .filter(|&i| node.has_labels(self.nodes[i].schema.all_labels()))
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        let exact = candidates.iter().find(|&&i| {
            let labels = self.nodes[i].schema.all_labels();
            labels.len() == node.labels.len()
        });
        exact.or(candidates.first()).map(|&i| &self.nodes[i])
    }

    pub fn resolve_relationship(&self, rel: &Relationship, source: &Node, target: &Node) -> Option<&RelationshipBinding> {
        self.by_type
            .get(&rel.rel_type)?
            .iter()
            .map(|&i| &self.relationships[i])
            .find(|b| b.schema.accepts(&source.labels, &target.labels))
    }

    /// Typed view of a node, or None if no registered type claims it.
    pub fn hydrate_node(&self, node: &Node) -> Result<Option<TypedNode>> {
        let Some(binding) = self.resolve_node(node) else {
            return Ok(None);
        };
        let entity = (binding.hydrate)(node, &binding.schema)?;
        Ok(Some(TypedNode::new(node.clone(), binding.schema.clone(), binding.type_name, entity)))
    }

    /// Typed view of a relationship. Both endpoints must themselves hydrate.
    pub fn hydrate_relationship(
        &self,
        source: &Node,
        rel: &Relationship,
        target: &Node,
    ) -> Result<Option<TypedRelationship>> {
        let Some(binding) = self.resolve_relationship(rel, source, target) else {
            return Ok(None);
        };
        let (Some(typed_source), Some(typed_target)) = (self.hydrate_node(source)?, self.hydrate_node(target)?) else {
            return Ok(None);
        };
        let entity = (binding.hydrate)(source, rel, target, &binding.schema)?;
        Ok(Some(TypedRelationship::new(
            rel.clone(),
            typed_source,
            typed_target,
            binding.type_name,
            entity,
        )))
    }

    /// Registered primary labels, in registration order.
    pub fn node_types(&self) -> Vec<&str> {
        self.nodes.iter().filter_map(|b| b.schema.primary_label()).collect()
    }

    pub fn relationship_types(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for b in &self.relationships {
            let t = b.schema.relationship_type();
            if !out.contains(&t) {
                out.push(t);
            }
        }
        out
    }

    /// Relationship types that may start at a node with this label.
    pub fn relationships_by_source(&self, label: &str) -> Vec<&str> {
        self.relationship_types_where(|s| s.source_labels().iter().any(|l| l == label))
    }

    /// Relationship types that may end at a node with this label.
    pub fn relationships_by_target(&self, label: &str) -> Vec<&str> {
        self.relationship_types_where(|s| s.target_labels().iter().any(|l| l == label))
    }

    fn relationship_types_where(&self, pred: impl Fn(&RelationshipSchema) -> bool) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for b in self.relationships.iter().filter(|b| pred(&b.schema)) {
            let t = b.schema.relationship_type();
            if !out.contains(&t) {
                out.push(t);
            }
        }
        out
    }

    /// First registered node type whose primary label is `label`.
    pub fn node_binding(&self, label: &str) -> Option<&NodeBinding> {
        self.by_label.get(label)?.first().map(|&i| &self.nodes[i])
    }

    pub fn relationship_binding(&self, rel_type: &str) -> Option<&RelationshipBinding> {
        self.by_type.get(rel_type)?.first().map(|&i| &self.relationships[i])
    }

    pub fn node_bindings(&self) -> &[NodeBinding] {
        &self.nodes
    }

    pub fn relationship_bindings(&self) -> &[RelationshipBinding] {
        &self.relationships
    }

    /// One markdown section per outgoing relationship type of `label`.
    pub fn markdown_relationship_tables(&self, label: &str, heading_level: usize) -> String {
        self.relationships_by_source(label)
            .into_iter()
            .filter_map(|t| self.relationship_schema(t))
            .map(|s| s.markdown_section(heading_level))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Property table and outgoing relationships of every registered
    /// concrete node type.
    pub fn markdown_schema(&self) -> String {
        let mut sections = Vec::new();
        for binding in &self.nodes {
            let Some(label) = binding.schema.primary_label() else { continue };
            let mut section = format!("## {label}\n\n{}", binding.schema.markdown_table());
            let relationships = self.markdown_relationship_tables(label, 3);
            if !relationships.is_empty() {
                section.push('\n');
                section.push_str(&relationships);
            }
            sections.push(section);
        }
        sections.join("\n")
    }

    pub fn node_schema(&self, label: &str) -> Option<&NodeSchema> {
        self.by_label.get(label)?.first().map(|&i| self.nodes[i].schema.as_ref())
    }

    pub fn relationship_schema(&self, rel_type: &str) -> Option<&RelationshipSchema> {
        self.by_type.get(rel_type)?.first().map(|&i| self.relationships[i].schema.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;
    use crate::schema::FieldSpec;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        name: String,
    }

    impl NodeEntity for Person {
        fn schema() -> Result<NodeSchema> {
            NodeSchema::builder("Person", "name").field(FieldSpec::string("name")).build()
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Admin {
        name: String,
    }

    impl NodeEntity for Admin {
        fn schema() -> Result<NodeSchema> {
            NodeSchema::builder("Admin", "name")
                .secondary_label("Person")
                .field(FieldSpec::string("name"))
                .build()
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Follows {}

    impl RelationshipEntity for Follows {
        type Source = Person;
        type Target = Person;
        fn schema() -> Result<RelationshipSchema> {
            RelationshipSchema::between::<Person, Person>("FOLLOWS").build()
        }
    }

    fn registry() -> Registry {
        Registry::builder()
            .node::<Person>().unwrap()
            .node::<Admin>().unwrap()
            .relationship::<Follows>().unwrap()
            .build()
    }

    #[test]
    fn test_exact_label_set_wins() {
        let reg = registry();
        let admin = Node::new(NodeId(1)).with_labels(["Person", "Admin"]).with_property("name", "root");
        assert_eq!(reg.resolve_node(&admin).map(|b| b.schema.entity()), Some("Admin"));

        let plain = Node::new(NodeId(2)).with_labels(["Person"]).with_property("name", "ada");
        assert_eq!(reg.resolve_node(&plain).map(|b| b.schema.entity()), Some("Person"));
    }

    #[test]
    fn test_no_exact_match_falls_back_to_first_registered() {
        let reg = registry();
        let odd = Node::new(NodeId(3)).with_labels(["Person", "Admin", "Auditor"]).with_property("name", "x");
        assert_eq!(reg.resolve_node(&odd).map(|b| b.schema.entity()), Some("Person"));

        let unknown = Node::new(NodeId(4)).with_labels(["Team"]);
        assert!(reg.resolve_node(&unknown).is_none());
    }

    #[test]
    fn test_hydrate_node_downcasts() {
        let reg = registry();
        let node = Node::new(NodeId(1)).with_labels(["Person"]).with_property("name", "ada");
        let typed = reg.hydrate_node(&node).unwrap().unwrap();
        assert_eq!(typed.downcast_ref::<Person>(), Some(&Person { name: "ada".into() }));
        assert!(typed.downcast_ref::<Admin>().is_none());
    }

    #[test]
    fn test_relationship_queries() {
        let reg = registry();
        assert_eq!(reg.relationship_types(), vec!["FOLLOWS"]);
        assert_eq!(reg.relationships_by_source("Person"), vec!["FOLLOWS"]);
        assert!(reg.relationships_by_target("Team").is_empty());
        assert_eq!(reg.node_types(), vec!["Person", "Admin"]);
    }

    #[test]
    fn test_markdown_schema() {
        let reg = registry();
        assert_eq!(reg.markdown_relationship_tables("Person", 4), "#### FOLLOWS\n\nTarget Label(s): Person\n");
        assert!(reg.markdown_relationship_tables("Admin", 3).is_empty());
        let doc = reg.markdown_schema();
        assert!(doc.starts_with("## Person\n\n| Property Name | Type | Required |"));
        assert!(doc.contains("| name | STRING | true |\n\n### FOLLOWS\n"));
        assert!(doc.ends_with("## Admin\n\n| Property Name | Type | Required |\n| ------------- | ---- | -------- |\n| name | STRING | true |\n"));
    }
}
