//! Builders for the structured operations.
//!
//! Every node-returning statement yields `n` plus `element_id`; every
//! relationship-returning one yields `source`, `r`, `target` plus
//! `element_id` (of `r`).

use super::{Dialect, Statement};
use crate::filter::{Page, Predicate};
use crate::model::Value;
use crate::reconcile::{NodeCreateRow, NodeMergeRow, NodeTarget, RelationshipMergeRow, RelationshipTarget};

fn labels(labels: &[String]) -> String {
    labels.iter().map(|l| format!(":{l}")).collect()
}

fn rows(values: impl Iterator<Item = Value>) -> Value {
    Value::List(values.collect())
}

// ============================================================================
// Nodes
// ============================================================================

pub fn create_nodes(target: &NodeTarget, batch: &[NodeCreateRow], dialect: Dialect) -> Statement {
    let text = format!(
        "UNWIND $rows AS row \
         CREATE (n{labels} {{{key}: row.key}}) \
         SET n += row.properties \
         RETURN n, {eid} AS element_id",
        labels = labels(&target.labels),
        key = target.key,
        eid = dialect.element_id("n"),
    );
    Statement::new(text).param("rows", rows(batch.iter().map(NodeCreateRow::to_param)))
}

pub fn merge_nodes(target: &NodeTarget, batch: &[NodeMergeRow], dialect: Dialect) -> Statement {
    let text = format!(
        "UNWIND $rows AS row \
         MERGE (n{labels} {{{key}: row.key}}) \
         ON MATCH SET n += row.set_on_match \
         ON CREATE SET n += row.set_on_create \
         SET n += row.always_set \
         RETURN n, {eid} AS element_id",
        labels = labels(&target.labels),
        key = target.key,
        eid = dialect.element_id("n"),
    );
    Statement::new(text).param("rows", rows(batch.iter().map(NodeMergeRow::to_param)))
}

/// Keys from `keys` already present under `label`.
pub fn existing_keys(label: &str, key: &str, keys: Vec<Value>) -> Statement {
    Statement::new(format!("MATCH (n:{label}) WHERE n.{key} IN $keys RETURN DISTINCT n.{key} AS key"))
        .param("keys", Value::List(keys))
}

pub fn match_node(label: &str, key: &str, value: Value, dialect: Dialect) -> Statement {
    Statement::new(format!(
        "MATCH (n:{label}) WHERE n.{key} = $key RETURN n, {} AS element_id LIMIT 1",
        dialect.element_id("n")
    ))
    .param("key", value)
}

fn where_clause(predicates: &[Predicate], statement: &mut Statement) -> String {
    if predicates.is_empty() {
        return String::new();
    }
    let conditions: Vec<String> = predicates
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let param = format!("f{i}");
            let cond = p.to_cypher("n", &param);
            statement.params.insert(param, p.value.clone());
            cond
        })
        .collect();
    format!(" WHERE {}", conditions.join(" AND "))
}

fn window(var: &str, page: &Page, statement: &mut Statement) -> String {
    let mut out = String::new();
    if let Some(order) = &page.order {
        out.push_str(&format!(" ORDER BY {var}.{}{}", order.property, if order.descending { " DESC" } else { "" }));
    }
    if let Some(skip) = page.skip {
        out.push_str(" SKIP $skip");
        statement.params.insert("skip".into(), Value::Int(skip as i64));
    }
    if let Some(limit) = page.limit {
        out.push_str(" LIMIT $limit");
        statement.params.insert("limit".into(), Value::Int(limit as i64));
    }
    out
}

pub fn match_nodes(label: &str, predicates: &[Predicate], page: &Page, dialect: Dialect) -> Statement {
    let mut st = Statement::new(String::new());
    let filter = where_clause(predicates, &mut st);
    let tail = window("n", page, &mut st);
    st.text = format!("MATCH (n:{label}){filter} RETURN n, {} AS element_id{tail}", dialect.element_id("n"));
    st
}

pub fn count_nodes(label: &str, predicates: &[Predicate]) -> Statement {
    let mut st = Statement::new(String::new());
    let filter = where_clause(predicates, &mut st);
    st.text = format!("MATCH (n:{label}){filter} RETURN count(n) AS count");
    st
}

pub fn delete_nodes(label: &str, key: &str, keys: Vec<Value>) -> Statement {
    Statement::new(format!(
        "UNWIND $keys AS key MATCH (n:{label}) WHERE n.{key} = key DETACH DELETE n RETURN count(*) AS deleted"
    ))
    .param("keys", Value::List(keys))
}

// ============================================================================
// Relationships
// ============================================================================

/// Keys from `keys` with no node under `label`.
pub fn missing_endpoints(label: &str, property: &str, keys: Vec<Value>) -> Statement {
    Statement::new(format!(
        "UNWIND $keys AS key \
         OPTIONAL MATCH (n:{label}) WHERE n.{property} = key \
         WITH key, count(n) AS found WHERE found = 0 \
         RETURN key"
    ))
    .param("keys", Value::List(keys))
}

pub fn merge_relationships(target: &RelationshipTarget, batch: &[RelationshipMergeRow], dialect: Dialect) -> Statement {
    let identity = if target.merge_on.is_empty() {
        String::new()
    } else {
        let props: Vec<String> = target.merge_on.iter().map(|p| format!("{p}: row.merge_on.{p}")).collect();
        format!(" {{{}}}", props.join(", "))
    };
    let text = format!(
        "UNWIND $rows AS row \
         MATCH (source:{sl}) WHERE source.{sp} = row.source_key \
         MATCH (target:{tl}) WHERE target.{tp} = row.target_key \
         MERGE (source)-[r:{rt}{identity}]->(target) \
         ON MATCH SET r += row.set_on_match \
         ON CREATE SET r += row.set_on_create \
         SET r += row.always_set \
         RETURN source, r, target, {eid} AS element_id",
        sl = target.source.label,
        sp = target.source.property,
        tl = target.target.label,
        tp = target.target.property,
        rt = target.rel_type,
        eid = dialect.element_id("r"),
    );
    Statement::new(text).param("rows", rows(batch.iter().map(RelationshipMergeRow::to_param)))
}

pub fn match_relationships(rel_type: &str, page: &Page, dialect: Dialect) -> Statement {
    let mut st = Statement::new(String::new());
    let tail = window("r", page, &mut st);
    st.text = format!(
        "MATCH (source)-[r:{rel_type}]->(target) RETURN DISTINCT source, r, target, {} AS element_id{tail}",
        dialect.element_id("r")
    );
    st
}

// ============================================================================
// Constraints
// ============================================================================

pub fn constraint_name(label: &str, property: &str) -> String {
    format!("{label}_{property}_unique")
}

pub fn create_constraint(label: &str, property: &str, dialect: Dialect) -> Statement {
    Statement::new(match dialect {
        Dialect::Neo4j => format!(
            "CREATE CONSTRAINT {} IF NOT EXISTS FOR (n:{label}) REQUIRE n.{property} IS UNIQUE",
            constraint_name(label, property)
        ),
        Dialect::Memgraph => format!("CREATE CONSTRAINT ON (n:{label}) ASSERT n.{property} IS UNIQUE"),
    })
}

pub fn drop_constraint(label: &str, property: &str, dialect: Dialect) -> Statement {
    Statement::new(match dialect {
        Dialect::Neo4j => format!("DROP CONSTRAINT {} IF EXISTS", constraint_name(label, property)),
        Dialect::Memgraph => format!("DROP CONSTRAINT ON (n:{label}) ASSERT n.{property} IS UNIQUE"),
    })
}

/// Lists uniqueness constraints as `label`, `property` columns (Neo4j) or
/// Memgraph's `SHOW CONSTRAINT INFO` columns.
pub fn list_constraints(dialect: Dialect) -> Statement {
    Statement::new(match dialect {
        Dialect::Neo4j => "SHOW CONSTRAINTS YIELD labelsOrTypes, properties, type \
                           WHERE type IN ['UNIQUENESS', 'NODE_PROPERTY_UNIQUENESS'] \
                           RETURN labelsOrTypes[0] AS label, properties[0] AS property"
            .to_owned(),
        Dialect::Memgraph => "SHOW CONSTRAINT INFO".to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterOp, OrderBy};
    use crate::reconcile::Endpoint;
    use pretty_assertions::assert_eq;

    fn person() -> NodeTarget {
        NodeTarget { primary_label: "Person".into(), labels: vec!["Person".into(), "Mammal".into()], key: "name".into() }
    }

    #[test]
    fn test_merge_nodes_text() {
        let st = merge_nodes(&person(), &[], Dialect::Neo4j);
        assert_eq!(
            st.text,
            "UNWIND $rows AS row MERGE (n:Person:Mammal {name: row.key}) \
             ON MATCH SET n += row.set_on_match ON CREATE SET n += row.set_on_create \
             SET n += row.always_set RETURN n, elementId(n) AS element_id"
        );
        assert_eq!(st.params.get("rows"), Some(&Value::List(vec![])));
    }

    #[test]
    fn test_match_nodes_with_filters_and_window() {
        let preds = vec![Predicate { property: "age".into(), op: FilterOp::Gte, value: Value::Int(40) }];
        let page = Page { skip: Some(5), limit: Some(10), order: Some(OrderBy { property: "age".into(), descending: true }) };
        let st = match_nodes("Person", &preds, &page, Dialect::Memgraph);
        assert_eq!(
            st.text,
            "MATCH (n:Person) WHERE n.age >= $f0 RETURN n, toString(id(n)) AS element_id ORDER BY n.age DESC SKIP $skip LIMIT $limit"
        );
        assert_eq!(st.params.get("f0"), Some(&Value::Int(40)));
        assert_eq!(st.params.get("limit"), Some(&Value::Int(10)));
    }

    #[test]
    fn test_merge_relationships_identity() {
        let target = RelationshipTarget {
            rel_type: "FOLLOWS".into(),
            source: Endpoint { label: "Person".into(), property: "name".into() },
            target: Endpoint { label: "Person".into(), property: "name".into() },
            merge_on: vec!["context".into()],
        };
        let st = merge_relationships(&target, &[], Dialect::Neo4j);
        assert!(st.text.contains("MERGE (source)-[r:FOLLOWS {context: row.merge_on.context}]->(target)"));
        assert!(st.text.contains("MATCH (source:Person) WHERE source.name = row.source_key"));
    }

    #[test]
    fn test_constraint_dialects() {
        assert_eq!(
            create_constraint("Person", "name", Dialect::Neo4j).text,
            "CREATE CONSTRAINT Person_name_unique IF NOT EXISTS FOR (n:Person) REQUIRE n.name IS UNIQUE"
        );
        assert_eq!(
            create_constraint("Person", "name", Dialect::Memgraph).text,
            "CREATE CONSTRAINT ON (n:Person) ASSERT n.name IS UNIQUE"
        );
    }
}
