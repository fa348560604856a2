//! End-to-end tests for typed relationship merges against the memory engine.

use neontology::{
    Edge, EndpointOverrides, Error, FieldSpec, Filters, NodeEntity, NodeSchema, Page, Record, Registry,
    RelationshipEntity, RelationshipSchema, Result, Session,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Person {
    name: String,
    handle: Option<String>,
}

impl Person {
    fn new(name: &str) -> Self {
        Self { name: name.into(), handle: Some(format!("@{}", name.to_lowercase())) }
    }
}

impl NodeEntity for Person {
    fn schema() -> Result<NodeSchema> {
        NodeSchema::builder("Person", "name")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::string("handle").optional())
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Follows {
    since: Option<i64>,
}

impl RelationshipEntity for Follows {
    type Source = Person;
    type Target = Person;

    fn schema() -> Result<RelationshipSchema> {
        RelationshipSchema::between::<Person, Person>("FOLLOWS")
            .field(FieldSpec::integer("since").optional())
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Paid {
    reference: String,
    amount: f64,
}

impl RelationshipEntity for Paid {
    type Source = Person;
    type Target = Person;

    fn schema() -> Result<RelationshipSchema> {
        RelationshipSchema::between::<Person, Person>("PAID")
            .field(FieldSpec::string("reference").merge_on())
            .field(FieldSpec::float("amount"))
            .build()
    }
}

fn session() -> Session {
    let registry = Registry::builder()
        .node::<Person>()
        .unwrap()
        .relationship::<Follows>()
        .unwrap()
        .relationship::<Paid>()
        .unwrap()
        .build();
    let session = Session::open_memory(registry);
    session
        .merge_nodes(&[Person::new("Alice"), Person::new("Bob"), Person::new("Freddy"), Person::new("Philippa")])
        .unwrap();
    session
}

fn record(value: serde_json::Value) -> Record {
    serde_json::from_value(value).unwrap()
}

// ============================================================================
// 1. Merge by endpoints
// ============================================================================

#[test]
fn test_merge_relationship_is_idempotent() {
    let session = session();
    let edge = Edge::new(Person::new("Alice"), Person::new("Bob"), Follows { since: Some(2020) });

    session.merge_relationship(&edge).unwrap();
    let merged = session.merge_relationship(&Edge::new(Person::new("Alice"), Person::new("Bob"), Follows { since: Some(2021) })).unwrap();

    assert_eq!(merged.properties.since, Some(2021));
    assert_eq!(merged.source, Person::new("Alice"));
    let all = session.match_relationships::<Follows>(&Page::default()).unwrap();
    assert_eq!(all.len(), 1);
}

#[test]
fn test_missing_endpoint_fails_without_writing() {
    let session = session();
    let edges = vec![
        Edge::new(Person::new("Alice"), Person::new("Bob"), Follows { since: None }),
        Edge::new(Person::new("Alice"), Person::new("Nobody"), Follows { since: None }),
    ];
    let err = session.merge_relationships(&edges).unwrap_err();
    assert!(matches!(err, Error::EntityNotFound { .. }));
    assert!(session.match_relationships::<Follows>(&Page::default()).unwrap().is_empty());
}

// ============================================================================
// 2. Merge-on properties distinguish parallel relationships
// ============================================================================

#[test]
fn test_merge_on_creates_distinct_relationships() {
    let session = session();
    let pay = |reference: &str, amount: f64| {
        Edge::new(Person::new("Alice"), Person::new("Bob"), Paid { reference: reference.into(), amount })
    };

    session.merge_relationships(&[pay("inv-1", 10.0), pay("inv-2", 20.0)]).unwrap();
    session.merge_relationship(&pay("inv-1", 15.0)).unwrap();

    let mut paid = session.match_relationships::<Paid>(&Page::default()).unwrap();
    paid.sort_by(|a, b| a.properties.reference.cmp(&b.properties.reference));
    let summary: Vec<(&str, f64)> = paid.iter().map(|e| (e.properties.reference.as_str(), e.properties.amount)).collect();
    assert_eq!(summary, vec![("inv-1", 15.0), ("inv-2", 20.0)]);
}

#[test]
fn test_match_relationships_window() {
    let session = session();
    let edges: Vec<Edge<Follows>> = ["Bob", "Freddy", "Philippa"]
        .iter()
        .map(|t| Edge::new(Person::new("Alice"), Person::new(t), Follows { since: None }))
        .collect();
    session.merge_relationships(&edges).unwrap();

    let page = Page { skip: Some(1), limit: Some(1), order: None };
    assert_eq!(session.match_relationships::<Follows>(&page).unwrap().len(), 1);
    assert_eq!(session.match_relationships::<Follows>(&Page::default()).unwrap().len(), 3);
}

// ============================================================================
// 3. Relationship records
// ============================================================================

#[test]
fn test_relationship_records_between_existing_people() {
    let session = session();
    let records = vec![
        record(json!({"source": "Freddy", "target": "Philippa"})),
        record(json!({"source": "Alice", "target": "Freddy", "since": 2019})),
    ];

    let merged = session.merge_relationship_records::<Follows>(&records, &EndpointOverrides::default()).unwrap();

    assert_eq!(merged, 2);
    assert_eq!(session.count::<Person>(&Filters::new()).unwrap(), 4);
    let follows = session.match_relationships::<Follows>(&Page::default()).unwrap();
    assert_eq!(follows.len(), 2);
    assert!(follows.iter().any(|e| e.source.name == "Alice" && e.properties.since == Some(2019)));
}

#[test]
fn test_relationship_records_on_secondary_property() {
    let session = session();
    let overrides = EndpointOverrides {
        source_property: Some("handle".into()),
        target_property: Some("handle".into()),
        ..Default::default()
    };
    let records = vec![record(json!({"source": "@bob", "target": "@alice"}))];

    assert_eq!(session.merge_relationship_records::<Follows>(&records, &overrides).unwrap(), 1);
    let follows = session.match_relationships::<Follows>(&Page::default()).unwrap();
    assert_eq!(follows[0].source.name, "Bob");
    assert_eq!(follows[0].target.name, "Alice");
}

#[test]
fn test_relationship_records_missing_merge_on() {
    let session = session();
    let records = vec![record(json!({"source": "Alice", "target": "Bob", "amount": 3.5}))];
    let err = session.merge_relationship_records::<Paid>(&records, &EndpointOverrides::default()).unwrap_err();
    assert!(matches!(err, Error::TypeCoercion { .. }));
}

// ============================================================================
// 4. Schema validation
// ============================================================================

#[test]
fn test_reserved_field_names_rejected() {
    let err = RelationshipSchema::between::<Person, Person>("BAD")
        .field(FieldSpec::string("source"))
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidSchema { .. }));
}

#[test]
fn test_merge_on_with_other_policy_rejected() {
    let err = RelationshipSchema::between::<Person, Person>("BAD")
        .field(FieldSpec::string("reference").merge_on().set_on_create())
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidFieldPolicy { .. }));
}

#[test]
fn test_deleting_endpoint_detaches() {
    let session = session();
    session
        .merge_relationship(&Edge::new(Person::new("Alice"), Person::new("Bob"), Follows { since: None }))
        .unwrap();
    assert!(session.delete(&Person::new("Bob")).unwrap());
    assert!(session.match_relationships::<Follows>(&Page::default()).unwrap().is_empty());
}
