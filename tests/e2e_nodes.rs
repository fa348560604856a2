//! End-to-end tests for typed node operations against the memory engine.
//!
//! Each test declares entities, merges or creates them through a `Session`,
//! and reads them back through the typed surface.

use chrono::NaiveDate;
use neontology::{
    Error, FieldSpec, Filters, MatchQuery, NodeEntity, NodeSchema, Registry, Result, ScalarKind, Session, Table,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Person {
    name: String,
    age: Option<i64>,
    #[serde(default)]
    favorite_colors: Vec<String>,
    born: Option<NaiveDate>,
}

impl Person {
    fn new(name: &str, age: i64) -> Self {
        Self { name: name.into(), age: Some(age), favorite_colors: Vec::new(), born: None }
    }
}

impl NodeEntity for Person {
    fn schema() -> Result<NodeSchema> {
        NodeSchema::builder("Person", "name")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::integer("age").optional())
            .field(FieldSpec::list("favorite_colors", ScalarKind::String).optional())
            .field(FieldSpec::date("born").optional())
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Mammal {
    name: String,
}

impl NodeEntity for Mammal {
    fn schema() -> Result<NodeSchema> {
        NodeSchema::builder("Mammal", "name").field(FieldSpec::string("name")).build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Human {
    name: String,
    occupation: Option<String>,
}

impl NodeEntity for Human {
    fn schema() -> Result<NodeSchema> {
        NodeSchema::builder("Human", "name")
            .extend(&Mammal::schema()?)
            .field(FieldSpec::string("occupation").optional())
            .build()
    }
}

fn session() -> Session {
    let registry = Registry::builder()
        .node::<Person>()
        .unwrap()
        .node::<Visitor>()
        .unwrap()
        .node::<Mammal>()
        .unwrap()
        .node::<Human>()
        .unwrap()
        .build();
    Session::open_memory(registry)
}

fn seed_people(session: &Session) {
    session
        .merge_nodes(&[Person::new("Alice", 30), Person::new("Bob", 40), Person::new("Carol", 50)])
        .unwrap();
}

// ============================================================================
// 1. Merge is idempotent
// ============================================================================

#[test]
fn test_merge_twice_keeps_one_node() {
    let session = session();
    let ada = Person::new("Ada", 36);

    session.merge(&ada).unwrap();
    session.merge(&ada).unwrap();

    assert_eq!(session.count::<Person>(&Filters::new()).unwrap(), 1);
    assert_eq!(session.match_node::<Person>("Ada").unwrap(), Some(ada));
}

#[test]
fn test_merge_updates_plain_fields() {
    let session = session();
    session.merge(&Person::new("Ada", 36)).unwrap();
    session.merge(&Person::new("Ada", 37)).unwrap();

    let ada = session.get::<Person>("Ada").unwrap();
    assert_eq!(ada.age, Some(37));
}

// ============================================================================
// 2. Field policies
// ============================================================================

#[test]
fn test_set_on_create_and_set_on_match() {
    let session = session();
    let first = Visitor { name: "v1".into(), first_seen: Some("mon".into()), last_seen: Some("mon".into()), visits: Some(1) };
    let stored = session.merge(&first).unwrap();
    assert_eq!(stored.first_seen.as_deref(), Some("mon"));
    assert_eq!(stored.last_seen, None);

    let second = Visitor { name: "v1".into(), first_seen: Some("tue".into()), last_seen: Some("tue".into()), visits: Some(2) };
    let stored = session.merge(&second).unwrap();
    assert_eq!(stored.first_seen.as_deref(), Some("mon"));
    assert_eq!(stored.last_seen.as_deref(), Some("tue"));
    assert_eq!(stored.visits, Some(2));
}

#[test]
fn test_create_skips_set_on_match_fields() {
    let session = session();
    let v = Visitor { name: "v2".into(), first_seen: Some("mon".into()), last_seen: Some("mon".into()), visits: None };
    let created = session.create(&v).unwrap();
    assert_eq!(created.first_seen.as_deref(), Some("mon"));
    assert_eq!(created.last_seen, None);
}

#[test]
fn test_conflicting_policies_rejected_at_build() {
    let err = NodeSchema::builder("Broken", "name")
        .field(FieldSpec::string("name"))
        .field(FieldSpec::string("seen").optional().set_on_create().set_on_match())
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidFieldPolicy { ref field, .. } if field == "seen"));
}

#[test]
fn test_required_set_on_match_rejected_at_build() {
    let err = NodeSchema::builder("Broken", "name")
        .field(FieldSpec::string("name"))
        .field(FieldSpec::string("seen").set_on_match())
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidFieldPolicy { .. }));
}

// ============================================================================
// 3. Create
// ============================================================================

#[test]
fn test_create_then_match_is_equal() {
    let session = session();
    let ada = Person {
        name: "Ada".into(),
        age: Some(36),
        favorite_colors: vec!["green".into(), "gold".into()],
        born: NaiveDate::from_ymd_opt(1815, 12, 10),
    };
    let created = session.create(&ada).unwrap();
    assert_eq!(created, ada);
    assert_eq!(session.match_node::<Person>("Ada").unwrap(), Some(ada));
}

#[test]
fn test_create_existing_key_fails() {
    let session = session();
    session.create(&Person::new("Ada", 36)).unwrap();
    let err = session.create(&Person::new("Ada", 99)).unwrap_err();
    assert!(matches!(err, Error::EntityExists { .. }));
    assert_eq!(session.get::<Person>("Ada").unwrap().age, Some(36));
}

#[test]
fn test_create_batch_is_all_or_nothing() {
    let session = session();
    session.create(&Person::new("Bob", 40)).unwrap();
    let err = session.create_nodes(&[Person::new("Ada", 36), Person::new("Bob", 41)]).unwrap_err();
    assert!(matches!(err, Error::EntityExists { .. }));
    assert_eq!(session.match_node::<Person>("Ada").unwrap(), None);
}

// ============================================================================
// 4. Match with filters and windows
// ============================================================================

#[test]
fn test_gte_filter_is_inclusive() {
    let session = session();
    seed_people(&session);

    let older = session.match_nodes::<Person>(&MatchQuery::new().filter("age__gte", 40i64).order_by("age")).unwrap();
    let names: Vec<&str> = older.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Bob", "Carol"]);
}

#[test]
fn test_string_and_in_filters() {
    let session = session();
    seed_people(&session);

    let c = session.match_nodes::<Person>(&MatchQuery::new().filter("name__startswith", "C")).unwrap();
    assert_eq!(c.len(), 1);
    assert_eq!(c[0].name, "Carol");

    let n = session.count::<Person>(&Filters::new().with("age__in", vec![30i64, 50])).unwrap();
    assert_eq!(n, 2);
}

#[test]
fn test_order_skip_limit() {
    let session = session();
    seed_people(&session);

    let page = session
        .match_nodes::<Person>(&MatchQuery::new().order_by_desc("age").skip(1).limit(1))
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].name, "Bob");
}

#[test]
fn test_date_filter_accepts_iso_string() {
    let session = session();
    let mut ada = Person::new("Ada", 36);
    ada.born = NaiveDate::from_ymd_opt(1815, 12, 10);
    session.merge(&ada).unwrap();
    session.merge(&Person::new("Bob", 40)).unwrap();

    let n = session.count::<Person>(&Filters::new().with("born__lt", "1900-01-01")).unwrap();
    assert_eq!(n, 1);
}

#[test]
fn test_unknown_filter_rejected() {
    let session = session();
    let err = session.count::<Person>(&Filters::new().with("height__gt", 2i64)).unwrap_err();
    assert!(matches!(err, Error::InvalidFilter { .. }));
    let err = session.count::<Person>(&Filters::new().with("age__near", 2i64)).unwrap_err();
    assert!(matches!(err, Error::InvalidFilter { .. }));
}

// ============================================================================
// 5. Delete
// ============================================================================

#[test]
fn test_delete_reports_existence() {
    let session = session();
    let ada = Person::new("Ada", 36);
    session.merge(&ada).unwrap();

    assert!(session.delete(&ada).unwrap());
    assert!(!session.delete(&ada).unwrap());
    assert!(matches!(session.get::<Person>("Ada"), Err(Error::EntityNotFound { .. })));
}

// ============================================================================
// 6. Inherited labels
// ============================================================================

#[test]
fn test_subtype_carries_parent_label() {
    let session = session();
    session.merge(&Human { name: "Grace".into(), occupation: Some("admiral".into()) }).unwrap();
    session.merge(&Mammal { name: "Rex".into() }).unwrap();

    let mammals = session.match_nodes::<Mammal>(&MatchQuery::new().order_by("name")).unwrap();
    let names: Vec<&str> = mammals.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["Grace", "Rex"]);
    assert_eq!(session.count::<Human>(&Filters::new()).unwrap(), 1);
}

// ============================================================================
// 7. Tabular ingestion
// ============================================================================

#[test]
fn test_merge_table_deduplicates() {
    let session = session();
    let table = Table::new(["name", "age"])
        .with_row([json!("Ada"), json!(36)])
        .with_row([json!("Bob"), json!(40)])
        .with_row([json!("Ada"), json!(36)]);

    let merged = session.merge_table::<Person>(&table, true).unwrap();
    let names: Vec<&str> = merged.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Ada", "Bob"]);
    assert_eq!(session.count::<Person>(&Filters::new()).unwrap(), 2);
}

#[test]
fn test_merge_records_rejects_bad_row_before_writing() {
    let session = session();
    let records: Vec<neontology::Record> = vec![
        serde_json::from_value(json!({"name": "Ada", "age": 36})).unwrap(),
        serde_json::from_value(json!({"name": "Bob", "age": "forty"})).unwrap(),
    ];
    let err = session.merge_records::<Person>(&records).unwrap_err();
    assert!(matches!(err, Error::TypeCoercion { .. }));
    assert_eq!(session.count::<Person>(&Filters::new()).unwrap(), 0);
}
