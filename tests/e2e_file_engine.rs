//! End-to-end tests for the embedded file engine: state survives reopening.

use neontology::{
    Edge, EngineConfig, Error, FieldSpec, Filters, NodeEntity, NodeSchema, Page, Registry, RelationshipEntity,
    RelationshipSchema, Result, Session,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct City {
    name: String,
    population: Option<i64>,
}

impl City {
    fn new(name: &str, population: i64) -> Self {
        Self { name: name.into(), population: Some(population) }
    }
}

impl NodeEntity for City {
    fn schema() -> Result<NodeSchema> {
        NodeSchema::builder("City", "name")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::integer("population").optional())
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Road {
    km: f64,
}

impl RelationshipEntity for Road {
    type Source = City;
    type Target = City;

    fn schema() -> Result<RelationshipSchema> {
        RelationshipSchema::between::<City, City>("ROAD").field(FieldSpec::float("km")).build()
    }
}

fn registry() -> Registry {
    Registry::builder().node::<City>().unwrap().relationship::<Road>().unwrap().build()
}

#[test]
fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::File { path: dir.path().join("graph.json") };

    {
        let session = Session::open(&config, registry()).unwrap();
        session.merge_nodes(&[City::new("Lyon", 500_000), City::new("Paris", 2_100_000)]).unwrap();
        session.merge_relationship(&Edge::new(City::new("Lyon", 500_000), City::new("Paris", 2_100_000), Road { km: 465.0 })).unwrap();
        session.apply_constraint::<City>().unwrap();
        session.close().unwrap();
    }

    let session = Session::open(&config, registry()).unwrap();
    assert_eq!(session.count::<City>(&Filters::new()).unwrap(), 2);
    assert_eq!(session.get::<City>("Lyon").unwrap().population, Some(500_000));
    let roads = session.match_relationships::<Road>(&Page::default()).unwrap();
    assert_eq!(roads.len(), 1);
    assert_eq!(roads[0].properties.km, 465.0);
    assert_eq!(session.engine().constraints().unwrap(), vec![("City".to_string(), "name".to_string())]);

    // Ids keep increasing after a reload.
    session.merge(&City::new("Nice", 340_000)).unwrap();
    assert_eq!(session.count::<City>(&Filters::new()).unwrap(), 3);
}

#[test]
fn test_failed_write_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.json");
    let session = Session::open(&EngineConfig::File { path: path.clone() }, registry()).unwrap();
    let journal = dir.path().join("graph.json.journal");
    session.create(&City::new("Lyon", 1)).unwrap();
    let before = (std::fs::read(&path).unwrap(), std::fs::read(&journal).unwrap());

    let err = session.create(&City::new("Lyon", 2)).unwrap_err();
    assert!(matches!(err, Error::EntityExists { .. }));
    assert_eq!((std::fs::read(&path).unwrap(), std::fs::read(&journal).unwrap()), before);
}

#[test]
fn test_queries_run_against_the_file_engine() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::open(&EngineConfig::File { path: dir.path().join("graph.json") }, registry()).unwrap();
    session.merge_nodes(&[City::new("Lyon", 500_000), City::new("Paris", 2_100_000)]).unwrap();
    session.merge_relationship(&Edge::new(City::new("Lyon", 500_000), City::new("Paris", 2_100_000), Road { km: 465.0 })).unwrap();

    let reachable: Vec<City> = session
        .related_nodes::<City>("Lyon", "MATCH (:City {name: $key})-[:ROAD]->(c:City) RETURN c", Default::default())
        .unwrap();
    assert_eq!(reachable, vec![City::new("Paris", 2_100_000)]);
}

#[test]
fn test_corrupt_snapshot_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.json");
    std::fs::write(&path, b"{ not json").unwrap();

    let err = Session::open(&EngineConfig::File { path }, registry()).unwrap_err();
    assert!(matches!(err, Error::Serialization(_)));
}
