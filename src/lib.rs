//! # neontology: typed object-graph mapping for property-graph databases
//!
//! Declare typed nodes and relationships, merge them idempotently into a
//! graph engine, and rehydrate raw query results back into those types.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `GraphEngine` is the contract between the mapping layer and a backend
//! 2. **Clean DTOs**: `Node`, `Relationship`, `Value` cross every engine boundary
//! 3. **Explicit sessions**: a caller-owned `Session` carries the engine and the registry;
//!    the process-wide default in [`connection`] is a convenience at the outer edge
//! 4. **Declared, validated schemas**: field policies are checked when a schema is built,
//!    never at write time
//!
//! ## Quick Start
//!
//! ```rust
//! use neontology::{FieldSpec, NodeEntity, NodeSchema, Registry, Session};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Person {
//!     name: String,
//!     age: Option<i64>,
//! }
//!
//! impl NodeEntity for Person {
//!     fn schema() -> neontology::Result<NodeSchema> {
//!         NodeSchema::builder("Person", "name")
//!             .field(FieldSpec::string("name"))
//!             .field(FieldSpec::integer("age").optional())
//!             .build()
//!     }
//! }
//!
//! # fn main() -> neontology::Result<()> {
//! let registry = Registry::builder().node::<Person>()?.build();
//! let session = Session::open_memory(registry);
//!
//! session.merge(&Person { name: "Ada".into(), age: Some(36) })?;
//! let ada: Option<Person> = session.match_node("Ada")?;
//! assert_eq!(ada.and_then(|p| p.age), Some(36));
//! # Ok(())
//! # }
//! ```
//!
//! ## Engines
//!
//! | Engine | Feature | Description |
//! |--------|---------|-------------|
//! | Memory | (default) | In-memory graph for testing/embedding |
//! | File | (default) | Embedded: in-memory graph persisted to a JSON snapshot file |
//! | Neo4j | `bolt` | External Neo4j via the Bolt protocol |
//! | Memgraph | `bolt` | External Memgraph via the Bolt protocol |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod schema;
pub mod coerce;
pub mod filter;
pub mod reconcile;
pub mod cypher;
pub mod engine;
pub mod config;
pub mod registry;
pub mod result;
pub mod session;
pub mod ingest;
pub mod import;
pub mod connection;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Node, Relationship, Path, Value, PropertyMap,
    NodeId, RelId,
};

// ============================================================================
// Re-exports: Entity definitions
// ============================================================================

pub use schema::{
    NodeEntity, RelationshipEntity, Edge,
    NodeSchema, RelationshipSchema, FieldSpec, FieldKind, ScalarKind, FieldPolicy,
};

// ============================================================================
// Re-exports: Engines and configuration
// ============================================================================

pub use engine::{GraphEngine, EngineKind, EngineCapabilities, EdgeRecord, MemoryEngine, FileEngine};
pub use config::{EngineConfig, BoltConfig};

// ============================================================================
// Re-exports: Sessions, queries, results
// ============================================================================

pub use filter::{Filters, MatchQuery, Page, OrderBy};
pub use registry::{Registry, RegistryBuilder};
pub use result::{QueryResult, RawResult, ResultRow, TypedNode, TypedRelationship, Hydrated, NodeLinkData};
pub use session::Session;
pub use ingest::{Record, Table, EndpointOverrides};
pub use import::{ImportOptions, ImportSummary, FileImport};
pub use connection::{NodeOps, RelationshipOps};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport, authentication or protocol failure reported by the backend driver.
    #[error("Engine connection error: {0}")]
    EngineConnection(String),

    #[error("Entity already exists: {label} with {key} = {value}")]
    EntityExists { label: String, key: String, value: String },

    #[error("Entity not found: {label} with {key} = {value}")]
    EntityNotFound { label: String, key: String, value: String },

    #[error("Unsupported type for field '{field}': {found}")]
    UnsupportedType { field: String, found: String },

    #[error("Cannot coerce field '{field}': expected {expected}, got {got}")]
    TypeCoercion { field: String, expected: String, got: String },

    #[error("Invalid filter '{key}': {reason}")]
    InvalidFilter { key: String, reason: String },

    #[error("Invalid field policy on {entity}.{field}: {reason}")]
    InvalidFieldPolicy { entity: String, field: String, reason: String },

    #[error("Invalid schema for {entity}: {reason}")]
    InvalidSchema { entity: String, reason: String },

    #[error("Cypher syntax error at position {position}: {message}")]
    SyntaxError { position: usize, message: String },

    /// Write clauses in query text; only a Cypher backend runs those.
    #[error("Query text can only read on this engine: {clause} needs a Cypher backend")]
    ReadOnlyQuery { clause: String },

    #[error("Query evaluation error: {0}")]
    QueryEvaluation(String),

    #[error("Query returned no records: {statement}")]
    EmptyResult { statement: String },

    #[error("Graph connection not initialized: call connection::init first")]
    NotInitialized,

    #[error("Invalid import record: {reason}")]
    InvalidRecord { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
