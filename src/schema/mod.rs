//! # Entity Schemas
//!
//! How a Rust type maps onto the graph. A node or relationship type
//! implements [`NodeEntity`] / [`RelationshipEntity`] by returning a
//! validated schema; serde does the field plumbing, the schema says which
//! fields are stored, under what name, and when they are written.
//!
//! Validation happens in `build()`. A schema that builds never produces an
//! invalid write plan.

pub mod field;
pub mod markdown;
pub mod node;
pub mod relationship;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use field::{FieldDeserializer, FieldKind, FieldPolicy, FieldSerializer, FieldSpec, ScalarKind};
pub use node::{NodeSchema, NodeSchemaBuilder};
pub use relationship::{RelationshipSchema, RelationshipSchemaBuilder};

use crate::cypher::is_identifier;
use crate::{Error, Result};

// ============================================================================
// Entity traits
// ============================================================================

/// A typed node.
pub trait NodeEntity: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn schema() -> Result<NodeSchema>;
}

/// A typed relationship. The implementing type holds the relationship's own
/// properties; endpoints travel alongside it in an [`Edge`].
pub trait RelationshipEntity: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Source: NodeEntity;
    type Target: NodeEntity;

    fn schema() -> Result<RelationshipSchema>;
}

/// A relationship instance: source, target and properties.
pub struct Edge<R: RelationshipEntity> {
    pub source: R::Source,
    pub target: R::Target,
    pub properties: R,
    /// Backend identity, filled when the edge comes back from an engine.
    pub element_id: Option<String>,
}

impl<R: RelationshipEntity> Edge<R> {
    pub fn new(source: R::Source, target: R::Target, properties: R) -> Self {
        Self { source, target, properties, element_id: None }
    }
}

impl<R> Clone for Edge<R>
where
    R: RelationshipEntity + Clone,
    R::Source: Clone,
    R::Target: Clone,
{
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            target: self.target.clone(),
            properties: self.properties.clone(),
            element_id: self.element_id.clone(),
        }
    }
}

impl<R> fmt::Debug for Edge<R>
where
    R: RelationshipEntity + fmt::Debug,
    R::Source: fmt::Debug,
    R::Target: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("properties", &self.properties)
            .field("element_id", &self.element_id)
            .finish()
    }
}

/// Element ids are backend identity, not content; equality ignores them.
impl<R> PartialEq for Edge<R>
where
    R: RelationshipEntity + PartialEq,
    R::Source: PartialEq,
    R::Target: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.target == other.target && self.properties == other.properties
    }
}

// ============================================================================
// Shared validation
// ============================================================================

/// Field names unique, stored property names valid and unique.
pub(crate) fn validate_field_names(entity: &str, fields: &[FieldSpec]) -> Result<()> {
    let invalid = |reason: String| Error::InvalidSchema { entity: entity.to_owned(), reason };
    for (i, field) in fields.iter().enumerate() {
        if !is_identifier(field.property_name()) {
            return Err(invalid(format!("'{}' is not a valid property name", field.property_name())));
        }
        let earlier = &fields[..i];
        if earlier.iter().any(|f| f.name == field.name) {
            return Err(invalid(format!("field '{}' is declared twice", field.name)));
        }
        if earlier.iter().any(|f| f.property_name() == field.property_name()) {
            return Err(invalid(format!("property '{}' is stored by two fields", field.property_name())));
        }
    }
    Ok(())
}
