//! Relationship schemas: type tag, endpoint labels, fields.

use smallvec::SmallVec;

use super::field::FieldSpec;
use super::node::NodeSchema;
use super::validate_field_names;
use crate::cypher::is_identifier;
use crate::{Error, Result};

/// Field names a relationship record reserves for its endpoints.
pub const RESERVED_FIELDS: [&str; 2] = ["source", "target"];

/// Validated description of a relationship entity.
#[derive(Debug, Clone)]
pub struct RelationshipSchema {
    relationship_type: String,
    source_labels: SmallVec<[String; 2]>,
    target_labels: SmallVec<[String; 2]>,
    source_property: String,
    target_property: String,
    fields: Vec<FieldSpec>,
}

impl RelationshipSchema {
    /// Builder with endpoint labels and keys taken from the endpoint node schemas.
    pub fn between<S: super::NodeEntity, T: super::NodeEntity>(relationship_type: impl Into<String>) -> RelationshipSchemaBuilder {
        RelationshipSchemaBuilder {
            relationship_type: relationship_type.into(),
            source: EndpointDecl::Schema(S::schema),
            target: EndpointDecl::Schema(T::schema),
            fields: Vec::new(),
        }
    }

    /// Builder with explicitly declared endpoints.
    pub fn builder(relationship_type: impl Into<String>) -> RelationshipSchemaBuilder {
        RelationshipSchemaBuilder {
            relationship_type: relationship_type.into(),
            source: EndpointDecl::Unset,
            target: EndpointDecl::Unset,
            fields: Vec::new(),
        }
    }

    pub fn relationship_type(&self) -> &str {
        &self.relationship_type
    }

    /// Labels any of which a source node may carry.
    pub fn source_labels(&self) -> &[String] {
        &self.source_labels
    }

    pub fn target_labels(&self) -> &[String] {
        &self.target_labels
    }

    /// Property used to locate the source node (its primary key by default).
    pub fn source_property(&self) -> &str {
        &self.source_property
    }

    pub fn target_property(&self) -> &str {
        &self.target_property
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields that make up the relationship's merge identity, in declaration order.
    pub fn merge_on_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.policy.merge_on)
    }

    /// True if this relationship may connect nodes with these label sets.
    pub fn accepts(&self, source_labels: &[String], target_labels: &[String]) -> bool {
        source_labels.iter().any(|l| self.source_labels.contains(l))
            && target_labels.iter().any(|l| self.target_labels.contains(l))
    }
}

#[derive(Debug, Clone)]
enum EndpointDecl {
    Unset,
    Schema(fn() -> Result<NodeSchema>),
    Explicit { labels: Vec<String>, property: String },
}

impl EndpointDecl {
    fn resolve(self, entity: &str, end: &str) -> Result<(SmallVec<[String; 2]>, String)> {
        let invalid = |reason: String| Error::InvalidSchema { entity: entity.to_owned(), reason };
        match self {
            EndpointDecl::Unset => Err(invalid(format!("{end} endpoint is not declared"))),
            EndpointDecl::Schema(schema) => {
                let schema = schema()?;
                let label = schema
                    .primary_label()
                    .ok_or_else(|| invalid(format!("{end} endpoint type is abstract; declare its labels explicitly")))?;
                Ok((SmallVec::from_iter([label.to_owned()]), schema.primary_key().to_owned()))
            }
            EndpointDecl::Explicit { labels, property } => {
                if labels.is_empty() {
                    return Err(invalid(format!("{end} endpoint needs at least one label")));
                }
                if let Some(bad) = labels.iter().find(|l| !is_identifier(l)) {
                    return Err(invalid(format!("'{bad}' is not a valid label")));
                }
                if !is_identifier(&property) {
                    return Err(invalid(format!("'{property}' is not a valid property name")));
                }
                Ok((labels.into_iter().collect(), property))
            }
        }
    }
}

/// Collects a relationship declaration; [`build`](Self::build) validates it.
#[derive(Debug, Clone)]
pub struct RelationshipSchemaBuilder {
    relationship_type: String,
    source: EndpointDecl,
    target: EndpointDecl,
    fields: Vec<FieldSpec>,
}

impl RelationshipSchemaBuilder {
    /// Declare the source endpoint: any of `labels`, located by `property`.
    pub fn source(mut self, labels: impl IntoIterator<Item = impl Into<String>>, property: impl Into<String>) -> Self {
        self.source = EndpointDecl::Explicit {
            labels: labels.into_iter().map(Into::into).collect(),
            property: property.into(),
        };
        self
    }

    pub fn target(mut self, labels: impl IntoIterator<Item = impl Into<String>>, property: impl Into<String>) -> Self {
        self.target = EndpointDecl::Explicit {
            labels: labels.into_iter().map(Into::into).collect(),
            property: property.into(),
        };
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn build(self) -> Result<RelationshipSchema> {
        let entity = self.relationship_type.clone();
        let policy = |field: &str, reason: &str| Error::InvalidFieldPolicy {
            entity: entity.clone(),
            field: field.to_owned(),
            reason: reason.to_owned(),
        };

        if !is_identifier(&self.relationship_type) {
            return Err(Error::InvalidSchema {
                entity: entity.clone(),
                reason: format!("'{}' is not a valid relationship type", self.relationship_type),
            });
        }

        validate_field_names(&entity, &self.fields)?;
        if let Some(f) = self.fields.iter().find(|f| RESERVED_FIELDS.contains(&f.property_name())) {
            return Err(Error::InvalidSchema {
                entity: entity.clone(),
                reason: format!("'{}' is reserved for relationship endpoints", f.property_name()),
            });
        }

        for field in &self.fields {
            let p = field.policy;
            if p.set_on_create && p.set_on_match {
                return Err(policy(&field.name, "set_on_create and set_on_match are mutually exclusive"));
            }
            if p.merge_on && (p.set_on_create || p.set_on_match) {
                return Err(policy(&field.name, "merge_on fields are part of the identity and take no other policy"));
            }
            if p.merge_on && field.optional && field.default.is_none() {
                return Err(policy(&field.name, "merge_on fields must be required"));
            }
            if p.set_on_match && !field.optional && field.default.is_none() {
                return Err(policy(&field.name, "set_on_match fields must be optional or carry a default"));
            }
        }

        let (source_labels, source_property) = self.source.resolve(&entity, "source")?;
        let (target_labels, target_property) = self.target.resolve(&entity, "target")?;

        Ok(RelationshipSchema {
            relationship_type: self.relationship_type,
            source_labels,
            target_labels,
            source_property,
            target_property,
            fields: self.fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn follows() -> RelationshipSchemaBuilder {
        RelationshipSchema::builder("FOLLOWS")
            .source(["Person"], "name")
            .target(["Person"], "name")
    }

    #[test]
    fn test_builds_with_explicit_endpoints() {
        let schema = follows()
            .field(FieldSpec::string("since").optional().set_on_create())
            .build()
            .unwrap();
        assert_eq!(schema.relationship_type(), "FOLLOWS");
        assert_eq!(schema.source_labels(), ["Person".to_string()]);
        assert_eq!(schema.target_property(), "name");
        let labels = |ls: &[&str]| ls.iter().map(|l| l.to_string()).collect::<Vec<_>>();
        assert!(schema.accepts(&labels(&["Person"]), &labels(&["Person", "Admin"])));
        assert!(!schema.accepts(&labels(&["Team"]), &labels(&["Person"])));
    }

    #[test]
    fn test_merge_on_rules() {
        let ok = follows().field(FieldSpec::string("context").merge_on()).build().unwrap();
        assert_eq!(ok.merge_on_fields().count(), 1);

        let optional = follows().field(FieldSpec::string("context").optional().merge_on()).build();
        assert!(matches!(optional, Err(Error::InvalidFieldPolicy { .. })));

        let mixed = follows().field(FieldSpec::string("context").merge_on().set_on_create()).build();
        assert!(matches!(mixed, Err(Error::InvalidFieldPolicy { .. })));
    }

    #[test]
    fn test_rejects_reserved_and_invalid_names() {
        let reserved = follows().field(FieldSpec::string("source")).build();
        assert!(matches!(reserved, Err(Error::InvalidSchema { .. })));

        let bad_type = RelationshipSchema::builder("NOT VALID")
            .source(["Person"], "name")
            .target(["Person"], "name")
            .build();
        assert!(matches!(bad_type, Err(Error::InvalidSchema { .. })));
    }

    #[test]
    fn test_requires_endpoints() {
        let err = RelationshipSchema::builder("FOLLOWS").build();
        assert!(matches!(err, Err(Error::InvalidSchema { .. })));
    }
}
