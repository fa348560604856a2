//! Node schemas: labels, primary property, fields, element-id binding.

use smallvec::SmallVec;

use super::field::{FieldKind, FieldSpec, ScalarKind};
use super::validate_field_names;
use crate::cypher::is_identifier;
use crate::{Error, Result};

/// Validated description of a node entity.
///
/// A schema without a primary label is *abstract*: it can carry shared
/// fields for other schemas to [`NodeSchemaBuilder::extend`] but cannot be
/// persisted itself.
#[derive(Debug, Clone)]
pub struct NodeSchema {
    primary_label: Option<String>,
    primary_property: String,
    secondary_labels: SmallVec<[String; 2]>,
    element_id_property: Option<String>,
    fields: Vec<FieldSpec>,
}

impl NodeSchema {
    pub fn builder(primary_label: impl Into<String>, primary_property: impl Into<String>) -> NodeSchemaBuilder {
        NodeSchemaBuilder::new(Some(primary_label.into()), primary_property.into())
    }

    /// Builder for a schema with no primary label.
    pub fn abstract_builder(primary_property: impl Into<String>) -> NodeSchemaBuilder {
        NodeSchemaBuilder::new(None, primary_property.into())
    }

    /// Label for error messages and logs.
    pub fn entity(&self) -> &str {
        self.primary_label.as_deref().unwrap_or("<abstract node>")
    }

    pub fn primary_label(&self) -> Option<&str> {
        self.primary_label.as_deref()
    }

    /// Primary label, or `InvalidSchema` for an abstract schema.
    pub fn require_label(&self) -> Result<&str> {
        self.primary_label.as_deref().ok_or_else(|| Error::InvalidSchema {
            entity: self.entity().to_owned(),
            reason: "abstract node schemas have no primary label and cannot be written or matched".into(),
        })
    }

    pub fn is_abstract(&self) -> bool {
        self.primary_label.is_none()
    }

    /// Field name of the primary property.
    pub fn primary_field_name(&self) -> &str {
        &self.primary_property
    }

    /// The declared primary field. Always present after `build()`.
    pub fn primary_field(&self) -> Option<&FieldSpec> {
        self.field(&self.primary_property)
    }

    /// Stored property name of the primary property.
    pub fn primary_key(&self) -> &str {
        self.primary_field().map(FieldSpec::property_name).unwrap_or(&self.primary_property)
    }

    pub fn secondary_labels(&self) -> &[String] {
        &self.secondary_labels
    }

    /// Primary label first, then secondary labels in declaration order.
    pub fn all_labels(&self) -> Vec<&str> {
        self.primary_label
            .iter()
            .chain(self.secondary_labels.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn element_id_property(&self) -> Option<&str> {
        self.element_id_property.as_deref()
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_property(&self, property: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.property_name() == property)
    }

    /// Fields written to the backend: everything except the element-id binding.
    pub fn writable_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .filter(move |f| Some(f.name.as_str()) != self.element_id_property.as_deref())
    }
}

/// Collects a node declaration; [`build`](Self::build) validates it.
#[derive(Debug, Clone)]
pub struct NodeSchemaBuilder {
    primary_label: Option<String>,
    primary_property: String,
    secondary_labels: Vec<String>,
    element_id_property: Option<String>,
    fields: Vec<FieldSpec>,
}

impl NodeSchemaBuilder {
    fn new(primary_label: Option<String>, primary_property: String) -> Self {
        Self {
            primary_label,
            primary_property,
            secondary_labels: Vec::new(),
            element_id_property: None,
            fields: Vec::new(),
        }
    }

    pub fn secondary_label(mut self, label: impl Into<String>) -> Self {
        self.secondary_labels.push(label.into());
        self
    }

    pub fn secondary_labels(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.secondary_labels.extend(labels.into_iter().map(Into::into));
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Bind a declared optional string field to the backend element id.
    /// The field is filled on read and never written.
    pub fn element_id(mut self, field: impl Into<String>) -> Self {
        self.element_id_property = Some(field.into());
        self
    }

    /// Inherit fields, secondary labels and the element-id binding from a
    /// parent schema. The parent's primary label becomes a secondary label.
    /// Fields declared on this builder take precedence over inherited ones.
    pub fn extend(mut self, parent: &NodeSchema) -> Self {
        let mut inherited_labels: Vec<String> = parent.primary_label.iter().cloned().collect();
        inherited_labels.extend(parent.secondary_labels.iter().cloned());
        inherited_labels.append(&mut self.secondary_labels);
        self.secondary_labels = inherited_labels;

        let mut fields: Vec<FieldSpec> = parent
            .fields
            .iter()
            .filter(|pf| !self.fields.iter().any(|f| f.name == pf.name))
            .cloned()
            .collect();
        fields.append(&mut self.fields);
        self.fields = fields;

        if self.element_id_property.is_none() {
            self.element_id_property = parent.element_id_property.clone();
        }
        self
    }

    pub fn build(self) -> Result<NodeSchema> {
        let entity = self.primary_label.clone().unwrap_or_else(|| "<abstract node>".into());
        let invalid = |reason: String| Error::InvalidSchema { entity: entity.clone(), reason };
        let policy = |field: &str, reason: &str| Error::InvalidFieldPolicy {
            entity: entity.clone(),
            field: field.to_owned(),
            reason: reason.to_owned(),
        };

        if let Some(label) = &self.primary_label {
            if !is_identifier(label) {
                return Err(invalid(format!("'{label}' is not a valid label")));
            }
        }

        let mut secondary: SmallVec<[String; 2]> = SmallVec::new();
        for label in self.secondary_labels {
            if !is_identifier(&label) {
                return Err(invalid(format!("'{label}' is not a valid label")));
            }
            if Some(&label) != self.primary_label.as_ref() && !secondary.contains(&label) {
                secondary.push(label);
            }
        }

        validate_field_names(&entity, &self.fields)?;

        let primary = self
            .fields
            .iter()
            .find(|f| f.name == self.primary_property)
            .ok_or_else(|| invalid(format!("primary property '{}' is not a declared field", self.primary_property)))?;
        if primary.optional && primary.default.is_none() {
            return Err(invalid(format!("primary property '{}' must be required", primary.name)));
        }
        if !primary.policy.is_always_set() {
            return Err(policy(&primary.name, "the primary property identifies the node and takes no write policy"));
        }

        for field in &self.fields {
            if field.policy.merge_on {
                return Err(policy(&field.name, "merge_on applies to relationship fields only"));
            }
            if field.policy.set_on_create && field.policy.set_on_match {
                return Err(policy(&field.name, "set_on_create and set_on_match are mutually exclusive"));
            }
            if field.policy.set_on_match && !field.optional && field.default.is_none() {
                return Err(policy(&field.name, "set_on_match fields must be optional or carry a default"));
            }
        }

        if let Some(eid) = &self.element_id_property {
            let field = self
                .fields
                .iter()
                .find(|f| &f.name == eid)
                .ok_or_else(|| invalid(format!("element-id property '{eid}' is not a declared field")))?;
            if field.kind != FieldKind::Scalar(ScalarKind::String) || !field.optional {
                return Err(policy(eid, "the element-id field must be an optional string"));
            }
            if !field.policy.is_always_set() {
                return Err(policy(eid, "the element-id field is never written and takes no write policy"));
            }
            if eid == &self.primary_property {
                return Err(policy(eid, "the element-id field cannot be the primary property"));
            }
        }

        Ok(NodeSchema {
            primary_label: self.primary_label,
            primary_property: self.primary_property,
            secondary_labels: secondary,
            element_id_property: self.element_id_property,
            fields: self.fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> NodeSchema {
        NodeSchema::builder("Person", "name")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::integer("age").optional())
            .build()
            .unwrap()
    }

    #[test]
    fn test_builds_valid_schema() {
        let schema = person();
        assert_eq!(schema.primary_label(), Some("Person"));
        assert_eq!(schema.primary_key(), "name");
        assert_eq!(schema.all_labels(), vec!["Person"]);
        assert_eq!(schema.fields().len(), 2);
    }

    #[test]
    fn test_rejects_create_and_match_together() {
        let err = NodeSchema::builder("Person", "name")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::integer("age").optional().set_on_create().set_on_match())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFieldPolicy { ref field, .. } if field == "age"));
    }

    #[test]
    fn test_rejects_required_set_on_match() {
        let err = NodeSchema::builder("Person", "name")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::string("last_seen").set_on_match())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFieldPolicy { .. }));
    }

    #[test]
    fn test_rejects_merge_on_for_nodes() {
        let err = NodeSchema::builder("Person", "name")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::string("nickname").merge_on())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFieldPolicy { .. }));
    }

    #[test]
    fn test_rejects_undeclared_primary_and_bad_labels() {
        let missing = NodeSchema::builder("Person", "id").field(FieldSpec::string("name")).build();
        assert!(matches!(missing, Err(Error::InvalidSchema { .. })));

        let bad_label = NodeSchema::builder("Bad Label", "name").field(FieldSpec::string("name")).build();
        assert!(matches!(bad_label, Err(Error::InvalidSchema { .. })));
    }

    #[test]
    fn test_extend_inherits_fields_and_labels() {
        let mammal = NodeSchema::abstract_builder("name")
            .secondary_label("Mammal")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::integer("legs").optional())
            .build()
            .unwrap();
        assert!(mammal.is_abstract());
        assert!(mammal.require_label().is_err());

        let human = NodeSchema::builder("Human", "name")
            .extend(&mammal)
            .field(FieldSpec::string("job").optional())
            .build()
            .unwrap();
        assert_eq!(human.all_labels(), vec!["Human", "Mammal"]);
        assert!(human.field("legs").is_some());
        assert!(human.field("job").is_some());
    }

    #[test]
    fn test_element_id_binding() {
        let schema = NodeSchema::builder("Person", "name")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::string("element_id").optional())
            .element_id("element_id")
            .build()
            .unwrap();
        assert_eq!(schema.element_id_property(), Some("element_id"));
        assert_eq!(schema.writable_fields().count(), 1);

        let required = NodeSchema::builder("Person", "name")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::string("element_id"))
            .element_id("element_id")
            .build();
        assert!(matches!(required, Err(Error::InvalidFieldPolicy { .. })));
    }
}
