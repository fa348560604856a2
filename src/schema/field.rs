//! Field declarations: kind, optionality, default, write policy, alias, hooks.

use std::fmt;
use std::sync::Arc;

use crate::model::Value;
use crate::Result;

/// Scalar property kinds a backend stores natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Time,
    DateTime,
    LocalDateTime,
}

impl ScalarKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::String => "STRING",
            ScalarKind::Integer => "INTEGER",
            ScalarKind::Float => "FLOAT",
            ScalarKind::Boolean => "BOOLEAN",
            ScalarKind::Date => "DATE",
            ScalarKind::Time => "TIME",
            ScalarKind::DateTime => "DATETIME",
            ScalarKind::LocalDateTime => "LOCAL DATETIME",
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ScalarKind::Date | ScalarKind::Time | ScalarKind::DateTime | ScalarKind::LocalDateTime)
    }
}

/// Declared kind of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Scalar(ScalarKind),
    /// Flat, homogeneous list of one scalar kind.
    List(ScalarKind),
    /// Kind decided from the runtime value; maps and nested lists are still rejected.
    Inferred,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Scalar(k) => write!(f, "{}", k.name()),
            FieldKind::List(k) => write!(f, "LIST<{}>", k.name()),
            FieldKind::Inferred => write!(f, "ANY"),
        }
    }
}

/// When a field is written during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldPolicy {
    /// Written only when the merge creates the entity.
    pub set_on_create: bool,
    /// Written only when the merge finds an existing entity.
    pub set_on_match: bool,
    /// Relationships only: part of the relationship's merge identity.
    pub merge_on: bool,
}

impl FieldPolicy {
    pub fn is_always_set(&self) -> bool {
        !self.set_on_create && !self.set_on_match && !self.merge_on
    }
}

/// Custom write hook: entity field (as JSON) to a storable property.
pub type FieldSerializer = Arc<dyn Fn(&serde_json::Value) -> Result<Value> + Send + Sync>;

/// Custom read hook: stored property back to the entity field (as JSON).
pub type FieldDeserializer = Arc<dyn Fn(&Value) -> Result<serde_json::Value> + Send + Sync>;

/// One declared field of a node or relationship entity.
///
/// `name` is the serde field name of the Rust type; the stored property
/// name is `alias` when set.
#[derive(Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub optional: bool,
    pub default: Option<Value>,
    pub policy: FieldPolicy,
    pub alias: Option<String>,
    pub serializer: Option<FieldSerializer>,
    pub deserializer: Option<FieldDeserializer>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            default: None,
            policy: FieldPolicy::default(),
            alias: None,
            serializer: None,
            deserializer: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self { Self::new(name, FieldKind::Scalar(ScalarKind::String)) }
    pub fn integer(name: impl Into<String>) -> Self { Self::new(name, FieldKind::Scalar(ScalarKind::Integer)) }
    pub fn float(name: impl Into<String>) -> Self { Self::new(name, FieldKind::Scalar(ScalarKind::Float)) }
    pub fn boolean(name: impl Into<String>) -> Self { Self::new(name, FieldKind::Scalar(ScalarKind::Boolean)) }
    pub fn date(name: impl Into<String>) -> Self { Self::new(name, FieldKind::Scalar(ScalarKind::Date)) }
    pub fn time(name: impl Into<String>) -> Self { Self::new(name, FieldKind::Scalar(ScalarKind::Time)) }
    pub fn datetime(name: impl Into<String>) -> Self { Self::new(name, FieldKind::Scalar(ScalarKind::DateTime)) }
    pub fn local_datetime(name: impl Into<String>) -> Self { Self::new(name, FieldKind::Scalar(ScalarKind::LocalDateTime)) }
    pub fn list(name: impl Into<String>, item: ScalarKind) -> Self { Self::new(name, FieldKind::List(item)) }
    pub fn inferred(name: impl Into<String>) -> Self { Self::new(name, FieldKind::Inferred) }

    /// The field may be absent; absent values are never written.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Value injected when a stored record lacks the property.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn set_on_create(mut self) -> Self {
        self.policy.set_on_create = true;
        self
    }

    pub fn set_on_match(mut self) -> Self {
        self.policy.set_on_match = true;
        self
    }

    pub fn merge_on(mut self) -> Self {
        self.policy.merge_on = true;
        self
    }

    /// Store under a different property name.
    pub fn alias(mut self, property: impl Into<String>) -> Self {
        self.alias = Some(property.into());
        self
    }

    pub fn serializer<F>(mut self, f: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.serializer = Some(Arc::new(f));
        self
    }

    pub fn deserializer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<serde_json::Value> + Send + Sync + 'static,
    {
        self.deserializer = Some(Arc::new(f));
        self
    }

    /// Name of the stored property.
    pub fn property_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("optional", &self.optional)
            .field("default", &self.default)
            .field("policy", &self.policy)
            .field("alias", &self.alias)
            .field("serializer", &self.serializer.is_some())
            .field("deserializer", &self.deserializer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_name_uses_alias() {
        let plain = FieldSpec::string("name");
        let aliased = FieldSpec::string("display").alias("displayName");
        assert_eq!(plain.property_name(), "name");
        assert_eq!(aliased.property_name(), "displayName");
    }

    #[test]
    fn test_policy_flags() {
        let f = FieldSpec::integer("visits").optional().set_on_match();
        assert!(f.optional);
        assert!(f.policy.set_on_match);
        assert!(!f.policy.is_always_set());
        assert!(FieldSpec::integer("age").policy.is_always_set());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(FieldKind::Scalar(ScalarKind::Date).to_string(), "DATE");
        assert_eq!(FieldKind::List(ScalarKind::String).to_string(), "LIST<STRING>");
    }
}
