//! Markdown documentation tables for schemas.

use std::fmt::Write;

use super::{FieldSpec, NodeSchema, RelationshipSchema};

const HEADER: &str = "| Property Name | Type | Required |\n| ------------- | ---- | -------- |\n";

/// One row per field, under its stored property name. A field is required
/// when it is neither optional nor defaulted.
pub fn property_table(fields: &[FieldSpec]) -> String {
    let mut out = String::from(HEADER);
    for field in fields {
        let required = !field.optional && field.default.is_none();
        // Writing to a String cannot fail.
        let _ = writeln!(out, "| {} | {} | {} |", field.property_name(), field.kind, required);
    }
    out
}

impl NodeSchema {
    pub fn markdown_table(&self) -> String {
        property_table(self.fields())
    }
}

impl RelationshipSchema {
    /// Heading, target labels and, when the relationship has properties,
    /// their table.
    pub fn markdown_section(&self, heading_level: usize) -> String {
        let mut out = format!(
            "{} {}\n\nTarget Label(s): {}\n",
            "#".repeat(heading_level.max(1)),
            self.relationship_type(),
            self.target_labels().join(", ")
        );
        if !self.fields().is_empty() {
            out.push('\n');
            out.push_str(&property_table(self.fields()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use crate::schema::ScalarKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_node_table() {
        let schema = NodeSchema::builder("Person", "name")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::integer("age").optional())
            .field(FieldSpec::list("tags", ScalarKind::String).default_value(Value::List(Vec::new())))
            .build()
            .unwrap();
        assert_eq!(
            schema.markdown_table(),
            "| Property Name | Type | Required |\n\
             | ------------- | ---- | -------- |\n\
             | name | STRING | true |\n\
             | age | INTEGER | false |\n\
             | tags | LIST<STRING> | false |\n"
        );
    }

    #[test]
    fn test_relationship_section_without_properties() {
        let schema = RelationshipSchema::builder("FOLLOWS")
            .source(["Person"], "name")
            .target(["Person", "Team"], "name")
            .build()
            .unwrap();
        assert_eq!(schema.markdown_section(3), "### FOLLOWS\n\nTarget Label(s): Person, Team\n");
    }
}
