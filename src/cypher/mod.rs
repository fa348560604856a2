//! # Cypher
//!
//! Two directions:
//!
//! - **Generation** ([`statements`]): statement text and parameters for
//!   every structured operation. Labels, relationship types and property
//!   names are interpolated into statement text, so every one of them
//!   passes [`is_identifier`] first (schemas and endpoint overrides enforce
//!   this when they are built). Values always travel as parameters.
//! - **Parsing** ([`lexer`], [`parser`], [`ast`]): the read-only subset the
//!   in-process engines evaluate.
//!
//! Pure functions: no I/O, no state, no engine dependency.

pub mod statements;
pub mod lexer;
pub mod ast;
pub mod parser;

pub use parser::parse_query;

use crate::model::PropertyMap;

/// `[A-Za-z][A-Za-z0-9_]*`
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Backend flavour. Decides element-id expressions and constraint syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Neo4j,
    Memgraph,
}

impl Dialect {
    /// Expression yielding the element id of `var` as a string.
    pub fn element_id(&self, var: &str) -> String {
        match self {
            Dialect::Neo4j => format!("elementId({var})"),
            Dialect::Memgraph => format!("toString(id({var}))"),
        }
    }
}

/// Statement text plus its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub params: PropertyMap,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), params: PropertyMap::new() }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<crate::model::Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers() {
        for ok in ["Person", "FOLLOWS", "a", "first_name", "x1"] {
            assert!(is_identifier(ok), "{ok}");
        }
        for bad in ["", "1abc", "_x", "has space", "a-b", "n`) DETACH DELETE n //"] {
            assert!(!is_identifier(bad), "{bad}");
        }
    }

    #[test]
    fn test_element_id_expression() {
        assert_eq!(Dialect::Neo4j.element_id("n"), "elementId(n)");
        assert_eq!(Dialect::Memgraph.element_id("r"), "toString(id(r))");
    }
}
