//! Paths returned by queries.

use serde::{Deserialize, Serialize};
use super::{Node, Relationship};

/// Alternating nodes and relationships, as a backend returns a matched path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    /// One more node than relationships when non-empty.
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
}

impl Path {
    /// Number of hops.
    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }

    pub fn start(&self) -> Option<&Node> {
        self.nodes.first()
    }

    pub fn end(&self) -> Option<&Node> {
        self.nodes.last()
    }
}
