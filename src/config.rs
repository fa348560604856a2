//! Engine configuration: explicit values or environment fallback.

use std::fmt;
use std::path::PathBuf;

use crate::engine::EngineKind;
use crate::{Error, Result};

/// Configuration for connecting to a graph engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineConfig {
    /// In-memory (no persistence)
    Memory,

    /// In-memory graph persisted to a JSON snapshot
    File { path: PathBuf },

    /// Neo4j over Bolt (needs the `bolt` feature to open)
    Neo4j(BoltConfig),

    /// Memgraph over Bolt (needs the `bolt` feature to open)
    Memgraph(BoltConfig),
}

/// Bolt connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct BoltConfig {
    pub uri: String,
    pub username: String,
    pub password: String,
    pub database: Option<String>,
}

impl BoltConfig {
    pub fn new(uri: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { uri: uri.into(), username: username.into(), password: password.into(), database: None }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

impl fmt::Debug for BoltConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoltConfig")
            .field("uri", &self.uri)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

impl EngineConfig {
    pub fn kind(&self) -> EngineKind {
        match self {
            EngineConfig::Memory => EngineKind::Memory,
            EngineConfig::File { .. } => EngineKind::File,
            EngineConfig::Neo4j(_) => EngineKind::Neo4j,
            EngineConfig::Memgraph(_) => EngineKind::Memgraph,
        }
    }

    /// Read the configuration from process environment variables.
    ///
    /// `NEONTOLOGY_ENGINE` selects the engine (`NEO4J` when unset); the
    /// engine's own variables must then be present.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| {
            lookup(key).ok_or_else(|| Error::EngineConnection(format!("environment variable {key} is not set")))
        };
        let kind = match lookup("NEONTOLOGY_ENGINE") {
            Some(name) => name.parse()?,
            None => EngineKind::Neo4j,
        };
        Ok(match kind {
            EngineKind::Memory => EngineConfig::Memory,
            EngineKind::File => EngineConfig::File { path: PathBuf::from(require("NEONTOLOGY_FILE_PATH")?) },
            EngineKind::Neo4j => EngineConfig::Neo4j(BoltConfig {
                uri: require("NEO4J_URI")?,
                username: require("NEO4J_USERNAME")?,
                password: require("NEO4J_PASSWORD")?,
                database: lookup("NEO4J_DATABASE"),
            }),
            EngineKind::Memgraph => EngineConfig::Memgraph(BoltConfig {
                uri: require("MEMGRAPH_URI")?,
                username: lookup("MEMGRAPH_USERNAME").unwrap_or_default(),
                password: lookup("MEMGRAPH_PASSWORD").unwrap_or_default(),
                database: None,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_to_neo4j() {
        let cfg = EngineConfig::from_lookup(lookup(&[
            ("NEO4J_URI", "bolt://localhost:7687"),
            ("NEO4J_USERNAME", "neo4j"),
            ("NEO4J_PASSWORD", "secret"),
        ]))
        .unwrap();
        assert_eq!(cfg, EngineConfig::Neo4j(BoltConfig::new("bolt://localhost:7687", "neo4j", "secret")));
        assert!(!format!("{cfg:?}").contains("secret"));
    }

    #[test]
    fn test_missing_variable_is_named() {
        let err = EngineConfig::from_lookup(lookup(&[("NEO4J_URI", "bolt://x")])).unwrap_err();
        assert!(err.to_string().contains("NEO4J_USERNAME"), "{err}");
    }

    #[test]
    fn test_memory_and_file() {
        assert_eq!(EngineConfig::from_lookup(lookup(&[("NEONTOLOGY_ENGINE", "memory")])).unwrap(), EngineConfig::Memory);
        let file = EngineConfig::from_lookup(lookup(&[("NEONTOLOGY_ENGINE", "FILE"), ("NEONTOLOGY_FILE_PATH", "/tmp/g.json")])).unwrap();
        assert_eq!(file.kind(), EngineKind::File);
        assert!(EngineConfig::from_lookup(lookup(&[("NEONTOLOGY_ENGINE", "kuzu")])).is_err());
    }
}
