//! Process-wide default session.
//!
//! Applications that would rather not pass a [`Session`] around can install
//! one here and use the [`NodeOps`] / [`RelationshipOps`] extension traits.
//! Everything else in the crate takes an explicit session.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::EngineConfig;
use crate::filter::{Filters, MatchQuery};
use crate::model::Value;
use crate::registry::Registry;
use crate::schema::{Edge, NodeEntity, RelationshipEntity};
use crate::session::Session;
use crate::{Error, Result};

static CONNECTION: RwLock<Option<Arc<Session>>> = parking_lot::const_rwlock(None);

/// Open `config` and install it as the default session. A later call
/// replaces the earlier session, which is closed.
pub fn init(config: &EngineConfig, registry: impl Into<Arc<Registry>>) -> Result<Arc<Session>> {
    let session = Arc::new(Session::open(config, registry)?);
    install(session.clone())?;
    tracing::info!(engine = %config.kind(), "default graph connection initialized");
    Ok(session)
}

/// Install an already-built session as the default.
pub fn install(session: Arc<Session>) -> Result<()> {
    let previous = CONNECTION.write().replace(session);
    match previous {
        Some(old) => old.close(),
        None => Ok(()),
    }
}

/// The default session; `NotInitialized` before [`init`].
pub fn connection() -> Result<Arc<Session>> {
    CONNECTION.read().clone().ok_or(Error::NotInitialized)
}

/// Reopen the default session on another engine, keeping its registry.
pub fn change_engine(config: &EngineConfig) -> Result<Arc<Session>> {
    let registry = connection()?.shared_registry();
    let session = Arc::new(Session::open(config, registry)?);
    install(session.clone())?;
    tracing::info!(engine = %config.kind(), "default graph engine changed");
    Ok(session)
}

/// Close and remove the default session. A no-op when none is installed.
pub fn close() -> Result<()> {
    let previous = CONNECTION.write().take();
    match previous {
        Some(session) => {
            tracing::info!("default graph connection closed");
            session.close()
        }
        None => Ok(()),
    }
}

// ============================================================================
// Extension traits
// ============================================================================

/// Node operations routed through the default session.
pub trait NodeOps: NodeEntity + Sized {
    fn create(&self) -> Result<Self> {
        connection()?.create(self)
    }

    fn merge(&self) -> Result<Self> {
        connection()?.merge(self)
    }

    fn delete(&self) -> Result<bool> {
        connection()?.delete(self)
    }

    fn match_node(key: impl Into<Value>) -> Result<Option<Self>> {
        connection()?.match_node::<Self>(key)
    }

    fn match_nodes(query: &MatchQuery) -> Result<Vec<Self>> {
        connection()?.match_nodes::<Self>(query)
    }

    fn count(filters: &Filters) -> Result<u64> {
        connection()?.count::<Self>(filters)
    }
}

impl<T: NodeEntity> NodeOps for T {}

/// Relationship operations routed through the default session.
pub trait RelationshipOps: Sized {
    fn merge(&self) -> Result<Self>;
}

impl<R: RelationshipEntity> RelationshipOps for Edge<R> {
    fn merge(&self) -> Result<Self> {
        connection()?.merge_relationship(self)
    }
}
