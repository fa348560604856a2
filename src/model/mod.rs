//! # Property Graph Model
//!
//! DTOs for what a graph engine stores and returns.
//! These types cross every boundary: engine ↔ reconciliation ↔ rehydration ↔ user.
//!
//! Design rule: no driver types here. Each engine converts its native
//! representation into these at its own edge. This module is pure data:
//! no I/O, no state.

pub mod node;
pub mod relationship;
pub mod path;
pub mod value;
pub mod property_map;

pub use node::{Node, NodeId};
pub use relationship::{Relationship, RelId};
pub use path::Path;
pub use value::Value;
pub use property_map::PropertyMap;
