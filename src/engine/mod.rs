//! Engine - node registry, slot accessors and node arrays.
//!
//! Nodes are NOT objects. They are indices into the shared node table:
//!
//! - Slot: typed get/set/notify over one field across all indices
//! - Arrays: the full set of slot accessors for the node schema
//! - Registry: index allocation, id mapping, sibling lists, parent context

pub mod arrays;
mod registry;
mod slot;

pub use arrays::NodeArrays;
pub use registry::*;
pub use slot::SlotAccessor;
