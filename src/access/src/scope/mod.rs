//! Lazy scope-hierarchy materialization
//!
//! Scoped actions constrain their grant to a hierarchy of values
//! (e.g. organization → branch). Branches are fetched from the
//! authority one level at a time and memoized for the session by
//! (action, parent path); every path by which a node has been observed
//! is recorded so a flat set of granted value ids can be turned back
//! into the branches that must be expanded to show them.

mod cache;
mod registry;
mod types;

pub use cache::{ScopeCacheStats, ScopeTreeCache};
pub use registry::NodePathRegistry;
pub use types::{path_key, NodePath, ScopeNode};
