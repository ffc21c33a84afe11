//! Record of every path by which a scope node has been observed

use std::collections::BTreeSet;

use dashmap::DashMap;

use crate::scope::types::{path_key, NodePath};
use crate::types::{ActionId, ScopeValueId};

/// Tracks, per action, every full path under which each node id has
/// been materialized.
///
/// The hierarchy is not guaranteed to be a strict tree from a node's
/// perspective, so a node discovered through two parents keeps both
/// paths. Entries grow monotonically for the lifetime of the owning
/// session and are never pruned.
#[derive(Debug, Default)]
pub struct NodePathRegistry {
    paths: DashMap<(ActionId, ScopeValueId), Vec<NodePath>>,
}

impl NodePathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observed full path for a node. A path already on
    /// record is not duplicated; a new path is appended, never replacing
    /// earlier ones.
    pub fn record(&self, action_id: &str, node_id: &str, path: NodePath) {
        let mut entry = self
            .paths
            .entry((action_id.to_string(), node_id.to_string()))
            .or_default();
        if !entry.contains(&path) {
            entry.push(path);
        }
    }

    /// All full paths observed for a node, in discovery order
    pub fn paths_for(&self, action_id: &str, node_id: &str) -> Vec<NodePath> {
        self.paths
            .get(&(action_id.to_string(), node_id.to_string()))
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Branch keys of every ancestor that must be expanded so that each
    /// of the given granted nodes becomes visible, across all recorded
    /// paths.
    pub fn branches_to_expand<'a, I>(&self, action_id: &str, granted: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a ScopeValueId>,
    {
        let mut keys = BTreeSet::new();
        for node_id in granted {
            for path in self.paths_for(action_id, node_id) {
                // Every proper prefix of the full path is an ancestor
                // branch that must be open.
                for depth in 1..path.len() {
                    keys.insert(path_key(&path[..depth]));
                }
            }
        }
        keys
    }
}
