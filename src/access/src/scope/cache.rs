//! Session-scoped branch cache with coalesced lazy fetches

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::authority::{AccessAuthority, ScopeChildrenQuery};
use crate::error::{AccessError, Result};
use crate::scope::registry::NodePathRegistry;
use crate::scope::types::{path_key, NodePath, ScopeNode};
use crate::types::{ActionTree, ActionId, ScopeValue, ScopeValueId, TreeNode};

type BranchKey = (ActionId, String);

/// Hit/miss/fetch counters for the branch cache
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeCacheStats {
    pub hits: usize,
    pub misses: usize,
    pub fetches: usize,
}

/// Per-action cache of scope branches, keyed by the serialized parent
/// path (root = empty path).
///
/// The cache is additive-only for the session: collapsing a branch
/// removes it from the visible expansion set but keeps the fetched
/// data, and a late fetch landing after a collapse is kept too. A
/// concurrent expand for the same (action, path) key is coalesced onto
/// the in-flight fetch, so an identical key never races two requests.
#[derive(Debug, Default)]
pub struct ScopeTreeCache {
    branches: DashMap<BranchKey, Vec<ScopeNode>>,
    gates: DashMap<BranchKey, Arc<Mutex<()>>>,
    expanded: DashMap<BranchKey, ()>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    fetches: AtomicUsize,
}

impl ScopeTreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached children under a parent path, if that branch has loaded
    pub fn children(&self, action_id: &str, parent_path: &[ScopeValueId]) -> Option<Vec<ScopeNode>> {
        self.branches
            .get(&(action_id.to_string(), path_key(parent_path)))
            .map(|entry| entry.value().clone())
    }

    pub fn is_loaded(&self, action_id: &str, parent_path: &[ScopeValueId]) -> bool {
        self.branches
            .contains_key(&(action_id.to_string(), path_key(parent_path)))
    }

    /// Root-level nodes for an action (the empty parent path)
    pub fn root_nodes(&self, action_id: &str) -> Vec<ScopeNode> {
        self.children(action_id, &[]).unwrap_or_default()
    }

    pub fn is_expanded(&self, action_id: &str, path: &[ScopeValueId]) -> bool {
        self.expanded
            .contains_key(&(action_id.to_string(), path_key(path)))
    }

    /// Remove a branch from the visible expansion set. Cached data is
    /// deliberately kept; re-expanding is a pure cache hit.
    pub fn collapse(&self, action_id: &str, node: &ScopeNode) {
        self.expanded
            .remove(&(action_id.to_string(), path_key(&node.full_path())));
    }

    /// Distinct value ids of every loaded node at the leaf level
    pub fn loaded_leaf_values(&self, action_id: &str, leaf_level: usize) -> BTreeSet<ScopeValueId> {
        let mut values = BTreeSet::new();
        for entry in self.branches.iter() {
            if entry.key().0 != action_id {
                continue;
            }
            for node in entry.value() {
                if node.level_index == leaf_level {
                    values.insert(node.id.clone());
                }
            }
        }
        values
    }

    /// Seed branches from the nested initial nodes the system tree
    /// inlines for a scoped action.
    pub fn seed_from_tree(&self, registry: &NodePathRegistry, action: &ActionTree) {
        let level_count = action.levels.len();
        if level_count == 0 {
            return;
        }
        self.seed_branch(registry, &action.id, &action.scopes, &NodePath::new(), level_count);
    }

    fn seed_branch(
        &self,
        registry: &NodePathRegistry,
        action_id: &str,
        raw: &[TreeNode],
        parent_path: &NodePath,
        level_count: usize,
    ) {
        let mut seen = HashSet::new();
        let unique: Vec<&TreeNode> = raw.iter().filter(|n| seen.insert(n.id.clone())).collect();

        let mut nodes: Vec<ScopeNode> = unique
            .iter()
            .map(|n| ScopeNode {
                id: n.id.clone(),
                name: n.name.clone(),
                level_index: n.level_index,
                has_children: !n.children.is_empty() || n.level_index + 1 < level_count,
                parent_path: parent_path.clone(),
            })
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));

        for node in &nodes {
            registry.record(action_id, &node.id, node.full_path());
        }
        self.branches
            .insert((action_id.to_string(), path_key(parent_path)), nodes);

        for n in unique {
            if n.children.is_empty() {
                continue;
            }
            let mut child_parent = parent_path.clone();
            child_parent.push(n.id.clone());
            self.seed_branch(registry, action_id, &n.children, &child_parent, level_count);
        }
    }

    /// Expand a node: return its children, fetching them through the
    /// authority if this branch has not been materialized yet.
    ///
    /// A node at the last declared level has nothing beneath it and the
    /// call is a no-op. A failed fetch caches nothing, so the next
    /// expand retries cleanly.
    pub async fn expand(
        &self,
        registry: &NodePathRegistry,
        authority: &dyn AccessAuthority,
        action: &ActionTree,
        node: &ScopeNode,
        lang: &str,
    ) -> Result<Vec<ScopeNode>> {
        let level_count = action.levels.len();
        let next_index = node.level_index + 1;
        if next_index >= level_count {
            return Ok(Vec::new());
        }

        let target_path = node.full_path();
        let key = (action.id.clone(), path_key(&target_path));

        if let Some(children) = self.branches.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.expanded.insert(key.clone(), ());
            return Ok(children.value().clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        // One fetch per branch key: later callers queue on the gate and
        // find the branch already cached when they get through.
        let gate = {
            let entry = self.gates.entry(key.clone()).or_default();
            entry.value().clone()
        };
        let _pass = gate.lock().await;

        if let Some(children) = self.branches.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.expanded.insert(key.clone(), ());
            return Ok(children.value().clone());
        }

        let level = action
            .levels
            .get(next_index)
            .ok_or_else(|| AccessError::Expand(format!("action {} has no level {next_index}", action.id)))?;
        let query = ScopeChildrenQuery {
            action_id: action.id.clone(),
            level_index: next_index,
            level: level.clone(),
            parent_path: target_path.clone(),
            lang: lang.to_string(),
        };

        self.fetches.fetch_add(1, Ordering::Relaxed);
        let values = authority
            .scope_children(&query)
            .await
            .map_err(|e| AccessError::Expand(e.to_string()))?;

        debug!(
            action_id = %action.id,
            branch = %path_key(&target_path),
            count = values.len(),
            "materialized scope branch"
        );

        self.expanded.insert(key, ());
        Ok(self.insert_branch(
            registry,
            &action.id,
            &target_path,
            next_index,
            next_index + 1 < level_count,
            values,
        ))
    }

    /// Insert a fetched child set: drop duplicate ids (first occurrence
    /// wins), sort by display name, record every node's path.
    fn insert_branch(
        &self,
        registry: &NodePathRegistry,
        action_id: &str,
        parent_path: &NodePath,
        level_index: usize,
        has_children: bool,
        values: Vec<ScopeValue>,
    ) -> Vec<ScopeNode> {
        let mut seen = HashSet::new();
        let mut nodes: Vec<ScopeNode> = values
            .into_iter()
            .filter(|v| seen.insert(v.id.clone()))
            .map(|v| ScopeNode {
                id: v.id,
                name: v.name,
                level_index,
                has_children,
                parent_path: parent_path.clone(),
            })
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));

        for node in &nodes {
            registry.record(action_id, &node.id, node.full_path());
        }
        self.branches
            .insert((action_id.to_string(), path_key(parent_path)), nodes.clone());
        nodes
    }

    pub fn stats(&self) -> ScopeCacheStats {
        ScopeCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
        }
    }
}
