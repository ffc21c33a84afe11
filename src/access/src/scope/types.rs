//! Scope node and path primitives

use serde::{Deserialize, Serialize};

use crate::types::ScopeValueId;

/// Ordered chain of ancestor value ids, root first
pub type NodePath = Vec<ScopeValueId>;

/// Serialized branch key for a parent path; the root branch is `""`
pub fn path_key(path: &[ScopeValueId]) -> String {
    path.join("|")
}

/// A concrete value at one level of one action's hierarchy.
///
/// Identity within an action is the full path, not the bare id: the
/// same value id may legitimately be reachable through more than one
/// parent branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeNode {
    pub id: ScopeValueId,
    pub name: String,
    pub level_index: usize,
    pub has_children: bool,
    /// Ancestor ids of the branch this node was observed under
    pub parent_path: NodePath,
}

impl ScopeNode {
    /// The node's own full path: parent path plus its id
    pub fn full_path(&self) -> NodePath {
        let mut path = self.parent_path.clone();
        path.push(self.id.clone());
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_key_joins_with_pipe() {
        assert_eq!(path_key(&[]), "");
        assert_eq!(path_key(&["a".into()]), "a");
        assert_eq!(path_key(&["a".into(), "b".into()]), "a|b");
    }

    #[test]
    fn full_path_appends_own_id() {
        let node = ScopeNode {
            id: "c".into(),
            name: "C".into(),
            level_index: 2,
            has_children: false,
            parent_path: vec!["a".into(), "b".into()],
        };
        assert_eq!(node.full_path(), vec!["a", "b", "c"]);
    }
}
