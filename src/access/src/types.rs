//! Core permission-model types and authority wire contracts

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AccessError, Result};

/// Unique system identifier
pub type SystemId = String;

/// Unique section identifier
pub type SectionId = String;

/// Unique action identifier (`systemSectionActionId` on the wire)
pub type ActionId = String;

/// Code-table identifier backing one scope level
pub type ScopeTableId = String;

/// Concrete scope value identifier (a code-table value)
pub type ScopeValueId = String;

/// Unique user identifier
pub type UserId = String;

/// Unique system-role identifier
pub type RoleId = String;

/// Tenant identifier, propagated as a request header where present
pub type TenantId = String;

/// Grant outcome for an action or a scope value.
///
/// `None` is the absence of an explicit grant and always resolves to
/// denied; it is a real state on the wire, not just a missing field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Effect {
    /// Access explicitly granted
    Allow,
    /// Access explicitly denied
    Deny,
    /// No explicit grant
    #[default]
    None,
}

impl Effect {
    /// Whether this effect is an explicit grant or denial
    pub fn is_set(self) -> bool {
        self != Effect::None
    }

    pub fn is_allow(self) -> bool {
        self == Effect::Allow
    }
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Effect::Allow => f.write_str("ALLOW"),
            Effect::Deny => f.write_str("DENY"),
            Effect::None => f.write_str("NONE"),
        }
    }
}

/// A system as listed by the authority's systems dropdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemRef {
    pub id: SystemId,
    pub name: String,
}

/// One rung of an action's scope hierarchy.
///
/// The depth index is the level's position in [`ActionTree::levels`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    /// External vocabulary (code table) supplying candidate values
    pub scope_table_id: ScopeTableId,
    pub name: String,
}

/// Nested scope node as delivered inside the system-tree payload.
///
/// Only the branches the authority chose to inline arrive this way;
/// deeper branches are fetched lazily through `scope_children`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: ScopeValueId,
    pub name: String,
    pub level_index: usize,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

/// Declarative action definition within the editing tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionTree {
    #[serde(alias = "systemSectionActionId")]
    pub id: ActionId,
    pub name: String,
    pub code: String,
    /// Empty for actions whose grant is a plain action-level switch
    #[serde(default)]
    pub levels: Vec<Level>,
    /// Initial (pre-inlined) scope nodes for scoped actions
    #[serde(default)]
    pub scopes: Vec<TreeNode>,
}

impl ActionTree {
    /// Index of the leaf level, if the action is scoped at all
    pub fn leaf_level(&self) -> Option<usize> {
        self.levels.len().checked_sub(1)
    }
}

/// Declarative section within the editing tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionTree {
    #[serde(alias = "systemSectionId")]
    pub id: SectionId,
    pub name: String,
    #[serde(default)]
    pub actions: Vec<ActionTree>,
}

/// Full declarative tree for one system, fetched once per
/// (system, language) selection and immutable for the session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemTree {
    #[serde(default)]
    pub sections: Vec<SectionTree>,
}

/// Per-scope-value effect inside the granted snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeEffect {
    pub scope_value_id: ScopeValueId,
    pub effect: Effect,
}

/// An action together with the caller's granted state, as delivered by
/// the `my permissions` snapshot read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantedAction {
    pub system_section_action_id: ActionId,
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub effect: Effect,
    #[serde(default)]
    pub scopes: Vec<ScopeEffect>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantedSection {
    pub system_section_id: SectionId,
    pub name: String,
    #[serde(default)]
    pub actions: Vec<GrantedAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantedSystem {
    pub system_id: SystemId,
    pub name: String,
    #[serde(default)]
    pub sections: Vec<GrantedSection>,
}

/// The caller's full granted snapshot across systems
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSnapshot {
    #[serde(default)]
    pub systems: Vec<GrantedSystem>,
}

/// Per-action grant state for one user, as read from the authority.
///
/// `node_states` carries per-scope-value effects for scoped actions;
/// `action_effect` carries the switch for unscoped ones. Validated at
/// the boundary: a NONE inside `node_states` is a malformed payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionState {
    pub system_section_action_id: ActionId,
    #[serde(default)]
    pub action_effect: Effect,
    #[serde(default)]
    pub node_states: HashMap<ScopeValueId, Effect>,
}

impl PermissionState {
    /// Reject payloads the save protocol could never have produced
    pub fn validate(&self) -> Result<()> {
        for (value_id, effect) in &self.node_states {
            if !effect.is_set() {
                return Err(AccessError::InvalidPayload(format!(
                    "action {}: node {} carries effect NONE",
                    self.system_section_action_id, value_id
                )));
            }
        }
        Ok(())
    }
}

/// One scope-value grant inside a save item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGrant {
    pub code_table_id: ScopeTableId,
    pub code_table_value_id: ScopeValueId,
    pub effect: Effect,
}

/// One entry of a bulk REPLACE save request.
///
/// Kept as explicit variants so an action-level switch can never be
/// confused with a scoped grant set; [`SaveItem::to_wire`] flattens to
/// the authority's item shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveItem {
    /// Action without scope levels: a single effect, or a deletion
    ActionLevel {
        user_id: UserId,
        action_id: ActionId,
        effect: Effect,
        deleted: bool,
    },
    /// Scoped action: the full current per-value grant list, or a deletion
    ScopeLevel {
        user_id: UserId,
        action_id: ActionId,
        nodes: Vec<NodeGrant>,
        deleted: bool,
    },
}

impl SaveItem {
    pub fn action_id(&self) -> &ActionId {
        match self {
            SaveItem::ActionLevel { action_id, .. } => action_id,
            SaveItem::ScopeLevel { action_id, .. } => action_id,
        }
    }

    pub fn is_deleted(&self) -> bool {
        match self {
            SaveItem::ActionLevel { deleted, .. } => *deleted,
            SaveItem::ScopeLevel { deleted, .. } => *deleted,
        }
    }

    /// Flatten to the authority's bulk-save item shape
    pub fn to_wire(&self) -> SaveItemWire {
        match self {
            SaveItem::ActionLevel {
                user_id,
                action_id,
                effect,
                deleted,
            } => SaveItemWire {
                user_id: user_id.clone(),
                system_section_action_id: action_id.clone(),
                action_effect: *effect,
                nodes: Vec::new(),
                deleted: *deleted,
            },
            SaveItem::ScopeLevel {
                user_id,
                action_id,
                nodes,
                deleted,
            } => SaveItemWire {
                user_id: user_id.clone(),
                system_section_action_id: action_id.clone(),
                action_effect: Effect::None,
                nodes: nodes.clone(),
                deleted: *deleted,
            },
        }
    }
}

/// Wire form of a bulk-save item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveItemWire {
    pub user_id: UserId,
    pub system_section_action_id: ActionId,
    pub action_effect: Effect,
    pub nodes: Vec<NodeGrant>,
    pub deleted: bool,
}

/// A role template defined for one system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemRole {
    #[serde(alias = "systemRoleId")]
    pub id: RoleId,
    pub name: String,
}

/// Outcome of applying a role template to a user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedRole {
    #[serde(default)]
    pub permissions_applied: u64,
}

/// Directory entry for permission-copy source selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(alias = "userId")]
    pub id: UserId,
    #[serde(alias = "displayName", alias = "fullName")]
    pub name: String,
}

/// Candidate value returned by a scope-children lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeValue {
    pub id: ScopeValueId,
    pub name: String,
}
