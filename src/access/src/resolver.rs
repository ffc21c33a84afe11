//! Effect resolution over the granted snapshot
//!
//! Pure permission checks: every operation here is a function of the
//! loaded snapshot and performs no I/O. The same ALLOW predicate backs
//! the single-permission check, the section roll-ups and the bulk
//! editor's "already selected" test, so they cannot drift apart.

use serde::Serialize;

use crate::index::PermissionIndex;
use crate::types::{
    Effect, GrantedAction, PermissionSnapshot, SectionId, SystemId,
};

/// Synonym sets mapping heterogeneous backend action codes onto the
/// four canonical CRUD capabilities. Matched case-insensitively against
/// the whole code.
const CREATE_CODES: &[&str] = &["create", "cre", "add", "new"];
const LIST_CODES: &[&str] = &["list", "view", "read", "get"];
const UPDATE_CODES: &[&str] = &["update", "up", "edit", "modify"];
const DELETE_CODES: &[&str] = &["delete", "del", "remove"];

fn code_matches(code: &str, synonyms: &[&str]) -> bool {
    synonyms.iter().any(|s| code.eq_ignore_ascii_case(s))
}

/// Canonical CRUD capabilities for one section, plus the allowed
/// actions themselves for audit/display use
#[derive(Debug, Clone, Default, Serialize)]
pub struct SectionPermissions {
    pub can_create: bool,
    pub can_list: bool,
    pub can_update: bool,
    pub can_delete: bool,
    pub actions: Vec<GrantedAction>,
}

/// A section the user can reach, for navigation menus
#[derive(Debug, Clone, Serialize)]
pub struct AccessibleSection {
    pub system_id: SystemId,
    pub system_name: String,
    pub section_id: SectionId,
    pub section_name: String,
    pub permissions: SectionPermissions,
}

/// Resolves ALLOW/DENY/NONE grant signals into boolean access answers
#[derive(Debug, Default)]
pub struct EffectResolver {
    index: PermissionIndex,
}

impl EffectResolver {
    pub fn new(snapshot: PermissionSnapshot) -> Self {
        Self {
            index: PermissionIndex::build(snapshot),
        }
    }

    pub fn index(&self) -> &PermissionIndex {
        &self.index
    }

    /// Check a single action, optionally narrowed to one scope value.
    ///
    /// Unknown actions and explicit DENY resolve to false. For scoped
    /// actions a specific value must itself be ALLOW; with no value
    /// given, any ALLOW among the action's scope values satisfies the
    /// check (the existential form used for coarse "at all" queries).
    pub fn has_permission(
        &self,
        action_code: &str,
        section_name: Option<&str>,
        scope_value_id: Option<&str>,
    ) -> bool {
        let Some(entry) = self.index.action(action_code, section_name) else {
            return false;
        };
        let action = entry.action;

        match action.effect {
            Effect::Deny => return false,
            Effect::Allow if scope_value_id.is_none() => return true,
            Effect::Allow | Effect::None => {}
        }

        if let Some(value_id) = scope_value_id {
            if !action.scopes.is_empty() {
                return action
                    .scopes
                    .iter()
                    .find(|s| s.scope_value_id == value_id)
                    .is_some_and(|s| s.effect.is_allow());
            }
        } else if !action.scopes.is_empty() {
            return action.scopes.iter().any(|s| s.effect.is_allow());
        }

        false
    }

    /// True iff at least one action in the section resolves to ALLOW
    pub fn has_section_access(&self, section_name: &str, system_name: Option<&str>) -> bool {
        self.index
            .section(section_name, system_name)
            .map(|entry| entry.section.actions.iter().any(action_allows))
            .unwrap_or(false)
    }

    /// Roll the section's actions up into canonical CRUD capabilities
    pub fn section_permissions(
        &self,
        section_name: &str,
        system_name: Option<&str>,
    ) -> SectionPermissions {
        let Some(entry) = self.index.section(section_name, system_name) else {
            return SectionPermissions::default();
        };
        section_permissions_of(&entry.section.actions)
    }

    /// Every (system, section) pair with at least one allowed action,
    /// for menu-building collaborators
    pub fn accessible_sections(&self) -> Vec<AccessibleSection> {
        let mut sections = Vec::new();

        for system in &self.index.snapshot().systems {
            for section in &system.sections {
                if !section.actions.iter().any(action_allows) {
                    continue;
                }
                sections.push(AccessibleSection {
                    system_id: system.system_id.clone(),
                    system_name: system.name.clone(),
                    section_id: section.system_section_id.clone(),
                    section_name: section.name.clone(),
                    permissions: section_permissions_of(&section.actions),
                });
            }
        }

        sections
    }
}

/// The shared ALLOW predicate: action-level ALLOW, or any scope value
/// carrying ALLOW. DENY and bare NONE resolve to denied.
pub(crate) fn action_allows(action: &GrantedAction) -> bool {
    match action.effect {
        Effect::Deny => false,
        Effect::Allow => true,
        Effect::None => action.scopes.iter().any(|s| s.effect.is_allow()),
    }
}

fn section_permissions_of(actions: &[GrantedAction]) -> SectionPermissions {
    let allowed = |synonyms: &[&str]| {
        actions
            .iter()
            .any(|a| code_matches(&a.code, synonyms) && action_allows(a))
    };

    SectionPermissions {
        can_create: allowed(CREATE_CODES),
        can_list: allowed(LIST_CODES),
        can_update: allowed(UPDATE_CODES),
        can_delete: allowed(DELETE_CODES),
        actions: actions.iter().filter(|a| action_allows(a)).cloned().collect(),
    }
}
