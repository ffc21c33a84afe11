//! O(1) lookup tables over the granted permission snapshot

use std::collections::HashMap;

use crate::types::{ActionId, GrantedAction, GrantedSection, GrantedSystem, PermissionSnapshot};

/// A resolved (system, section) pair
#[derive(Debug, Clone, Copy)]
pub struct SectionEntry<'a> {
    pub system: &'a GrantedSystem,
    pub section: &'a GrantedSection,
}

/// A resolved (system, section, action) triple
#[derive(Debug, Clone, Copy)]
pub struct ActionEntry<'a> {
    pub system: &'a GrantedSystem,
    pub section: &'a GrantedSection,
    pub action: &'a GrantedAction,
}

type SectionKey = (usize, usize);
type ActionKey = (usize, usize, usize);

/// Index over the declarative system/section/action tree.
///
/// Built once per snapshot (O(n) in total action count) so permission
/// checks made throughout the application stay cheap. All name keys are
/// lowercased; lookups are case-insensitive.
///
/// Sections and actions are registered both under their qualified key
/// (`system:section`, `section:code`) and under the bare name alone.
/// Bare keys are a convenience for callers that know the name is
/// unique; on a collision the last-registered entry wins, so callers
/// that need disambiguation must use the qualified form.
#[derive(Debug, Default)]
pub struct PermissionIndex {
    snapshot: PermissionSnapshot,
    by_system: HashMap<String, usize>,
    by_section: HashMap<String, SectionKey>,
    by_code: HashMap<String, ActionKey>,
    by_action_id: HashMap<ActionId, ActionKey>,
}

impl PermissionIndex {
    /// Build the index, taking ownership of the snapshot
    pub fn build(snapshot: PermissionSnapshot) -> Self {
        let mut by_system = HashMap::new();
        let mut by_section = HashMap::new();
        let mut by_code = HashMap::new();
        let mut by_action_id = HashMap::new();

        for (si, system) in snapshot.systems.iter().enumerate() {
            by_system.insert(system.name.to_lowercase(), si);

            for (ci, section) in system.sections.iter().enumerate() {
                let qualified = format!("{}:{}", system.name, section.name).to_lowercase();
                by_section.insert(qualified, (si, ci));
                by_section.insert(section.name.to_lowercase(), (si, ci));

                for (ai, action) in section.actions.iter().enumerate() {
                    let qualified = format!("{}:{}", section.name, action.code).to_lowercase();
                    by_code.insert(qualified, (si, ci, ai));
                    by_code.insert(action.code.to_lowercase(), (si, ci, ai));
                    by_action_id
                        .insert(action.system_section_action_id.clone(), (si, ci, ai));
                }
            }
        }

        Self {
            snapshot,
            by_system,
            by_section,
            by_code,
            by_action_id,
        }
    }

    pub fn snapshot(&self) -> &PermissionSnapshot {
        &self.snapshot
    }

    /// Total number of indexed actions
    pub fn action_count(&self) -> usize {
        self.by_action_id.len()
    }

    pub fn system(&self, name: &str) -> Option<&GrantedSystem> {
        let si = *self.by_system.get(&name.to_lowercase())?;
        self.snapshot.systems.get(si)
    }

    /// Look up a section by name, optionally qualified by system name
    pub fn section(&self, name: &str, system: Option<&str>) -> Option<SectionEntry<'_>> {
        let key = match system {
            Some(system) => format!("{system}:{name}").to_lowercase(),
            None => name.to_lowercase(),
        };
        let (si, ci) = *self.by_section.get(&key)?;
        self.section_at((si, ci))
    }

    /// Look up an action by code, optionally qualified by section name
    pub fn action(&self, code: &str, section: Option<&str>) -> Option<ActionEntry<'_>> {
        let key = match section {
            Some(section) => format!("{section}:{code}").to_lowercase(),
            None => code.to_lowercase(),
        };
        let (si, ci, ai) = *self.by_code.get(&key)?;
        self.action_at((si, ci, ai))
    }

    pub fn action_by_id(&self, id: &str) -> Option<ActionEntry<'_>> {
        let key = *self.by_action_id.get(id)?;
        self.action_at(key)
    }

    fn section_at(&self, (si, ci): SectionKey) -> Option<SectionEntry<'_>> {
        let system = self.snapshot.systems.get(si)?;
        let section = system.sections.get(ci)?;
        Some(SectionEntry { system, section })
    }

    fn action_at(&self, (si, ci, ai): ActionKey) -> Option<ActionEntry<'_>> {
        let SectionEntry { system, section } = self.section_at((si, ci))?;
        let action = section.actions.get(ai)?;
        Some(ActionEntry {
            system,
            section,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> PermissionSnapshot {
        serde_json::from_value(serde_json::json!({
            "systems": [
                {
                    "systemId": "sys-cms",
                    "name": "CMS",
                    "sections": [{
                        "systemSectionId": "sec-1",
                        "name": "Code Table",
                        "actions": [
                            { "systemSectionActionId": "act-1", "name": "List", "code": "List", "effect": "ALLOW" },
                            { "systemSectionActionId": "act-2", "name": "Create", "code": "CRE" }
                        ]
                    }]
                },
                {
                    "systemId": "sys-das",
                    "name": "DAS",
                    "sections": [{
                        "systemSectionId": "sec-2",
                        "name": "Code Table",
                        "actions": [
                            { "systemSectionActionId": "act-3", "name": "List", "code": "List", "effect": "DENY" }
                        ]
                    }]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let index = PermissionIndex::build(snapshot());

        assert!(index.system("cms").is_some());
        assert!(index.section("code table", Some("CMS")).is_some());
        let entry = index.action("list", Some("CODE TABLE")).unwrap();
        assert_eq!(entry.action.system_section_action_id, "act-3");
    }

    #[test]
    fn qualified_lookup_disambiguates() {
        let index = PermissionIndex::build(snapshot());

        let cms = index.section("Code Table", Some("CMS")).unwrap();
        assert_eq!(cms.system.system_id, "sys-cms");
        let das = index.section("Code Table", Some("DAS")).unwrap();
        assert_eq!(das.system.system_id, "sys-das");
    }

    #[test]
    fn bare_lookup_last_registered_wins() {
        let index = PermissionIndex::build(snapshot());

        // Both systems declare a "Code Table" section; the bare name
        // resolves to the later registration.
        let entry = index.section("Code Table", None).unwrap();
        assert_eq!(entry.system.system_id, "sys-das");
    }

    #[test]
    fn action_by_id() {
        let index = PermissionIndex::build(snapshot());

        let entry = index.action_by_id("act-2").unwrap();
        assert_eq!(entry.action.code, "CRE");
        assert_eq!(entry.section.name, "Code Table");
        assert!(index.action_by_id("missing").is_none());
        assert_eq!(index.action_count(), 3);
    }
}
