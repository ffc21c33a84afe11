//! In-memory access-authority double shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use portal_access::authority::{AccessAuthority, ScopeChildrenQuery};
use portal_access::scope::path_key;
use portal_access::types::{
    ActionId, AppliedRole, NodeGrant, PermissionSnapshot, PermissionState, SaveItem, SaveItemWire,
    ScopeValue, SystemRef, SystemRole, SystemTree, UserRef,
};
use portal_access::{AccessError, Result};

type StateKey = (String, ActionId); // (user, action)

/// Install the test log subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Configurable in-memory authority. Bulk saves mutate the stored
/// states the way the real REPLACE endpoint would, so post-save
/// re-reads observe the write.
#[derive(Default)]
pub struct MockAuthority {
    pub trees: Mutex<HashMap<String, SystemTree>>,
    pub states: Mutex<HashMap<StateKey, PermissionState>>,
    /// (action id, parent path key) -> next-level values
    pub children: Mutex<HashMap<(ActionId, String), Vec<ScopeValue>>>,
    /// role id -> grant template applied to a user on `apply_role`
    pub role_templates: Mutex<HashMap<String, Vec<PermissionState>>>,
    pub snapshot: Mutex<PermissionSnapshot>,

    pub child_fetches: AtomicUsize,
    pub save_calls: AtomicUsize,
    pub state_reads: AtomicUsize,
    pub saved_items: Mutex<Vec<SaveItemWire>>,

    pub tree_delay_ms: AtomicU64,
    pub child_delay_ms: AtomicU64,
    pub save_delay_ms: AtomicU64,

    pub fail_state_reads: AtomicBool,
    pub fail_save: AtomicBool,
    pub fail_children_once: AtomicBool,
}

impl MockAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tree(self, system_id: &str, tree: SystemTree) -> Self {
        self.trees.lock().unwrap().insert(system_id.to_string(), tree);
        self
    }

    pub fn put_state(&self, user_id: &str, state: PermissionState) {
        self.states.lock().unwrap().insert(
            (user_id.to_string(), state.system_section_action_id.clone()),
            state,
        );
    }

    pub fn put_children(&self, action_id: &str, parent_path: &[String], values: Vec<ScopeValue>) {
        self.children
            .lock()
            .unwrap()
            .insert((action_id.to_string(), path_key(parent_path)), values);
    }

    pub fn put_role_template(&self, role_id: &str, states: Vec<PermissionState>) {
        self.role_templates
            .lock()
            .unwrap()
            .insert(role_id.to_string(), states);
    }

    pub fn state_of(&self, user_id: &str, action_id: &str) -> Option<PermissionState> {
        self.states
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), action_id.to_string()))
            .cloned()
    }

    async fn delay(cell: &AtomicU64) {
        let ms = cell.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn apply_item(&self, wire: SaveItemWire) {
        let key = (wire.user_id.clone(), wire.system_section_action_id.clone());
        let mut states = self.states.lock().unwrap();
        if wire.deleted {
            states.remove(&key);
            return;
        }
        let node_states = wire
            .nodes
            .iter()
            .map(|n: &NodeGrant| (n.code_table_value_id.clone(), n.effect))
            .collect();
        states.insert(
            key,
            PermissionState {
                system_section_action_id: wire.system_section_action_id,
                action_effect: wire.action_effect,
                node_states,
            },
        );
    }
}

#[async_trait]
impl AccessAuthority for MockAuthority {
    async fn systems(&self) -> Result<Vec<SystemRef>> {
        Ok(self
            .trees
            .lock()
            .unwrap()
            .keys()
            .map(|id| SystemRef {
                id: id.clone(),
                name: id.clone(),
            })
            .collect())
    }

    async fn system_tree(&self, system_id: &str, _lang: &str) -> Result<SystemTree> {
        Self::delay(&self.tree_delay_ms).await;
        self.trees
            .lock()
            .unwrap()
            .get(system_id)
            .cloned()
            .ok_or_else(|| AccessError::Authority(format!("unknown system {system_id}")))
    }

    async fn scope_children(&self, query: &ScopeChildrenQuery) -> Result<Vec<ScopeValue>> {
        Self::delay(&self.child_delay_ms).await;
        if self.fail_children_once.swap(false, Ordering::SeqCst) {
            return Err(AccessError::Authority("simulated children failure".into()));
        }
        self.child_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .children
            .lock()
            .unwrap()
            .get(&(query.action_id.clone(), path_key(&query.parent_path)))
            .cloned()
            .unwrap_or_default())
    }

    async fn user_permission_states(
        &self,
        user_id: &str,
        action_ids: &[ActionId],
        _tenant_id: Option<&str>,
    ) -> Result<Vec<PermissionState>> {
        self.state_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_state_reads.load(Ordering::SeqCst) {
            return Err(AccessError::Authority("simulated state-read failure".into()));
        }
        let states = self.states.lock().unwrap();
        Ok(action_ids
            .iter()
            .filter_map(|action_id| states.get(&(user_id.to_string(), action_id.clone())))
            .cloned()
            .collect())
    }

    async fn bulk_save(&self, items: &[SaveItem], _tenant_id: Option<&str>) -> Result<()> {
        Self::delay(&self.save_delay_ms).await;
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(AccessError::Authority("simulated save failure".into()));
        }
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        for item in items {
            let wire = item.to_wire();
            self.saved_items.lock().unwrap().push(wire.clone());
            self.apply_item(wire);
        }
        Ok(())
    }

    async fn system_roles(&self, _system_id: &str) -> Result<Vec<SystemRole>> {
        Ok(self
            .role_templates
            .lock()
            .unwrap()
            .keys()
            .map(|id| SystemRole {
                id: id.clone(),
                name: id.clone(),
            })
            .collect())
    }

    async fn apply_role(
        &self,
        user_id: &str,
        system_role_id: &str,
        _system_id: &str,
        _tenant_id: Option<&str>,
    ) -> Result<AppliedRole> {
        let template = self
            .role_templates
            .lock()
            .unwrap()
            .get(system_role_id)
            .cloned()
            .ok_or_else(|| AccessError::Authority(format!("unknown role {system_role_id}")))?;
        let applied = template.len() as u64;
        for state in template {
            self.put_state(user_id, state);
        }
        Ok(AppliedRole {
            permissions_applied: applied,
        })
    }

    async fn users_directory(&self) -> Result<Vec<UserRef>> {
        let states = self.states.lock().unwrap();
        let mut users: Vec<String> = states.keys().map(|(user, _)| user.clone()).collect();
        users.sort();
        users.dedup();
        Ok(users
            .into_iter()
            .map(|id| UserRef {
                name: id.clone(),
                id,
            })
            .collect())
    }

    async fn my_permissions(&self, _force: bool) -> Result<PermissionSnapshot> {
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

/// System tree fixture: one section with an unscoped "List" action and
/// a two-level scoped "Up" action whose root organizations are inlined.
pub fn fixture_tree() -> SystemTree {
    serde_json::from_value(serde_json::json!({
        "sections": [{
            "id": "sec-1",
            "name": "Code Table",
            "actions": [
                {
                    "id": "act-list",
                    "name": "List",
                    "code": "List"
                },
                {
                    "id": "act-up",
                    "name": "Update",
                    "code": "Up",
                    "levels": [
                        { "scopeTableId": "ct-org", "name": "Organization" },
                        { "scopeTableId": "ct-branch", "name": "Organization Branch" }
                    ],
                    "scopes": [
                        { "id": "org-a", "name": "Alpha", "levelIndex": 0 },
                        { "id": "org-b", "name": "Beta", "levelIndex": 0 }
                    ]
                }
            ]
        }]
    }))
    .unwrap()
}

pub fn state(action_id: &str, effect: &str, nodes: &[(&str, &str)]) -> PermissionState {
    let node_states: serde_json::Map<String, serde_json::Value> = nodes
        .iter()
        .map(|(id, eff)| (id.to_string(), serde_json::Value::String(eff.to_string())))
        .collect();
    serde_json::from_value(serde_json::json!({
        "systemSectionActionId": action_id,
        "actionEffect": effect,
        "nodeStates": node_states,
    }))
    .unwrap()
}

pub fn value(id: &str, name: &str) -> ScopeValue {
    ScopeValue {
        id: id.to_string(),
        name: name.to_string(),
    }
}
