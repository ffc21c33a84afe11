//! Permission-editing session: grant state, baseline diffing, save protocol
//!
//! One session edits one user's permissions for one system. Grant state
//! is mutated locally, compared structurally against the last
//! authoritative baseline, and persisted as a minimal bulk REPLACE
//! delta. The baseline is only ever replaced by data read back from the
//! authority, never synthesized from pending local edits.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::authority::AccessAuthority;
use crate::error::{AccessError, Result};
use crate::scope::{NodePathRegistry, ScopeNode, ScopeTreeCache};
use crate::types::{
    ActionId, ActionTree, Effect, NodeGrant, PermissionState, SaveItem, ScopeValueId, SectionTree,
    SystemId, TenantId, UserId,
};

/// Session-wide configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Language for localized display names
    pub lang: String,
    /// Tenant propagated on state reads and saves
    pub tenant_id: Option<TenantId>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lang: "en".to_string(),
            tenant_id: None,
        }
    }
}

/// Observable lifecycle phase of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unloaded,
    Loading,
    Loaded,
    Saving,
    /// A reconciliation failure left local state untrustworthy; a fresh
    /// `load` is required before anything else
    ReloadRequired,
}

/// In-memory grant state for the session's user/system pair.
///
/// Unscoped actions live in `action_effects`; scoped actions carry
/// per-value id sets split by effect. Ordered collections keep the
/// normalized form independent of edit order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantState {
    pub action_effects: BTreeMap<ActionId, Effect>,
    pub allow: BTreeMap<ActionId, BTreeSet<ScopeValueId>>,
    pub deny: BTreeMap<ActionId, BTreeSet<ScopeValueId>>,
}

/// Normalized snapshot of grant state used for dirtiness checks.
///
/// Structural equality over sorted collections replaces the fragile
/// serialize-then-compare approach: NONE effects and empty sets are
/// stripped so equivalent states always compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline {
    action_effects: BTreeMap<ActionId, Effect>,
    allow: BTreeMap<ActionId, BTreeSet<ScopeValueId>>,
    deny: BTreeMap<ActionId, BTreeSet<ScopeValueId>>,
}

impl Baseline {
    /// Actions holding any grant in this baseline
    fn touched(&self) -> BTreeSet<ActionId> {
        self.action_effects
            .keys()
            .chain(self.allow.keys())
            .chain(self.deny.keys())
            .cloned()
            .collect()
    }

    fn contains(&self, action_id: &str) -> bool {
        self.action_effects.contains_key(action_id)
            || self.allow.contains_key(action_id)
            || self.deny.contains_key(action_id)
    }
}

impl GrantState {
    /// Build grant state from authority-read permission states, routing
    /// each entry by whether its action carries scope levels.
    pub fn from_states(
        states: &[PermissionState],
        actions: &HashMap<ActionId, ActionTree>,
    ) -> Result<Self> {
        let mut grants = GrantState::default();

        for state in states {
            state.validate()?;
            let action_id = &state.system_section_action_id;
            let Some(action) = actions.get(action_id) else {
                warn!(%action_id, "authority returned state for an action not in the tree");
                continue;
            };

            if action.levels.is_empty() {
                if state.action_effect.is_set() {
                    grants
                        .action_effects
                        .insert(action_id.clone(), state.action_effect);
                }
            } else {
                for (value_id, effect) in &state.node_states {
                    let bucket = match effect {
                        Effect::Allow => &mut grants.allow,
                        Effect::Deny => &mut grants.deny,
                        Effect::None => continue, // rejected by validate()
                    };
                    bucket
                        .entry(action_id.clone())
                        .or_default()
                        .insert(value_id.clone());
                }
            }
        }

        Ok(grants)
    }

    /// Effective action-level effect (unscoped actions)
    pub fn action_effect(&self, action_id: &str) -> Effect {
        self.action_effects
            .get(action_id)
            .copied()
            .unwrap_or_default()
    }

    /// Effective effect for one scope value of one action
    pub fn node_effect(&self, action_id: &str, value_id: &str) -> Effect {
        if self
            .allow
            .get(action_id)
            .is_some_and(|set| set.contains(value_id))
        {
            return Effect::Allow;
        }
        if self
            .deny
            .get(action_id)
            .is_some_and(|set| set.contains(value_id))
        {
            return Effect::Deny;
        }
        Effect::None
    }

    /// Set or clear the action-level effect
    pub fn set_action_effect(&mut self, action_id: &str, effect: Effect) {
        if effect.is_set() {
            self.action_effects.insert(action_id.to_string(), effect);
        } else {
            self.action_effects.remove(action_id);
        }
    }

    /// Set or clear one scope value's effect. The value is removed from
    /// both buckets first, so a value can never carry ALLOW and DENY at
    /// once.
    pub fn set_node_effect(&mut self, action_id: &str, value_id: &str, effect: Effect) {
        if let Some(set) = self.allow.get_mut(action_id) {
            set.remove(value_id);
        }
        if let Some(set) = self.deny.get_mut(action_id) {
            set.remove(value_id);
        }
        let bucket = match effect {
            Effect::Allow => &mut self.allow,
            Effect::Deny => &mut self.deny,
            Effect::None => return,
        };
        bucket
            .entry(action_id.to_string())
            .or_default()
            .insert(value_id.to_string());
    }

    /// Remove every grant an action carries
    pub fn clear_action(&mut self, action_id: &str) {
        self.action_effects.remove(action_id);
        self.allow.remove(action_id);
        self.deny.remove(action_id);
    }

    /// Normalize: drop NONE effects and empty sets
    pub fn normalized(&self) -> Baseline {
        Baseline {
            action_effects: self
                .action_effects
                .iter()
                .filter(|(_, e)| e.is_set())
                .map(|(k, e)| (k.clone(), *e))
                .collect(),
            allow: self
                .allow
                .iter()
                .filter(|(_, set)| !set.is_empty())
                .map(|(k, set)| (k.clone(), set.clone()))
                .collect(),
            deny: self
                .deny
                .iter()
                .filter(|(_, set)| !set.is_empty())
                .map(|(k, set)| (k.clone(), set.clone()))
                .collect(),
        }
    }
}

/// Compute the minimal bulk-REPLACE item set for `grants` against
/// `baseline`. Touched actions are those granted now or granted in the
/// baseline, so a fully cleared action is emitted with `deleted = true`
/// rather than silently dropped.
pub(crate) fn diff_items(
    user_id: &str,
    grants: &GrantState,
    baseline: &Baseline,
    actions: &HashMap<ActionId, ActionTree>,
) -> Vec<SaveItem> {
    let current = grants.normalized();
    let mut touched = current.touched();
    touched.extend(baseline.touched());

    let mut items = Vec::new();
    for action_id in touched {
        let Some(action) = actions.get(&action_id) else {
            warn!(%action_id, "grant held for an action not in the tree; skipping");
            continue;
        };
        let had_before = baseline.contains(&action_id);

        if action.levels.is_empty() {
            let effect = grants.action_effect(&action_id);
            if effect.is_set() {
                items.push(SaveItem::ActionLevel {
                    user_id: user_id.to_string(),
                    action_id,
                    effect,
                    deleted: false,
                });
            } else if had_before {
                items.push(SaveItem::ActionLevel {
                    user_id: user_id.to_string(),
                    action_id,
                    effect: Effect::None,
                    deleted: true,
                });
            }
            continue;
        }

        let Some(leaf) = action.levels.last() else {
            continue;
        };
        let empty = BTreeSet::new();
        let allow = grants.allow.get(&action_id).unwrap_or(&empty);
        let deny = grants.deny.get(&action_id).unwrap_or(&empty);

        if !allow.is_empty() || !deny.is_empty() {
            let nodes = allow
                .iter()
                .map(|v| (v, Effect::Allow))
                .chain(deny.iter().map(|v| (v, Effect::Deny)))
                .map(|(value_id, effect)| NodeGrant {
                    code_table_id: leaf.scope_table_id.clone(),
                    code_table_value_id: value_id.clone(),
                    effect,
                })
                .collect();
            items.push(SaveItem::ScopeLevel {
                user_id: user_id.to_string(),
                action_id,
                nodes,
                deleted: false,
            });
        } else if had_before {
            items.push(SaveItem::ScopeLevel {
                user_id: user_id.to_string(),
                action_id,
                nodes: Vec::new(),
                deleted: true,
            });
        }
    }

    items
}

/// Outcome of a successful save
#[derive(Debug, Clone, Copy)]
pub struct SaveOutcome {
    pub items_sent: usize,
    pub saved_at: DateTime<Utc>,
}

pub(crate) struct LoadedSession {
    pub(crate) user_id: UserId,
    pub(crate) system_id: SystemId,
    pub(crate) sections: Vec<SectionTree>,
    pub(crate) actions: HashMap<ActionId, ActionTree>,
    /// Action ids in tree order, used for deterministic state reads
    pub(crate) action_order: Vec<ActionId>,
    pub(crate) scopes: Arc<ScopeTreeCache>,
    pub(crate) paths: Arc<NodePathRegistry>,
    pub(crate) grants: GrantState,
    pub(crate) baseline: Baseline,
    pub(crate) loaded_at: DateTime<Utc>,
}

pub(crate) enum SessionSlot {
    Unloaded,
    Loaded(Box<LoadedSession>),
    ReloadRequired,
}

/// Releases the single-save-in-flight guard on every exit path
pub(crate) struct SaveGuard<'a>(&'a AtomicBool);

impl Drop for SaveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One user's permission-editing session for one system.
///
/// The session owns its scope caches and discards them when the
/// user/system selection changes. Methods take `&self`; state lives
/// behind a `RwLock`, so the session can be shared (`Arc`) with
/// concurrently running expand requests.
pub struct PermissionSession {
    pub(crate) authority: Arc<dyn AccessAuthority>,
    pub(crate) config: SessionConfig,
    pub(crate) state: RwLock<SessionSlot>,
    /// Bumped at every `load`; async completions compare it and drop
    /// results that belong to an abandoned session key
    pub(crate) epoch: AtomicU64,
    pub(crate) loading: AtomicBool,
    pub(crate) save_in_flight: AtomicBool,
}

impl PermissionSession {
    pub fn new(authority: Arc<dyn AccessAuthority>, config: SessionConfig) -> Self {
        Self {
            authority,
            config,
            state: RwLock::new(SessionSlot::Unloaded),
            epoch: AtomicU64::new(0),
            loading: AtomicBool::new(false),
            save_in_flight: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn authority(&self) -> &Arc<dyn AccessAuthority> {
        &self.authority
    }

    pub async fn phase(&self) -> SessionPhase {
        if self.save_in_flight.load(Ordering::SeqCst) {
            return SessionPhase::Saving;
        }
        if self.loading.load(Ordering::SeqCst) {
            return SessionPhase::Loading;
        }
        match &*self.state.read().await {
            SessionSlot::Unloaded => SessionPhase::Unloaded,
            SessionSlot::Loaded(_) => SessionPhase::Loaded,
            SessionSlot::ReloadRequired => SessionPhase::ReloadRequired,
        }
    }

    /// Load (or reload) the editing session for a user/system pair.
    ///
    /// On failure the session keeps its previous stable state and the
    /// call is retryable. A load that completes after a newer `load`
    /// started is discarded as stale.
    pub async fn load(&self, user_id: &str, system_id: &str) -> Result<()> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.loading.store(true, Ordering::SeqCst);
        let result = self.load_inner(user_id, system_id, epoch).await;
        if self.epoch.load(Ordering::SeqCst) == epoch {
            self.loading.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn load_inner(&self, user_id: &str, system_id: &str, epoch: u64) -> Result<()> {
        info!(%user_id, %system_id, "loading permission session");

        let tree = self
            .authority
            .system_tree(system_id, &self.config.lang)
            .await
            .map_err(|e| AccessError::Load(e.to_string()))?;

        let scopes = Arc::new(ScopeTreeCache::new());
        let paths = Arc::new(NodePathRegistry::new());
        let mut actions = HashMap::new();
        let mut action_order = Vec::new();
        for section in &tree.sections {
            for action in &section.actions {
                if !action.levels.is_empty() {
                    scopes.seed_from_tree(&paths, action);
                }
                action_order.push(action.id.clone());
                actions.insert(action.id.clone(), action.clone());
            }
        }

        let states = self
            .authority
            .user_permission_states(user_id, &action_order, self.config.tenant_id.as_deref())
            .await
            .map_err(|e| AccessError::Load(e.to_string()))?;
        let grants = GrantState::from_states(&states, &actions)?;
        let baseline = grants.normalized();

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(%user_id, %system_id, "discarding stale load result");
            return Err(AccessError::StaleSession);
        }

        debug!(
            actions = action_order.len(),
            granted = states.len(),
            "permission session loaded"
        );
        *self.state.write().await = SessionSlot::Loaded(Box::new(LoadedSession {
            user_id: user_id.to_string(),
            system_id: system_id.to_string(),
            sections: tree.sections,
            actions,
            action_order,
            scopes,
            paths,
            grants,
            baseline,
            loaded_at: Utc::now(),
        }));
        Ok(())
    }

    pub(crate) async fn with_loaded<R>(
        &self,
        f: impl FnOnce(&LoadedSession) -> Result<R>,
    ) -> Result<R> {
        match &*self.state.read().await {
            SessionSlot::Loaded(session) => f(session),
            SessionSlot::ReloadRequired => Err(AccessError::ReloadRequired),
            SessionSlot::Unloaded => Err(AccessError::NotLoaded),
        }
    }

    pub(crate) async fn with_loaded_mut<R>(
        &self,
        f: impl FnOnce(&mut LoadedSession) -> Result<R>,
    ) -> Result<R> {
        match &mut *self.state.write().await {
            SessionSlot::Loaded(session) => f(session),
            SessionSlot::ReloadRequired => Err(AccessError::ReloadRequired),
            SessionSlot::Unloaded => Err(AccessError::NotLoaded),
        }
    }

    /// Sections of the loaded system tree
    pub async fn sections(&self) -> Result<Vec<SectionTree>> {
        self.with_loaded(|s| Ok(s.sections.clone())).await
    }

    pub async fn loaded_at(&self) -> Result<DateTime<Utc>> {
        self.with_loaded(|s| Ok(s.loaded_at)).await
    }

    /// Current grant state (cloned snapshot)
    pub async fn grants(&self) -> Result<GrantState> {
        self.with_loaded(|s| Ok(s.grants.clone())).await
    }

    /// Effective effect for one scope value
    pub async fn node_state(&self, action_id: &str, value_id: &str) -> Result<Effect> {
        self.with_loaded(|s| Ok(s.grants.node_effect(action_id, value_id)))
            .await
    }

    /// Effective action-level effect for an unscoped action
    pub async fn action_state(&self, action_id: &str) -> Result<Effect> {
        self.with_loaded(|s| Ok(s.grants.action_effect(action_id)))
            .await
    }

    /// Set the action-level effect of an unscoped action
    pub async fn set_action_effect(&self, action_id: &str, effect: Effect) -> Result<()> {
        self.with_loaded_mut(|s| {
            let action = s
                .actions
                .get(action_id)
                .ok_or_else(|| AccessError::UnknownAction(action_id.to_string()))?;
            if !action.levels.is_empty() {
                return Err(AccessError::ActionHasLevels(action_id.to_string()));
            }
            s.grants.set_action_effect(action_id, effect);
            Ok(())
        })
        .await
    }

    /// Checkbox-style toggle for an unscoped action: selecting with the
    /// current mode clears it, anything else sets the mode.
    pub async fn toggle_action(&self, action_id: &str, mode: Effect) -> Result<Effect> {
        require_mode(mode)?;
        self.with_loaded_mut(|s| {
            let action = s
                .actions
                .get(action_id)
                .ok_or_else(|| AccessError::UnknownAction(action_id.to_string()))?;
            if !action.levels.is_empty() {
                return Err(AccessError::ActionHasLevels(action_id.to_string()));
            }
            let next = if s.grants.action_effect(action_id) == mode {
                Effect::None
            } else {
                mode
            };
            s.grants.set_action_effect(action_id, next);
            Ok(next)
        })
        .await
    }

    /// Set one scope value's effect on a scoped action
    pub async fn set_node_effect(
        &self,
        action_id: &str,
        value_id: &str,
        effect: Effect,
    ) -> Result<()> {
        self.with_loaded_mut(|s| {
            let action = s
                .actions
                .get(action_id)
                .ok_or_else(|| AccessError::UnknownAction(action_id.to_string()))?;
            if action.levels.is_empty() {
                return Err(AccessError::ActionHasNoLevels(action_id.to_string()));
            }
            s.grants.set_node_effect(action_id, value_id, effect);
            Ok(())
        })
        .await
    }

    /// Checkbox-style toggle for one scope value
    pub async fn toggle_node(&self, action_id: &str, value_id: &str, mode: Effect) -> Result<Effect> {
        require_mode(mode)?;
        self.with_loaded_mut(|s| {
            let action = s
                .actions
                .get(action_id)
                .ok_or_else(|| AccessError::UnknownAction(action_id.to_string()))?;
            if action.levels.is_empty() {
                return Err(AccessError::ActionHasNoLevels(action_id.to_string()));
            }
            let next = if s.grants.node_effect(action_id, value_id) == mode {
                Effect::None
            } else {
                mode
            };
            s.grants.set_node_effect(action_id, value_id, next);
            Ok(next)
        })
        .await
    }

    /// Root scope nodes of an action, from the session cache
    pub async fn root_nodes(&self, action_id: &str) -> Result<Vec<ScopeNode>> {
        self.with_loaded(|s| Ok(s.scopes.root_nodes(action_id))).await
    }

    /// Expand a scope node, lazily fetching its children
    pub async fn expand_node(&self, action_id: &str, node: &ScopeNode) -> Result<Vec<ScopeNode>> {
        let (scopes, paths, action, lang) = self
            .with_loaded(|s| {
                let action = s
                    .actions
                    .get(action_id)
                    .cloned()
                    .ok_or_else(|| AccessError::UnknownAction(action_id.to_string()))?;
                Ok((
                    s.scopes.clone(),
                    s.paths.clone(),
                    action,
                    self.config.lang.clone(),
                ))
            })
            .await?;

        scopes
            .expand(&paths, self.authority.as_ref(), &action, node, &lang)
            .await
    }

    /// Collapse a scope node (cache is kept)
    pub async fn collapse_node(&self, action_id: &str, node: &ScopeNode) -> Result<()> {
        self.with_loaded(|s| {
            s.scopes.collapse(action_id, node);
            Ok(())
        })
        .await
    }

    /// Branch keys that must be expanded so every currently granted
    /// value of the action is visible
    pub async fn branches_to_expand(&self, action_id: &str) -> Result<BTreeSet<String>> {
        self.with_loaded(|s| {
            let empty = BTreeSet::new();
            let granted = s
                .grants
                .allow
                .get(action_id)
                .unwrap_or(&empty)
                .iter()
                .chain(s.grants.deny.get(action_id).unwrap_or(&empty).iter());
            Ok(s.paths.branches_to_expand(action_id, granted))
        })
        .await
    }

    /// Whether local edits diverge from the authoritative baseline
    pub async fn is_dirty(&self) -> bool {
        self.with_loaded(|s| Ok(s.grants.normalized() != s.baseline))
            .await
            .unwrap_or(false)
    }

    /// The minimal upsert/delete set a save would send right now
    pub async fn build_save_items(&self) -> Result<Vec<SaveItem>> {
        self.with_loaded(|s| Ok(diff_items(&s.user_id, &s.grants, &s.baseline, &s.actions)))
            .await
    }

    /// Persist local edits as one bulk REPLACE, then re-read
    /// authoritative state and rebase the baseline on it.
    ///
    /// At most one save (or other whole-state replacement) may be in
    /// flight; concurrent attempts fail with [`AccessError::SaveInFlight`].
    /// A clean session saves nothing and succeeds trivially. If the save
    /// persists but the re-read fails, the session is marked
    /// reload-required: local state can no longer be trusted either way.
    pub async fn save(&self) -> Result<SaveOutcome> {
        let _guard = self.acquire_save_guard()?;
        let epoch = self.epoch.load(Ordering::SeqCst);

        let items = self.build_save_items().await?;
        if items.is_empty() {
            debug!("save requested with no delta; skipping request");
            return Ok(SaveOutcome {
                items_sent: 0,
                saved_at: Utc::now(),
            });
        }

        info!(items = items.len(), "saving permission delta");
        self.authority
            .bulk_save(&items, self.config.tenant_id.as_deref())
            .await
            .map_err(|e| AccessError::Save(e.to_string()))?;

        self.reconcile(epoch).await?;
        Ok(SaveOutcome {
            items_sent: items.len(),
            saved_at: Utc::now(),
        })
    }

    pub(crate) fn acquire_save_guard(&self) -> Result<SaveGuard<'_>> {
        if self.save_in_flight.swap(true, Ordering::SeqCst) {
            return Err(AccessError::SaveInFlight);
        }
        Ok(SaveGuard(&self.save_in_flight))
    }

    /// Re-read authoritative state after a server-side write and replace
    /// both grant state and baseline with it. Called after `save`,
    /// `apply_role` and `copy_permissions_from`.
    pub(crate) async fn reconcile(&self, epoch: u64) -> Result<()> {
        match self.refresh_from_authority(epoch).await {
            Ok(()) => Ok(()),
            Err(AccessError::StaleSession) => Err(AccessError::StaleSession),
            Err(e) => {
                warn!(error = %e, "post-save re-read failed; session requires reload");
                *self.state.write().await = SessionSlot::ReloadRequired;
                Err(AccessError::Reconciliation(e.to_string()))
            }
        }
    }

    async fn refresh_from_authority(&self, epoch: u64) -> Result<()> {
        let (user_id, action_ids, actions) = self
            .with_loaded(|s| Ok((s.user_id.clone(), s.action_order.clone(), s.actions.clone())))
            .await?;

        let states = self
            .authority
            .user_permission_states(&user_id, &action_ids, self.config.tenant_id.as_deref())
            .await
            .map_err(|e| AccessError::Authority(e.to_string()))?;
        let grants = GrantState::from_states(&states, &actions)?;
        let baseline = grants.normalized();

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("discarding stale reconciliation result");
            return Err(AccessError::StaleSession);
        }

        self.with_loaded_mut(|s| {
            s.grants = grants;
            s.baseline = baseline;
            Ok(())
        })
        .await
    }
}

pub(crate) fn require_mode(mode: Effect) -> Result<()> {
    if mode.is_set() {
        Ok(())
    } else {
        Err(AccessError::InvalidPayload(
            "toggle mode must be ALLOW or DENY".to_string(),
        ))
    }
}
