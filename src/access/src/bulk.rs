//! Bulk editing: select/deselect-all, role templating, permission cloning
//!
//! All three operations are compositions of the session's grant-state
//! primitives. `toggle_all` is a pure local edit that still needs a
//! `save`; role apply and user-to-user copy are whole-state
//! replacements that write through the authority and then rebase on the
//! authoritative re-read, bypassing the dirty/diff machinery.

use std::sync::atomic::Ordering;

use tracing::info;

use crate::error::{AccessError, Result};
use crate::session::{diff_items, require_mode, GrantState, LoadedSession, PermissionSession};
use crate::types::{ActionTree, AppliedRole, Effect, SectionId};

/// Granularity of a toggle-all edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkScope {
    /// Every action of the loaded system
    System,
    /// Every action of one section
    Section(SectionId),
}

/// Whether an action's effective state already equals the toggle mode.
/// Scoped actions are judged by their currently loaded leaf nodes; with
/// none loaded the check is vacuously satisfied, since a toggle could
/// not touch anything there either way.
fn already_in_mode(session: &LoadedSession, action: &ActionTree, mode: Effect) -> bool {
    match action.leaf_level() {
        None => session.grants.action_effect(&action.id) == mode,
        Some(leaf_level) => session
            .scopes
            .loaded_leaf_values(&action.id, leaf_level)
            .iter()
            .all(|v| session.grants.node_effect(&action.id, v) == mode),
    }
}

impl PermissionSession {
    /// Select or deselect every in-scope action at once.
    ///
    /// If every in-scope action already sits at `mode`, all in-scope
    /// grants are cleared to NONE; otherwise unscoped actions are set to
    /// `mode` and scoped actions have their currently loaded leaf nodes
    /// set to `mode`. This is a pure toggle over local grant state;
    /// persisting it still requires [`PermissionSession::save`].
    pub async fn toggle_all(&self, scope: BulkScope, mode: Effect) -> Result<()> {
        require_mode(mode)?;
        self.with_loaded_mut(|s| {
            let action_ids: Vec<String> = match &scope {
                BulkScope::System => s
                    .sections
                    .iter()
                    .flat_map(|sec| sec.actions.iter().map(|a| a.id.clone()))
                    .collect(),
                BulkScope::Section(section_id) => {
                    let section = s
                        .sections
                        .iter()
                        .find(|sec| &sec.id == section_id)
                        .ok_or_else(|| AccessError::UnknownSection(section_id.clone()))?;
                    section.actions.iter().map(|a| a.id.clone()).collect()
                }
            };

            let all_selected = action_ids.iter().all(|id| {
                s.actions
                    .get(id)
                    .is_some_and(|action| already_in_mode(s, action, mode))
            });

            for action_id in &action_ids {
                let Some(action) = s.actions.get(action_id).cloned() else {
                    continue;
                };
                if all_selected {
                    s.grants.clear_action(action_id);
                    continue;
                }
                match action.leaf_level() {
                    None => s.grants.set_action_effect(action_id, mode),
                    Some(leaf_level) => {
                        let leaves = s.scopes.loaded_leaf_values(action_id, leaf_level);
                        // Wholesale replacement for this action: the
                        // loaded leaves become the grant set for `mode`
                        // and the opposite bucket is emptied.
                        s.grants.clear_action(action_id);
                        for value_id in leaves {
                            s.grants.set_node_effect(action_id, &value_id, mode);
                        }
                    }
                }
            }
            Ok(())
        })
        .await
    }

    /// Copy a role template's grants onto the session user (server-side
    /// operation), then replace grant state and baseline with the
    /// authoritative result.
    pub async fn apply_role(&self, system_role_id: &str) -> Result<AppliedRole> {
        let _guard = self.acquire_save_guard()?;
        let epoch = self.epoch.load(Ordering::SeqCst);

        let (user_id, system_id) = self
            .with_loaded(|s| Ok((s.user_id.clone(), s.system_id.clone())))
            .await?;

        let applied = self
            .authority
            .apply_role(
                &user_id,
                system_role_id,
                &system_id,
                self.config.tenant_id.as_deref(),
            )
            .await
            .map_err(|e| AccessError::Save(e.to_string()))?;
        info!(
            %user_id,
            %system_role_id,
            applied = applied.permissions_applied,
            "applied role template"
        );

        self.reconcile(epoch).await?;
        Ok(applied)
    }

    /// Clone another user's grants for this system onto the session
    /// user: read the source's full grant set, re-label it, and push a
    /// single bulk REPLACE (including deletion markers for grants the
    /// target holds but the source does not), then rebase on the
    /// authoritative re-read. Returns the number of items sent.
    pub async fn copy_permissions_from(&self, source_user_id: &str) -> Result<usize> {
        let _guard = self.acquire_save_guard()?;
        let epoch = self.epoch.load(Ordering::SeqCst);

        let (target_user_id, action_ids, actions, target_baseline) = self
            .with_loaded(|s| {
                Ok((
                    s.user_id.clone(),
                    s.action_order.clone(),
                    s.actions.clone(),
                    s.baseline.clone(),
                ))
            })
            .await?;

        let states = self
            .authority
            .user_permission_states(
                source_user_id,
                &action_ids,
                self.config.tenant_id.as_deref(),
            )
            .await
            .map_err(|e| AccessError::Load(e.to_string()))?;
        let source_grants = GrantState::from_states(&states, &actions)?;

        // The source state relabelled for the target, diffed against the
        // target's baseline so vanished grants are explicitly deleted.
        let items = diff_items(&target_user_id, &source_grants, &target_baseline, &actions);
        if items.is_empty() {
            info!(%source_user_id, %target_user_id, "permission copy found nothing to transfer");
            return Ok(0);
        }

        info!(
            %source_user_id,
            %target_user_id,
            items = items.len(),
            "copying permissions between users"
        );
        self.authority
            .bulk_save(&items, self.config.tenant_id.as_deref())
            .await
            .map_err(|e| AccessError::Save(e.to_string()))?;

        self.reconcile(epoch).await?;
        Ok(items.len())
    }
}
