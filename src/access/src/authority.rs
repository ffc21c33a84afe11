//! Remote access-authority contracts
//!
//! The engine never owns grant persistence; it reads and writes
//! authorization state through this trait. Implementations decide
//! routes and transports: [`http::HttpAuthority`] (feature `http`)
//! speaks the portal's REST API, and tests substitute in-memory doubles.

use async_trait::async_trait;

use crate::error::Result;
use crate::scope::NodePath;
use crate::types::{
    ActionId, AppliedRole, Level, PermissionSnapshot, PermissionState, SaveItem, ScopeValue,
    SystemRef, SystemRole, SystemTree, UserRef,
};

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::HttpAuthority;

/// Parameters for one lazy scope-children fetch: the next level's
/// candidate values given the selected parent chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeChildrenQuery {
    pub action_id: ActionId,
    /// Depth of the level being fetched
    pub level_index: usize,
    /// Level descriptor (vocabulary table + display name) at that depth
    pub level: Level,
    /// Selected ancestor value ids, root first
    pub parent_path: NodePath,
    pub lang: String,
}

/// The remote authority the engine consumes.
///
/// All reads are idempotent and freely retryable. `bulk_save` replaces
/// server-side grants for the touched actions wholesale, honoring each
/// item's deletion marker.
#[async_trait]
pub trait AccessAuthority: Send + Sync {
    /// List selectable systems
    async fn systems(&self) -> Result<Vec<SystemRef>>;

    /// Fetch the declarative section/action tree for one system
    async fn system_tree(&self, system_id: &str, lang: &str) -> Result<SystemTree>;

    /// Fetch the next level's candidate values under a parent chain
    async fn scope_children(&self, query: &ScopeChildrenQuery) -> Result<Vec<ScopeValue>>;

    /// Read one user's grant state for the given actions
    async fn user_permission_states(
        &self,
        user_id: &str,
        action_ids: &[ActionId],
        tenant_id: Option<&str>,
    ) -> Result<Vec<PermissionState>>;

    /// Bulk-replace grants for the touched actions
    async fn bulk_save(&self, items: &[SaveItem], tenant_id: Option<&str>) -> Result<()>;

    /// List role templates defined for one system
    async fn system_roles(&self, system_id: &str) -> Result<Vec<SystemRole>>;

    /// Copy a role template's grants onto a user (server-side)
    async fn apply_role(
        &self,
        user_id: &str,
        system_role_id: &str,
        system_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<AppliedRole>;

    /// Directory of users, for permission-copy source selection
    async fn users_directory(&self) -> Result<Vec<UserRef>>;

    /// The caller's own granted snapshot, for permission checks
    async fn my_permissions(&self, force: bool) -> Result<PermissionSnapshot>;
}
