//! # Portal Access Engine
//!
//! Hierarchical permission engine for the portal: resolves what a user
//! may do and persists changes to that authorization state.
//!
//! ## Features
//!
//! - **Effect resolution** over ALLOW/DENY/NONE grant signals, with
//!   scope-specific and existential checks
//! - **O(1) permission lookups** via case-insensitive indexes over the
//!   system/section/action tree
//! - **Lazy scope trees** streamed from the remote authority one level
//!   at a time, with coalesced concurrent fetches and multi-parent
//!   path tracking
//! - **Minimal save deltas** computed against a normalized baseline,
//!   with explicit deletion markers and post-save reconciliation from
//!   authoritative state
//! - **Bulk editing**: select/deselect-all, role templating and
//!   user-to-user permission cloning
//!
//! ## Example
//!
//! ```
//! use portal_access::{EffectResolver, PermissionSnapshot};
//!
//! let snapshot: PermissionSnapshot = serde_json::from_value(serde_json::json!({
//!     "systems": [{
//!         "systemId": "sys-cms",
//!         "name": "CMS",
//!         "sections": [{
//!             "systemSectionId": "sec-codes",
//!             "name": "Code Table",
//!             "actions": [{
//!                 "systemSectionActionId": "act-list",
//!                 "name": "List",
//!                 "code": "List",
//!                 "effect": "ALLOW"
//!             }]
//!         }]
//!     }]
//! }))?;
//!
//! let resolver = EffectResolver::new(snapshot);
//! assert!(resolver.has_permission("List", Some("Code Table"), None));
//! assert!(resolver.section_permissions("Code Table", Some("CMS")).can_list);
//! # Ok::<(), serde_json::Error>(())
//! ```

pub mod authority;
pub mod bulk;
pub mod error;
pub mod index;
pub mod resolver;
pub mod scope;
pub mod session;
pub mod types;

pub use authority::{AccessAuthority, ScopeChildrenQuery};
pub use bulk::BulkScope;
pub use error::{AccessError, Result};
pub use index::PermissionIndex;
pub use resolver::{AccessibleSection, EffectResolver, SectionPermissions};
pub use scope::{NodePathRegistry, ScopeNode, ScopeTreeCache};
pub use session::{
    GrantState, PermissionSession, SaveOutcome, SessionConfig, SessionPhase,
};
pub use types::{
    ActionTree, AppliedRole, Effect, Level, PermissionSnapshot, PermissionState, SaveItem,
    ScopeValue, SectionTree, SystemRef, SystemRole, SystemTree, TreeNode, UserRef,
};

#[cfg(feature = "http")]
pub use authority::HttpAuthority;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
