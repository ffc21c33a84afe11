//! Error types for the permission engine

use thiserror::Error;

use crate::types::ActionId;

/// Permission engine errors.
///
/// Every failure is local to the operation that raised it: caches and
/// the last committed baseline are never corrupted by a failed call.
/// `Reconciliation` is the one exception that poisons the session: the
/// save was persisted but the authoritative re-read failed, so local
/// state can be trusted neither clean nor dirty and the session must be
/// reloaded before further edits.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Remote authority call failed (transport or server-side)
    #[error("authority request failed: {0}")]
    Authority(String),

    /// Tree or state fetch failed; the session stays in its prior state
    #[error("permission load failed: {0}")]
    Load(String),

    /// Scope branch fetch failed; the branch stays unloaded and the
    /// expand is retryable
    #[error("scope branch expand failed: {0}")]
    Expand(String),

    /// Bulk save rejected or lost; grant state remains dirty and unsaved
    #[error("permission save failed: {0}")]
    Save(String),

    /// Save persisted but the follow-up authoritative re-read failed;
    /// the session now requires a fresh load
    #[error("saved, but re-reading authoritative state failed: {0}")]
    Reconciliation(String),

    /// A bulk save (or another whole-state replacement) is already in
    /// flight for this session
    #[error("a save is already in flight for this session")]
    SaveInFlight,

    /// The session switched to another user/system while the operation
    /// was in flight; the late result was discarded
    #[error("session changed while the operation was in flight")]
    StaleSession,

    /// No editing session is loaded
    #[error("no permission session is loaded")]
    NotLoaded,

    /// A prior reconciliation failure left the session unusable
    #[error("session requires a reload before further operations")]
    ReloadRequired,

    /// Authority payload failed boundary validation
    #[error("invalid authority payload: {0}")]
    InvalidPayload(String),

    /// Action id not present in the loaded system tree
    #[error("unknown action: {0}")]
    UnknownAction(ActionId),

    /// Section id not present in the loaded system tree
    #[error("unknown section: {0}")]
    UnknownSection(String),

    /// Action carries scope levels; grants live on its leaf nodes
    #[error("action {0} is scoped; set node-level effects instead")]
    ActionHasLevels(ActionId),

    /// Action has no scope levels; grants live on the action switch
    #[error("action {0} is unscoped; set the action-level effect instead")]
    ActionHasNoLevels(ActionId),
}

/// Result type for permission-engine operations
pub type Result<T> = std::result::Result<T, AccessError>;
