//! Editing-session lifecycle: baseline diffing, save protocol, failures

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{fixture_tree, state, MockAuthority};
use portal_access::{
    AccessError, Effect, PermissionSession, SaveItem, SessionConfig, SessionPhase,
};

fn session_over(authority: MockAuthority) -> (Arc<MockAuthority>, PermissionSession) {
    common::init_tracing();
    let authority = Arc::new(authority);
    let session = PermissionSession::new(authority.clone(), SessionConfig::default());
    (authority, session)
}

#[tokio::test]
async fn loading_with_no_edits_is_clean() {
    let mock = MockAuthority::new().with_tree("sys-1", fixture_tree());
    mock.put_state("user-1", state("act-list", "ALLOW", &[]));
    mock.put_state("user-1", state("act-up", "NONE", &[("org-a", "ALLOW")]));
    let (_, session) = session_over(mock);

    session.load("user-1", "sys-1").await.unwrap();

    assert_eq!(session.phase().await, SessionPhase::Loaded);
    assert!(!session.is_dirty().await);
    assert!(session.build_save_items().await.unwrap().is_empty());
    assert_eq!(session.action_state("act-list").await.unwrap(), Effect::Allow);
    assert_eq!(
        session.node_state("act-up", "org-a").await.unwrap(),
        Effect::Allow
    );
}

#[tokio::test]
async fn edit_and_undo_restores_clean() {
    let mock = MockAuthority::new().with_tree("sys-1", fixture_tree());
    let (_, session) = session_over(mock);
    session.load("user-1", "sys-1").await.unwrap();

    session
        .set_node_effect("act-up", "org-a", Effect::Allow)
        .await
        .unwrap();
    assert!(session.is_dirty().await);

    session
        .set_node_effect("act-up", "org-a", Effect::None)
        .await
        .unwrap();
    assert!(!session.is_dirty().await);
    assert!(session.build_save_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn cleared_action_is_marked_deleted() {
    let mock = MockAuthority::new().with_tree("sys-1", fixture_tree());
    mock.put_state("user-1", state("act-up", "NONE", &[("org-a", "ALLOW")]));
    let (_, session) = session_over(mock);
    session.load("user-1", "sys-1").await.unwrap();

    session
        .set_node_effect("act-up", "org-a", Effect::None)
        .await
        .unwrap();

    let items = session.build_save_items().await.unwrap();
    assert_eq!(items.len(), 1);
    match &items[0] {
        SaveItem::ScopeLevel { action_id, nodes, deleted, .. } => {
            assert_eq!(action_id, "act-up");
            assert!(nodes.is_empty());
            assert!(*deleted);
        }
        other => panic!("expected scope-level deletion, got {other:?}"),
    }

    // An action that never carried grants is never mentioned.
    assert!(!items.iter().any(|i| i.action_id() == "act-list"));
}

#[tokio::test]
async fn end_to_end_toggle_save_clear() {
    let mock = MockAuthority::new().with_tree("sys-1", fixture_tree());
    let (authority, session) = session_over(mock);
    session.load("user-1", "sys-1").await.unwrap();

    // NONE -> ALLOW
    let next = session.toggle_action("act-list", Effect::Allow).await.unwrap();
    assert_eq!(next, Effect::Allow);
    assert!(session.is_dirty().await);

    let outcome = session.save().await.unwrap();
    assert_eq!(outcome.items_sent, 1);
    assert!(!session.is_dirty().await);

    // The authority observed the write and now holds ALLOW.
    let saved = authority.state_of("user-1", "act-list").unwrap();
    assert_eq!(saved.action_effect, Effect::Allow);

    // ALLOW -> NONE must emit an explicit deletion.
    session.toggle_action("act-list", Effect::Allow).await.unwrap();
    assert!(session.is_dirty().await);
    let items = session.build_save_items().await.unwrap();
    assert_eq!(items.len(), 1);
    match &items[0] {
        SaveItem::ActionLevel { effect, deleted, .. } => {
            assert_eq!(*effect, Effect::None);
            assert!(*deleted);
        }
        other => panic!("expected action-level deletion, got {other:?}"),
    }

    session.save().await.unwrap();
    assert!(!session.is_dirty().await);
    assert!(authority.state_of("user-1", "act-list").is_none());
}

#[tokio::test]
async fn saving_clean_session_sends_nothing() {
    let mock = MockAuthority::new().with_tree("sys-1", fixture_tree());
    let (authority, session) = session_over(mock);
    session.load("user-1", "sys-1").await.unwrap();

    let outcome = session.save().await.unwrap();
    assert_eq!(outcome.items_sent, 0);
    assert_eq!(authority.save_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn second_save_while_one_is_pending_is_rejected() {
    let mock = MockAuthority::new().with_tree("sys-1", fixture_tree());
    mock.save_delay_ms.store(80, Ordering::SeqCst);
    let (authority, session) = session_over(mock);
    let session = Arc::new(session);
    session.load("user-1", "sys-1").await.unwrap();
    session
        .set_action_effect("act-list", Effect::Allow)
        .await
        .unwrap();

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.save().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(session.phase().await, SessionPhase::Saving);
    let second = session.save().await;
    assert!(matches!(second, Err(AccessError::SaveInFlight)));

    first.await.unwrap().unwrap();
    assert_eq!(authority.save_calls.load(Ordering::SeqCst), 1);
    assert!(!session.is_dirty().await);
}

#[tokio::test]
async fn failed_save_leaves_state_dirty_and_retryable() {
    let mock = MockAuthority::new().with_tree("sys-1", fixture_tree());
    let (authority, session) = session_over(mock);
    session.load("user-1", "sys-1").await.unwrap();
    session
        .set_action_effect("act-list", Effect::Deny)
        .await
        .unwrap();

    authority.fail_save.store(true, Ordering::SeqCst);
    let err = session.save().await.unwrap_err();
    assert!(matches!(err, AccessError::Save(_)));
    assert!(session.is_dirty().await);
    assert_eq!(session.phase().await, SessionPhase::Loaded);

    // The same operation retried succeeds.
    authority.fail_save.store(false, Ordering::SeqCst);
    session.save().await.unwrap();
    assert!(!session.is_dirty().await);
    assert_eq!(
        authority.state_of("user-1", "act-list").unwrap().action_effect,
        Effect::Deny
    );
}

#[tokio::test]
async fn reconciliation_failure_requires_reload() {
    let mock = MockAuthority::new().with_tree("sys-1", fixture_tree());
    let (authority, session) = session_over(mock);
    session.load("user-1", "sys-1").await.unwrap();
    session
        .set_action_effect("act-list", Effect::Allow)
        .await
        .unwrap();

    // The save itself lands, but the follow-up authoritative re-read fails.
    authority.fail_state_reads.store(true, Ordering::SeqCst);
    let err = session.save().await.unwrap_err();
    assert!(matches!(err, AccessError::Reconciliation(_)));
    assert_eq!(session.phase().await, SessionPhase::ReloadRequired);

    // Local state is trusted neither way: edits are refused until reload.
    let refused = session.set_action_effect("act-list", Effect::Deny).await;
    assert!(matches!(refused, Err(AccessError::ReloadRequired)));

    // A fresh load recovers the session.
    authority.fail_state_reads.store(false, Ordering::SeqCst);
    session.load("user-1", "sys-1").await.unwrap();
    assert_eq!(session.phase().await, SessionPhase::Loaded);
    assert!(!session.is_dirty().await);
}

#[tokio::test]
async fn stale_load_result_is_discarded() {
    let mock = MockAuthority::new().with_tree("sys-1", fixture_tree());
    let slow_tree: portal_access::SystemTree = serde_json::from_value(serde_json::json!({
        "sections": [{ "id": "sec-slow", "name": "Slow", "actions": [] }]
    }))
    .unwrap();
    let mock = mock.with_tree("sys-slow", slow_tree);
    mock.tree_delay_ms.store(80, Ordering::SeqCst);
    let (authority, session) = session_over(mock);
    let session = Arc::new(session);

    let stale = {
        let session = session.clone();
        tokio::spawn(async move { session.load("user-1", "sys-slow").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // A newer selection supersedes the in-flight load.
    authority.tree_delay_ms.store(0, Ordering::SeqCst);
    session.load("user-1", "sys-1").await.unwrap();

    let stale_result = stale.await.unwrap();
    assert!(matches!(stale_result, Err(AccessError::StaleSession)));

    let sections = session.sections().await.unwrap();
    assert_eq!(sections[0].id, "sec-1");
}

#[tokio::test]
async fn load_failure_keeps_prior_session() {
    let mock = MockAuthority::new().with_tree("sys-1", fixture_tree());
    mock.put_state("user-1", state("act-list", "ALLOW", &[]));
    let (_, session) = session_over(mock);
    session.load("user-1", "sys-1").await.unwrap();

    let err = session.load("user-1", "sys-missing").await.unwrap_err();
    assert!(matches!(err, AccessError::Load(_)));

    // The previous session key keeps working; note its baseline survived.
    assert_eq!(session.phase().await, SessionPhase::Loaded);
    assert_eq!(session.action_state("act-list").await.unwrap(), Effect::Allow);
}

#[tokio::test]
async fn malformed_node_state_is_rejected_at_the_boundary() {
    let mock = MockAuthority::new().with_tree("sys-1", fixture_tree());
    mock.put_state("user-1", state("act-up", "NONE", &[("org-a", "NONE")]));
    let (_, session) = session_over(mock);

    let err = session.load("user-1", "sys-1").await.unwrap_err();
    assert!(matches!(err, AccessError::InvalidPayload(_)));
    assert_eq!(session.phase().await, SessionPhase::Unloaded);
}

#[tokio::test]
async fn scoped_and_unscoped_edits_route_by_levels() {
    let mock = MockAuthority::new().with_tree("sys-1", fixture_tree());
    let (_, session) = session_over(mock);
    session.load("user-1", "sys-1").await.unwrap();

    let err = session
        .set_action_effect("act-up", Effect::Allow)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::ActionHasLevels(_)));

    let err = session
        .set_node_effect("act-list", "org-a", Effect::Allow)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::ActionHasNoLevels(_)));

    let err = session.set_action_effect("act-nope", Effect::Allow).await.unwrap_err();
    assert!(matches!(err, AccessError::UnknownAction(_)));
}
