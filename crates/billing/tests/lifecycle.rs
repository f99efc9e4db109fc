//! Integration tests for the subscription lifecycle: plan catalog
//! seeding, trial single-use, cancellation, expiration sweep, and
//! capability checks.

mod common;

use std::sync::Arc;

use time::macros::datetime;
use uuid::Uuid;

use authmesh_billing::{BillingError, SubscriptionService, FREE_PLAN, TRIAL_PLAN};
use authmesh_shared::{ManualClock, SubscriptionStatus, UNLIMITED};

use common::*;

struct Harness {
    subscriptions: Arc<MemorySubscriptionStore>,
    events: Arc<MemoryEventStore>,
    clock: Arc<ManualClock>,
    service: SubscriptionService,
}

async fn harness(now: time::OffsetDateTime) -> Harness {
    let subscriptions = Arc::new(MemorySubscriptionStore::default());
    let plans = Arc::new(MemoryPlanStore::default());
    let events = Arc::new(MemoryEventStore::default());
    let clock = Arc::new(ManualClock::new(now));

    let service = SubscriptionService::new(
        subscriptions.clone(),
        plans,
        events.clone(),
        clock.clone(),
    );
    service.initialize_default_plans().await.unwrap();

    Harness {
        subscriptions,
        events,
        clock,
        service,
    }
}

// =============================================================================
// Plan catalog
// =============================================================================

#[tokio::test]
async fn test_plan_seed_is_idempotent() {
    let subscriptions = Arc::new(MemorySubscriptionStore::default());
    let plans = Arc::new(MemoryPlanStore::default());
    let events = Arc::new(MemoryEventStore::default());
    let clock = Arc::new(ManualClock::new(datetime!(2026-01-01 00:00:00 UTC)));
    let service = SubscriptionService::new(
        subscriptions,
        plans.clone(),
        events,
        clock,
    );

    let first = service.initialize_default_plans().await.unwrap();
    let second = service.initialize_default_plans().await.unwrap();

    assert_eq!(first, 4);
    assert_eq!(second, 0);

    let catalog = service.get_all_plans().await.unwrap();
    assert_eq!(catalog.len(), 4);
    assert_eq!(catalog[0].name, FREE_PLAN);
}

// =============================================================================
// Lifecycle transitions
// =============================================================================

#[tokio::test]
async fn test_free_subscription_on_signup() {
    let h = harness(datetime!(2026-03-01 09:00:00 UTC)).await;
    let account = Uuid::new_v4();

    let subscription = h.service.create_free_subscription(account).await.unwrap();

    assert_eq!(subscription.status, SubscriptionStatus::Free);
    assert!(!subscription.trial_used);

    let current = h.service.get_user_subscription(account).await.unwrap().unwrap();
    assert_eq!(current.id, subscription.id);
}

#[tokio::test]
async fn test_start_trial_from_free() {
    let h = harness(datetime!(2026-03-01 09:00:00 UTC)).await;
    let account = Uuid::new_v4();

    let free = h.service.create_free_subscription(account).await.unwrap();

    h.clock.set(datetime!(2026-03-02 09:00:00 UTC));
    let trial = h.service.start_trial(account).await.unwrap();

    assert_eq!(trial.status, SubscriptionStatus::Trial);
    assert!(trial.trial_used);
    assert_eq!(trial.trial_end, Some(datetime!(2026-03-16 09:00:00 UTC)));

    // The prior row was canceled, and the trial row is now current
    let rows = h.subscriptions.rows_for(account);
    let old = rows.iter().find(|s| s.id == free.id).unwrap();
    assert_eq!(old.status, SubscriptionStatus::Canceled);

    let current = h.service.get_user_subscription(account).await.unwrap().unwrap();
    assert_eq!(current.id, trial.id);
}

#[tokio::test]
async fn test_trial_is_single_use() {
    let h = harness(datetime!(2026-03-01 09:00:00 UTC)).await;
    let account = Uuid::new_v4();

    h.service.create_free_subscription(account).await.unwrap();
    h.clock.set(datetime!(2026-03-02 09:00:00 UTC));
    h.service.start_trial(account).await.unwrap();

    h.clock.set(datetime!(2026-03-05 09:00:00 UTC));
    h.service.cancel_current_subscription(account).await.unwrap();

    let rows_before = h.subscriptions.rows_for(account);
    let result = h.service.start_trial(account).await;

    match result {
        Err(BillingError::TrialAlreadyUsed(id)) => assert_eq!(id, account),
        other => panic!("expected TrialAlreadyUsed, got {:?}", other.map(|s| s.status)),
    }

    // No state change: same rows, same statuses
    let rows_after = h.subscriptions.rows_for(account);
    assert_eq!(rows_before.len(), rows_after.len());
    for (before, after) in rows_before.iter().zip(rows_after.iter()) {
        assert_eq!(before.id, after.id);
        assert_eq!(before.status, after.status);
    }
}

#[tokio::test]
async fn test_cancel_current_subscription() {
    let h = harness(datetime!(2026-03-01 09:00:00 UTC)).await;
    let account = Uuid::new_v4();

    h.service.create_free_subscription(account).await.unwrap();
    h.service.cancel_current_subscription(account).await.unwrap();

    let current = h.service.get_user_subscription(account).await.unwrap().unwrap();
    assert_eq!(current.status, SubscriptionStatus::Canceled);
    assert!(current.cancel_at_period_end);
}

#[tokio::test]
async fn test_cancel_without_subscription_fails() {
    let h = harness(datetime!(2026-03-01 09:00:00 UTC)).await;
    let account = Uuid::new_v4();

    let result = h.service.cancel_current_subscription(account).await;
    assert!(matches!(
        result,
        Err(BillingError::SubscriptionNotFound(id)) if id == account
    ));
}

// =============================================================================
// Trial expiration sweep
// =============================================================================

#[tokio::test]
async fn test_trial_expiration_creates_free_subscription() {
    let h = harness(datetime!(2026-03-01 09:00:00 UTC)).await;
    let account = Uuid::new_v4();

    h.service.create_free_subscription(account).await.unwrap();
    h.clock.set(datetime!(2026-03-02 09:00:00 UTC));
    let trial = h.service.start_trial(account).await.unwrap();

    // Not yet expired: sweep is a no-op
    h.clock.set(datetime!(2026-03-10 09:00:00 UTC));
    assert_eq!(h.service.process_trial_expirations().await.unwrap(), 0);

    // Past trial_end: the row expires and a fresh free row appears
    h.clock.set(datetime!(2026-03-17 09:00:00 UTC));
    assert_eq!(h.service.process_trial_expirations().await.unwrap(), 1);

    let rows = h.subscriptions.rows_for(account);
    let expired = rows.iter().find(|s| s.id == trial.id).unwrap();
    assert_eq!(expired.status, SubscriptionStatus::Expired);

    let current = h.service.get_user_subscription(account).await.unwrap().unwrap();
    assert_eq!(current.status, SubscriptionStatus::Free);

    // The trial stays consumed for the account
    let retry = h.service.start_trial(account).await;
    assert!(matches!(retry, Err(BillingError::TrialAlreadyUsed(_))));
}

#[tokio::test]
async fn test_sweep_isolates_account_failures() {
    let h = harness(datetime!(2026-03-01 09:00:00 UTC)).await;
    let healthy = Uuid::new_v4();
    let broken = Uuid::new_v4();

    for account in [healthy, broken] {
        h.service.start_trial(account).await.unwrap();
    }

    // The broken account rejects new rows during the sweep
    h.subscriptions.fail_insert_for(broken);

    h.clock.set(datetime!(2026-03-20 09:00:00 UTC));
    let processed = h.service.process_trial_expirations().await.unwrap();

    assert_eq!(processed, 1);
    let current = h.service.get_user_subscription(healthy).await.unwrap().unwrap();
    assert_eq!(current.status, SubscriptionStatus::Free);
}

// =============================================================================
// Limits and capability checks
// =============================================================================

#[tokio::test]
async fn test_limits_fall_back_to_free_plan() {
    let h = harness(datetime!(2026-03-01 09:00:00 UTC)).await;
    let account = Uuid::new_v4();

    let limits = h.service.get_subscription_limits(account).await.unwrap();

    assert_eq!(limits.plan_name, FREE_PLAN);
    assert_eq!(limits.status, SubscriptionStatus::Free);
    assert_eq!(limits.limits.max_users, 10);
    assert!(!limits.features.sso);
}

#[tokio::test]
async fn test_limits_follow_trial_plan() {
    let h = harness(datetime!(2026-03-01 09:00:00 UTC)).await;
    let account = Uuid::new_v4();

    h.service.start_trial(account).await.unwrap();
    let limits = h.service.get_subscription_limits(account).await.unwrap();

    assert_eq!(limits.plan_name, TRIAL_PLAN);
    assert_eq!(limits.status, SubscriptionStatus::Trial);
    assert_eq!(limits.limits.max_users, 1_000);
    assert!(limits.features.sso);
}

#[tokio::test]
async fn test_can_perform_action_enforces_caps() {
    let h = harness(datetime!(2026-03-01 09:00:00 UTC)).await;
    let account = Uuid::new_v4();
    h.service.create_free_subscription(account).await.unwrap();

    let under = h
        .service
        .can_perform_action(account, "add_user", 9)
        .await
        .unwrap();
    assert!(under.allowed);
    assert_eq!(under.limit, 10);

    let at_cap = h
        .service
        .can_perform_action(account, "add_user", 10)
        .await
        .unwrap();
    assert!(!at_cap.allowed);

    let apps = h
        .service
        .can_perform_action(account, "create_application", 3)
        .await
        .unwrap();
    assert!(!apps.allowed);
    assert_eq!(apps.limit, 3);
}

#[tokio::test]
async fn test_unknown_action_is_permissive() {
    let h = harness(datetime!(2026-03-01 09:00:00 UTC)).await;
    let account = Uuid::new_v4();
    h.service.create_free_subscription(account).await.unwrap();

    let check = h
        .service
        .can_perform_action(account, "export_hologram", 1_000_000)
        .await
        .unwrap();

    assert!(check.allowed);
    assert_eq!(check.limit, UNLIMITED);
}

// =============================================================================
// Audit trail
// =============================================================================

#[tokio::test]
async fn test_lifecycle_operations_are_audited() {
    let h = harness(datetime!(2026-03-01 09:00:00 UTC)).await;
    let account = Uuid::new_v4();

    h.service.create_free_subscription(account).await.unwrap();
    h.clock.set(datetime!(2026-03-02 09:00:00 UTC));
    h.service.start_trial(account).await.unwrap();
    h.clock.set(datetime!(2026-03-20 09:00:00 UTC));
    h.service.process_trial_expirations().await.unwrap();

    let types = h.events.event_types_for(account);
    assert!(types.contains(&"SUBSCRIPTION_CREATED".to_string()));
    assert!(types.contains(&"TRIAL_STARTED".to_string()));
    assert!(types.contains(&"TRIAL_ENDED".to_string()));

    // History reads back newest first and honors the limit
    let history = h.service.get_billing_history(account, 2).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].created_at >= history[1].created_at);
}
