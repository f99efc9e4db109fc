//! Storage traits for the metering and billing core.
//!
//! Services depend on these seams rather than a concrete database, so the
//! engine runs against Postgres in production (`crate::postgres`) and
//! in-memory fakes under test.

use std::collections::HashSet;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use authmesh_shared::{
    ActivityEvent, BillingPeriod, MauSnapshot, Subscription, SubscriptionPlan, SubscriptionStatus,
};

use crate::error::BillingResult;

/// Append-only store for activity events.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn insert(&self, event: &ActivityEvent) -> BillingResult<()>;

    /// Events for a tenant with `start <= occurred_at < end_exclusive`.
    async fn events_in_window(
        &self,
        tenant_id: Uuid,
        start: OffsetDateTime,
        end_exclusive: OffsetDateTime,
    ) -> BillingResult<Vec<ActivityEvent>>;
}

/// Snapshot persistence keyed on (tenant_id, billing_period).
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Atomic insert-or-update on the (tenant_id, billing_period) key.
    ///
    /// Two near-simultaneous writers for the same key must both succeed
    /// without producing duplicate rows.
    async fn upsert(&self, snapshot: &MauSnapshot) -> BillingResult<()>;

    async fn get(
        &self,
        tenant_id: Uuid,
        period: BillingPeriod,
    ) -> BillingResult<Option<MauSnapshot>>;

    /// Up to `months` snapshots for the tenant, newest first.
    async fn list_recent(&self, tenant_id: Uuid, months: u32) -> BillingResult<Vec<MauSnapshot>>;
}

/// Subscription rows. Rows are inserted, never deleted; the current
/// subscription is the newest row by creation time.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn insert(&self, subscription: &Subscription) -> BillingResult<()>;

    /// Newest row by `created_at` for the account, the canonical definition
    /// of "current subscription".
    async fn current(&self, account_id: Uuid) -> BillingResult<Option<Subscription>>;

    /// Whether any row for the account has consumed the trial.
    async fn has_used_trial(&self, account_id: Uuid) -> BillingResult<bool>;

    /// Trial rows whose `trial_end` is in the past.
    async fn expired_trials(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>>;

    async fn update_status(&self, id: Uuid, status: SubscriptionStatus) -> BillingResult<()>;

    /// Cancel one row: status = canceled, cancel_at_period_end = true.
    async fn cancel(&self, id: Uuid) -> BillingResult<()>;

    /// Cache the reconciled MAU count on the account's current subscription.
    async fn update_last_mau(&self, account_id: Uuid, mau_count: i64) -> BillingResult<()>;
}

/// Plan catalog persistence.
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn insert(&self, plan: &SubscriptionPlan) -> BillingResult<()>;

    async fn count(&self) -> BillingResult<i64>;

    /// Active plans ordered by sort_order.
    async fn all_active(&self) -> BillingResult<Vec<SubscriptionPlan>>;

    async fn by_id(&self, id: Uuid) -> BillingResult<Option<SubscriptionPlan>>;

    async fn by_name(&self, name: &str) -> BillingResult<Option<SubscriptionPlan>>;
}

/// Read side of the user directory, restricted to active accounts.
/// Deactivated users must not count toward MAU.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn active_user_ids(&self, tenant_id: Uuid) -> BillingResult<HashSet<Uuid>>;
}

/// Tenant population for the reconciliation batch.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn active_tenant_ids(&self) -> BillingResult<Vec<Uuid>>;
}

/// Source of the per-user price applied at reconciliation time.
#[async_trait]
pub trait PricingSource: Send + Sync {
    async fn price_per_user_cents(&self) -> BillingResult<i64>;
}

/// Fixed per-user price, used in tests and in deployments that pin the
/// price through configuration instead of the pricing table.
#[derive(Debug, Clone, Copy)]
pub struct FixedPricing(pub i64);

#[async_trait]
impl PricingSource for FixedPricing {
    async fn price_per_user_cents(&self) -> BillingResult<i64> {
        Ok(self.0)
    }
}
