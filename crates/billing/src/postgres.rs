//! PostgreSQL implementations of the storage traits
//!
//! Inline SQL against the tables created by `migrations/`. The snapshot
//! upsert relies on the unique (tenant_id, billing_period) index so two
//! near-simultaneous writers for the same key cannot race into duplicate
//! rows.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use authmesh_shared::{
    ActivityEvent, BillingInterval, BillingPeriod, MauSnapshot, PlanFeatures, PlanLimits,
    Subscription, SubscriptionPlan, SubscriptionStatus, UserActivity,
};

use crate::error::BillingResult;
use crate::events::{BillingEvent, BillingEventStore};
use crate::store::{
    ActivityStore, PlanStore, PricingSource, SnapshotStore, SubscriptionStore, TenantDirectory,
    UserDirectory,
};

// =============================================================================
// Activity events
// =============================================================================

#[derive(Clone)]
pub struct PgActivityStore {
    pool: PgPool,
}

impl PgActivityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityStore for PgActivityStore {
    async fn insert(&self, event: &ActivityEvent) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO activity_events (
                id, tenant_id, user_id, activity_type, metadata,
                source_ip, user_agent, occurred_at, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9
            )
            "#,
        )
        .bind(event.id)
        .bind(event.tenant_id)
        .bind(event.user_id)
        .bind(&event.activity_type)
        .bind(&event.metadata)
        .bind(&event.source_ip)
        .bind(&event.user_agent)
        .bind(event.occurred_at)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn events_in_window(
        &self,
        tenant_id: Uuid,
        start: OffsetDateTime,
        end_exclusive: OffsetDateTime,
    ) -> BillingResult<Vec<ActivityEvent>> {
        let events = sqlx::query_as::<_, ActivityEvent>(
            r#"
            SELECT id, tenant_id, user_id, activity_type, metadata,
                   source_ip, user_agent, occurred_at, created_at
            FROM activity_events
            WHERE tenant_id = $1
              AND occurred_at >= $2
              AND occurred_at < $3
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(tenant_id)
        .bind(start)
        .bind(end_exclusive)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

// =============================================================================
// Directories
// =============================================================================

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn active_user_ids(&self, tenant_id: Uuid) -> BillingResult<HashSet<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM users WHERE tenant_id = $1 AND is_active = TRUE",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[derive(Clone)]
pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn active_tenant_ids(&self) -> BillingResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM tenants WHERE is_active = TRUE ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

// =============================================================================
// MAU snapshots
// =============================================================================

type SnapshotRow = (
    Uuid,
    Uuid,
    String,
    OffsetDateTime,
    OffsetDateTime,
    i64,
    serde_json::Value,
    OffsetDateTime,
    OffsetDateTime,
);

fn snapshot_from_row(row: SnapshotRow) -> BillingResult<MauSnapshot> {
    let (id, tenant_id, billing_period, period_start, period_end, mau_count, users, created_at, updated_at) =
        row;
    let billing_period: BillingPeriod = billing_period.parse()?;
    let users: Vec<UserActivity> = serde_json::from_value(users)?;
    Ok(MauSnapshot {
        id,
        tenant_id,
        billing_period,
        period_start,
        period_end,
        mau_count,
        users,
        created_at,
        updated_at,
    })
}

#[derive(Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn upsert(&self, snapshot: &MauSnapshot) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO mau_snapshots (
                id, tenant_id, billing_period, period_start, period_end,
                mau_count, users, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, NOW(), NOW()
            )
            ON CONFLICT (tenant_id, billing_period) DO UPDATE SET
                period_start = EXCLUDED.period_start,
                period_end = EXCLUDED.period_end,
                mau_count = EXCLUDED.mau_count,
                users = EXCLUDED.users,
                updated_at = NOW()
            "#,
        )
        .bind(snapshot.id)
        .bind(snapshot.tenant_id)
        .bind(snapshot.billing_period.to_string())
        .bind(snapshot.period_start)
        .bind(snapshot.period_end)
        .bind(snapshot.mau_count)
        .bind(serde_json::to_value(&snapshot.users)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(
        &self,
        tenant_id: Uuid,
        period: BillingPeriod,
    ) -> BillingResult<Option<MauSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, billing_period, period_start, period_end,
                   mau_count, users, created_at, updated_at
            FROM mau_snapshots
            WHERE tenant_id = $1 AND billing_period = $2
            "#,
        )
        .bind(tenant_id)
        .bind(period.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(snapshot_from_row).transpose()
    }

    async fn list_recent(&self, tenant_id: Uuid, months: u32) -> BillingResult<Vec<MauSnapshot>> {
        // The YYYY-MM key sorts chronologically as text
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, billing_period, period_start, period_end,
                   mau_count, users, created_at, updated_at
            FROM mau_snapshots
            WHERE tenant_id = $1
            ORDER BY billing_period DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(months as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(snapshot_from_row).collect()
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn insert(&self, subscription: &Subscription) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, account_id, plan_id, status, current_period_start,
                current_period_end, trial_end, trial_used, cancel_at_period_end,
                last_mau_count, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12
            )
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.account_id)
        .bind(subscription.plan_id)
        .bind(subscription.status)
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.trial_end)
        .bind(subscription.trial_used)
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.last_mau_count)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn current(&self, account_id: Uuid) -> BillingResult<Option<Subscription>> {
        // Canonical definition of "current": newest row by creation time
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, account_id, plan_id, status, current_period_start,
                   current_period_end, trial_end, trial_used, cancel_at_period_end,
                   last_mau_count, created_at, updated_at
            FROM subscriptions
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn has_used_trial(&self, account_id: Uuid) -> BillingResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE account_id = $1 AND trial_used = TRUE)",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn expired_trials(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, account_id, plan_id, status, current_period_start,
                   current_period_end, trial_end, trial_used, cancel_at_period_end,
                   last_mau_count, created_at, updated_at
            FROM subscriptions
            WHERE status = 'trial'
              AND trial_end IS NOT NULL
              AND trial_end < $1
            ORDER BY trial_end ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(subscriptions)
    }

    async fn update_status(&self, id: Uuid, status: SubscriptionStatus) -> BillingResult<()> {
        sqlx::query("UPDATE subscriptions SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn cancel(&self, id: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'canceled', cancel_at_period_end = TRUE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_last_mau(&self, account_id: Uuid, mau_count: i64) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET last_mau_count = $2, updated_at = NOW()
            WHERE id = (
                SELECT id FROM subscriptions
                WHERE account_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT 1
            )
            "#,
        )
        .bind(account_id)
        .bind(mau_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Plan catalog
// =============================================================================

type PlanRow = (
    Uuid,
    String,
    String,
    i64,
    BillingInterval,
    i32,
    i64,
    i64,
    i64,
    i64,
    serde_json::Value,
    i32,
    bool,
    OffsetDateTime,
    OffsetDateTime,
);

fn plan_from_row(row: PlanRow) -> SubscriptionPlan {
    let (
        id,
        name,
        display_name,
        price_cents,
        billing_interval,
        trial_days,
        max_users,
        max_applications,
        storage_gb,
        api_request_limit,
        features,
        sort_order,
        is_active,
        created_at,
        updated_at,
    ) = row;
    SubscriptionPlan {
        id,
        name,
        display_name,
        price_cents,
        billing_interval,
        trial_days,
        limits: PlanLimits {
            max_users,
            max_applications,
            storage_gb,
            api_request_limit,
        },
        features: PlanFeatures::from_value(&features),
        sort_order,
        is_active,
        created_at,
        updated_at,
    }
}

const PLAN_COLUMNS: &str = r#"
    id, name, display_name, price_cents, billing_interval, trial_days,
    max_users, max_applications, storage_gb, api_request_limit,
    features, sort_order, is_active, created_at, updated_at
"#;

#[derive(Clone)]
pub struct PgPlanStore {
    pool: PgPool,
}

impl PgPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn insert(&self, plan: &SubscriptionPlan) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscription_plans (
                id, name, display_name, price_cents, billing_interval, trial_days,
                max_users, max_applications, storage_gb, api_request_limit,
                features, sort_order, is_active, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15
            )
            "#,
        )
        .bind(plan.id)
        .bind(&plan.name)
        .bind(&plan.display_name)
        .bind(plan.price_cents)
        .bind(plan.billing_interval)
        .bind(plan.trial_days)
        .bind(plan.limits.max_users)
        .bind(plan.limits.max_applications)
        .bind(plan.limits.storage_gb)
        .bind(plan.limits.api_request_limit)
        .bind(plan.features.to_value())
        .bind(plan.sort_order)
        .bind(plan.is_active)
        .bind(plan.created_at)
        .bind(plan.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count(&self) -> BillingResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscription_plans")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn all_active(&self) -> BillingResult<Vec<SubscriptionPlan>> {
        let rows: Vec<PlanRow> = sqlx::query_as(&format!(
            "SELECT {PLAN_COLUMNS} FROM subscription_plans WHERE is_active = TRUE ORDER BY sort_order ASC",
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(plan_from_row).collect())
    }

    async fn by_id(&self, id: Uuid) -> BillingResult<Option<SubscriptionPlan>> {
        let row: Option<PlanRow> = sqlx::query_as(&format!(
            "SELECT {PLAN_COLUMNS} FROM subscription_plans WHERE id = $1",
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(plan_from_row))
    }

    async fn by_name(&self, name: &str) -> BillingResult<Option<SubscriptionPlan>> {
        let row: Option<PlanRow> = sqlx::query_as(&format!(
            "SELECT {PLAN_COLUMNS} FROM subscription_plans WHERE name = $1",
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(plan_from_row))
    }
}

// =============================================================================
// Pricing
// =============================================================================

#[derive(Clone)]
pub struct PgPricingSource {
    pool: PgPool,
}

impl PgPricingSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PricingSource for PgPricingSource {
    async fn price_per_user_cents(&self) -> BillingResult<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT price_per_user_cents FROM pricing_config WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(price,)| price)
            .ok_or(crate::error::BillingError::PricingMissing)
    }
}

// =============================================================================
// Billing events
// =============================================================================

#[derive(Clone)]
pub struct PgBillingEventStore {
    pool: PgPool,
}

impl PgBillingEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingEventStore for PgBillingEventStore {
    async fn append(&self, event: &BillingEvent) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_events (id, account_id, event_type, detail, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.id)
        .bind(event.account_id)
        .bind(&event.event_type)
        .bind(&event.detail)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(&self, account_id: Uuid, limit: u32) -> BillingResult<Vec<BillingEvent>> {
        let rows: Vec<(Uuid, Uuid, String, serde_json::Value, OffsetDateTime)> = sqlx::query_as(
            r#"
            SELECT id, account_id, event_type, detail, created_at
            FROM billing_events
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, account_id, event_type, detail, created_at)| BillingEvent {
                id,
                account_id,
                event_type,
                detail,
                created_at,
            })
            .collect())
    }
}
