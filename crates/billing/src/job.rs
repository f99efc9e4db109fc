//! Monthly reconciliation job
//!
//! The unattended batch that closes a billing period: for every active
//! tenant, compute previous-period MAU, persist the snapshot, and update
//! the subscription's cached count. One tenant's failure never aborts the
//! batch; re-running a closed period overwrites the same snapshot and
//! never double-bills.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use uuid::Uuid;

use authmesh_shared::{BillingPeriod, Clock};

use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEvent, BillingEventStore, BillingEventType};
use crate::mau::MauCalculator;
use crate::store::{PricingSource, SnapshotStore, SubscriptionStore, TenantDirectory};

/// Outcome for one tenant in a reconciliation run. Exactly one entry per
/// active tenant, failed or not.
#[derive(Debug, Clone, Serialize)]
pub struct TenantReconciliation {
    pub tenant_id: Uuid,
    pub mau_count: i64,
    pub billing_cents: i64,
    pub error: Option<String>,
}

/// Monthly reconciliation batch
#[derive(Clone)]
pub struct ReconciliationJob {
    tenants: Arc<dyn TenantDirectory>,
    calculator: MauCalculator,
    snapshots: Arc<dyn SnapshotStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    pricing: Arc<dyn PricingSource>,
    events: Arc<dyn BillingEventStore>,
    clock: Arc<dyn Clock>,
    per_tenant_timeout: Duration,
}

impl ReconciliationJob {
    pub const DEFAULT_PER_TENANT_TIMEOUT: Duration = Duration::from_secs(120);

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenants: Arc<dyn TenantDirectory>,
        calculator: MauCalculator,
        snapshots: Arc<dyn SnapshotStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        pricing: Arc<dyn PricingSource>,
        events: Arc<dyn BillingEventStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tenants,
            calculator,
            snapshots,
            subscriptions,
            pricing,
            events,
            clock,
            per_tenant_timeout: Self::DEFAULT_PER_TENANT_TIMEOUT,
        }
    }

    /// Bound each tenant's processing so one hanging computation cannot
    /// stall the whole batch.
    pub fn with_per_tenant_timeout(mut self, timeout: Duration) -> Self {
        self.per_tenant_timeout = timeout;
        self
    }

    /// Reconcile the most recent closed period (the previous calendar
    /// month) for every active tenant.
    pub async fn run(&self) -> BillingResult<Vec<TenantReconciliation>> {
        let period = BillingPeriod::containing(self.clock.now()).prev();
        self.run_for_period(period).await
    }

    /// Reconcile a specific period. Used by `run()` and by backfill
    /// tooling; idempotent because the snapshot write is an upsert.
    pub async fn run_for_period(
        &self,
        period: BillingPeriod,
    ) -> BillingResult<Vec<TenantReconciliation>> {
        let tenants = self.tenants.active_tenant_ids().await?;
        tracing::info!(
            tenant_count = tenants.len(),
            period = %period,
            "Starting monthly MAU reconciliation"
        );

        let mut results = Vec::with_capacity(tenants.len());
        for tenant_id in tenants {
            let outcome = tokio::time::timeout(
                self.per_tenant_timeout,
                self.reconcile_tenant(tenant_id, period),
            )
            .await;

            let entry = match outcome {
                Ok(Ok((mau_count, billing_cents))) => TenantReconciliation {
                    tenant_id,
                    mau_count,
                    billing_cents,
                    error: None,
                },
                Ok(Err(e)) => {
                    tracing::error!(
                        tenant_id = %tenant_id,
                        period = %period,
                        error = %e,
                        "Tenant reconciliation failed; continuing with remaining tenants"
                    );
                    TenantReconciliation {
                        tenant_id,
                        mau_count: 0,
                        billing_cents: 0,
                        error: Some(e.to_string()),
                    }
                }
                Err(_) => {
                    let e = BillingError::Timeout(self.per_tenant_timeout);
                    tracing::error!(
                        tenant_id = %tenant_id,
                        period = %period,
                        "Tenant reconciliation timed out; continuing with remaining tenants"
                    );
                    TenantReconciliation {
                        tenant_id,
                        mau_count: 0,
                        billing_cents: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(entry);
        }

        let failures = results.iter().filter(|r| r.error.is_some()).count();
        tracing::info!(
            tenant_count = results.len(),
            failures,
            period = %period,
            "Monthly MAU reconciliation complete"
        );
        Ok(results)
    }

    async fn reconcile_tenant(
        &self,
        tenant_id: Uuid,
        period: BillingPeriod,
    ) -> BillingResult<(i64, i64)> {
        let result = self.calculator.calculate_period(tenant_id, period).await?;
        let mau_count = result.mau_count;
        let snapshot = result.into_snapshot(self.clock.now());

        // Transient store failures retry with backoff; the upsert itself is
        // idempotent on the (tenant, period) key.
        let strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
        Retry::spawn(strategy, || self.snapshots.upsert(&snapshot)).await?;

        self.subscriptions
            .update_last_mau(tenant_id, mau_count)
            .await?;

        let price = self.pricing.price_per_user_cents().await?;
        let billing_cents = mau_count * price;

        let event = BillingEvent::new(
            tenant_id,
            BillingEventType::SnapshotReconciled,
            serde_json::json!({
                "billing_period": period.to_string(),
                "mau_count": mau_count,
                "billing_cents": billing_cents,
            }),
            self.clock.now(),
        );
        if let Err(e) = self.events.append(&event).await {
            tracing::warn!(tenant_id = %tenant_id, error = %e, "Failed to append billing event");
        }

        Ok((mau_count, billing_cents))
    }
}
