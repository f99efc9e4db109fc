//! Billing reconciliation
//!
//! Combines a finalized snapshot with the per-user price to produce the
//! billed amount, and compares against the preceding period for trend
//! reporting. All money is integer cents.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use authmesh_shared::{BillingPeriod, Clock};

use crate::error::BillingResult;
use crate::mau::MauCalculator;
use crate::store::{PricingSource, SnapshotStore};

/// Billed amount for one tenant and one closed period.
#[derive(Debug, Clone, Serialize)]
pub struct BillingData {
    pub tenant_id: Uuid,
    pub billing_period: BillingPeriod,
    pub mau_count: i64,
    pub price_per_user_cents: i64,
    pub total_cents: i64,
    /// 0 when no prior snapshot exists; a missing history is a
    /// legitimate new-tenant case.
    pub previous_mau_count: i64,
    pub mau_change: i64,
}

impl BillingData {
    /// Dollar amount for display. Cents stay authoritative.
    pub fn total_amount(&self) -> f64 {
        self.total_cents as f64 / 100.0
    }
}

/// Live usage for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUsage {
    pub tenant_id: Uuid,
    pub current_mau: i64,
    pub projected_cents: i64,
    pub as_of: OffsetDateTime,
}

/// Billing reconciliation service
#[derive(Clone)]
pub struct BillingReconciler {
    calculator: MauCalculator,
    snapshots: Arc<dyn SnapshotStore>,
    pricing: Arc<dyn PricingSource>,
    clock: Arc<dyn Clock>,
}

impl BillingReconciler {
    pub fn new(
        calculator: MauCalculator,
        snapshots: Arc<dyn SnapshotStore>,
        pricing: Arc<dyn PricingSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            calculator,
            snapshots,
            pricing,
            clock,
        }
    }

    /// Billing data for a closed period; defaults to the most recent
    /// closed period (the previous calendar month).
    ///
    /// Returns `None` when no snapshot exists for the period. Absence of
    /// data is a distinct, reportable state from "zero active users" —
    /// billing must not fabricate a zero-usage charge.
    pub async fn billing_data(
        &self,
        tenant_id: Uuid,
        period: Option<BillingPeriod>,
    ) -> BillingResult<Option<BillingData>> {
        let period =
            period.unwrap_or_else(|| BillingPeriod::containing(self.clock.now()).prev());

        let Some(snapshot) = self.snapshots.get(tenant_id, period).await? else {
            return Ok(None);
        };

        let price_per_user_cents = self.pricing.price_per_user_cents().await?;
        let previous = self.snapshots.get(tenant_id, period.prev()).await?;
        let previous_mau_count = previous.map(|s| s.mau_count).unwrap_or(0);

        Ok(Some(BillingData {
            tenant_id,
            billing_period: period,
            mau_count: snapshot.mau_count,
            price_per_user_cents,
            total_cents: snapshot.mau_count * price_per_user_cents,
            previous_mau_count,
            mau_change: snapshot.mau_count - previous_mau_count,
        }))
    }

    /// Current-month MAU and projected billing for dashboard display.
    pub async fn current_usage(&self, tenant_id: Uuid) -> BillingResult<CurrentUsage> {
        let result = self.calculator.calculate_current(tenant_id).await?;
        let price_per_user_cents = self.pricing.price_per_user_cents().await?;

        Ok(CurrentUsage {
            tenant_id,
            current_mau: result.mau_count,
            projected_cents: result.mau_count * price_per_user_cents,
            as_of: self.clock.now(),
        })
    }
}
