//! Snapshot access and trend reporting

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use authmesh_shared::{BillingPeriod, MauSnapshot};

use crate::error::BillingResult;
use crate::store::SnapshotStore;

/// One point of a MAU trend series.
#[derive(Debug, Clone, Serialize)]
pub struct MauTrend {
    pub billing_period: BillingPeriod,
    pub mau_count: i64,
    /// Month-over-month growth in percent; `None` when there is no
    /// snapshot for the immediately preceding period.
    pub growth_pct: Option<f64>,
}

/// Snapshot persistence facade with trend computation.
#[derive(Clone)]
pub struct SnapshotService {
    store: Arc<dyn SnapshotStore>,
}

impl SnapshotService {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// Upsert keyed on (tenant_id, billing_period); re-saving a period
    /// overwrites rather than duplicates.
    pub async fn save(&self, snapshot: &MauSnapshot) -> BillingResult<()> {
        self.store.upsert(snapshot).await
    }

    pub async fn get(
        &self,
        tenant_id: Uuid,
        period: BillingPeriod,
    ) -> BillingResult<Option<MauSnapshot>> {
        self.store.get(tenant_id, period).await
    }

    /// Historical MAU for the last `months` periods, oldest first, with
    /// month-over-month growth.
    pub async fn trend(&self, tenant_id: Uuid, months: u32) -> BillingResult<Vec<MauTrend>> {
        let mut snapshots = self.store.list_recent(tenant_id, months).await?;
        snapshots.sort_by_key(|s| s.billing_period);
        Ok(compute_trend(&snapshots))
    }
}

/// Growth for period p is `(count(p) - count(p-1)) / count(p-1) * 100`.
/// Undefined when the immediately preceding period has no snapshot or a
/// zero count. Input must be sorted ascending by period.
fn compute_trend(snapshots: &[MauSnapshot]) -> Vec<MauTrend> {
    snapshots
        .iter()
        .enumerate()
        .map(|(i, snapshot)| {
            let growth_pct = if i == 0 {
                None
            } else {
                let prev = &snapshots[i - 1];
                if prev.billing_period == snapshot.billing_period.prev() && prev.mau_count != 0 {
                    Some(
                        (snapshot.mau_count - prev.mau_count) as f64 / prev.mau_count as f64
                            * 100.0,
                    )
                } else {
                    None
                }
            };
            MauTrend {
                billing_period: snapshot.billing_period,
                mau_count: snapshot.mau_count,
                growth_pct,
            }
        })
        .collect()
}
