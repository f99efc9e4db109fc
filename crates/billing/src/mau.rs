//! Monthly Active User calculation
//!
//! Turns the raw activity stream into distinct-user counts over billing
//! windows. Only users still active in the directory count; a user with
//! fifty events in a window still contributes exactly one to the count.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use authmesh_shared::{BillingPeriod, Clock, MauSnapshot, UserActivity};

use crate::error::BillingResult;
use crate::store::{ActivityStore, UserDirectory};

/// Which activity types count toward billable MAU.
///
/// The default counts every type. Deployments that only want
/// authenticated actions billed configure an allow-list.
#[derive(Debug, Clone, Default)]
pub struct BillablePolicy {
    allowed: Option<HashSet<String>>,
}

impl BillablePolicy {
    /// Every activity type counts.
    pub fn count_all() -> Self {
        Self { allowed: None }
    }

    /// Only the listed activity types count.
    pub fn allow_list<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: Some(types.into_iter().map(Into::into).collect()),
        }
    }

    pub fn is_billable(&self, activity_type: &str) -> bool {
        match &self.allowed {
            None => true,
            Some(set) => set.contains(activity_type),
        }
    }
}

/// Result of one MAU computation.
#[derive(Debug, Clone, Serialize)]
pub struct MauResult {
    pub tenant_id: Uuid,
    pub mau_count: i64,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
    pub billing_period: BillingPeriod,
    /// Per-user diagnostics, most active first
    pub users: Vec<UserActivity>,
}

impl MauResult {
    /// Freeze this result into a snapshot row.
    pub fn into_snapshot(self, now: OffsetDateTime) -> MauSnapshot {
        MauSnapshot {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            billing_period: self.billing_period,
            period_start: self.period_start,
            period_end: self.period_end,
            mau_count: self.mau_count,
            users: self.users,
            created_at: now,
            updated_at: now,
        }
    }
}

/// MAU calculation service
#[derive(Clone)]
pub struct MauCalculator {
    activity: Arc<dyn ActivityStore>,
    directory: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    policy: BillablePolicy,
}

impl MauCalculator {
    pub fn new(
        activity: Arc<dyn ActivityStore>,
        directory: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            activity,
            directory,
            clock,
            policy: BillablePolicy::count_all(),
        }
    }

    pub fn with_policy(mut self, policy: BillablePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// MAU for the current calendar month (to date).
    pub async fn calculate_current(&self, tenant_id: Uuid) -> BillingResult<MauResult> {
        let period = BillingPeriod::containing(self.clock.now());
        self.calculate_period(tenant_id, period).await
    }

    /// MAU for the previous calendar month.
    pub async fn calculate_previous(&self, tenant_id: Uuid) -> BillingResult<MauResult> {
        let period = BillingPeriod::containing(self.clock.now()).prev();
        self.calculate_period(tenant_id, period).await
    }

    /// MAU for one tenant over one billing period.
    ///
    /// The window runs to the period's exclusive end so that an event at
    /// any instant of the last day, 23:59:59 included, lands in this
    /// period and never in the next.
    pub async fn calculate_period(
        &self,
        tenant_id: Uuid,
        period: BillingPeriod,
    ) -> BillingResult<MauResult> {
        self.calculate_window(
            tenant_id,
            period.first_instant(),
            period.end_exclusive(),
            period.last_instant(),
            period,
        )
        .await
    }

    /// MAU over an arbitrary window, `period_end` inclusive. The billing
    /// period key is derived from `period_start`.
    pub async fn calculate(
        &self,
        tenant_id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    ) -> BillingResult<MauResult> {
        self.calculate_window(
            tenant_id,
            period_start,
            period_end + Duration::nanoseconds(1),
            period_end,
            BillingPeriod::containing(period_start),
        )
        .await
    }

    async fn calculate_window(
        &self,
        tenant_id: Uuid,
        start: OffsetDateTime,
        end_exclusive: OffsetDateTime,
        period_end: OffsetDateTime,
        billing_period: BillingPeriod,
    ) -> BillingResult<MauResult> {
        let events = self
            .activity
            .events_in_window(tenant_id, start, end_exclusive)
            .await?;
        let active_users = self.directory.active_user_ids(tenant_id).await?;

        let mut per_user: HashMap<Uuid, UserActivity> = HashMap::new();
        for event in events {
            if !active_users.contains(&event.user_id) {
                continue;
            }
            if !self.policy.is_billable(&event.activity_type) {
                continue;
            }
            let entry = per_user.entry(event.user_id).or_insert(UserActivity {
                user_id: event.user_id,
                last_activity: event.occurred_at,
                activity_count: 0,
            });
            entry.activity_count += 1;
            if event.occurred_at > entry.last_activity {
                entry.last_activity = event.occurred_at;
            }
        }

        let mut users: Vec<UserActivity> = per_user.into_values().collect();
        users.sort_by(|a, b| {
            b.activity_count
                .cmp(&a.activity_count)
                .then(a.user_id.cmp(&b.user_id))
        });
        let mau_count = users.len() as i64;

        tracing::debug!(
            tenant_id = %tenant_id,
            billing_period = %billing_period,
            mau_count,
            "Computed MAU window"
        );

        Ok(MauResult {
            tenant_id,
            mau_count,
            period_start: start,
            period_end,
            billing_period,
            users,
        })
    }
}
