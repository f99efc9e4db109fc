//! In-memory store implementations shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use authmesh_billing::{
    ActivityStore, BillingError, BillingEvent, BillingEventStore, BillingResult, PlanStore,
    SnapshotStore, SubscriptionStore, TenantDirectory, UserDirectory,
};
use authmesh_shared::{
    ActivityEvent, BillingPeriod, MauSnapshot, Subscription, SubscriptionPlan, SubscriptionStatus,
};

// =============================================================================
// Activity
// =============================================================================

#[derive(Default)]
pub struct MemoryActivityStore {
    pub events: Mutex<Vec<ActivityEvent>>,
    /// When set, inserts fail (recorder failure-path tests)
    pub fail_inserts: AtomicBool,
    /// When set, window queries for this tenant fail (batch isolation tests)
    fail_window_tenant: Mutex<Option<Uuid>>,
}

impl MemoryActivityStore {
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_window_for(&self, tenant_id: Uuid) {
        *self.fail_window_tenant.lock().unwrap() = Some(tenant_id);
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn insert(&self, event: &ActivityEvent) -> BillingResult<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(BillingError::Database("activity store offline".into()));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn events_in_window(
        &self,
        tenant_id: Uuid,
        start: OffsetDateTime,
        end_exclusive: OffsetDateTime,
    ) -> BillingResult<Vec<ActivityEvent>> {
        if self.fail_window_tenant.lock().unwrap().as_ref() == Some(&tenant_id) {
            return Err(BillingError::Database(format!(
                "storage corruption for tenant {}",
                tenant_id
            )));
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                e.tenant_id == tenant_id && e.occurred_at >= start && e.occurred_at < end_exclusive
            })
            .cloned()
            .collect())
    }
}

/// An activity store whose window queries never finish, for timeout tests.
pub struct HangingActivityStore;

#[async_trait]
impl ActivityStore for HangingActivityStore {
    async fn insert(&self, _event: &ActivityEvent) -> BillingResult<()> {
        Ok(())
    }

    async fn events_in_window(
        &self,
        _tenant_id: Uuid,
        _start: OffsetDateTime,
        _end_exclusive: OffsetDateTime,
    ) -> BillingResult<Vec<ActivityEvent>> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

// =============================================================================
// Directories
// =============================================================================

#[derive(Default)]
pub struct MemoryUserDirectory {
    active: Mutex<HashMap<Uuid, HashSet<Uuid>>>,
}

impl MemoryUserDirectory {
    pub fn activate(&self, tenant_id: Uuid, user_id: Uuid) {
        self.active
            .lock()
            .unwrap()
            .entry(tenant_id)
            .or_default()
            .insert(user_id);
    }

    pub fn deactivate(&self, tenant_id: Uuid, user_id: Uuid) {
        if let Some(users) = self.active.lock().unwrap().get_mut(&tenant_id) {
            users.remove(&user_id);
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn active_user_ids(&self, tenant_id: Uuid) -> BillingResult<HashSet<Uuid>> {
        Ok(self
            .active
            .lock()
            .unwrap()
            .get(&tenant_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemoryTenantDirectory {
    tenants: Mutex<Vec<Uuid>>,
}

impl MemoryTenantDirectory {
    pub fn add(&self, tenant_id: Uuid) {
        self.tenants.lock().unwrap().push(tenant_id);
    }
}

#[async_trait]
impl TenantDirectory for MemoryTenantDirectory {
    async fn active_tenant_ids(&self) -> BillingResult<Vec<Uuid>> {
        Ok(self.tenants.lock().unwrap().clone())
    }
}

// =============================================================================
// Snapshots
// =============================================================================

#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<(Uuid, BillingPeriod), MauSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn row_count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn upsert(&self, snapshot: &MauSnapshot) -> BillingResult<()> {
        let mut map = self.snapshots.lock().unwrap();
        let key = (snapshot.tenant_id, snapshot.billing_period);
        match map.get_mut(&key) {
            Some(existing) => {
                // Update in place; created_at is preserved
                existing.period_start = snapshot.period_start;
                existing.period_end = snapshot.period_end;
                existing.mau_count = snapshot.mau_count;
                existing.users = snapshot.users.clone();
                existing.updated_at = snapshot.updated_at;
            }
            None => {
                map.insert(key, snapshot.clone());
            }
        }
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: Uuid,
        period: BillingPeriod,
    ) -> BillingResult<Option<MauSnapshot>> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .get(&(tenant_id, period))
            .cloned())
    }

    async fn list_recent(&self, tenant_id: Uuid, months: u32) -> BillingResult<Vec<MauSnapshot>> {
        let mut rows: Vec<MauSnapshot> = self
            .snapshots
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| std::cmp::Reverse(s.billing_period));
        rows.truncate(months as usize);
        Ok(rows)
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

#[derive(Default)]
pub struct MemorySubscriptionStore {
    rows: Mutex<Vec<Subscription>>,
    /// When set, inserts for this account fail (sweep isolation tests)
    fail_insert_account: Mutex<Option<Uuid>>,
}

impl MemorySubscriptionStore {
    pub fn fail_insert_for(&self, account_id: Uuid) {
        *self.fail_insert_account.lock().unwrap() = Some(account_id);
    }

    pub fn row_count(&self, account_id: Uuid) -> usize {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.account_id == account_id)
            .count()
    }

    pub fn rows_for(&self, account_id: Uuid) -> Vec<Subscription> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.account_id == account_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn insert(&self, subscription: &Subscription) -> BillingResult<()> {
        if self.fail_insert_account.lock().unwrap().as_ref() == Some(&subscription.account_id) {
            return Err(BillingError::Database("subscription store offline".into()));
        }
        self.rows.lock().unwrap().push(subscription.clone());
        Ok(())
    }

    async fn current(&self, account_id: Uuid) -> BillingResult<Option<Subscription>> {
        // Newest by created_at; insertion order breaks ties
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.account_id == account_id)
            .max_by_key(|(i, s)| (s.created_at, *i))
            .map(|(_, s)| s.clone()))
    }

    async fn has_used_trial(&self, account_id: Uuid) -> BillingResult<bool> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .any(|s| s.account_id == account_id && s.trial_used))
    }

    async fn expired_trials(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| {
                s.status == SubscriptionStatus::Trial
                    && s.trial_end.map(|end| end < now).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: Uuid, status: SubscriptionStatus) -> BillingResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|s| s.id == id) {
            row.status = status;
        }
        Ok(())
    }

    async fn cancel(&self, id: Uuid) -> BillingResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|s| s.id == id) {
            row.status = SubscriptionStatus::Canceled;
            row.cancel_at_period_end = true;
        }
        Ok(())
    }

    async fn update_last_mau(&self, account_id: Uuid, mau_count: i64) -> BillingResult<()> {
        let current_id = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.account_id == account_id)
            .max_by_key(|(i, s)| (s.created_at, *i))
            .map(|(_, s)| s.id);
        if let Some(id) = current_id {
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows.iter_mut().find(|s| s.id == id) {
                row.last_mau_count = mau_count;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Plans
// =============================================================================

#[derive(Default)]
pub struct MemoryPlanStore {
    plans: Mutex<Vec<SubscriptionPlan>>,
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn insert(&self, plan: &SubscriptionPlan) -> BillingResult<()> {
        self.plans.lock().unwrap().push(plan.clone());
        Ok(())
    }

    async fn count(&self) -> BillingResult<i64> {
        Ok(self.plans.lock().unwrap().len() as i64)
    }

    async fn all_active(&self) -> BillingResult<Vec<SubscriptionPlan>> {
        let mut plans: Vec<SubscriptionPlan> = self
            .plans
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        plans.sort_by_key(|p| p.sort_order);
        Ok(plans)
    }

    async fn by_id(&self, id: Uuid) -> BillingResult<Option<SubscriptionPlan>> {
        Ok(self
            .plans
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn by_name(&self, name: &str) -> BillingResult<Option<SubscriptionPlan>> {
        Ok(self
            .plans
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name == name)
            .cloned())
    }
}

// =============================================================================
// Billing events
// =============================================================================

#[derive(Default)]
pub struct MemoryEventStore {
    pub events: Mutex<Vec<BillingEvent>>,
}

impl MemoryEventStore {
    pub fn event_types_for(&self, account_id: Uuid) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.account_id == account_id)
            .map(|e| e.event_type.clone())
            .collect()
    }
}

#[async_trait]
impl BillingEventStore for MemoryEventStore {
    async fn append(&self, event: &BillingEvent) -> BillingResult<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn recent(&self, account_id: Uuid, limit: u32) -> BillingResult<Vec<BillingEvent>> {
        let mut events: Vec<BillingEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        events.truncate(limit as usize);
        Ok(events)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// An activity event with an explicit timestamp.
pub fn event_at(
    tenant_id: Uuid,
    user_id: Uuid,
    activity_type: &str,
    occurred_at: OffsetDateTime,
) -> ActivityEvent {
    ActivityEvent {
        id: Uuid::new_v4(),
        tenant_id,
        user_id,
        activity_type: activity_type.to_string(),
        metadata: serde_json::json!({}),
        source_ip: None,
        user_agent: None,
        occurred_at,
        created_at: occurred_at,
    }
}
