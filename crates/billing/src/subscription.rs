//! Subscription lifecycle management
//!
//! Owns the state machine for an account's subscription and the plan
//! catalog. All transitions go through this service; trial consumption is
//! permanent for an account once used.

use std::sync::Arc;

use serde::Serialize;
use time::Duration;
use uuid::Uuid;

use authmesh_shared::{
    BillingInterval, Clock, PlanFeatures, PlanLimits, Subscription, SubscriptionPlan,
    SubscriptionStatus, UNLIMITED,
};

use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEvent, BillingEventStore, BillingEventType};
use crate::store::{PlanStore, SubscriptionStore};

/// Plan the lifecycle falls back to when an account has no subscription.
pub const FREE_PLAN: &str = "free";

/// Plan a trial runs on.
pub const TRIAL_PLAN: &str = "professional";

/// Result of a capability check.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ActionCheck {
    pub allowed: bool,
    /// The relevant cap; -1 means unlimited (or an unrecognized action).
    pub limit: i64,
}

/// Effective caps and features for an account.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionLimits {
    pub plan_name: String,
    pub status: SubscriptionStatus,
    pub limits: PlanLimits,
    pub features: PlanFeatures,
}

/// Subscription lifecycle service
#[derive(Clone)]
pub struct SubscriptionService {
    subscriptions: Arc<dyn SubscriptionStore>,
    plans: Arc<dyn PlanStore>,
    events: Arc<dyn BillingEventStore>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionService {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        plans: Arc<dyn PlanStore>,
        events: Arc<dyn BillingEventStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subscriptions,
            plans,
            events,
            clock,
        }
    }

    /// Seed the plan catalog. No-op when any plan already exists, so it is
    /// safe to call on every startup.
    pub async fn initialize_default_plans(&self) -> BillingResult<usize> {
        if self.plans.count().await? > 0 {
            tracing::debug!("Plan catalog already seeded");
            return Ok(0);
        }

        let now = self.clock.now();
        let plans = default_plans(now);
        let seeded = plans.len();
        for plan in &plans {
            self.plans.insert(plan).await?;
        }

        tracing::info!(count = seeded, "Seeded default plan catalog");
        Ok(seeded)
    }

    /// Active plans for display, ordered by sort_order.
    pub async fn get_all_plans(&self) -> BillingResult<Vec<SubscriptionPlan>> {
        self.plans.all_active().await
    }

    /// Initial subscription on account creation.
    pub async fn create_free_subscription(&self, account_id: Uuid) -> BillingResult<Subscription> {
        let plan = self.require_plan(FREE_PLAN).await?;
        let now = self.clock.now();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            account_id,
            plan_id: plan.id,
            status: SubscriptionStatus::Free,
            current_period_start: Some(now),
            current_period_end: None,
            trial_end: None,
            trial_used: false,
            cancel_at_period_end: false,
            last_mau_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.subscriptions.insert(&subscription).await?;

        self.audit(
            account_id,
            BillingEventType::SubscriptionCreated,
            serde_json::json!({"plan": plan.name, "status": "free"}),
        )
        .await;

        Ok(subscription)
    }

    /// Start the one-time trial for an account.
    ///
    /// Fails with [`BillingError::TrialAlreadyUsed`] and leaves existing
    /// rows untouched when any prior subscription consumed the trial.
    /// Granting a second trial silently would be a billing-integrity bug,
    /// so this error propagates to the caller.
    pub async fn start_trial(&self, account_id: Uuid) -> BillingResult<Subscription> {
        if self.subscriptions.has_used_trial(account_id).await? {
            return Err(BillingError::TrialAlreadyUsed(account_id));
        }

        let plan = self.require_plan(TRIAL_PLAN).await?;
        let now = self.clock.now();

        if let Some(current) = self.subscriptions.current(account_id).await? {
            self.subscriptions
                .update_status(current.id, SubscriptionStatus::Canceled)
                .await?;
        }

        let trial_end = now + Duration::days(plan.trial_days as i64);
        let subscription = Subscription {
            id: Uuid::new_v4(),
            account_id,
            plan_id: plan.id,
            status: SubscriptionStatus::Trial,
            current_period_start: Some(now),
            current_period_end: Some(trial_end),
            trial_end: Some(trial_end),
            trial_used: true,
            cancel_at_period_end: false,
            last_mau_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.subscriptions.insert(&subscription).await?;

        tracing::info!(
            account_id = %account_id,
            plan = %plan.name,
            trial_end = %trial_end,
            "Trial started"
        );
        self.audit(
            account_id,
            BillingEventType::TrialStarted,
            serde_json::json!({"plan": plan.name, "trial_end": trial_end.to_string()}),
        )
        .await;

        Ok(subscription)
    }

    /// Cancel the account's current subscription. No replacement row is
    /// created; a canceled account has no active plan until it
    /// re-subscribes or re-trials.
    pub async fn cancel_current_subscription(&self, account_id: Uuid) -> BillingResult<()> {
        let current = self
            .subscriptions
            .current(account_id)
            .await?
            .ok_or(BillingError::SubscriptionNotFound(account_id))?;

        self.subscriptions.cancel(current.id).await?;

        tracing::info!(account_id = %account_id, subscription_id = %current.id, "Subscription canceled");
        self.audit(
            account_id,
            BillingEventType::SubscriptionCanceled,
            serde_json::json!({"subscription_id": current.id}),
        )
        .await;

        Ok(())
    }

    /// Sweep trials whose end has passed: mark each row expired, then
    /// create a fresh free subscription for the account. One account's
    /// failure is logged and isolated; the sweep continues.
    pub async fn process_trial_expirations(&self) -> BillingResult<usize> {
        let now = self.clock.now();
        let expired = self.subscriptions.expired_trials(now).await?;
        let total = expired.len();

        let mut processed = 0;
        for subscription in expired {
            if let Err(e) = self.expire_trial(&subscription).await {
                tracing::error!(
                    account_id = %subscription.account_id,
                    subscription_id = %subscription.id,
                    error = %e,
                    "Trial expiration failed; continuing with remaining accounts"
                );
                continue;
            }
            processed += 1;
        }

        if total > 0 {
            tracing::info!(processed, total, "Trial expiration sweep complete");
        }
        Ok(processed)
    }

    async fn expire_trial(&self, subscription: &Subscription) -> BillingResult<()> {
        self.subscriptions
            .update_status(subscription.id, SubscriptionStatus::Expired)
            .await?;
        self.create_free_subscription(subscription.account_id).await?;

        self.audit(
            subscription.account_id,
            BillingEventType::TrialEnded,
            serde_json::json!({"subscription_id": subscription.id}),
        )
        .await;
        Ok(())
    }

    /// The account's current subscription, if any.
    pub async fn get_user_subscription(
        &self,
        account_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        self.subscriptions.current(account_id).await
    }

    /// Recent billing events for the account, newest first.
    pub async fn get_billing_history(
        &self,
        account_id: Uuid,
        limit: u32,
    ) -> BillingResult<Vec<BillingEvent>> {
        self.events.recent(account_id, limit).await
    }

    /// Effective caps and features for the account, falling back to the
    /// free plan when no subscription row exists.
    pub async fn get_subscription_limits(
        &self,
        account_id: Uuid,
    ) -> BillingResult<SubscriptionLimits> {
        match self.subscriptions.current(account_id).await? {
            Some(subscription) => {
                let plan = self
                    .plans
                    .by_id(subscription.plan_id)
                    .await?
                    .ok_or_else(|| {
                        BillingError::PlanNotFound(subscription.plan_id.to_string())
                    })?;
                Ok(SubscriptionLimits {
                    plan_name: plan.name,
                    status: subscription.status,
                    limits: plan.limits,
                    features: plan.features,
                })
            }
            None => {
                let plan = self.require_plan(FREE_PLAN).await?;
                Ok(SubscriptionLimits {
                    plan_name: plan.name,
                    status: SubscriptionStatus::Free,
                    limits: plan.limits,
                    features: plan.features,
                })
            }
        }
    }

    /// Check whether the account may perform `action` given how many of
    /// the relevant resource it already has. Unrecognized actions are
    /// permissive: an incomplete mapping must not silently block callers.
    pub async fn can_perform_action(
        &self,
        account_id: Uuid,
        action: &str,
        current_count: i64,
    ) -> BillingResult<ActionCheck> {
        let limits = self.get_subscription_limits(account_id).await?.limits;
        Ok(check_action(&limits, action, current_count))
    }

    async fn require_plan(&self, name: &str) -> BillingResult<SubscriptionPlan> {
        self.plans
            .by_name(name)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(name.to_string()))
    }

    /// Audit logging is ambient: a failed append is logged, never fatal.
    async fn audit(&self, account_id: Uuid, event_type: BillingEventType, detail: serde_json::Value) {
        let event = BillingEvent::new(account_id, event_type, detail, self.clock.now());
        if let Err(e) = self.events.append(&event).await {
            tracing::warn!(account_id = %account_id, error = %e, "Failed to append billing event");
        }
    }
}

/// Map an action name to its cap and evaluate it.
fn check_action(limits: &PlanLimits, action: &str, current_count: i64) -> ActionCheck {
    let limit = match action {
        "add_user" => limits.max_users,
        "create_application" => limits.max_applications,
        "api_request" => limits.api_request_limit,
        _ => UNLIMITED,
    };
    if limit == UNLIMITED {
        return ActionCheck {
            allowed: true,
            limit: UNLIMITED,
        };
    }
    ActionCheck {
        allowed: current_count < limit,
        limit,
    }
}

/// Default plan catalog, seeded once.
fn default_plans(now: time::OffsetDateTime) -> Vec<SubscriptionPlan> {
    let plan = |name: &str,
                display_name: &str,
                price_cents: i64,
                trial_days: i32,
                limits: PlanLimits,
                features: PlanFeatures,
                sort_order: i32| SubscriptionPlan {
        id: Uuid::new_v4(),
        name: name.to_string(),
        display_name: display_name.to_string(),
        price_cents,
        billing_interval: BillingInterval::Monthly,
        trial_days,
        limits,
        features,
        sort_order,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    vec![
        plan(
            FREE_PLAN,
            "Free",
            0,
            0,
            PlanLimits {
                max_users: 10,
                max_applications: 3,
                storage_gb: 1,
                api_request_limit: 10_000,
            },
            PlanFeatures {
                mfa: true,
                ..PlanFeatures::default()
            },
            0,
        ),
        plan(
            "starter",
            "Starter",
            4_900,
            0,
            PlanLimits {
                max_users: 50,
                max_applications: 10,
                storage_gb: 10,
                api_request_limit: 100_000,
            },
            PlanFeatures {
                mfa: true,
                audit_log: true,
                ..PlanFeatures::default()
            },
            1,
        ),
        plan(
            TRIAL_PLAN,
            "Professional",
            19_900,
            14,
            PlanLimits {
                max_users: 1_000,
                max_applications: 50,
                storage_gb: 100,
                api_request_limit: 1_000_000,
            },
            PlanFeatures {
                sso: true,
                mfa: true,
                scim_provisioning: true,
                audit_log: true,
                custom_roles: true,
                priority_support: false,
            },
            2,
        ),
        plan(
            "enterprise",
            "Enterprise",
            99_900,
            0,
            PlanLimits::unlimited(),
            PlanFeatures {
                sso: true,
                mfa: true,
                scim_provisioning: true,
                audit_log: true,
                custom_roles: true,
                priority_support: true,
            },
            3,
        ),
    ]
}
