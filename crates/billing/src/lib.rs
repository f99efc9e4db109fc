//! Authmesh metering and billing core
//!
//! Turns the per-user activity stream into monthly Active-User counts,
//! converts those counts into billed amounts, and drives subscriptions
//! through their lifecycle. Services are constructed once at process
//! start with injected storage, clock, and pricing dependencies; the
//! Postgres implementations live in [`postgres`], and the monthly batch
//! in [`job`] is invoked by an external scheduler.

pub mod activity;
pub mod error;
pub mod events;
pub mod job;
pub mod mau;
pub mod postgres;
pub mod reconcile;
pub mod snapshot;
pub mod store;
pub mod subscription;

pub use activity::{ActivityRecorder, NewActivity};
pub use error::{BillingError, BillingResult};
pub use events::{BillingEvent, BillingEventStore, BillingEventType};
pub use job::{ReconciliationJob, TenantReconciliation};
pub use mau::{BillablePolicy, MauCalculator, MauResult};
pub use reconcile::{BillingData, BillingReconciler, CurrentUsage};
pub use snapshot::{MauTrend, SnapshotService};
pub use store::{
    ActivityStore, FixedPricing, PlanStore, PricingSource, SnapshotStore, SubscriptionStore,
    TenantDirectory, UserDirectory,
};
pub use subscription::{
    ActionCheck, SubscriptionLimits, SubscriptionService, FREE_PLAN, TRIAL_PLAN,
};
