//! Authmesh worker
//!
//! Scheduling host for the metering core. The core has no scheduler of
//! its own: this binary wires the Postgres stores into the services and
//! drives the monthly reconciliation job and the hourly trial sweep on
//! cron schedules.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::EnvFilter;

use authmesh_billing::postgres::{
    PgActivityStore, PgBillingEventStore, PgPlanStore, PgPricingSource, PgSnapshotStore,
    PgSubscriptionStore, PgTenantDirectory, PgUserDirectory,
};
use authmesh_billing::{
    BillablePolicy, FixedPricing, MauCalculator, PricingSource, ReconciliationJob,
    SubscriptionService,
};
use authmesh_shared::{create_pool, run_migrations, Clock, SystemClock};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("loading worker configuration")?;

    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("connecting to database")?;
    run_migrations(&pool).await.context("running migrations")?;
    tracing::info!("Database ready");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let activity = Arc::new(PgActivityStore::new(pool.clone()));
    let users = Arc::new(PgUserDirectory::new(pool.clone()));
    let tenants = Arc::new(PgTenantDirectory::new(pool.clone()));
    let snapshots = Arc::new(PgSnapshotStore::new(pool.clone()));
    let subscriptions = Arc::new(PgSubscriptionStore::new(pool.clone()));
    let plans = Arc::new(PgPlanStore::new(pool.clone()));
    let events = Arc::new(PgBillingEventStore::new(pool.clone()));

    let pricing: Arc<dyn PricingSource> = match config.price_per_user_cents {
        Some(cents) => {
            tracing::info!(price_per_user_cents = cents, "Using configured per-user price");
            Arc::new(FixedPricing(cents))
        }
        None => Arc::new(PgPricingSource::new(pool.clone())),
    };

    let policy = match &config.billable_activity_types {
        Some(types) => {
            tracing::info!(?types, "Billable activity types restricted to allow-list");
            BillablePolicy::allow_list(types.iter().cloned())
        }
        None => BillablePolicy::count_all(),
    };

    let calculator =
        MauCalculator::new(activity, users, Arc::clone(&clock)).with_policy(policy);

    let subscription_service = SubscriptionService::new(
        subscriptions.clone(),
        plans,
        events.clone(),
        Arc::clone(&clock),
    );
    subscription_service
        .initialize_default_plans()
        .await
        .context("seeding plan catalog")?;

    let reconciliation_job = ReconciliationJob::new(
        tenants,
        calculator,
        snapshots,
        subscriptions,
        pricing,
        events,
        Arc::clone(&clock),
    )
    .with_per_tenant_timeout(Duration::from_secs(config.per_tenant_timeout_secs));

    let mut scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow::anyhow!("creating scheduler: {e:?}"))?;

    let monthly = reconciliation_job.clone();
    let monthly_job = Job::new_async(config.monthly_reconciliation_cron.as_str(), move |_id, _l| {
        let job = monthly.clone();
        Box::pin(async move {
            match job.run().await {
                Ok(results) => {
                    let failures = results.iter().filter(|r| r.error.is_some()).count();
                    tracing::info!(
                        tenant_count = results.len(),
                        failures,
                        "Monthly reconciliation run finished"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Monthly reconciliation run failed to start");
                }
            }
        })
    })
    .map_err(|e| anyhow::anyhow!("invalid monthly cron: {e:?}"))?;
    scheduler
        .add(monthly_job)
        .await
        .map_err(|e| anyhow::anyhow!("scheduling monthly job: {e:?}"))?;

    let sweep_service = subscription_service.clone();
    let sweep_job = Job::new_async(config.trial_sweep_cron.as_str(), move |_id, _l| {
        let service = sweep_service.clone();
        Box::pin(async move {
            if let Err(e) = service.process_trial_expirations().await {
                tracing::error!(error = %e, "Trial expiration sweep failed");
            }
        })
    })
    .map_err(|e| anyhow::anyhow!("invalid trial sweep cron: {e:?}"))?;
    scheduler
        .add(sweep_job)
        .await
        .map_err(|e| anyhow::anyhow!("scheduling trial sweep: {e:?}"))?;

    scheduler
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("starting scheduler: {e:?}"))?;

    tracing::info!(
        monthly_cron = %config.monthly_reconciliation_cron,
        trial_sweep_cron = %config.trial_sweep_cron,
        "Worker started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutting down");
    scheduler
        .shutdown()
        .await
        .map_err(|e| anyhow::anyhow!("stopping scheduler: {e:?}"))?;

    Ok(())
}
