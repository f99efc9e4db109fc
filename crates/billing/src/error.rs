//! Billing error types

use thiserror::Error;
use uuid::Uuid;

use authmesh_shared::PeriodParseError;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Tenant not found: {0}")]
    TenantNotFound(Uuid),

    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("No subscription found for account: {0}")]
    SubscriptionNotFound(Uuid),

    #[error("Trial already used for account: {0}")]
    TrialAlreadyUsed(Uuid),

    #[error(transparent)]
    InvalidPeriod(#[from] PeriodParseError),

    #[error("Pricing configuration missing")]
    PricingMissing,

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::Internal(format!("serialization: {}", err))
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
