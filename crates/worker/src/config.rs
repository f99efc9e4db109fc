//! Worker configuration

use std::env;

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Schedules (6-field cron: sec min hour day month weekday)
    pub monthly_reconciliation_cron: String,
    pub trial_sweep_cron: String,

    // Metering
    pub per_tenant_timeout_secs: u64,
    /// Comma-separated allow-list of billable activity types; empty means
    /// every activity type counts toward MAU
    pub billable_activity_types: Option<Vec<String>>,
    /// Overrides the pricing table when set
    pub price_per_user_cents: Option<i64>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),

            // First of the month, 02:00 UTC
            monthly_reconciliation_cron: env::var("MONTHLY_RECONCILIATION_CRON")
                .unwrap_or_else(|_| "0 0 2 1 * *".to_string()),
            // Hourly at :15
            trial_sweep_cron: env::var("TRIAL_SWEEP_CRON")
                .unwrap_or_else(|_| "0 15 * * * *".to_string()),

            per_tenant_timeout_secs: env::var("PER_TENANT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .unwrap_or(120),
            billable_activity_types: env::var("BILLABLE_ACTIVITY_TYPES")
                .ok()
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|types| !types.is_empty()),
            price_per_user_cents: match env::var("PRICE_PER_USER_CENTS") {
                Ok(raw) => Some(
                    raw.parse()
                        .map_err(|_| ConfigError::Invalid("PRICE_PER_USER_CENTS"))?,
                ),
                Err(_) => None,
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
