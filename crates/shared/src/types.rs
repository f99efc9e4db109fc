//! Common types used across Authmesh

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::period::BillingPeriod;

/// Sentinel for "no cap" in plan limits.
pub const UNLIMITED: i64 = -1;

// =============================================================================
// Enums
// =============================================================================

/// Subscription lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Free,
    Trial,
    Active,
    Canceled,
    Expired,
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        Self::Free
    }
}

impl SubscriptionStatus {
    /// Whether a subscription in this state still grants plan access
    pub fn grants_access(&self) -> bool {
        matches!(self, Self::Free | Self::Trial | Self::Active)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Trial => write!(f, "trial"),
            Self::Active => write!(f, "active"),
            Self::Canceled => write!(f, "canceled"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "trial" => Ok(Self::Trial),
            "active" => Ok(Self::Active),
            "canceled" => Ok(Self::Canceled),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

/// How often a plan bills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

impl Default for BillingInterval {
    fn default() -> Self {
        Self::Monthly
    }
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Monthly => write!(f, "monthly"),
            Self::Yearly => write!(f, "yearly"),
        }
    }
}

impl std::str::FromStr for BillingInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            _ => Err(format!("Invalid billing interval: {}", s)),
        }
    }
}

// =============================================================================
// Plan limits and features
// =============================================================================

/// Numeric caps carried by a plan. `UNLIMITED` (-1) means no cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_users: i64,
    pub max_applications: i64,
    pub storage_gb: i64,
    pub api_request_limit: i64,
}

impl PlanLimits {
    pub fn unlimited() -> Self {
        Self {
            max_users: UNLIMITED,
            max_applications: UNLIMITED,
            storage_gb: UNLIMITED,
            api_request_limit: UNLIMITED,
        }
    }
}

/// Feature flags carried by a plan.
///
/// The recognized key set is closed: `sso`, `mfa`, `scim_provisioning`,
/// `audit_log`, `custom_roles`, `priority_support`. Unknown keys in stored
/// JSON are ignored rather than trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanFeatures {
    #[serde(default)]
    pub sso: bool,
    #[serde(default)]
    pub mfa: bool,
    #[serde(default)]
    pub scim_provisioning: bool,
    #[serde(default)]
    pub audit_log: bool,
    #[serde(default)]
    pub custom_roles: bool,
    #[serde(default)]
    pub priority_support: bool,
}

impl PlanFeatures {
    /// Parse from stored JSON, ignoring unknown keys and non-boolean values.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let get = |key: &str| value.get(key).and_then(|v| v.as_bool()).unwrap_or(false);
        Self {
            sso: get("sso"),
            mfa: get("mfa"),
            scim_provisioning: get("scim_provisioning"),
            audit_log: get("audit_log"),
            custom_roles: get("custom_roles"),
            priority_support: get("priority_support"),
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "sso": self.sso,
            "mfa": self.mfa,
            "scim_provisioning": self.scim_provisioning,
            "audit_log": self.audit_log,
            "custom_roles": self.custom_roles,
            "priority_support": self.priority_support,
        })
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Tenant (customer organization) model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// One tracked user action. Append-only; never deleted by the metering core.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub activity_type: String,
    /// Opaque key/value context supplied by the caller
    pub metadata: serde_json::Value,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub occurred_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

/// Per-user aggregate inside a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserActivity {
    pub user_id: Uuid,
    pub last_activity: OffsetDateTime,
    pub activity_count: i64,
}

/// Finalized metering result for one tenant and one billing period.
///
/// At most one snapshot exists per (tenant_id, billing_period);
/// recomputation overwrites in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MauSnapshot {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub billing_period: BillingPeriod,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
    pub mau_count: i64,
    pub users: Vec<UserActivity>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Plan catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    pub display_name: String,
    pub price_cents: i64,
    pub billing_interval: BillingInterval,
    pub trial_days: i32,
    pub limits: PlanLimits,
    pub features: PlanFeatures,
    pub sort_order: i32,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Subscription model. History is kept as rows; the current subscription is
/// the newest row by creation time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub account_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub trial_used: bool,
    pub cancel_at_period_end: bool,
    pub last_mau_count: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

// =============================================================================
// Tests
// =============================================================================
