//! Billing Events Module
//!
//! Append-only billing event logging for audit trails and debugging.
//! Events capture lifecycle operations and can be used to:
//! - Answer "why is this account in this state?" questions
//! - Reconstruct billing history
//! - Compliance and audit requirements

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Types of billing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingEventType {
    // Subscription lifecycle
    SubscriptionCreated,
    SubscriptionCanceled,

    // Trial
    TrialStarted,
    TrialEnded,

    // Metering
    SnapshotReconciled,
}

impl std::fmt::Display for BillingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BillingEventType::SubscriptionCreated => "SUBSCRIPTION_CREATED",
            BillingEventType::SubscriptionCanceled => "SUBSCRIPTION_CANCELED",
            BillingEventType::TrialStarted => "TRIAL_STARTED",
            BillingEventType::TrialEnded => "TRIAL_ENDED",
            BillingEventType::SnapshotReconciled => "SNAPSHOT_RECONCILED",
        };
        write!(f, "{}", s)
    }
}

/// One audit trail entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEvent {
    pub id: Uuid,
    pub account_id: Uuid,
    pub event_type: String,
    pub detail: serde_json::Value,
    pub created_at: OffsetDateTime,
}

impl BillingEvent {
    pub fn new(
        account_id: Uuid,
        event_type: BillingEventType,
        detail: serde_json::Value,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            event_type: event_type.to_string(),
            detail,
            created_at: now,
        }
    }
}

/// Append-only audit trail persistence.
#[async_trait]
pub trait BillingEventStore: Send + Sync {
    async fn append(&self, event: &BillingEvent) -> BillingResult<()>;

    /// Newest events first.
    async fn recent(&self, account_id: Uuid, limit: u32) -> BillingResult<Vec<BillingEvent>>;
}
