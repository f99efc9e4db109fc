//! Activity recording
//!
//! Metering input from the request path. Recording is best-effort by
//! contract: it never blocks and never surfaces a failure to the caller,
//! because metering must not degrade the primary operation. A dropped
//! event under recorder failure is an accepted, bounded-risk trade-off.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use authmesh_shared::{ActivityEvent, Clock};

use crate::store::ActivityStore;

/// Input for one recorded activity.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub activity_type: String,
    pub metadata: Option<Value>,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Best-effort activity recorder.
///
/// Events are pushed onto a bounded queue and written by a background
/// task; a full queue or a store failure is logged and the event dropped.
pub struct ActivityRecorder {
    tx: mpsc::Sender<ActivityEvent>,
    store: Arc<dyn ActivityStore>,
    clock: Arc<dyn Clock>,
    writer: JoinHandle<()>,
}

impl ActivityRecorder {
    pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

    /// Spawn the background writer. Must be called from within a tokio
    /// runtime; the recorder is constructed once at process start.
    pub fn new(store: Arc<dyn ActivityStore>, clock: Arc<dyn Clock>, queue_capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<ActivityEvent>(queue_capacity);
        let sink = Arc::clone(&store);
        let writer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.insert(&event).await {
                    tracing::error!(
                        tenant_id = %event.tenant_id,
                        user_id = %event.user_id,
                        activity_type = %event.activity_type,
                        error = %e,
                        "Failed to persist activity event; event dropped"
                    );
                }
            }
        });
        Self {
            tx,
            store,
            clock,
            writer,
        }
    }

    /// Record an activity event. Never blocks, never errors to the caller.
    pub fn record(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        activity_type: impl Into<String>,
        metadata: Option<Value>,
    ) {
        self.record_detailed(NewActivity {
            user_id,
            tenant_id,
            activity_type: activity_type.into(),
            metadata,
            source_ip: None,
            user_agent: None,
        });
    }

    /// Record with request context attached.
    pub fn record_detailed(&self, activity: NewActivity) {
        let event = self.build_event(activity);
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    tenant_id = %event.tenant_id,
                    activity_type = %event.activity_type,
                    "Activity queue full; event dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::error!(
                    tenant_id = %event.tenant_id,
                    "Activity writer stopped; event dropped"
                );
            }
        }
    }

    /// Record and await the write. Errors are still absorbed; callers that
    /// want backpressure instead of the queue use this variant.
    pub async fn record_sync(&self, activity: NewActivity) {
        let event = self.build_event(activity);
        if let Err(e) = self.store.insert(&event).await {
            tracing::error!(
                tenant_id = %event.tenant_id,
                user_id = %event.user_id,
                error = %e,
                "Failed to persist activity event; event dropped"
            );
        }
    }

    /// Drain the queue and stop the background writer.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.writer.await {
            tracing::warn!(error = %e, "Activity writer task aborted");
        }
    }

    fn build_event(&self, activity: NewActivity) -> ActivityEvent {
        let now = self.clock.now();
        ActivityEvent {
            id: Uuid::new_v4(),
            tenant_id: activity.tenant_id,
            user_id: activity.user_id,
            activity_type: activity.activity_type,
            metadata: activity.metadata.unwrap_or_else(|| Value::Object(Default::default())),
            source_ip: activity.source_ip,
            user_agent: activity.user_agent,
            occurred_at: now,
            created_at: now,
        }
    }
}
