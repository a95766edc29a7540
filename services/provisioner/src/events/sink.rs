//! Event sink implementations.

use std::sync::Mutex;

use async_trait::async_trait;
use stackflow_events::{LifecycleEvent, Notification};
use tracing::info;

use crate::store::StoreError;
use crate::locked;

/// Receives lifecycle events and client notifications.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn fire_event(&self, event: LifecycleEvent) -> Result<(), StoreError>;

    async fn send_notification(&self, notification: Notification) -> Result<(), StoreError>;
}

/// Writes events to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn fire_event(&self, event: LifecycleEvent) -> Result<(), StoreError> {
        info!(
            stack_id = %event.stack_id,
            event_type = %event.event_type,
            message = %event.message,
            "stack event"
        );
        Ok(())
    }

    async fn send_notification(&self, notification: Notification) -> Result<(), StoreError> {
        info!(
            stack_id = %notification.stack_id,
            event_type = %notification.event_type,
            message = %notification.event_message,
            "notification"
        );
        Ok(())
    }
}

/// Keeps every event in memory; used by tests.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<LifecycleEvent>>,
    notifications: Mutex<Vec<Notification>>,
    failing_event_type: Mutex<Option<String>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects events of `event_type` with a store error.
    #[must_use]
    pub fn failing_on(self, event_type: impl Into<String>) -> Self {
        *locked(&self.failing_event_type) = Some(event_type.into());
        self
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        locked(&self.events).clone()
    }

    /// `(event_type, message)` pairs in firing order.
    pub fn event_pairs(&self) -> Vec<(String, String)> {
        locked(&self.events)
            .iter()
            .map(|e| (e.event_type.clone(), e.message.clone()))
            .collect()
    }

    pub fn event_types(&self) -> Vec<String> {
        locked(&self.events)
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        locked(&self.notifications).clone()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn fire_event(&self, event: LifecycleEvent) -> Result<(), StoreError> {
        if locked(&self.failing_event_type).as_deref() == Some(event.event_type.as_str()) {
            return Err(StoreError::Corrupt(format!(
                "event sink rejected {}",
                event.event_type
            )));
        }
        locked(&self.events).push(event);
        Ok(())
    }

    async fn send_notification(&self, notification: Notification) -> Result<(), StoreError> {
        locked(&self.notifications).push(notification);
        Ok(())
    }
}
