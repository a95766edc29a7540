//! Lifecycle event emission.
//!
//! `EventService` renders a `MessageCode` through the configured catalog and
//! hands the result to an `EventSink`. Sink errors are returned to the
//! caller; a failed event is a failed step.

mod sink;

pub use sink::{EventSink, InMemoryEventSink, TracingEventSink};

use std::sync::Arc;

use stackflow_events::{
    BillingStatus, DefaultMessages, LifecycleEvent, MessageCatalog, MessageCode, Notification,
    Status,
};
use stackflow_id::StackId;

use crate::store::StoreError;

#[derive(Clone)]
pub struct EventService {
    sink: Arc<dyn EventSink>,
    messages: Arc<dyn MessageCatalog>,
}

impl EventService {
    pub fn new(sink: Arc<dyn EventSink>, messages: Arc<dyn MessageCatalog>) -> Self {
        Self { sink, messages }
    }

    /// Service rendering with the built-in English catalog.
    pub fn with_default_messages(sink: Arc<dyn EventSink>) -> Self {
        Self::new(sink, Arc::new(DefaultMessages))
    }

    pub fn message(&self, code: MessageCode, args: &[String]) -> String {
        self.messages.message(code, args)
    }

    /// Fires an event tagged with `status`.
    pub async fn fire_status(
        &self,
        stack_id: StackId,
        status: Status,
        code: MessageCode,
        args: &[String],
    ) -> Result<(), StoreError> {
        let message = self.message(code, args);
        self.sink
            .fire_event(LifecycleEvent::status(stack_id, status, message))
            .await
    }

    /// Fires an event tagged with a billing marker.
    pub async fn fire_billing(
        &self,
        stack_id: StackId,
        billing: BillingStatus,
        code: MessageCode,
        args: &[String],
    ) -> Result<(), StoreError> {
        let message = self.message(code, args);
        self.sink
            .fire_event(LifecycleEvent::billing(stack_id, billing, message))
            .await
    }

    pub async fn notify(&self, notification: Notification) -> Result<(), StoreError> {
        self.sink.send_notification(notification).await
    }
}

impl std::fmt::Debug for EventService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_are_rendered_before_firing() {
        let sink = Arc::new(InMemoryEventSink::new());
        let events = EventService::with_default_messages(sink.clone());
        let stack_id = StackId::new();

        events
            .fire_status(
                stack_id,
                Status::CreateFailed,
                MessageCode::StackInfrastructureCreateFailed,
                &["quota exceeded".to_string()],
            )
            .await
            .unwrap();
        events
            .fire_billing(
                stack_id,
                BillingStatus::BillingStopped,
                MessageCode::StackInfrastructureCreateFailed,
                &["quota exceeded".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(
            sink.event_pairs(),
            vec![
                (
                    "CREATE_FAILED".to_string(),
                    "Infrastructure creation failed. Reason: quota exceeded".to_string()
                ),
                (
                    "BILLING_STOPPED".to_string(),
                    "Infrastructure creation failed. Reason: quota exceeded".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_sink_errors_propagate() {
        let sink = Arc::new(InMemoryEventSink::new().failing_on("AVAILABLE"));
        let events = EventService::with_default_messages(sink);
        let result = events
            .fire_status(StackId::new(), Status::Available, MessageCode::StackStarted, &[])
            .await;
        assert!(result.is_err());
    }
}
