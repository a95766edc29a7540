//! Records handed to the external event and notification sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackflow_id::StackId;

use crate::{BillingStatus, CloudPlatform, Status};

/// Event-type spelling used for image copy progress notifications.
pub const IMAGE_COPY_STATE: &str = "IMAGE_COPY_STATE";

/// One lifecycle event: `(stack_id, event_type, message)`.
///
/// `event_type` is either a `Status` or a `BillingStatus` spelling, which is
/// how downstream consumers tell a status change from a billing marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub stack_id: StackId,
    pub event_type: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(stack_id: StackId, event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stack_id,
            event_type: event_type.into(),
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }

    /// Event tagged with a lifecycle status.
    pub fn status(stack_id: StackId, status: Status, message: impl Into<String>) -> Self {
        Self::new(stack_id, status.as_str(), message)
    }

    /// Event tagged with a billing marker.
    pub fn billing(stack_id: StackId, billing: BillingStatus, message: impl Into<String>) -> Self {
        Self::new(stack_id, billing.as_str(), message)
    }
}

/// Notification payload pushed to subscribed clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub event_type: String,
    pub event_timestamp: DateTime<Utc>,
    pub event_message: String,
    pub owner: String,
    pub account: String,
    pub cloud: CloudPlatform,
    pub region: String,
    pub stack_id: StackId,
    pub stack_name: String,
    pub stack_status: Status,
}

/// Stack attributes copied into a notification.
#[derive(Debug, Clone)]
pub struct NotificationSubject<'a> {
    pub owner: &'a str,
    pub account: &'a str,
    pub cloud: CloudPlatform,
    pub region: &'a str,
    pub stack_id: StackId,
    pub stack_name: &'a str,
    pub stack_status: Status,
}

impl Notification {
    /// Image copy progress, `progress` being a percentage.
    pub fn image_copy(subject: NotificationSubject<'_>, progress: u8) -> Self {
        Self {
            event_type: IMAGE_COPY_STATE.to_string(),
            event_timestamp: Utc::now(),
            event_message: progress.to_string(),
            owner: subject.owner.to_string(),
            account: subject.account.to_string(),
            cloud: subject.cloud,
            region: subject.region.to_string(),
            stack_id: subject.stack_id,
            stack_name: subject.stack_name.to_string(),
            stack_status: subject.stack_status,
        }
    }
}
