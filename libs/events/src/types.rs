//! Lifecycle status and related enumerations.

use serde::{Deserialize, Serialize};

use crate::EventError;

// =============================================================================
// Lifecycle Status
// =============================================================================

/// Lifecycle state of a stack or of the cluster running on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Requested,
    CreateInProgress,
    Available,
    UpdateInProgress,
    UpdateRequested,
    UpdateFailed,
    CreateFailed,
    EnableSecurityFailed,
    DeleteInProgress,
    DeleteFailed,
    DeleteCompleted,
    Stopped,
    StopRequested,
    StartRequested,
    StopInProgress,
    StartInProgress,
    StartFailed,
    StopFailed,
}

impl Status {
    /// Every status, in declaration order.
    pub const ALL: [Status; 18] = [
        Status::Requested,
        Status::CreateInProgress,
        Status::Available,
        Status::UpdateInProgress,
        Status::UpdateRequested,
        Status::UpdateFailed,
        Status::CreateFailed,
        Status::EnableSecurityFailed,
        Status::DeleteInProgress,
        Status::DeleteFailed,
        Status::DeleteCompleted,
        Status::Stopped,
        Status::StopRequested,
        Status::StartRequested,
        Status::StopInProgress,
        Status::StartInProgress,
        Status::StartFailed,
        Status::StopFailed,
    ];

    /// The persisted / event-type spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Requested => "REQUESTED",
            Status::CreateInProgress => "CREATE_IN_PROGRESS",
            Status::Available => "AVAILABLE",
            Status::UpdateInProgress => "UPDATE_IN_PROGRESS",
            Status::UpdateRequested => "UPDATE_REQUESTED",
            Status::UpdateFailed => "UPDATE_FAILED",
            Status::CreateFailed => "CREATE_FAILED",
            Status::EnableSecurityFailed => "ENABLE_SECURITY_FAILED",
            Status::DeleteInProgress => "DELETE_IN_PROGRESS",
            Status::DeleteFailed => "DELETE_FAILED",
            Status::DeleteCompleted => "DELETE_COMPLETED",
            Status::Stopped => "STOPPED",
            Status::StopRequested => "STOP_REQUESTED",
            Status::StartRequested => "START_REQUESTED",
            Status::StopInProgress => "STOP_IN_PROGRESS",
            Status::StartInProgress => "START_IN_PROGRESS",
            Status::StartFailed => "START_FAILED",
            Status::StopFailed => "STOP_FAILED",
        }
    }

    /// Classifies this status for pollers.
    ///
    /// The match is deliberately written without a wildcard arm: adding a
    /// status variant does not compile until it is classified here.
    pub fn poll_group(&self) -> PollGroup {
        match self {
            Status::Requested
            | Status::CreateInProgress
            | Status::Available
            | Status::UpdateInProgress
            | Status::UpdateRequested
            | Status::UpdateFailed
            | Status::CreateFailed
            | Status::EnableSecurityFailed
            | Status::Stopped
            | Status::StopRequested
            | Status::StartRequested
            | Status::StopInProgress
            | Status::StartInProgress
            | Status::StartFailed
            | Status::StopFailed
            | Status::DeleteFailed => PollGroup::Pollable,
            Status::DeleteInProgress | Status::DeleteCompleted => PollGroup::Cancelled,
        }
    }

    /// Returns true while the resource is being (or has been) deleted.
    pub fn is_deletion(&self) -> bool {
        matches!(self, Status::DeleteInProgress | Status::DeleteCompleted)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| EventError::UnknownStatus(s.to_string()))
    }
}

/// Whether pollers waiting on a resource should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollGroup {
    /// Health must still be actively polled.
    Pollable,
    /// The resource is going away; in-flight polls must stop.
    Cancelled,
}

impl From<Status> for PollGroup {
    fn from(status: Status) -> Self {
        status.poll_group()
    }
}

// =============================================================================
// Billing
// =============================================================================

/// Billing markers emitted alongside lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingStatus {
    BillingStarted,
    BillingStopped,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::BillingStarted => "BILLING_STARTED",
            BillingStatus::BillingStopped => "BILLING_STOPPED",
        }
    }
}

impl std::fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Cloud Platform
// =============================================================================

/// Cloud platform a stack is provisioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloudPlatform {
    Aws,
    Gcp,
    Azure,
    Openstack,
}

impl CloudPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudPlatform::Aws => "AWS",
            CloudPlatform::Gcp => "GCP",
            CloudPlatform::Azure => "AZURE",
            CloudPlatform::Openstack => "OPENSTACK",
        }
    }
}

impl std::fmt::Display for CloudPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CloudPlatform {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AWS" => Ok(CloudPlatform::Aws),
            "GCP" => Ok(CloudPlatform::Gcp),
            "AZURE" => Ok(CloudPlatform::Azure),
            "OPENSTACK" => Ok(CloudPlatform::Openstack),
            _ => Err(EventError::UnknownPlatform(s.to_string())),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
