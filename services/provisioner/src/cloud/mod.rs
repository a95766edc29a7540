//! Cloud resource connector.
//!
//! Long-running operations (launch, upscale, image check) use the
//! request/response channel in `request`; short ones are plain async calls.

mod mock;
mod request;

pub use mock::{CloudCall, MockCloudConnector};
pub use request::{
    request_channel, CheckImage, CloudPayload, CloudRequest, ConnectorRequest, LaunchStack,
    PendingResult, RequestError, UpscaleStack,
};

use std::collections::HashSet;

use async_trait::async_trait;
use stackflow_events::CloudPlatform;
use stackflow_id::{PrivateId, StackId};
use stackflow_reconcile::Cancelled;
use thiserror::Error;

use crate::domain::{CloudResource, InstanceGroupType, Stack, Template};

// =============================================================================
// Request data
// =============================================================================

/// Identity of the stack a cloud call is made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudContext {
    pub stack_id: StackId,
    pub name: String,
    pub platform: CloudPlatform,
    pub region: String,
    pub owner: String,
}

impl From<&Stack> for CloudContext {
    fn from(stack: &Stack) -> Self {
        Self {
            stack_id: stack.id,
            name: stack.name.clone(),
            platform: stack.platform,
            region: stack.region.clone(),
            owner: stack.owner.clone(),
        }
    }
}

impl std::fmt::Display for CloudContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stack {} ({}) on {} in {}",
            self.name, self.stack_id, self.platform, self.region
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudInstance {
    pub private_id: PrivateId,
    pub template: Template,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudGroup {
    pub name: String,
    pub group_type: InstanceGroupType,
    pub instances: Vec<CloudInstance>,
}

impl CloudGroup {
    /// Private ids of the instances requested for this group.
    pub fn private_ids(&self) -> HashSet<PrivateId> {
        self.instances.iter().map(|i| i.private_id).collect()
    }
}

/// The topology sent to the cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudStack {
    pub groups: Vec<CloudGroup>,
    pub image: String,
}

impl CloudStack {
    /// Every pending instance request of `stack`, grouped.
    pub fn requested(stack: &Stack) -> Self {
        Self::from_filter(stack, |_| true)
    }

    /// Pending instance requests of one group only.
    pub fn requested_in_group(stack: &Stack, group_name: &str) -> Self {
        Self::from_filter(stack, |name| name == group_name)
    }

    fn from_filter(stack: &Stack, include_group: impl Fn(&str) -> bool) -> Self {
        let groups = stack
            .instance_groups
            .iter()
            .filter(|g| include_group(&g.name))
            .map(|g| CloudGroup {
                name: g.name.clone(),
                group_type: g.group_type,
                instances: g
                    .requested_instances()
                    .map(|i| CloudInstance {
                        private_id: i.private_id,
                        template: g.template.clone(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            groups,
            image: stack.image.clone(),
        }
    }

    pub fn instance_count(&self) -> usize {
        self.groups.iter().map(|g| g.instances.len()).sum()
    }
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    Created,
    Failed,
    Deleted,
}

/// Outcome of one infrastructure operation on one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudResourceStatus {
    /// Absent for resources that are not instances.
    pub private_id: Option<PrivateId>,
    pub status: ResourceStatus,
    pub status_reason: Option<String>,
}

impl CloudResourceStatus {
    pub fn created(private_id: PrivateId) -> Self {
        Self {
            private_id: Some(private_id),
            status: ResourceStatus::Created,
            status_reason: None,
        }
    }

    pub fn failed(private_id: PrivateId, reason: impl Into<String>) -> Self {
        Self {
            private_id: Some(private_id),
            status: ResourceStatus::Failed,
            status_reason: Some(reason.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == ResourceStatus::Failed
    }

    pub fn is_deleted(&self) -> bool {
        self.status == ResourceStatus::Deleted
    }

    pub fn reason(&self) -> &str {
        self.status_reason.as_deref().unwrap_or("unknown reason")
    }
}

#[derive(Debug, Clone, Default)]
pub struct LaunchStackResult {
    pub results: Vec<CloudResourceStatus>,
    /// Resources created for the stack, tracked for rollback.
    pub resources: Vec<CloudResource>,
    pub error: Option<CloudError>,
}

#[derive(Debug, Clone, Default)]
pub struct UpscaleStackResult {
    pub results: Vec<CloudResourceStatus>,
    pub resources: Vec<CloudResource>,
    pub error: Option<CloudError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    CreateInProgress,
    CreateFinished,
    CreateFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckImageResult {
    pub status: ImageStatus,
    /// Copy progress in percent.
    pub progress: u8,
}

/// Metadata of a created instance as reported by the cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudVmMetaData {
    pub private_id: PrivateId,
    pub instance_id: String,
    pub private_ip: String,
    pub public_ip: String,
    pub long_hostname: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Running,
    Stopped,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudInstanceState {
    pub private_id: PrivateId,
    pub state: InstanceState,
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    #[error("cloud provider error: {0}")]
    Provider(String),

    /// The cloud side abandoned the operation on purpose.
    #[error("cloud operation cancelled")]
    Cancelled(#[source] Cancelled),
}

// =============================================================================
// Connector
// =============================================================================

/// Adapter over the cloud provider APIs.
#[async_trait]
pub trait CloudConnector: Send + Sync {
    /// Hands an asynchronous request to the connector. The result arrives on
    /// the request's `PendingResult`.
    fn notify(&self, request: ConnectorRequest) -> Result<(), CloudError>;

    /// Deletes every tracked resource of a failed stack.
    async fn rollback(&self, stack: &Stack, resources: &[CloudResource]) -> Result<(), CloudError>;

    async fn start_instances(&self, stack: &Stack) -> Result<(), CloudError>;

    async fn stop_instances(&self, stack: &Stack) -> Result<(), CloudError>;

    async fn collect_metadata(
        &self,
        stack: &Stack,
        private_ids: &[PrivateId],
    ) -> Result<Vec<CloudVmMetaData>, CloudError>;

    async fn remove_instances(
        &self,
        stack: &Stack,
        instance_ids: &[String],
    ) -> Result<(), CloudError>;

    async fn instance_states(&self, stack: &Stack) -> Result<Vec<CloudInstanceState>, CloudError>;
}
