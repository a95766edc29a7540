//! Flow contexts: the work orders passed from one transition to the next.
//!
//! Each transition consumes one `FlowContext` and produces the next. The
//! concrete shape may change along a flow, e.g. stack upscaling hands a
//! `ClusterScaling` context carrying the new addresses to the cluster side.

use std::collections::BTreeSet;
use std::sync::Arc;

use stackflow_events::CloudPlatform;
use stackflow_id::StackId;
use thiserror::Error;

use crate::error::FlowError;
use crate::flow::Transition;

/// Stack id and platform; enough for most stack-level transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningContext {
    pub stack_id: StackId,
    pub platform: CloudPlatform,
}

impl ProvisioningContext {
    pub fn new(stack_id: StackId, platform: CloudPlatform) -> Self {
        Self { stack_id, platform }
    }
}

/// Start or stop request for a stack and its cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackStatusUpdateContext {
    pub stack_id: StackId,
    pub platform: CloudPlatform,
    pub start: bool,
}

/// Infrastructure-side scaling of one instance group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackScalingContext {
    pub stack_id: StackId,
    pub platform: CloudPlatform,
    pub group_name: String,
    /// Positive to add instances, negative to remove them.
    pub adjustment: i32,
    /// Private addresses selected for removal by the cluster side.
    pub scaling_addresses: BTreeSet<String>,
    /// Set when exactly one instance is to be removed.
    pub instance_id: Option<String>,
}

impl StackScalingContext {
    pub fn new(
        stack_id: StackId,
        platform: CloudPlatform,
        group_name: impl Into<String>,
        adjustment: i32,
    ) -> Self {
        Self {
            stack_id,
            platform,
            group_name: group_name.into(),
            adjustment,
            scaling_addresses: BTreeSet::new(),
            instance_id: None,
        }
    }

    pub fn remove_instance(
        stack_id: StackId,
        platform: CloudPlatform,
        group_name: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: Some(instance_id.into()),
            ..Self::new(stack_id, platform, group_name, -1)
        }
    }
}

/// Cluster-side scaling of one instance group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterScalingContext {
    pub stack_id: StackId,
    pub platform: CloudPlatform,
    pub group_name: String,
    pub adjustment: i32,
    /// Private addresses of the instances that joined the stack.
    pub upscale_candidate_addresses: BTreeSet<String>,
}

impl ClusterScalingContext {
    pub fn new(
        stack_id: StackId,
        platform: CloudPlatform,
        group_name: impl Into<String>,
        adjustment: i32,
    ) -> Self {
        Self {
            stack_id,
            platform,
            group_name: group_name.into(),
            adjustment,
            upscale_candidate_addresses: BTreeSet::new(),
        }
    }
}

/// New management credentials for a cluster.
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterCredentialContext {
    pub stack_id: StackId,
    pub platform: CloudPlatform,
    pub user_name: String,
    pub password: String,
}

impl std::fmt::Debug for ClusterCredentialContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCredentialContext")
            .field("stack_id", &self.stack_id)
            .field("platform", &self.platform)
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Input of a failure handler.
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub stack_id: StackId,
    pub platform: CloudPlatform,
    /// The transition whose failure is being handled.
    pub transition: Transition,
    pub error: Arc<FlowError>,
}

/// The context passed between transitions.
#[derive(Debug, Clone)]
pub enum FlowContext {
    Provisioning(ProvisioningContext),
    StackStatusUpdate(StackStatusUpdateContext),
    StackScaling(StackScalingContext),
    ClusterScaling(ClusterScalingContext),
    ClusterCredential(ClusterCredentialContext),
    Failure(FailureContext),
}

/// A transition received a context of the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected {expected} context, got {actual}")]
pub struct ContextMismatch {
    pub expected: &'static str,
    pub actual: &'static str,
}

macro_rules! context_accessor {
    ($fn_name:ident, $variant:ident, $ty:ty, $label:literal) => {
        #[doc = concat!("Unwraps a ", $label, " context.")]
        pub fn $fn_name(self) -> Result<$ty, ContextMismatch> {
            match self {
                FlowContext::$variant(ctx) => Ok(ctx),
                other => Err(ContextMismatch {
                    expected: $label,
                    actual: other.kind(),
                }),
            }
        }
    };
}

impl FlowContext {
    pub fn stack_id(&self) -> StackId {
        match self {
            FlowContext::Provisioning(ctx) => ctx.stack_id,
            FlowContext::StackStatusUpdate(ctx) => ctx.stack_id,
            FlowContext::StackScaling(ctx) => ctx.stack_id,
            FlowContext::ClusterScaling(ctx) => ctx.stack_id,
            FlowContext::ClusterCredential(ctx) => ctx.stack_id,
            FlowContext::Failure(ctx) => ctx.stack_id,
        }
    }

    pub fn platform(&self) -> CloudPlatform {
        match self {
            FlowContext::Provisioning(ctx) => ctx.platform,
            FlowContext::StackStatusUpdate(ctx) => ctx.platform,
            FlowContext::StackScaling(ctx) => ctx.platform,
            FlowContext::ClusterScaling(ctx) => ctx.platform,
            FlowContext::ClusterCredential(ctx) => ctx.platform,
            FlowContext::Failure(ctx) => ctx.platform,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FlowContext::Provisioning(_) => "provisioning",
            FlowContext::StackStatusUpdate(_) => "stack status update",
            FlowContext::StackScaling(_) => "stack scaling",
            FlowContext::ClusterScaling(_) => "cluster scaling",
            FlowContext::ClusterCredential(_) => "cluster credential",
            FlowContext::Failure(_) => "failure",
        }
    }

    /// Stack id and platform only, whatever the concrete shape.
    pub fn to_provisioning(&self) -> ProvisioningContext {
        ProvisioningContext::new(self.stack_id(), self.platform())
    }

    context_accessor!(provisioning, Provisioning, ProvisioningContext, "provisioning");
    context_accessor!(
        stack_status_update,
        StackStatusUpdate,
        StackStatusUpdateContext,
        "stack status update"
    );
    context_accessor!(stack_scaling, StackScaling, StackScalingContext, "stack scaling");
    context_accessor!(
        cluster_scaling,
        ClusterScaling,
        ClusterScalingContext,
        "cluster scaling"
    );
    context_accessor!(
        cluster_credential,
        ClusterCredential,
        ClusterCredentialContext,
        "cluster credential"
    );
    context_accessor!(failure, Failure, FailureContext, "failure");
}

impl From<ProvisioningContext> for FlowContext {
    fn from(ctx: ProvisioningContext) -> Self {
        FlowContext::Provisioning(ctx)
    }
}

impl From<StackStatusUpdateContext> for FlowContext {
    fn from(ctx: StackStatusUpdateContext) -> Self {
        FlowContext::StackStatusUpdate(ctx)
    }
}

impl From<StackScalingContext> for FlowContext {
    fn from(ctx: StackScalingContext) -> Self {
        FlowContext::StackScaling(ctx)
    }
}

impl From<ClusterScalingContext> for FlowContext {
    fn from(ctx: ClusterScalingContext) -> Self {
        FlowContext::ClusterScaling(ctx)
    }
}

impl From<ClusterCredentialContext> for FlowContext {
    fn from(ctx: ClusterCredentialContext) -> Self {
        FlowContext::ClusterCredential(ctx)
    }
}

impl From<FailureContext> for FlowContext {
    fn from(ctx: FailureContext) -> Self {
        FlowContext::Failure(ctx)
    }
}
