//! Flow model: named transitions, their failure handlers and the predefined
//! flows built from them.
//!
//! A transition performs exactly one domain operation. Every transition that
//! is not itself a failure handler has a paired handler, which the flow
//! manager runs with a `Failure` context when the transition fails.

mod dispatcher;
mod executor;
mod lock;
mod manager;

pub use dispatcher::FlowDispatcher;
pub use executor::{ExecutorConfig, ExecutorError, FlowExecutor, Job};
pub use lock::{FlowLockGuard, FlowLocks};
pub use manager::{FlowHandle, FlowManager, FlowManagerError, FlowOutcome};

/// Lock name taken by `StopStack`.
pub const STOP_STACK_LOCK: &str = "stop-stack";

/// Lock name taken by `StartCluster`.
pub const START_CLUSTER_LOCK: &str = "start-cluster";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    // Stack side
    ProvisionStack,
    SetupMetadata,
    CollectMetadata,
    SetupTls,
    BootstrapCluster,
    StartStack,
    StopStackRequested,
    StopStack,
    UpscaleStack,
    ExtendMetadata,
    BootstrapNewNodes,
    DownscaleStack,
    RemoveInstance,
    SyncStack,

    // Cluster side
    RunClusterContainers,
    StartManagementServer,
    BuildCluster,
    ResetCluster,
    StartClusterRequested,
    StartCluster,
    StopCluster,
    AddClusterContainers,
    UpscaleCluster,
    DownscaleCluster,
    EnableSecurity,
    ChangeCredential,
    SyncCluster,

    // Failure handlers
    HandleStackCreationFailure,
    HandleClusterCreationFailure,
    HandleStackStatusUpdateFailure,
    HandleClusterStartFailure,
    HandleClusterStopFailure,
    HandleStackScalingFailure,
    HandleClusterScalingFailure,
    HandleSecurityEnableFailure,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::ProvisionStack => "provision-stack",
            Transition::SetupMetadata => "setup-metadata",
            Transition::CollectMetadata => "collect-metadata",
            Transition::SetupTls => "setup-tls",
            Transition::BootstrapCluster => "bootstrap-cluster",
            Transition::StartStack => "start-stack",
            Transition::StopStackRequested => "stop-stack-requested",
            Transition::StopStack => "stop-stack",
            Transition::UpscaleStack => "upscale-stack",
            Transition::ExtendMetadata => "extend-metadata",
            Transition::BootstrapNewNodes => "bootstrap-new-nodes",
            Transition::DownscaleStack => "downscale-stack",
            Transition::RemoveInstance => "remove-instance",
            Transition::SyncStack => "sync-stack",
            Transition::RunClusterContainers => "run-cluster-containers",
            Transition::StartManagementServer => "start-management-server",
            Transition::BuildCluster => "build-cluster",
            Transition::ResetCluster => "reset-cluster",
            Transition::StartClusterRequested => "start-cluster-requested",
            Transition::StartCluster => "start-cluster",
            Transition::StopCluster => "stop-cluster",
            Transition::AddClusterContainers => "add-cluster-containers",
            Transition::UpscaleCluster => "upscale-cluster",
            Transition::DownscaleCluster => "downscale-cluster",
            Transition::EnableSecurity => "enable-security",
            Transition::ChangeCredential => "change-credential",
            Transition::SyncCluster => "sync-cluster",
            Transition::HandleStackCreationFailure => "handle-stack-creation-failure",
            Transition::HandleClusterCreationFailure => "handle-cluster-creation-failure",
            Transition::HandleStackStatusUpdateFailure => "handle-stack-status-update-failure",
            Transition::HandleClusterStartFailure => "handle-cluster-start-failure",
            Transition::HandleClusterStopFailure => "handle-cluster-stop-failure",
            Transition::HandleStackScalingFailure => "handle-stack-scaling-failure",
            Transition::HandleClusterScalingFailure => "handle-cluster-scaling-failure",
            Transition::HandleSecurityEnableFailure => "handle-security-enable-failure",
        }
    }

    /// Operation name of the lock this transition must hold, if any. The lock
    /// is scoped to the stack the transition runs for.
    pub fn lock_name(&self) -> Option<&'static str> {
        match self {
            Transition::StopStack => Some(STOP_STACK_LOCK),
            Transition::StartCluster => Some(START_CLUSTER_LOCK),
            _ => None,
        }
    }

    pub fn is_failure_handler(&self) -> bool {
        self.failure_handler().is_none()
    }

    /// The handler run when this transition fails. Handlers have none.
    pub fn failure_handler(&self) -> Option<Transition> {
        use Transition::*;

        let handler = match self {
            ProvisionStack | SetupMetadata | CollectMetadata | SetupTls | BootstrapCluster => {
                HandleStackCreationFailure
            }
            RunClusterContainers | StartManagementServer | BuildCluster | ResetCluster => {
                HandleClusterCreationFailure
            }
            StartStack | StopStackRequested | StopStack | SyncStack => {
                HandleStackStatusUpdateFailure
            }
            StartClusterRequested | StartCluster => HandleClusterStartFailure,
            StopCluster => HandleClusterStopFailure,
            UpscaleStack | ExtendMetadata | BootstrapNewNodes | DownscaleStack | RemoveInstance => {
                HandleStackScalingFailure
            }
            AddClusterContainers | UpscaleCluster | DownscaleCluster | ChangeCredential
            | SyncCluster => HandleClusterScalingFailure,
            EnableSecurity => HandleSecurityEnableFailure,
            HandleStackCreationFailure
            | HandleClusterCreationFailure
            | HandleStackStatusUpdateFailure
            | HandleClusterStartFailure
            | HandleClusterStopFailure
            | HandleStackScalingFailure
            | HandleClusterScalingFailure
            | HandleSecurityEnableFailure => return None,
        };
        Some(handler)
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A predefined sequence of transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    Provision,
    Start,
    Stop,
    UpscaleStack,
    DownscaleStack,
    RemoveInstance,
    ResetCluster,
    Sync,
    CredentialChange,
    EnableSecurity,
}

impl Flow {
    pub fn name(&self) -> &'static str {
        match self {
            Flow::Provision => "provision",
            Flow::Start => "start",
            Flow::Stop => "stop",
            Flow::UpscaleStack => "upscale-stack",
            Flow::DownscaleStack => "downscale-stack",
            Flow::RemoveInstance => "remove-instance",
            Flow::ResetCluster => "reset-cluster",
            Flow::Sync => "sync",
            Flow::CredentialChange => "credential-change",
            Flow::EnableSecurity => "enable-security",
        }
    }

    pub fn transitions(&self) -> &'static [Transition] {
        use Transition::*;

        match self {
            Flow::Provision => &[
                ProvisionStack,
                SetupMetadata,
                SetupTls,
                BootstrapCluster,
                RunClusterContainers,
                StartManagementServer,
                BuildCluster,
            ],
            Flow::Start => &[StartClusterRequested, StartStack, CollectMetadata, StartCluster],
            Flow::Stop => &[StopStackRequested, StopCluster, StopStack],
            Flow::UpscaleStack => &[
                UpscaleStack,
                ExtendMetadata,
                BootstrapNewNodes,
                AddClusterContainers,
                UpscaleCluster,
            ],
            Flow::DownscaleStack => &[DownscaleCluster, DownscaleStack],
            Flow::RemoveInstance => &[RemoveInstance],
            Flow::ResetCluster => &[ResetCluster, BuildCluster],
            Flow::Sync => &[SyncStack, SyncCluster],
            Flow::CredentialChange => &[ChangeCredential],
            Flow::EnableSecurity => &[EnableSecurity],
        }
    }
}

impl std::fmt::Display for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
