//! Message keys and the default catalog used to render event messages.
//!
//! Templates use positional placeholders (`{0}`, `{1}`, ...). A localized
//! deployment plugs in its own `MessageCatalog`; the engine only ever refers
//! to messages by `MessageCode`.

/// Keys of every message the engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    StackProvisioning,
    StackInfrastructureTime,
    StackInfrastructureCreateFailed,
    StackInfrastructureRollbackFailed,
    StackInfrastructureRollbackMessage,
    StackProvisioned,
    StackMetadataCollected,
    StackMetadataExtended,
    StackTlsSetup,
    StackBootstrapFinished,
    StackBootstrapNewNodes,
    StackStarting,
    StackStarted,
    StackStopRequested,
    StackStopping,
    StackStopped,
    StackStatusUpdateFailed,
    StackUpscaling,
    StackUpscaled,
    StackDownscaling,
    StackDownscaled,
    StackScalingFailed,
    StackSynced,
    ClusterContainersStarted,
    ClusterManagementServerStarted,
    ClusterBuilding,
    ClusterBuilt,
    ClusterReset,
    ClusterCreateFailed,
    ClusterStartRequested,
    ClusterStarting,
    ClusterStarted,
    ClusterStartFailed,
    ClusterStopping,
    ClusterStopped,
    ClusterStopFailed,
    ClusterScaling,
    ClusterScaled,
    ClusterScalingFailed,
    ClusterSecurityEnabled,
    ClusterSecurityFailed,
    ClusterSynced,
    ClusterCredentialChanged,
}

impl MessageCode {
    /// Catalog key.
    pub fn code(&self) -> &'static str {
        match self {
            MessageCode::StackProvisioning => "stack.provisioning",
            MessageCode::StackInfrastructureTime => "stack.infrastructure.time",
            MessageCode::StackInfrastructureCreateFailed => "stack.infrastructure.create.failed",
            MessageCode::StackInfrastructureRollbackFailed => "stack.infrastructure.rollback.failed",
            MessageCode::StackInfrastructureRollbackMessage => "stack.infrastructure.rollback.message",
            MessageCode::StackProvisioned => "flow.stack.provisioned",
            MessageCode::StackMetadataCollected => "stack.metadata.collected",
            MessageCode::StackMetadataExtended => "stack.metadata.extended",
            MessageCode::StackTlsSetup => "stack.tls.setup",
            MessageCode::StackBootstrapFinished => "stack.bootstrap.finished",
            MessageCode::StackBootstrapNewNodes => "stack.bootstrap.new.nodes",
            MessageCode::StackStarting => "stack.starting",
            MessageCode::StackStarted => "stack.started",
            MessageCode::StackStopRequested => "stack.stop.requested",
            MessageCode::StackStopping => "stack.stopping",
            MessageCode::StackStopped => "stack.stopped",
            MessageCode::StackStatusUpdateFailed => "stack.status.update.failed",
            MessageCode::StackUpscaling => "stack.upscaling",
            MessageCode::StackUpscaled => "stack.upscaled",
            MessageCode::StackDownscaling => "stack.downscaling",
            MessageCode::StackDownscaled => "stack.downscaled",
            MessageCode::StackScalingFailed => "stack.scaling.failed",
            MessageCode::StackSynced => "stack.synced",
            MessageCode::ClusterContainersStarted => "cluster.containers.started",
            MessageCode::ClusterManagementServerStarted => "cluster.management.server.started",
            MessageCode::ClusterBuilding => "cluster.building",
            MessageCode::ClusterBuilt => "cluster.built",
            MessageCode::ClusterReset => "cluster.reset",
            MessageCode::ClusterCreateFailed => "cluster.create.failed",
            MessageCode::ClusterStartRequested => "cluster.start.requested",
            MessageCode::ClusterStarting => "cluster.starting",
            MessageCode::ClusterStarted => "cluster.started",
            MessageCode::ClusterStartFailed => "cluster.start.failed",
            MessageCode::ClusterStopping => "cluster.stopping",
            MessageCode::ClusterStopped => "cluster.stopped",
            MessageCode::ClusterStopFailed => "cluster.stop.failed",
            MessageCode::ClusterScaling => "cluster.scaling",
            MessageCode::ClusterScaled => "cluster.scaled",
            MessageCode::ClusterScalingFailed => "cluster.scaling.failed",
            MessageCode::ClusterSecurityEnabled => "cluster.security.enabled",
            MessageCode::ClusterSecurityFailed => "cluster.security.failed",
            MessageCode::ClusterSynced => "cluster.synced",
            MessageCode::ClusterCredentialChanged => "cluster.credential.changed",
        }
    }

    /// English template for this key.
    pub fn default_template(&self) -> &'static str {
        match self {
            MessageCode::StackProvisioning => "Creating infrastructure",
            MessageCode::StackInfrastructureTime => "Infrastructure creation took {0} seconds",
            MessageCode::StackInfrastructureCreateFailed => {
                "Infrastructure creation failed. Reason: {0}"
            }
            MessageCode::StackInfrastructureRollbackFailed => {
                "Infrastructure rollback failed. Reason: {0}"
            }
            MessageCode::StackInfrastructureRollbackMessage => {
                "Failed to create {0} instance(s) in group {1}, removing them from the stack. Reason: {2}"
            }
            MessageCode::StackProvisioned => "Infrastructure successfully provisioned",
            MessageCode::StackMetadataCollected => "Instance metadata collected",
            MessageCode::StackMetadataExtended => "Metadata of {0} new instance(s) collected",
            MessageCode::StackTlsSetup => "TLS set up on gateway {0}",
            MessageCode::StackBootstrapFinished => "Cluster bootstrapped on {0} node(s)",
            MessageCode::StackBootstrapNewNodes => "{0} new node(s) bootstrapped",
            MessageCode::StackStarting => "Starting infrastructure",
            MessageCode::StackStarted => "Infrastructure started",
            MessageCode::StackStopRequested => "Infrastructure stop requested",
            MessageCode::StackStopping => "Stopping infrastructure",
            MessageCode::StackStopped => "Infrastructure stopped",
            MessageCode::StackStatusUpdateFailed => "Infrastructure status update failed. Reason: {0}",
            MessageCode::StackUpscaling => "Adding {0} instance(s) to group {1}",
            MessageCode::StackUpscaled => "Group {1} extended with {0} instance(s)",
            MessageCode::StackDownscaling => "Removing {0} instance(s) from group {1}",
            MessageCode::StackDownscaled => "Removed {0} instance(s) from group {1}",
            MessageCode::StackScalingFailed => "Infrastructure scaling failed. Reason: {0}",
            MessageCode::StackSynced => "Infrastructure synchronized, {0} instance(s) running",
            MessageCode::ClusterContainersStarted => "Cluster containers started on {0} node(s)",
            MessageCode::ClusterManagementServerStarted => "Management server is available at {0}",
            MessageCode::ClusterBuilding => "Building cluster",
            MessageCode::ClusterBuilt => "Cluster built",
            MessageCode::ClusterReset => "Cluster reset",
            MessageCode::ClusterCreateFailed => "Cluster creation failed. Reason: {0}",
            MessageCode::ClusterStartRequested => "Cluster start requested",
            MessageCode::ClusterStarting => "Starting cluster services",
            MessageCode::ClusterStarted => "Cluster services started",
            MessageCode::ClusterStartFailed => "Cluster start failed. Reason: {0}",
            MessageCode::ClusterStopping => "Stopping cluster services",
            MessageCode::ClusterStopped => "Cluster services stopped",
            MessageCode::ClusterStopFailed => "Cluster stop failed. Reason: {0}",
            MessageCode::ClusterScaling => "Scaling cluster group {1} by {0}",
            MessageCode::ClusterScaled => "Cluster group {1} scaled by {0}",
            MessageCode::ClusterScalingFailed => "Cluster scaling failed. Reason: {0}",
            MessageCode::ClusterSecurityEnabled => "Security enabled on the cluster",
            MessageCode::ClusterSecurityFailed => "Enabling security failed. Reason: {0}",
            MessageCode::ClusterSynced => "Cluster synchronized, status {0}",
            MessageCode::ClusterCredentialChanged => "Cluster credential changed for user {0}",
        }
    }
}

impl std::fmt::Display for MessageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Renders message codes into human-readable text.
pub trait MessageCatalog: Send + Sync {
    fn message(&self, code: MessageCode, args: &[String]) -> String;
}

/// Catalog backed by the built-in English templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMessages;

impl MessageCatalog for DefaultMessages {
    fn message(&self, code: MessageCode, args: &[String]) -> String {
        render(code.default_template(), args)
    }
}

/// Substitutes `{n}` placeholders with `args[n]`; unknown placeholders are kept.
pub fn render(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let replaced = after.find('}').and_then(|end| {
            let index: usize = after[..end].parse().ok()?;
            let arg = args.get(index)?;
            Some((arg, end))
        });

        match replaced {
            Some((arg, end)) => {
                out.push_str(arg);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}
