use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use stackflow_events::{MessageCode, Status};
use stackflow_id::StackId;
use stackflow_reconcile::PollingService;
use tracing::{info, warn};

use super::{update_statuses, ClusterFacade, FacadeResult, FacadeServices};
use crate::bootstrap::gateway_config;
use crate::cluster_manager::ClusterManager;
use crate::context::{FailureContext, FlowContext, StackScalingContext};
use crate::domain::{Cluster, InstanceStatus, OnFailureAction, Stack};
use crate::events::EventService;
use crate::orchestrator::ContainerOrchestrator;
use crate::polling::{poll_failure, ManagementServerCheckerTask, ManagementServerContext, PollSettings};
use crate::store::{StackStore, StoreError};

pub struct DefaultClusterFacade {
    store: Arc<dyn StackStore>,
    orchestrator: Arc<dyn ContainerOrchestrator>,
    cluster_manager: Arc<dyn ClusterManager>,
    events: EventService,
    polling: PollingService,
    settings: PollSettings,
}

fn cluster_of(stack: &Stack) -> Result<&Cluster, StoreError> {
    stack.cluster.as_ref().ok_or(StoreError::ClusterNotFound(stack.id))
}

impl DefaultClusterFacade {
    pub fn new(services: &FacadeServices) -> Self {
        Self {
            store: services.store.clone(),
            orchestrator: services.orchestrator.clone(),
            cluster_manager: services.cluster_manager.clone(),
            events: services.events.clone(),
            polling: PollingService::new(),
            settings: services.polling,
        }
    }

    async fn set_cluster_status(
        &self,
        stack_id: StackId,
        status: Status,
        code: MessageCode,
        args: &[String],
    ) -> Result<(), StoreError> {
        let message = self.events.message(code, args);
        self.store
            .update_cluster_status(stack_id, status, Some(&message))
            .await?;
        self.events.fire_status(stack_id, status, code, args).await
    }

    /// Waits until the management server of `stack` answers.
    async fn wait_for_management_server(&self, stack: &Stack) -> anyhow::Result<String> {
        let address = cluster_of(stack)?
            .management_ip
            .clone()
            .with_context(|| format!("cluster of stack {} has no management address", stack.id))?;

        let task = ManagementServerCheckerTask::new(self.store.clone());
        self.polling
            .poll_with_timeout(
                &task,
                &ManagementServerContext {
                    stack_id: stack.id,
                    address: address.clone(),
                    cluster_manager: self.cluster_manager.clone(),
                },
                self.settings.interval,
                self.settings.max_attempts,
            )
            .await
            .map_err(poll_failure)?
            .into_cancellation(format!("management server of stack {}", stack.id))?;
        Ok(address)
    }

    async fn set_instance_status(
        &self,
        stack: &Stack,
        addresses: &BTreeSet<String>,
        status: InstanceStatus,
    ) -> Result<(), StoreError> {
        let matching = stack.running_instances().filter(|i| {
            i.private_ip
                .as_ref()
                .is_some_and(|ip| addresses.contains(ip))
        });
        for instance in matching {
            self.store
                .update_instance_status(stack.id, instance.private_id, status)
                .await?;
        }
        Ok(())
    }

    /// Shared tail of the cluster failure handlers: the cluster takes
    /// `status`, the stack stays available and `code` is fired with the
    /// reason. Cancellations are only logged.
    async fn record_failure(
        &self,
        failure: &FailureContext,
        status: Status,
        code: MessageCode,
    ) -> anyhow::Result<()> {
        if failure.error.is_cancellation() {
            warn!(
                stack_id = %failure.stack_id,
                transition = %failure.transition,
                "cluster operation cancelled"
            );
            return Ok(());
        }

        let reason = failure.error.message().to_string();
        update_statuses(
            self.store.as_ref(),
            failure.stack_id,
            Status::Available,
            status,
            Some(&reason),
        )
        .await?;
        self.events
            .fire_status(failure.stack_id, status, code, &[reason])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterFacade for DefaultClusterFacade {
    async fn run_cluster_containers(&self, context: FlowContext) -> FacadeResult {
        let provisioning = context.provisioning()?;
        let stack = self.store.get_stack(provisioning.stack_id).await?;
        let gateway = gateway_config(&stack)?;

        let mut cluster = cluster_of(&stack)?.clone();
        cluster.management_ip = Some(gateway.public_ip.clone());
        cluster.status = Status::CreateInProgress;
        self.store.save_cluster(stack.id, &cluster).await?;

        let nodes = stack.running_instances().count();
        self.events
            .fire_status(
                stack.id,
                Status::CreateInProgress,
                MessageCode::ClusterContainersStarted,
                &[nodes.to_string()],
            )
            .await?;
        info!(stack_id = %stack.id, management_ip = %gateway.public_ip, "cluster containers running");
        Ok(provisioning.into())
    }

    async fn start_management_server(&self, context: FlowContext) -> FacadeResult {
        let provisioning = context.provisioning()?;
        let stack = self.store.get_stack(provisioning.stack_id).await?;
        let address = self.wait_for_management_server(&stack).await?;
        self.events
            .fire_status(
                stack.id,
                Status::CreateInProgress,
                MessageCode::ClusterManagementServerStarted,
                &[address],
            )
            .await?;
        Ok(provisioning.into())
    }

    async fn build_cluster(&self, context: FlowContext) -> FacadeResult {
        let provisioning = context.provisioning()?;
        let stack = self.store.get_stack(provisioning.stack_id).await?;
        self.set_cluster_status(stack.id, Status::CreateInProgress, MessageCode::ClusterBuilding, &[])
            .await?;

        self.cluster_manager.build_cluster(&stack).await?;

        for instance in stack.running_instances() {
            self.store
                .update_instance_status(stack.id, instance.private_id, InstanceStatus::Registered)
                .await?;
        }
        self.set_cluster_status(stack.id, Status::Available, MessageCode::ClusterBuilt, &[])
            .await?;
        self.store
            .update_stack_status(stack.id, Status::Available, None)
            .await?;
        Ok(provisioning.into())
    }

    async fn reset_cluster(&self, context: FlowContext) -> FacadeResult {
        let provisioning = context.provisioning()?;
        let stack = self.store.get_stack(provisioning.stack_id).await?;
        cluster_of(&stack)?;

        self.cluster_manager.reset_cluster(&stack).await?;
        for instance in stack.running_instances() {
            self.store
                .update_instance_status(stack.id, instance.private_id, InstanceStatus::Unregistered)
                .await?;
        }
        self.set_cluster_status(stack.id, Status::UpdateInProgress, MessageCode::ClusterReset, &[])
            .await?;
        Ok(provisioning.into())
    }

    async fn start_requested(&self, context: FlowContext) -> FacadeResult {
        let update = context.stack_status_update()?;
        self.set_cluster_status(
            update.stack_id,
            Status::StartRequested,
            MessageCode::ClusterStartRequested,
            &[],
        )
        .await?;
        Ok(update.into())
    }

    async fn start(&self, context: FlowContext) -> FacadeResult {
        let update = context.stack_status_update()?;
        let stack = self.store.get_stack(update.stack_id).await?;
        self.set_cluster_status(stack.id, Status::StartInProgress, MessageCode::ClusterStarting, &[])
            .await?;

        self.wait_for_management_server(&stack).await?;
        self.cluster_manager.start_services(&stack).await?;

        self.set_cluster_status(stack.id, Status::Available, MessageCode::ClusterStarted, &[])
            .await?;
        self.store
            .update_stack_status(stack.id, Status::Available, None)
            .await?;
        Ok(update.into())
    }

    async fn stop(&self, context: FlowContext) -> FacadeResult {
        let update = context.stack_status_update()?;
        let stack = self.store.get_stack(update.stack_id).await?;
        self.set_cluster_status(stack.id, Status::StopInProgress, MessageCode::ClusterStopping, &[])
            .await?;

        self.cluster_manager.stop_services(&stack).await?;

        self.set_cluster_status(stack.id, Status::Stopped, MessageCode::ClusterStopped, &[])
            .await?;
        Ok(update.into())
    }

    async fn add_cluster_containers(&self, context: FlowContext) -> FacadeResult {
        let scaling = context.cluster_scaling()?;
        let stack = self.store.get_stack(scaling.stack_id).await?;
        cluster_of(&stack)?;

        self.set_instance_status(
            &stack,
            &scaling.upscale_candidate_addresses,
            InstanceStatus::Unregistered,
        )
        .await?;
        self.events
            .fire_status(
                stack.id,
                Status::UpdateInProgress,
                MessageCode::ClusterContainersStarted,
                &[scaling.upscale_candidate_addresses.len().to_string()],
            )
            .await?;
        Ok(scaling.into())
    }

    async fn upscale(&self, context: FlowContext) -> FacadeResult {
        let scaling = context.cluster_scaling()?;
        let stack = self.store.get_stack(scaling.stack_id).await?;
        let args = [scaling.adjustment.to_string(), scaling.group_name.clone()];
        self.set_cluster_status(stack.id, Status::UpdateInProgress, MessageCode::ClusterScaling, &args)
            .await?;

        self.cluster_manager
            .add_hosts(&stack, &scaling.group_name, &scaling.upscale_candidate_addresses)
            .await?;
        self.set_instance_status(
            &stack,
            &scaling.upscale_candidate_addresses,
            InstanceStatus::Registered,
        )
        .await?;

        self.set_cluster_status(stack.id, Status::Available, MessageCode::ClusterScaled, &args)
            .await?;
        self.store
            .update_stack_status(stack.id, Status::Available, None)
            .await?;
        Ok(scaling.into())
    }

    async fn downscale(&self, context: FlowContext) -> FacadeResult {
        let scaling = context.cluster_scaling()?;
        let count = scaling
            .adjustment
            .checked_neg()
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0)
            .with_context(|| {
                format!("downscale needs a negative adjustment, got {}", scaling.adjustment)
            })?;

        let stack = self.store.get_stack(scaling.stack_id).await?;
        let args = [scaling.adjustment.to_string(), scaling.group_name.clone()];
        self.set_cluster_status(stack.id, Status::UpdateInProgress, MessageCode::ClusterScaling, &args)
            .await?;

        let addresses = self
            .cluster_manager
            .decommission_hosts(&stack, &scaling.group_name, count)
            .await?;
        self.set_instance_status(&stack, &addresses, InstanceStatus::Decommissioned)
            .await?;
        self.set_cluster_status(stack.id, Status::Available, MessageCode::ClusterScaled, &args)
            .await?;

        let mut next = StackScalingContext::new(
            scaling.stack_id,
            scaling.platform,
            scaling.group_name,
            scaling.adjustment,
        );
        next.scaling_addresses = addresses;
        Ok(next.into())
    }

    async fn enable_security(&self, context: FlowContext) -> FacadeResult {
        let stack = self.store.get_stack(context.stack_id()).await?;
        cluster_of(&stack)?;
        self.cluster_manager.enable_security(&stack).await?;
        self.events
            .fire_status(
                stack.id,
                Status::Available,
                MessageCode::ClusterSecurityEnabled,
                &[],
            )
            .await?;
        Ok(context)
    }

    async fn change_credential(&self, context: FlowContext) -> FacadeResult {
        let credential = context.cluster_credential()?;
        let stack = self.store.get_stack(credential.stack_id).await?;
        let mut cluster = cluster_of(&stack)?.clone();

        self.cluster_manager
            .change_credential(&stack, &credential.user_name, &credential.password)
            .await?;

        cluster.user_name = credential.user_name.clone();
        self.store.save_cluster(stack.id, &cluster).await?;
        self.events
            .fire_status(
                stack.id,
                cluster.status,
                MessageCode::ClusterCredentialChanged,
                &[credential.user_name.clone()],
            )
            .await?;
        Ok(credential.into())
    }

    async fn sync(&self, context: FlowContext) -> FacadeResult {
        let stack = self.store.get_stack(context.stack_id()).await?;
        let Some(cluster) = &stack.cluster else {
            return Ok(context);
        };

        let health = if stack.status == Status::Stopped {
            Status::Stopped
        } else {
            self.cluster_manager.cluster_health(&stack).await?
        };
        if health != cluster.status {
            self.store
                .update_cluster_status(stack.id, health, None)
                .await?;
        }
        self.events
            .fire_status(
                stack.id,
                health,
                MessageCode::ClusterSynced,
                &[health.to_string()],
            )
            .await?;
        Ok(context)
    }

    async fn handle_creation_failure(&self, context: FlowContext) -> FacadeResult {
        let failure = context.failure()?;
        if failure.error.is_cancellation() {
            warn!(stack_id = %failure.stack_id, transition = %failure.transition, "cluster creation cancelled");
            return Ok(failure.into());
        }

        let stack = self.store.get_stack(failure.stack_id).await?;
        let mut reason = failure.error.message().to_string();
        if stack.on_failure_action == OnFailureAction::Rollback {
            info!(stack_id = %stack.id, "rolling back cluster containers");
            if let Err(e) = self.orchestrator.rollback(&stack, &stack.resources).await {
                warn!(stack_id = %stack.id, error = %e, "container rollback failed");
                reason = format!("{reason}; rollback failed: {e}");
            }
        }

        update_statuses(
            self.store.as_ref(),
            stack.id,
            Status::Available,
            Status::CreateFailed,
            Some(&reason),
        )
        .await?;
        self.events
            .fire_status(
                stack.id,
                Status::CreateFailed,
                MessageCode::ClusterCreateFailed,
                &[reason],
            )
            .await?;
        Ok(failure.into())
    }

    async fn handle_start_failure(&self, context: FlowContext) -> FacadeResult {
        let failure = context.failure()?;
        self.record_failure(&failure, Status::StartFailed, MessageCode::ClusterStartFailed)
            .await?;
        Ok(failure.into())
    }

    async fn handle_stop_failure(&self, context: FlowContext) -> FacadeResult {
        let failure = context.failure()?;
        self.record_failure(&failure, Status::StopFailed, MessageCode::ClusterStopFailed)
            .await?;
        Ok(failure.into())
    }

    async fn handle_scaling_failure(&self, context: FlowContext) -> FacadeResult {
        let failure = context.failure()?;
        self.record_failure(&failure, Status::UpdateFailed, MessageCode::ClusterScalingFailed)
            .await?;
        Ok(failure.into())
    }

    async fn handle_security_enable_failure(&self, context: FlowContext) -> FacadeResult {
        let failure = context.failure()?;
        self.record_failure(
            &failure,
            Status::EnableSecurityFailed,
            MessageCode::ClusterSecurityFailed,
        )
        .await?;
        Ok(failure.into())
    }
}
