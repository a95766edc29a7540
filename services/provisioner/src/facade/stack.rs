use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use stackflow_events::{BillingStatus, MessageCode, Status};
use stackflow_id::PrivateId;
use tracing::{info, warn};

use super::{FacadeResult, FacadeServices, StackFacade};
use crate::bootstrap::{gateway_config, ClusterBootstrapper};
use crate::cloud::{CloudConnector, InstanceState};
use crate::context::{ClusterScalingContext, FlowContext, StackScalingContext};
use crate::domain::{InstanceStatus, Stack};
use crate::events::EventService;
use crate::flow::Transition;
use crate::stack_creation::StackCreationService;
use crate::store::{StackStore, StoreError};

pub struct DefaultStackFacade {
    store: Arc<dyn StackStore>,
    connector: Arc<dyn CloudConnector>,
    events: EventService,
    creation: StackCreationService,
    bootstrapper: ClusterBootstrapper,
}

impl DefaultStackFacade {
    pub fn new(services: &FacadeServices) -> Self {
        Self {
            store: services.store.clone(),
            connector: services.connector.clone(),
            events: services.events.clone(),
            creation: StackCreationService::new(
                services.store.clone(),
                services.connector.clone(),
                services.events.clone(),
                services.polling,
                services.request_timeout,
            ),
            bootstrapper: ClusterBootstrapper::new(
                services.store.clone(),
                services.orchestrator.clone(),
                services.images.clone(),
                services.polling,
            ),
        }
    }

    /// Collects metadata of the requested instances accepted by `include` and
    /// stores it. Returns the private addresses of the collected instances.
    async fn collect_requested(
        &self,
        stack: &Stack,
        include: impl Fn(&str) -> bool,
    ) -> anyhow::Result<BTreeSet<String>> {
        let private_ids: Vec<PrivateId> = stack
            .instance_groups
            .iter()
            .filter(|g| include(&g.name))
            .flat_map(|g| g.requested_instances())
            .map(|i| i.private_id)
            .collect();
        if private_ids.is_empty() {
            return Ok(BTreeSet::new());
        }

        let metadata = self
            .connector
            .collect_metadata(stack, &private_ids)
            .await
            .context("collecting instance metadata")?;
        self.store.update_instance_metadata(stack.id, &metadata).await?;
        Ok(metadata.into_iter().map(|m| m.private_ip).collect())
    }

    async fn set_status(
        &self,
        stack: &Stack,
        status: Status,
        code: MessageCode,
        args: &[String],
    ) -> Result<(), StoreError> {
        let message = self.events.message(code, args);
        self.store
            .update_stack_status(stack.id, status, Some(&message))
            .await?;
        self.events.fire_status(stack.id, status, code, args).await
    }
}

#[async_trait]
impl StackFacade for DefaultStackFacade {
    async fn provision(&self, context: FlowContext) -> FacadeResult {
        let provisioning = context.provisioning()?;
        let started_at = self.creation.start_provisioning(&provisioning).await?;

        let stack = self.store.get_stack(provisioning.stack_id).await?;
        self.creation.check_image(&stack).await?;
        let result = self.creation.launch(&stack).await?;
        self.creation
            .provisioning_finished(&provisioning, &result, started_at)
            .await?;
        Ok(provisioning.into())
    }

    async fn setup_metadata(&self, context: FlowContext) -> FacadeResult {
        let provisioning = context.provisioning()?;
        let stack = self.store.get_stack(provisioning.stack_id).await?;
        let collected = self.collect_requested(&stack, |_| true).await?;
        info!(stack_id = %stack.id, instances = collected.len(), "metadata set up");

        self.store
            .update_stack_status(stack.id, Status::Available, None)
            .await?;
        self.events
            .fire_billing(
                stack.id,
                BillingStatus::BillingStarted,
                MessageCode::StackProvisioned,
                &[],
            )
            .await?;
        self.events
            .fire_status(
                stack.id,
                Status::Available,
                MessageCode::StackMetadataCollected,
                &[],
            )
            .await?;
        Ok(provisioning.into())
    }

    async fn collect_metadata(&self, context: FlowContext) -> FacadeResult {
        let stack = self.store.get_stack(context.stack_id()).await?;
        let private_ids: Vec<PrivateId> = stack
            .instances()
            .filter(|i| i.instance_id.is_some())
            .map(|i| i.private_id)
            .collect();

        let metadata = self
            .connector
            .collect_metadata(&stack, &private_ids)
            .await
            .context("collecting instance metadata")?;
        self.store.update_instance_metadata(stack.id, &metadata).await?;
        Ok(context)
    }

    async fn setup_tls(&self, context: FlowContext) -> FacadeResult {
        let provisioning = context.provisioning()?;
        let stack = self.store.get_stack(provisioning.stack_id).await?;
        let gateway = gateway_config(&stack)?;
        self.events
            .fire_status(
                stack.id,
                Status::UpdateInProgress,
                MessageCode::StackTlsSetup,
                &[gateway.public_ip],
            )
            .await?;
        Ok(provisioning.into())
    }

    async fn bootstrap_cluster(&self, context: FlowContext) -> FacadeResult {
        let provisioning = context.provisioning()?;
        let cluster = self.bootstrapper.bootstrap_cluster(&provisioning).await?;
        self.events
            .fire_status(
                provisioning.stack_id,
                Status::UpdateInProgress,
                MessageCode::StackBootstrapFinished,
                &[cluster.nodes.len().to_string()],
            )
            .await?;
        Ok(provisioning.into())
    }

    async fn start(&self, context: FlowContext) -> FacadeResult {
        let update = context.stack_status_update()?;
        let stack = self.store.get_stack(update.stack_id).await?;
        self.set_status(&stack, Status::StartInProgress, MessageCode::StackStarting, &[])
            .await?;

        self.connector.start_instances(&stack).await?;

        self.set_status(&stack, Status::Available, MessageCode::StackStarted, &[])
            .await?;
        Ok(update.into())
    }

    async fn stop_requested(&self, context: FlowContext) -> FacadeResult {
        let update = context.stack_status_update()?;
        let stack = self.store.get_stack(update.stack_id).await?;
        self.set_status(
            &stack,
            Status::StopRequested,
            MessageCode::StackStopRequested,
            &[],
        )
        .await?;
        Ok(update.into())
    }

    async fn stop(&self, context: FlowContext) -> FacadeResult {
        let update = context.stack_status_update()?;
        let stack = self.store.get_stack(update.stack_id).await?;
        self.set_status(&stack, Status::StopInProgress, MessageCode::StackStopping, &[])
            .await?;

        self.connector.stop_instances(&stack).await?;

        self.set_status(&stack, Status::Stopped, MessageCode::StackStopped, &[])
            .await?;
        Ok(update.into())
    }

    async fn upscale(&self, context: FlowContext) -> FacadeResult {
        let scaling = context.stack_scaling()?;
        let count = u32::try_from(scaling.adjustment)
            .ok()
            .filter(|n| *n > 0)
            .with_context(|| format!("upscale needs a positive adjustment, got {}", scaling.adjustment))?;

        let stack = self.store.get_stack(scaling.stack_id).await?;
        let group = stack.group(&scaling.group_name).ok_or_else(|| StoreError::GroupNotFound {
            stack_id: stack.id,
            group: scaling.group_name.clone(),
        })?;
        let node_count = group.node_count;
        let args = [count.to_string(), scaling.group_name.clone()];
        self.set_status(&stack, Status::UpdateInProgress, MessageCode::StackUpscaling, &args)
            .await?;

        self.store
            .save_instance_requests(stack.id, &scaling.group_name, count)
            .await?;
        let stack = self.store.get_stack(stack.id).await?;
        let result = self.creation.upscale(&stack, &scaling.group_name).await?;
        let created = self.creation.upscale_finished(&stack, &result).await?;

        self.store
            .set_node_count(stack.id, &scaling.group_name, node_count + created.len() as u32)
            .await?;
        info!(
            stack_id = %stack.id,
            group = %scaling.group_name,
            requested = count,
            created = created.len(),
            "stack upscaled"
        );
        Ok(scaling.into())
    }

    async fn extend_metadata(&self, context: FlowContext) -> FacadeResult {
        let scaling = context.stack_scaling()?;
        let stack = self.store.get_stack(scaling.stack_id).await?;
        let addresses = self
            .collect_requested(&stack, |name| name == scaling.group_name)
            .await?;

        self.events
            .fire_status(
                stack.id,
                Status::UpdateInProgress,
                MessageCode::StackMetadataExtended,
                &[addresses.len().to_string()],
            )
            .await?;

        let mut next = ClusterScalingContext::new(
            scaling.stack_id,
            scaling.platform,
            scaling.group_name,
            scaling.adjustment,
        );
        next.upscale_candidate_addresses = addresses;
        Ok(next.into())
    }

    async fn bootstrap_new_nodes(&self, context: FlowContext) -> FacadeResult {
        let scaling = context.cluster_scaling()?;
        let cluster = self.bootstrapper.bootstrap_new_nodes(&scaling).await?;
        self.events
            .fire_status(
                scaling.stack_id,
                Status::UpdateInProgress,
                MessageCode::StackBootstrapNewNodes,
                &[cluster.nodes.len().to_string()],
            )
            .await?;
        Ok(scaling.into())
    }

    async fn downscale(&self, context: FlowContext) -> FacadeResult {
        let scaling = context.stack_scaling()?;
        let stack = self.store.get_stack(scaling.stack_id).await?;
        let group = stack.group(&scaling.group_name).ok_or_else(|| StoreError::GroupNotFound {
            stack_id: stack.id,
            group: scaling.group_name.clone(),
        })?;

        let removed: Vec<_> = group
            .instances
            .iter()
            .filter(|i| {
                i.private_ip
                    .as_ref()
                    .is_some_and(|ip| scaling.scaling_addresses.contains(ip))
            })
            .collect();
        let args = [removed.len().to_string(), scaling.group_name.clone()];
        self.set_status(&stack, Status::UpdateInProgress, MessageCode::StackDownscaling, &args)
            .await?;

        let instance_ids: Vec<String> = removed.iter().filter_map(|i| i.instance_id.clone()).collect();
        let private_ids: Vec<PrivateId> = removed.iter().map(|i| i.private_id).collect();
        self.connector.remove_instances(&stack, &instance_ids).await?;
        self.store.remove_instances(stack.id, &private_ids).await?;
        self.store
            .set_node_count(
                stack.id,
                &group.name,
                group.node_count.saturating_sub(removed.len() as u32),
            )
            .await?;

        self.set_status(&stack, Status::Available, MessageCode::StackDownscaled, &args)
            .await?;
        Ok(scaling.into())
    }

    async fn remove_instance(&self, context: FlowContext) -> FacadeResult {
        let scaling = context.stack_scaling()?;
        let instance_id = scaling
            .instance_id
            .clone()
            .context("remove-instance needs an instance id")?;
        let stack = self.store.get_stack(scaling.stack_id).await?;
        let (group, instance) = stack
            .instance_groups
            .iter()
            .find_map(|g| {
                g.instances
                    .iter()
                    .find(|i| i.instance_id.as_deref() == Some(instance_id.as_str()))
                    .map(|i| (g, i))
            })
            .with_context(|| format!("instance {instance_id} not found on stack {}", stack.id))?;

        let args = ["1".to_string(), group.name.clone()];
        self.set_status(&stack, Status::UpdateInProgress, MessageCode::StackDownscaling, &args)
            .await?;
        self.connector
            .remove_instances(&stack, std::slice::from_ref(&instance_id))
            .await?;
        self.store.remove_instances(stack.id, &[instance.private_id]).await?;
        self.store
            .set_node_count(stack.id, &group.name, group.node_count.saturating_sub(1))
            .await?;
        self.set_status(&stack, Status::Available, MessageCode::StackDownscaled, &args)
            .await?;
        Ok(scaling.into())
    }

    async fn sync(&self, context: FlowContext) -> FacadeResult {
        let stack = self.store.get_stack(context.stack_id()).await?;
        let states = self.connector.instance_states(&stack).await?;

        let mut running = 0usize;
        for state in &states {
            match state.state {
                InstanceState::Running => running += 1,
                InstanceState::Stopped => {}
                InstanceState::Terminated => {
                    warn!(stack_id = %stack.id, private_id = %state.private_id, "instance terminated outside of a flow");
                    self.store
                        .update_instance_status(stack.id, state.private_id, InstanceStatus::Terminated)
                        .await?;
                }
            }
        }

        let status = if running > 0 {
            Status::Available
        } else {
            Status::Stopped
        };
        if status != stack.status {
            self.store.update_stack_status(stack.id, status, None).await?;
        }
        self.events
            .fire_status(stack.id, status, MessageCode::StackSynced, &[running.to_string()])
            .await?;
        Ok(context)
    }

    async fn handle_creation_failure(&self, context: FlowContext) -> FacadeResult {
        let failure = context.failure()?;
        self.creation.handle_stack_creation_failure(&failure).await?;
        Ok(failure.into())
    }

    async fn handle_status_update_failure(&self, context: FlowContext) -> FacadeResult {
        let failure = context.failure()?;
        if failure.error.is_cancellation() {
            warn!(stack_id = %failure.stack_id, transition = %failure.transition, "status update cancelled");
            return Ok(failure.into());
        }

        let status = match failure.transition {
            Transition::StartStack => Status::StartFailed,
            Transition::StopStack | Transition::StopStackRequested => Status::StopFailed,
            _ => Status::UpdateFailed,
        };
        let reason = failure.error.message().to_string();
        self.store
            .update_stack_status(failure.stack_id, status, Some(&reason))
            .await?;
        self.events
            .fire_status(
                failure.stack_id,
                status,
                MessageCode::StackStatusUpdateFailed,
                &[reason],
            )
            .await?;
        Ok(failure.into())
    }

    async fn handle_scaling_failure(&self, context: FlowContext) -> FacadeResult {
        let failure = context.failure()?;
        if failure.error.is_cancellation() {
            warn!(stack_id = %failure.stack_id, transition = %failure.transition, "scaling cancelled");
            return Ok(failure.into());
        }

        // Requests the failed step left behind would otherwise be launched by
        // the next upscale.
        let stack = self.store.get_stack(failure.stack_id).await?;
        for instance in stack.instances().filter(|i| i.status == InstanceStatus::Requested) {
            self.store
                .delete_instance_request(stack.id, instance.private_id)
                .await?;
        }

        let reason = failure.error.message().to_string();
        self.store
            .update_stack_status(stack.id, Status::Available, Some(&reason))
            .await?;
        self.events
            .fire_status(
                stack.id,
                Status::UpdateFailed,
                MessageCode::StackScalingFailed,
                &[reason],
            )
            .await?;
        Ok(failure.into())
    }
}
