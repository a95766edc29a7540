//! Infrastructure creation and its reconciliation.
//!
//! Instance requests are recorded before the cloud is asked for anything, so
//! that the per-instance results coming back can be matched against them.
//! When only some instances of a group fail, the failed requests are dropped
//! and the group shrinks instead of the whole flow failing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use stackflow_events::{BillingStatus, MessageCode, Status};
use stackflow_id::PrivateId;
use stackflow_reconcile::{collect_group_failures, PollingService};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::cloud::{
    request_channel, CloudConnector, CloudContext, CloudError, CloudPayload, CloudRequest,
    CloudResourceStatus, CloudStack, ConnectorRequest, LaunchStack, LaunchStackResult,
    UpscaleStack, UpscaleStackResult,
};
use crate::context::{FailureContext, ProvisioningContext};
use crate::domain::{OnFailureAction, Stack};
use crate::error::OperationError;
use crate::events::EventService;
use crate::polling::{poll_failure, ImageCheckContext, ImageCheckerTask, PollSettings};
use crate::store::{StackStore, StoreError};

/// Which infrastructure operation a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfrastructureAction {
    Create,
    Upscale,
}

impl InfrastructureAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfrastructureAction::Create => "create",
            InfrastructureAction::Upscale => "upscale",
        }
    }
}

/// Rejects results that mean the whole operation failed.
///
/// An upstream error is always fatal. So is a single result that is failed
/// or deleted: with one instance there is no partial success to keep.
pub fn validate_results(
    action: InfrastructureAction,
    context: &CloudContext,
    error: Option<&CloudError>,
    results: &[CloudResourceStatus],
) -> Result<(), OperationError> {
    if let Some(error) = error {
        return Err(OperationError::Upstream {
            action: action.as_str(),
            context: context.to_string(),
            source: error.clone(),
        });
    }

    if let [single] = results {
        if single.is_failed() || single.is_deleted() {
            return Err(OperationError::Validation {
                action: action.as_str(),
                context: context.to_string(),
                reason: single.reason().to_string(),
            });
        }
    }
    Ok(())
}

pub struct StackCreationService {
    store: Arc<dyn StackStore>,
    connector: Arc<dyn CloudConnector>,
    events: EventService,
    polling: PollingService,
    settings: PollSettings,
    request_timeout: Duration,
}

impl StackCreationService {
    pub fn new(
        store: Arc<dyn StackStore>,
        connector: Arc<dyn CloudConnector>,
        events: EventService,
        settings: PollSettings,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            connector,
            events,
            polling: PollingService::new(),
            settings,
            request_timeout,
        }
    }

    /// Marks the stack as being created and records one pending request per
    /// instance still missing from each group.
    pub async fn start_provisioning(
        &self,
        context: &ProvisioningContext,
    ) -> Result<Instant, StoreError> {
        let started_at = Instant::now();
        let stack = self.store.get_stack(context.stack_id).await?;

        let message = self.events.message(MessageCode::StackProvisioning, &[]);
        self.store
            .update_stack_status(stack.id, Status::CreateInProgress, Some(&message))
            .await?;
        self.events
            .fire_status(
                stack.id,
                Status::CreateInProgress,
                MessageCode::StackProvisioning,
                &[],
            )
            .await?;

        for group in &stack.instance_groups {
            let missing = group.node_count.saturating_sub(group.instances.len() as u32);
            if missing > 0 {
                self.store
                    .save_instance_requests(stack.id, &group.name, missing)
                    .await?;
            }
        }

        info!(stack_id = %stack.id, nodes = stack.full_node_count(), "provisioning started");
        Ok(started_at)
    }

    /// Waits until the stack image is usable in the target region, reporting
    /// copy progress along the way.
    pub async fn check_image(&self, stack: &Stack) -> anyhow::Result<()> {
        let task = ImageCheckerTask::new(self.store.clone(), self.events.clone());
        let context = ImageCheckContext {
            stack_id: stack.id,
            cloud_context: CloudContext::from(stack),
            image: stack.image.clone(),
            connector: self.connector.clone(),
            request_timeout: self.request_timeout,
        };

        self.polling
            .poll_with_timeout(&task, &context, self.settings.interval, self.settings.max_attempts)
            .await
            .map_err(poll_failure)?
            .into_cancellation(format!("image check of stack {}", stack.id))?;
        Ok(())
    }

    /// Asks the cloud for every pending instance of the stack.
    pub async fn launch(&self, stack: &Stack) -> Result<LaunchStackResult, OperationError> {
        let payload = LaunchStack {
            stack: CloudStack::requested(stack),
        };
        self.send(stack, payload).await
    }

    /// Asks the cloud for the pending instances of one group.
    pub async fn upscale(
        &self,
        stack: &Stack,
        group: &str,
    ) -> Result<UpscaleStackResult, OperationError> {
        let payload = UpscaleStack {
            stack: CloudStack::requested_in_group(stack, group),
        };
        self.send(stack, payload).await
    }

    async fn send<P>(&self, stack: &Stack, payload: P) -> Result<P::Output, OperationError>
    where
        P: CloudPayload,
        CloudRequest<P>: Into<ConnectorRequest>,
    {
        let (request, pending) = request_channel(CloudContext::from(stack), payload);
        let selector = request.selector();
        info!(stack_id = %stack.id, selector, request_id = %pending.id(), "cloud request sent");

        self.connector
            .notify(request.into())
            .map_err(|source| OperationError::Notify { selector, source })?;
        Ok(pending.wait(self.request_timeout).await?)
    }

    /// Validates and reconciles the result of the initial launch.
    pub async fn provisioning_finished(
        &self,
        context: &ProvisioningContext,
        result: &LaunchStackResult,
        started_at: Instant,
    ) -> anyhow::Result<()> {
        let stack = self.store.get_stack(context.stack_id).await?;
        self.store.save_resources(stack.id, &result.resources).await?;

        validate_results(
            InfrastructureAction::Create,
            &CloudContext::from(&stack),
            result.error.as_ref(),
            &result.results,
        )?;
        self.update_node_count(&stack, &result.results, InfrastructureAction::Create)
            .await?;

        let elapsed = started_at.elapsed().as_secs();
        self.events
            .fire_status(
                stack.id,
                Status::UpdateInProgress,
                MessageCode::StackInfrastructureTime,
                &[elapsed.to_string()],
            )
            .await?;
        info!(stack_id = %stack.id, elapsed_secs = elapsed, "infrastructure created");
        Ok(())
    }

    /// Validates and reconciles the result of an upscale. Returns the private
    /// ids of the instances that were created.
    pub async fn upscale_finished(
        &self,
        stack: &Stack,
        result: &UpscaleStackResult,
    ) -> anyhow::Result<Vec<PrivateId>> {
        self.store.save_resources(stack.id, &result.resources).await?;
        validate_results(
            InfrastructureAction::Upscale,
            &CloudContext::from(stack),
            result.error.as_ref(),
            &result.results,
        )?;
        let failed = self
            .update_node_count(stack, &result.results, InfrastructureAction::Upscale)
            .await?;

        Ok(result
            .results
            .iter()
            .filter(|r| !r.is_failed() && !r.is_deleted())
            .filter_map(|r| r.private_id)
            .filter(|id| !failed.contains(id))
            .collect())
    }

    /// Drops the request of every failed instance, group by group. On create
    /// the group's node count shrinks by its failure count. Returns the
    /// private ids whose requests were dropped.
    pub async fn update_node_count(
        &self,
        stack: &Stack,
        results: &[CloudResourceStatus],
        action: InfrastructureAction,
    ) -> Result<HashSet<PrivateId>, StoreError> {
        let mut dropped = HashSet::new();

        for group in &stack.instance_groups {
            let expected: HashSet<Option<PrivateId>> =
                group.instances.iter().map(|i| Some(i.private_id)).collect();
            let failures = collect_group_failures(
                results,
                &expected,
                |r: &CloudResourceStatus| r.private_id,
                CloudResourceStatus::is_failed,
            );
            let Some(first) = failures.first() else {
                continue;
            };

            for failure in &failures {
                if let Some(private_id) = failure.private_id {
                    self.store.delete_instance_request(stack.id, private_id).await?;
                    dropped.insert(private_id);
                }
            }

            warn!(
                stack_id = %stack.id,
                group = %group.name,
                failed = failures.len(),
                reason = first.reason(),
                "instances failed"
            );

            if action == InfrastructureAction::Create {
                let failed = failures.len() as u32;
                self.store
                    .set_node_count(stack.id, &group.name, group.node_count.saturating_sub(failed))
                    .await?;
                self.events
                    .fire_status(
                        stack.id,
                        Status::UpdateInProgress,
                        MessageCode::StackInfrastructureRollbackMessage,
                        &[
                            failed.to_string(),
                            group.name.clone(),
                            first.reason().to_string(),
                        ],
                    )
                    .await?;
            }
        }

        Ok(dropped)
    }

    /// Moves a stack whose creation failed into its terminal state.
    ///
    /// Cancellations are ignored. A stack already being deleted keeps its
    /// status. Under the rollback policy the tracked resources are removed
    /// first; if that fails the stack records the rollback failure instead of
    /// the original reason.
    pub async fn handle_stack_creation_failure(
        &self,
        context: &FailureContext,
    ) -> anyhow::Result<()> {
        if context.error.is_cancellation() {
            warn!(
                stack_id = %context.stack_id,
                transition = context.transition.name(),
                "stack creation cancelled"
            );
            return Ok(());
        }

        let stack = self.store.get_stack(context.stack_id).await?;
        let reason = context.error.message();
        self.events
            .fire_status(
                stack.id,
                Status::UpdateInProgress,
                MessageCode::StackInfrastructureCreateFailed,
                &[reason.to_string()],
            )
            .await?;

        if stack.is_in_deletion_phase() {
            info!(stack_id = %stack.id, status = %stack.status, "stack is being deleted, keeping status");
            return Ok(());
        }

        match self.apply_failure_policy(&stack, reason).await {
            Ok(()) => {
                self.store
                    .update_stack_status(stack.id, Status::CreateFailed, Some(reason))
                    .await?;
                self.events
                    .fire_status(
                        stack.id,
                        Status::CreateFailed,
                        MessageCode::StackInfrastructureCreateFailed,
                        &[reason.to_string()],
                    )
                    .await?;
            }
            Err(e) => {
                warn!(stack_id = %stack.id, error = %e, "rollback failed");
                let message = format!("Rollback failed: {e}");
                self.store
                    .update_stack_status(stack.id, Status::CreateFailed, Some(&message))
                    .await?;
                self.events
                    .fire_status(
                        stack.id,
                        Status::CreateFailed,
                        MessageCode::StackInfrastructureRollbackFailed,
                        &[e.to_string()],
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn apply_failure_policy(&self, stack: &Stack, reason: &str) -> anyhow::Result<()> {
        if stack.on_failure_action != OnFailureAction::Rollback {
            return Ok(());
        }

        info!(stack_id = %stack.id, resources = stack.resources.len(), "rolling back infrastructure");
        self.store
            .update_stack_status(stack.id, Status::UpdateInProgress, None)
            .await?;
        self.connector.rollback(stack, &stack.resources).await?;
        self.events
            .fire_billing(
                stack.id,
                BillingStatus::BillingStopped,
                MessageCode::StackInfrastructureCreateFailed,
                &[reason.to_string()],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{MockCloudConnector, ResourceStatus};
    use crate::domain::{InstanceGroup, Template};
    use crate::events::InMemoryEventSink;
    use crate::store::InMemoryStackStore;
    use stackflow_events::CloudPlatform;
    use stackflow_id::StackId;

    fn context() -> CloudContext {
        CloudContext {
            stack_id: StackId::new(),
            name: "analytics".to_string(),
            platform: CloudPlatform::Aws,
            region: "eu-west-1".to_string(),
            owner: "o".to_string(),
        }
    }

    #[test]
    fn test_upstream_error_is_fatal() {
        let err = validate_results(
            InfrastructureAction::Create,
            &context(),
            Some(&CloudError::Provider("quota".to_string())),
            &[CloudResourceStatus::created(PrivateId::new(1))],
        )
        .unwrap_err();
        assert!(matches!(err, OperationError::Upstream { action: "create", .. }));
    }

    #[test]
    fn test_single_failed_or_deleted_result_is_fatal() {
        let failed = validate_results(
            InfrastructureAction::Upscale,
            &context(),
            None,
            &[CloudResourceStatus::failed(PrivateId::new(1), "no capacity")],
        )
        .unwrap_err();
        assert!(failed.to_string().starts_with("Failed to upscale the stack"));
        assert!(failed.to_string().ends_with("due to: no capacity"));

        let deleted = CloudResourceStatus {
            private_id: Some(PrivateId::new(1)),
            status: ResourceStatus::Deleted,
            status_reason: None,
        };
        assert!(validate_results(InfrastructureAction::Create, &context(), None, &[deleted]).is_err());
    }

    #[test]
    fn test_partial_failure_passes_validation() {
        let results = [
            CloudResourceStatus::created(PrivateId::new(1)),
            CloudResourceStatus::failed(PrivateId::new(2), "no capacity"),
        ];
        assert!(validate_results(InfrastructureAction::Create, &context(), None, &results).is_ok());
    }

    #[tokio::test]
    async fn test_failed_instances_shrink_their_group_once() {
        let store = Arc::new(InMemoryStackStore::new());
        let sink = Arc::new(InMemoryEventSink::new());
        let stack = Stack::builder("analytics", CloudPlatform::Aws)
            .group(InstanceGroup::gateway("cbgateway", 1, Template::new("m5.large", 1)))
            .group(InstanceGroup::core("slave_1", 5, Template::new("m5.large", 2)))
            .build();
        store.insert_stack(&stack).await.unwrap();

        let service = StackCreationService::new(
            store.clone(),
            Arc::new(MockCloudConnector::new()),
            EventService::with_default_messages(sink.clone()),
            PollSettings::default(),
            Duration::from_secs(1),
        );
        service
            .start_provisioning(&ProvisioningContext::new(stack.id, stack.platform))
            .await
            .unwrap();
        let stack = store.get_stack(stack.id).await.unwrap();

        // Gateway is id 0, the core group holds 1..=5. Id 2 fails twice.
        let results = vec![
            CloudResourceStatus::created(PrivateId::new(0)),
            CloudResourceStatus::created(PrivateId::new(1)),
            CloudResourceStatus::failed(PrivateId::new(2), "no capacity"),
            CloudResourceStatus::failed(PrivateId::new(2), "no capacity again"),
            CloudResourceStatus::created(PrivateId::new(3)),
            CloudResourceStatus::failed(PrivateId::new(4), "no capacity"),
            CloudResourceStatus::created(PrivateId::new(5)),
        ];
        let dropped = service
            .update_node_count(&stack, &results, InfrastructureAction::Create)
            .await
            .unwrap();

        assert_eq!(dropped, [PrivateId::new(2), PrivateId::new(4)].into_iter().collect());
        let stack = store.get_stack(stack.id).await.unwrap();
        let core = stack.group("slave_1").unwrap();
        assert_eq!(core.node_count, 3);
        assert_eq!(core.instances.len(), 3);
        assert_eq!(stack.group("cbgateway").unwrap().node_count, 1);

        let shrink_events: Vec<_> = sink
            .event_pairs()
            .into_iter()
            .filter(|(_, message)| message.starts_with("Failed to create"))
            .collect();
        assert_eq!(shrink_events.len(), 1);
        assert!(shrink_events[0].1.contains("Failed to create 2 instance(s) in group slave_1"));
    }

    #[tokio::test]
    async fn test_upscale_failures_keep_node_count() {
        let store = Arc::new(InMemoryStackStore::new());
        let stack = Stack::builder("analytics", CloudPlatform::Aws)
            .group(InstanceGroup::gateway("cbgateway", 1, Template::new("m5.large", 1)))
            .group(InstanceGroup::core("slave_1", 2, Template::new("m5.large", 1)))
            .build();
        store.insert_stack(&stack).await.unwrap();
        let ids = store
            .save_instance_requests(stack.id, "slave_1", 2)
            .await
            .unwrap();
        let stack = store.get_stack(stack.id).await.unwrap();

        let service = StackCreationService::new(
            store.clone(),
            Arc::new(MockCloudConnector::new()),
            EventService::with_default_messages(Arc::new(InMemoryEventSink::new())),
            PollSettings::default(),
            Duration::from_secs(1),
        );
        let results = vec![
            CloudResourceStatus::created(ids[0]),
            CloudResourceStatus::failed(ids[1], "no capacity"),
        ];
        service
            .update_node_count(&stack, &results, InfrastructureAction::Upscale)
            .await
            .unwrap();

        let stack = store.get_stack(stack.id).await.unwrap();
        let core = stack.group("slave_1").unwrap();
        assert_eq!(core.node_count, 2);
        assert_eq!(core.instances.len(), 1);
    }
}
