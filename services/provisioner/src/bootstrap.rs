//! Container bootstrap of a provisioned stack.
//!
//! `ClusterBootstrapper` turns the running instances of a stack into a
//! container-orchestrated cluster and brings up the runtime containers in a
//! fixed order: registrator, management server (with its database),
//! management agents, watch daemons. Each step must succeed before the next
//! one starts; the first failure aborts the bootstrap.

use std::collections::BTreeSet;
use std::sync::Arc;

use stackflow_id::{PrivateId, StackId};
use stackflow_reconcile::{Cancelled, PollError, PollTimeout, PollingService};
use thiserror::Error;
use tracing::{debug, info};

use crate::context::{ClusterScalingContext, ProvisioningContext};
use crate::domain::{InstanceMetaData, Stack};
use crate::orchestrator::{
    ContainerImages, ContainerOrchestrator, GatewayConfig, Node, OrchestratorCluster,
    OrchestratorError,
};
use crate::polling::{
    BootstrapApiCheckerTask, BootstrapApiContext, CheckError, ClusterAvailabilityCheckerTask,
    ClusterAvailabilityContext, PollSettings,
};
use crate::store::{StackStore, StoreError};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("container orchestration failed: {0}")]
    Orchestration(#[from] OrchestratorError),

    #[error("bootstrap timed out: {0}")]
    Timeout(#[source] PollTimeout),

    #[error("bootstrap aborted: {0}")]
    Cancelled(#[source] Cancelled),

    #[error("bootstrap check failed: {0}")]
    Check(#[source] CheckError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("stack {0} has no running gateway instance")]
    MissingGateway(StackId),

    #[error("instance {private_id} has no {field}")]
    IncompleteMetadata {
        private_id: PrivateId,
        field: &'static str,
    },
}

impl From<Cancelled> for BootstrapError {
    fn from(cancelled: Cancelled) -> Self {
        BootstrapError::Cancelled(cancelled)
    }
}

impl From<PollError<CheckError>> for BootstrapError {
    fn from(err: PollError<CheckError>) -> Self {
        match err {
            PollError::Timeout(timeout) => BootstrapError::Timeout(timeout),
            PollError::Check { source, .. } => match source {
                CheckError::Orchestrator(e) => BootstrapError::Orchestration(e),
                CheckError::Store(e) => BootstrapError::Store(e),
                other => BootstrapError::Check(other),
            },
        }
    }
}

fn required<'a>(
    instance: &'a InstanceMetaData,
    value: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, BootstrapError> {
    value
        .as_deref()
        .ok_or(BootstrapError::IncompleteMetadata {
            private_id: instance.private_id,
            field,
        })
}

/// Builds the node set from the running instances of `stack` accepted by
/// `include`. Each node gets one data volume path per volume of its group's
/// template.
pub fn build_nodes(
    stack: &Stack,
    include: impl Fn(&InstanceMetaData) -> bool,
) -> Result<BTreeSet<Node>, BootstrapError> {
    let mut nodes = BTreeSet::new();
    for group in &stack.instance_groups {
        for instance in group.running_instances().filter(|i| include(i)) {
            let private_ip = required(instance, &instance.private_ip, "private address")?;
            let public_ip = required(instance, &instance.public_ip, "public address")?;
            let hostname = instance
                .short_hostname()
                .ok_or(BootstrapError::IncompleteMetadata {
                    private_id: instance.private_id,
                    field: "host name",
                })?;
            nodes.insert(Node::new(
                private_ip,
                public_ip,
                hostname,
                group.template.volume_count,
            ));
        }
    }
    Ok(nodes)
}

/// Control endpoint: the first running instance of the gateway group.
pub fn gateway_config(stack: &Stack) -> Result<GatewayConfig, BootstrapError> {
    let instance = stack
        .gateway_group()
        .and_then(|g| g.running_instances().next())
        .ok_or(BootstrapError::MissingGateway(stack.id))?;

    Ok(GatewayConfig {
        public_ip: required(instance, &instance.public_ip, "public address")?.to_string(),
        private_ip: required(instance, &instance.private_ip, "private address")?.to_string(),
    })
}

pub struct ClusterBootstrapper {
    store: Arc<dyn StackStore>,
    orchestrator: Arc<dyn ContainerOrchestrator>,
    images: ContainerImages,
    polling: PollingService,
    settings: PollSettings,
}

impl ClusterBootstrapper {
    pub fn new(
        store: Arc<dyn StackStore>,
        orchestrator: Arc<dyn ContainerOrchestrator>,
        images: ContainerImages,
        settings: PollSettings,
    ) -> Self {
        Self {
            store,
            orchestrator,
            images,
            polling: PollingService::new(),
            settings,
        }
    }

    /// Bootstraps every running instance of the stack and starts the runtime
    /// containers on them.
    pub async fn bootstrap_cluster(
        &self,
        context: &ProvisioningContext,
    ) -> Result<OrchestratorCluster, BootstrapError> {
        let stack = self.store.get_stack(context.stack_id).await?;
        let gateway = gateway_config(&stack)?;
        let nodes = build_nodes(&stack, |_| true)?;
        info!(
            stack_id = %stack.id,
            gateway = %gateway.public_ip,
            nodes = nodes.len(),
            "bootstrapping cluster"
        );

        let api_task = BootstrapApiCheckerTask::new(self.store.clone());
        self.polling
            .poll_with_timeout(
                &api_task,
                &BootstrapApiContext {
                    stack_id: stack.id,
                    gateway: gateway.clone(),
                    orchestrator: self.orchestrator.clone(),
                },
                self.settings.interval,
                self.settings.max_attempts,
            )
            .await?
            .into_cancellation(format!("bootstrap of stack {}", stack.id))?;

        let cluster = self
            .orchestrator
            .bootstrap(&gateway, &nodes, stack.consul_servers)
            .await?;
        self.wait_for_cluster(stack.id, &cluster).await?;

        let images = &self.images;
        let node_count = cluster.nodes.len();

        self.orchestrator
            .start_registrator(&cluster, &images.registrator)
            .await?;
        debug!(stack_id = %stack.id, "registrator started");

        self.orchestrator
            .start_management_server(
                &cluster,
                &images.management_db,
                &images.management,
                context.platform,
            )
            .await?;
        debug!(stack_id = %stack.id, "management server started");

        // The gateway node runs the server, not an agent.
        self.orchestrator
            .start_management_agents(
                &cluster,
                &images.management,
                node_count.saturating_sub(1),
                context.platform,
            )
            .await?;
        debug!(stack_id = %stack.id, agents = node_count.saturating_sub(1), "agents started");

        self.orchestrator
            .start_watch_services(&cluster, &images.watch, node_count)
            .await?;

        info!(stack_id = %stack.id, nodes = node_count, "cluster bootstrapped");
        Ok(cluster)
    }

    /// Adds the instances whose private address is an upscale candidate to
    /// the running cluster and extends agents and watch daemons to them.
    pub async fn bootstrap_new_nodes(
        &self,
        context: &ClusterScalingContext,
    ) -> Result<OrchestratorCluster, BootstrapError> {
        let stack = self.store.get_stack(context.stack_id).await?;
        let gateway = gateway_config(&stack)?;
        let candidates = &context.upscale_candidate_addresses;
        let nodes = build_nodes(&stack, |instance| {
            instance
                .private_ip
                .as_ref()
                .is_some_and(|ip| candidates.contains(ip))
        })?;
        info!(
            stack_id = %stack.id,
            group = %context.group_name,
            nodes = nodes.len(),
            "bootstrapping new nodes"
        );

        let cluster = self
            .orchestrator
            .bootstrap_new_nodes(&gateway, &nodes)
            .await?;
        self.wait_for_cluster(stack.id, &cluster).await?;

        let node_count = cluster.nodes.len();
        self.orchestrator
            .start_management_agents(
                &cluster,
                &self.images.management,
                node_count,
                context.platform,
            )
            .await?;
        self.orchestrator
            .start_watch_services(&cluster, &self.images.watch, node_count)
            .await?;

        Ok(cluster)
    }

    async fn wait_for_cluster(
        &self,
        stack_id: StackId,
        cluster: &OrchestratorCluster,
    ) -> Result<(), BootstrapError> {
        let task = ClusterAvailabilityCheckerTask::new(self.store.clone());
        self.polling
            .poll_with_timeout(
                &task,
                &ClusterAvailabilityContext {
                    stack_id,
                    cluster: cluster.clone(),
                    orchestrator: self.orchestrator.clone(),
                },
                self.settings.interval,
                self.settings.max_attempts,
            )
            .await?
            .into_cancellation(format!("cluster availability of stack {stack_id}"))?;
        Ok(())
    }
}
