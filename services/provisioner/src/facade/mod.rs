//! Stack-level and cluster-level operations behind the flow transitions.
//!
//! Every operation takes the incoming `FlowContext`, performs one step and
//! returns the context for the next transition. Errors are returned as
//! `anyhow::Error` and normalised by the dispatcher.

mod cluster;
mod stack;

pub use cluster::DefaultClusterFacade;
pub use stack::DefaultStackFacade;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stackflow_events::Status;
use stackflow_id::StackId;

use crate::cloud::CloudConnector;
use crate::cluster_manager::ClusterManager;
use crate::context::FlowContext;
use crate::events::EventService;
use crate::orchestrator::{ContainerImages, ContainerOrchestrator};
use crate::polling::PollSettings;
use crate::store::{StackStore, StoreError};

/// Collaborators shared by both facades.
#[derive(Clone)]
pub struct FacadeServices {
    pub store: Arc<dyn StackStore>,
    pub connector: Arc<dyn CloudConnector>,
    pub orchestrator: Arc<dyn ContainerOrchestrator>,
    pub cluster_manager: Arc<dyn ClusterManager>,
    pub events: EventService,
    pub images: ContainerImages,
    pub polling: PollSettings,
    /// Bound for one asynchronous cloud round trip.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for FacadeServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacadeServices")
            .field("orchestrator", &self.orchestrator.tool())
            .field("images", &self.images)
            .field("polling", &self.polling)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

type FacadeResult = anyhow::Result<FlowContext>;

/// Operations on the infrastructure of a stack.
#[async_trait]
pub trait StackFacade: Send + Sync {
    /// Records the instance requests, waits for the image and launches the
    /// infrastructure, then reconciles the per-instance results.
    async fn provision(&self, context: FlowContext) -> FacadeResult;

    /// Collects metadata of the new instances and makes the stack available.
    async fn setup_metadata(&self, context: FlowContext) -> FacadeResult;

    /// Refreshes the metadata of every known instance. Returns the context
    /// unchanged.
    async fn collect_metadata(&self, context: FlowContext) -> FacadeResult;

    async fn setup_tls(&self, context: FlowContext) -> FacadeResult;

    async fn bootstrap_cluster(&self, context: FlowContext) -> FacadeResult;

    async fn start(&self, context: FlowContext) -> FacadeResult;

    async fn stop_requested(&self, context: FlowContext) -> FacadeResult;

    async fn stop(&self, context: FlowContext) -> FacadeResult;

    async fn upscale(&self, context: FlowContext) -> FacadeResult;

    /// Collects metadata of the instances added by an upscale and hands their
    /// addresses to the cluster side.
    async fn extend_metadata(&self, context: FlowContext) -> FacadeResult;

    async fn bootstrap_new_nodes(&self, context: FlowContext) -> FacadeResult;

    async fn downscale(&self, context: FlowContext) -> FacadeResult;

    async fn remove_instance(&self, context: FlowContext) -> FacadeResult;

    async fn sync(&self, context: FlowContext) -> FacadeResult;

    async fn handle_creation_failure(&self, context: FlowContext) -> FacadeResult;

    async fn handle_status_update_failure(&self, context: FlowContext) -> FacadeResult;

    async fn handle_scaling_failure(&self, context: FlowContext) -> FacadeResult;
}

/// Operations on the management cluster running on a stack.
#[async_trait]
pub trait ClusterFacade: Send + Sync {
    async fn run_cluster_containers(&self, context: FlowContext) -> FacadeResult;

    async fn start_management_server(&self, context: FlowContext) -> FacadeResult;

    async fn build_cluster(&self, context: FlowContext) -> FacadeResult;

    async fn reset_cluster(&self, context: FlowContext) -> FacadeResult;

    async fn start_requested(&self, context: FlowContext) -> FacadeResult;

    async fn start(&self, context: FlowContext) -> FacadeResult;

    async fn stop(&self, context: FlowContext) -> FacadeResult;

    async fn add_cluster_containers(&self, context: FlowContext) -> FacadeResult;

    async fn upscale(&self, context: FlowContext) -> FacadeResult;

    /// Decommissions hosts and hands their addresses to the stack side.
    async fn downscale(&self, context: FlowContext) -> FacadeResult;

    async fn enable_security(&self, context: FlowContext) -> FacadeResult;

    async fn change_credential(&self, context: FlowContext) -> FacadeResult;

    async fn sync(&self, context: FlowContext) -> FacadeResult;

    async fn handle_creation_failure(&self, context: FlowContext) -> FacadeResult;

    async fn handle_start_failure(&self, context: FlowContext) -> FacadeResult;

    async fn handle_stop_failure(&self, context: FlowContext) -> FacadeResult;

    async fn handle_scaling_failure(&self, context: FlowContext) -> FacadeResult;

    async fn handle_security_enable_failure(&self, context: FlowContext) -> FacadeResult;
}

/// Sets the stack status and the status of its cluster, when it has one.
async fn update_statuses(
    store: &dyn StackStore,
    stack_id: StackId,
    stack_status: Status,
    cluster_status: Status,
    reason: Option<&str>,
) -> Result<(), StoreError> {
    store.update_stack_status(stack_id, stack_status, reason).await?;
    match store.update_cluster_status(stack_id, cluster_status, reason).await {
        Ok(()) | Err(StoreError::ClusterNotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}
