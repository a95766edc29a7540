//! Checker tasks for the conditions flows wait on.
//!
//! Every checker re-reads the stack before probing and answers `Exit` once
//! the stack's poll group is `Cancelled`, so a stack that is being deleted
//! ends the wait instead of timing it out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stackflow_events::{Notification, PollGroup};
use stackflow_id::StackId;
use stackflow_reconcile::{
    CheckerTask, PollError, PollStatus, DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL,
};
use thiserror::Error;
use tracing::debug;

use crate::cloud::{request_channel, CheckImage, CloudConnector, CloudContext, ImageStatus};
use crate::cluster_manager::{ClusterManager, ClusterManagerError};
use crate::error::OperationError;
use crate::events::EventService;
use crate::orchestrator::{
    ContainerOrchestrator, GatewayConfig, OrchestratorCluster, OrchestratorError,
};
use crate::store::{StackStore, StoreError};

/// Interval and attempt bound of a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

/// A probe failed outright.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("{0}")]
    ClusterManager(#[from] ClusterManagerError),

    #[error("{0}")]
    Operation(#[from] OperationError),
}

/// Converts a failed wait into an error whose chain exposes the timeout or
/// the underlying probe failure.
pub fn poll_failure(err: PollError<CheckError>) -> anyhow::Error {
    match err {
        PollError::Timeout(timeout) => anyhow::Error::new(timeout),
        PollError::Check { source, .. } => anyhow::Error::new(source),
    }
}

/// True when pollers waiting on `stack_id` should stop. A stack that no
/// longer exists counts as cancelled.
async fn is_cancelled(store: &dyn StackStore, stack_id: StackId) -> Result<bool, StoreError> {
    match store.get_stack(stack_id).await {
        Ok(stack) => Ok(stack.poll_group() == PollGroup::Cancelled),
        Err(StoreError::NotFound(_)) => Ok(true),
        Err(e) => Err(e),
    }
}

// =============================================================================
// Bootstrap API
// =============================================================================

pub struct BootstrapApiContext {
    pub stack_id: StackId,
    pub gateway: GatewayConfig,
    pub orchestrator: Arc<dyn ContainerOrchestrator>,
}

/// Waits for the orchestrator's bootstrap API on the gateway.
pub struct BootstrapApiCheckerTask {
    store: Arc<dyn StackStore>,
}

impl BootstrapApiCheckerTask {
    pub fn new(store: Arc<dyn StackStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CheckerTask<BootstrapApiContext> for BootstrapApiCheckerTask {
    type Error = CheckError;

    fn condition(&self, context: &BootstrapApiContext) -> String {
        format!("bootstrap API on {}", context.gateway.public_ip)
    }

    async fn call(&self, context: &BootstrapApiContext) -> Result<PollStatus, CheckError> {
        if is_cancelled(self.store.as_ref(), context.stack_id).await? {
            return Ok(PollStatus::Exit);
        }
        let available = context
            .orchestrator
            .is_bootstrap_api_available(&context.gateway)
            .await?;
        Ok(if available {
            PollStatus::Success
        } else {
            PollStatus::InProgress
        })
    }
}

// =============================================================================
// Cluster availability
// =============================================================================

pub struct ClusterAvailabilityContext {
    pub stack_id: StackId,
    pub cluster: OrchestratorCluster,
    pub orchestrator: Arc<dyn ContainerOrchestrator>,
}

/// Waits until every node of a freshly bootstrapped cluster has joined.
pub struct ClusterAvailabilityCheckerTask {
    store: Arc<dyn StackStore>,
}

impl ClusterAvailabilityCheckerTask {
    pub fn new(store: Arc<dyn StackStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CheckerTask<ClusterAvailabilityContext> for ClusterAvailabilityCheckerTask {
    type Error = CheckError;

    fn condition(&self, context: &ClusterAvailabilityContext) -> String {
        format!(
            "cluster availability ({} nodes behind {})",
            context.cluster.nodes.len(),
            context.cluster.gateway.public_ip
        )
    }

    async fn call(&self, context: &ClusterAvailabilityContext) -> Result<PollStatus, CheckError> {
        if is_cancelled(self.store.as_ref(), context.stack_id).await? {
            return Ok(PollStatus::Exit);
        }
        let available = context
            .orchestrator
            .is_cluster_available(&context.cluster)
            .await?;
        Ok(if available {
            PollStatus::Success
        } else {
            PollStatus::InProgress
        })
    }
}

// =============================================================================
// Management server
// =============================================================================

pub struct ManagementServerContext {
    pub stack_id: StackId,
    pub address: String,
    pub cluster_manager: Arc<dyn ClusterManager>,
}

pub struct ManagementServerCheckerTask {
    store: Arc<dyn StackStore>,
}

impl ManagementServerCheckerTask {
    pub fn new(store: Arc<dyn StackStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CheckerTask<ManagementServerContext> for ManagementServerCheckerTask {
    type Error = CheckError;

    fn condition(&self, context: &ManagementServerContext) -> String {
        format!("management server on {}", context.address)
    }

    async fn call(&self, context: &ManagementServerContext) -> Result<PollStatus, CheckError> {
        if is_cancelled(self.store.as_ref(), context.stack_id).await? {
            return Ok(PollStatus::Exit);
        }
        let available = context
            .cluster_manager
            .is_server_available(&context.address)
            .await?;
        Ok(if available {
            PollStatus::Success
        } else {
            PollStatus::InProgress
        })
    }
}

// =============================================================================
// Image copy
// =============================================================================

pub struct ImageCheckContext {
    pub stack_id: StackId,
    pub cloud_context: CloudContext,
    pub image: String,
    pub connector: Arc<dyn CloudConnector>,
    /// Bound for one image-check round trip.
    pub request_timeout: Duration,
}

/// Asks the cloud side about the stack image on every attempt and reports
/// copy progress to subscribed clients.
pub struct ImageCheckerTask {
    store: Arc<dyn StackStore>,
    events: EventService,
}

impl ImageCheckerTask {
    pub fn new(store: Arc<dyn StackStore>, events: EventService) -> Self {
        Self { store, events }
    }
}

#[async_trait]
impl CheckerTask<ImageCheckContext> for ImageCheckerTask {
    type Error = CheckError;

    fn condition(&self, context: &ImageCheckContext) -> String {
        format!("image {}", context.image)
    }

    async fn call(&self, context: &ImageCheckContext) -> Result<PollStatus, CheckError> {
        let stack = match self.store.get_stack(context.stack_id).await {
            Ok(stack) if stack.poll_group() == PollGroup::Cancelled => {
                return Ok(PollStatus::Exit)
            }
            Ok(stack) => stack,
            Err(StoreError::NotFound(_)) => return Ok(PollStatus::Exit),
            Err(e) => return Err(e.into()),
        };

        let (request, pending) = request_channel(
            context.cloud_context.clone(),
            CheckImage {
                image: context.image.clone(),
            },
        );
        let selector = request.selector();
        context
            .connector
            .notify(request.into())
            .map_err(|source| OperationError::Notify { selector, source })?;
        let result = pending
            .wait(context.request_timeout)
            .await
            .map_err(OperationError::from)?;

        debug!(
            stack_id = %context.stack_id,
            image = %context.image,
            progress = result.progress,
            "image check"
        );

        match result.status {
            ImageStatus::CreateFinished => {
                self.events
                    .notify(Notification::image_copy(stack.notification_subject(), 100))
                    .await?;
                Ok(PollStatus::Success)
            }
            ImageStatus::CreateInProgress => {
                self.events
                    .notify(Notification::image_copy(
                        stack.notification_subject(),
                        result.progress,
                    ))
                    .await?;
                Ok(PollStatus::InProgress)
            }
            ImageStatus::CreateFailed => Err(OperationError::ImageCheckFailed {
                image: context.image.clone(),
            }
            .into()),
        }
    }
}
