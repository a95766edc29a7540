//! In-process orchestrator used in dev mode and tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use stackflow_events::CloudPlatform;
use tracing::{debug, info};

use super::{
    ContainerOrchestrator, GatewayConfig, Node, OrchestratorCluster, OrchestratorError,
    OrchestratorTool,
};
use crate::domain::{CloudResource, Stack};
use crate::locked;

/// One recorded call against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorCall {
    BootstrapApiCheck,
    Bootstrap { nodes: usize, consul_servers: u32 },
    BootstrapNewNodes { nodes: usize },
    ClusterAvailabilityCheck,
    StartRegistrator { image: String },
    StartManagementServer { db_image: String, server_image: String, platform: CloudPlatform },
    StartManagementAgents { image: String, count: usize, platform: CloudPlatform },
    StartWatchServices { image: String, count: usize },
    Rollback { resources: usize },
}

impl OrchestratorCall {
    /// Operation name, as used for failure injection.
    pub fn operation(&self) -> &'static str {
        match self {
            OrchestratorCall::BootstrapApiCheck => "bootstrap_api_check",
            OrchestratorCall::Bootstrap { .. } => "bootstrap",
            OrchestratorCall::BootstrapNewNodes { .. } => "bootstrap_new_nodes",
            OrchestratorCall::ClusterAvailabilityCheck => "cluster_availability_check",
            OrchestratorCall::StartRegistrator { .. } => "start_registrator",
            OrchestratorCall::StartManagementServer { .. } => "start_management_server",
            OrchestratorCall::StartManagementAgents { .. } => "start_management_agents",
            OrchestratorCall::StartWatchServices { .. } => "start_watch_services",
            OrchestratorCall::Rollback { .. } => "rollback",
        }
    }
}

/// Mock orchestrator.
///
/// Records every call, fails the operations it was told to fail and answers
/// "not yet available" a configurable number of times before reporting the
/// bootstrap API or the cluster as available.
#[derive(Debug, Default)]
pub struct MockOrchestrator {
    calls: Mutex<Vec<OrchestratorCall>>,
    failures: Mutex<HashMap<&'static str, String>>,
    api_unavailable: AtomicU32,
    cluster_unavailable: AtomicU32,
}

impl MockOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every call of `operation` with `message`.
    #[must_use]
    pub fn failing(self, operation: &'static str, message: impl Into<String>) -> Self {
        locked(&self.failures).insert(operation, message.into());
        self
    }

    /// Answers "not available" `api` times for the bootstrap API and
    /// `cluster` times for the cluster before reporting availability.
    #[must_use]
    pub fn unavailable_for(self, api: u32, cluster: u32) -> Self {
        self.api_unavailable.store(api, Ordering::SeqCst);
        self.cluster_unavailable.store(cluster, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<OrchestratorCall> {
        locked(&self.calls).clone()
    }

    /// Number of recorded calls of `operation`.
    pub fn count(&self, operation: &str) -> usize {
        locked(&self.calls)
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    fn record(&self, call: OrchestratorCall) -> Result<(), OrchestratorError> {
        let operation = call.operation();
        debug!(operation, "[MOCK] orchestrator call");
        locked(&self.calls).push(call);

        match locked(&self.failures).get(operation) {
            Some(message) => Err(OrchestratorError::backend(operation, message.clone())),
            None => Ok(()),
        }
    }

    fn countdown(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }
}

#[async_trait]
impl ContainerOrchestrator for MockOrchestrator {
    fn tool(&self) -> OrchestratorTool {
        OrchestratorTool::Mock
    }

    async fn is_bootstrap_api_available(
        &self,
        _gateway: &GatewayConfig,
    ) -> Result<bool, OrchestratorError> {
        self.record(OrchestratorCall::BootstrapApiCheck)?;
        Ok(Self::countdown(&self.api_unavailable))
    }

    async fn bootstrap(
        &self,
        gateway: &GatewayConfig,
        nodes: &BTreeSet<Node>,
        consul_servers: u32,
    ) -> Result<OrchestratorCluster, OrchestratorError> {
        self.record(OrchestratorCall::Bootstrap {
            nodes: nodes.len(),
            consul_servers,
        })?;
        info!(gateway = %gateway.public_ip, nodes = nodes.len(), "[MOCK] cluster bootstrapped");
        Ok(OrchestratorCluster {
            gateway: gateway.clone(),
            nodes: nodes.clone(),
        })
    }

    async fn bootstrap_new_nodes(
        &self,
        gateway: &GatewayConfig,
        nodes: &BTreeSet<Node>,
    ) -> Result<OrchestratorCluster, OrchestratorError> {
        self.record(OrchestratorCall::BootstrapNewNodes { nodes: nodes.len() })?;
        Ok(OrchestratorCluster {
            gateway: gateway.clone(),
            nodes: nodes.clone(),
        })
    }

    async fn is_cluster_available(
        &self,
        _cluster: &OrchestratorCluster,
    ) -> Result<bool, OrchestratorError> {
        self.record(OrchestratorCall::ClusterAvailabilityCheck)?;
        Ok(Self::countdown(&self.cluster_unavailable))
    }

    async fn start_registrator(
        &self,
        _cluster: &OrchestratorCluster,
        image: &str,
    ) -> Result<(), OrchestratorError> {
        self.record(OrchestratorCall::StartRegistrator {
            image: image.to_string(),
        })
    }

    async fn start_management_server(
        &self,
        _cluster: &OrchestratorCluster,
        db_image: &str,
        server_image: &str,
        platform: CloudPlatform,
    ) -> Result<(), OrchestratorError> {
        self.record(OrchestratorCall::StartManagementServer {
            db_image: db_image.to_string(),
            server_image: server_image.to_string(),
            platform,
        })
    }

    async fn start_management_agents(
        &self,
        _cluster: &OrchestratorCluster,
        image: &str,
        count: usize,
        platform: CloudPlatform,
    ) -> Result<(), OrchestratorError> {
        self.record(OrchestratorCall::StartManagementAgents {
            image: image.to_string(),
            count,
            platform,
        })
    }

    async fn start_watch_services(
        &self,
        _cluster: &OrchestratorCluster,
        image: &str,
        count: usize,
    ) -> Result<(), OrchestratorError> {
        self.record(OrchestratorCall::StartWatchServices {
            image: image.to_string(),
            count,
        })
    }

    async fn rollback(
        &self,
        _stack: &Stack,
        resources: &[CloudResource],
    ) -> Result<(), OrchestratorError> {
        self.record(OrchestratorCall::Rollback {
            resources: resources.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> GatewayConfig {
        GatewayConfig {
            public_ip: "52.0.0.1".to_string(),
            private_ip: "10.0.0.1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_unavailable_countdown() {
        let mock = MockOrchestrator::new().unavailable_for(2, 0);
        assert!(!mock.is_bootstrap_api_available(&gateway()).await.unwrap());
        assert!(!mock.is_bootstrap_api_available(&gateway()).await.unwrap());
        assert!(mock.is_bootstrap_api_available(&gateway()).await.unwrap());
        assert_eq!(mock.count("bootstrap_api_check"), 3);
    }

    #[tokio::test]
    async fn test_failure_injection_still_records_call() {
        let mock = MockOrchestrator::new().failing("start_registrator", "image pull failed");
        let cluster = OrchestratorCluster {
            gateway: gateway(),
            nodes: BTreeSet::new(),
        };

        let err = mock.start_registrator(&cluster, "reg:1").await.unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::backend("start_registrator", "image pull failed")
        );
        assert_eq!(mock.count("start_registrator"), 1);
    }
}
