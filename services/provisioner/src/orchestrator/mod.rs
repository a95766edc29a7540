//! Container orchestrator capability.
//!
//! Backends (Swarm, Marathon, ...) live outside this crate and plug in
//! through `ContainerOrchestrator`. The configured `OrchestratorTool` is
//! resolved to exactly one implementation at startup via
//! `OrchestratorRegistry`.

mod mock;

pub use mock::{MockOrchestrator, OrchestratorCall};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use stackflow_events::CloudPlatform;
use thiserror::Error;

use crate::domain::{CloudResource, Stack};

// =============================================================================
// Values
// =============================================================================

/// Ephemeral descriptor of one machine, built fresh for every bootstrap.
///
/// Two nodes with the same addresses, host name and volumes are the same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node {
    pub private_ip: String,
    pub public_ip: String,
    pub hostname: String,
    pub data_volumes: BTreeSet<String>,
}

impl Node {
    pub fn new(
        private_ip: impl Into<String>,
        public_ip: impl Into<String>,
        hostname: impl Into<String>,
        volume_count: u32,
    ) -> Self {
        Self {
            private_ip: private_ip.into(),
            public_ip: public_ip.into(),
            hostname: hostname.into(),
            data_volumes: data_volume_paths(volume_count),
        }
    }
}

/// Mount paths of `count` data volumes: `/hadoopfs/fs1` .. `/hadoopfs/fsN`.
pub fn data_volume_paths(count: u32) -> BTreeSet<String> {
    (1..=count).map(|i| format!("/hadoopfs/fs{i}")).collect()
}

/// Control endpoint of the orchestrated cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub public_ip: String,
    pub private_ip: String,
}

/// Handle returned by a (partial) bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorCluster {
    pub gateway: GatewayConfig,
    pub nodes: BTreeSet<Node>,
}

/// Images used for the runtime containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerImages {
    pub registrator: String,
    /// Management server image, reused for the agents.
    pub management: String,
    pub management_db: String,
    pub watch: String,
}

impl Default for ContainerImages {
    fn default() -> Self {
        Self {
            registrator: "sequenceiq/registrator:v5.1".to_string(),
            management: "sequenceiq/ambari:2.0.0-consul".to_string(),
            management_db: "postgres:9.4.1".to_string(),
            watch: "sequenceiq/docker-consul-watch-plugn:2.0.0-consul".to_string(),
        }
    }
}

// =============================================================================
// Tool selection
// =============================================================================

/// Identifier of an orchestrator backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrchestratorTool {
    Swarm,
    Marathon,
    Mock,
}

impl OrchestratorTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestratorTool::Swarm => "swarm",
            OrchestratorTool::Marathon => "marathon",
            OrchestratorTool::Mock => "mock",
        }
    }
}

impl std::fmt::Display for OrchestratorTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrchestratorTool {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "swarm" => Ok(OrchestratorTool::Swarm),
            "marathon" => Ok(OrchestratorTool::Marathon),
            "mock" => Ok(OrchestratorTool::Mock),
            _ => Err(OrchestratorError::UnknownTool(s.to_string())),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    /// A backend call failed.
    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    #[error("no orchestrator registered for tool '{0}'")]
    NotRegistered(OrchestratorTool),

    #[error("unknown orchestrator tool: {0}")]
    UnknownTool(String),
}

impl OrchestratorError {
    pub fn backend(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            message: message.into(),
        }
    }
}

// =============================================================================
// Capability
// =============================================================================

/// Backend that runs the cluster's containers.
///
/// Every call completes synchronously from the caller's point of view.
#[async_trait]
pub trait ContainerOrchestrator: Send + Sync {
    fn tool(&self) -> OrchestratorTool;

    /// Whether the bootstrap API on the gateway answers.
    async fn is_bootstrap_api_available(
        &self,
        gateway: &GatewayConfig,
    ) -> Result<bool, OrchestratorError>;

    async fn bootstrap(
        &self,
        gateway: &GatewayConfig,
        nodes: &BTreeSet<Node>,
        consul_servers: u32,
    ) -> Result<OrchestratorCluster, OrchestratorError>;

    async fn bootstrap_new_nodes(
        &self,
        gateway: &GatewayConfig,
        nodes: &BTreeSet<Node>,
    ) -> Result<OrchestratorCluster, OrchestratorError>;

    /// Whether every node of `cluster` has joined.
    async fn is_cluster_available(
        &self,
        cluster: &OrchestratorCluster,
    ) -> Result<bool, OrchestratorError>;

    async fn start_registrator(
        &self,
        cluster: &OrchestratorCluster,
        image: &str,
    ) -> Result<(), OrchestratorError>;

    async fn start_management_server(
        &self,
        cluster: &OrchestratorCluster,
        db_image: &str,
        server_image: &str,
        platform: CloudPlatform,
    ) -> Result<(), OrchestratorError>;

    async fn start_management_agents(
        &self,
        cluster: &OrchestratorCluster,
        image: &str,
        count: usize,
        platform: CloudPlatform,
    ) -> Result<(), OrchestratorError>;

    async fn start_watch_services(
        &self,
        cluster: &OrchestratorCluster,
        image: &str,
        count: usize,
    ) -> Result<(), OrchestratorError>;

    /// Tears down the containers started for `stack`.
    async fn rollback(
        &self,
        stack: &Stack,
        resources: &[CloudResource],
    ) -> Result<(), OrchestratorError>;
}

/// Maps orchestrator tools to their implementation.
#[derive(Clone, Default)]
pub struct OrchestratorRegistry {
    backends: HashMap<OrchestratorTool, Arc<dyn ContainerOrchestrator>>,
}

impl OrchestratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of the backends built into this crate, which is only the
    /// mock. Real backends are registered by embedders.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MockOrchestrator::new()));
        registry
    }

    /// Registers `backend` under its own tool identifier.
    pub fn register(&mut self, backend: Arc<dyn ContainerOrchestrator>) -> &mut Self {
        self.backends.insert(backend.tool(), backend);
        self
    }

    pub fn resolve(
        &self,
        tool: OrchestratorTool,
    ) -> Result<Arc<dyn ContainerOrchestrator>, OrchestratorError> {
        self.backends
            .get(&tool)
            .cloned()
            .ok_or(OrchestratorError::NotRegistered(tool))
    }
}

impl std::fmt::Debug for OrchestratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorRegistry")
            .field("tools", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_volume_paths() {
        let paths: Vec<_> = data_volume_paths(3).into_iter().collect();
        assert_eq!(paths, vec!["/hadoopfs/fs1", "/hadoopfs/fs2", "/hadoopfs/fs3"]);
        assert!(data_volume_paths(0).is_empty());
    }

    #[test]
    fn test_identical_nodes_collapse() {
        let mut nodes = BTreeSet::new();
        nodes.insert(Node::new("10.0.0.1", "52.0.0.1", "host-1", 2));
        nodes.insert(Node::new("10.0.0.1", "52.0.0.1", "host-1", 2));
        nodes.insert(Node::new("10.0.0.2", "52.0.0.2", "host-2", 2));
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_registry_resolves_registered_tool_only() {
        let mut registry = OrchestratorRegistry::new();
        registry.register(Arc::new(MockOrchestrator::new()));

        assert_eq!(
            registry.resolve(OrchestratorTool::Mock).unwrap().tool(),
            OrchestratorTool::Mock
        );
        assert_eq!(
            registry.resolve(OrchestratorTool::Swarm).err(),
            Some(OrchestratorError::NotRegistered(OrchestratorTool::Swarm))
        );
    }

    #[test]
    fn test_tool_parsing() {
        assert_eq!("SWARM".parse::<OrchestratorTool>().unwrap(), OrchestratorTool::Swarm);
        assert!(matches!(
            "kubernetes".parse::<OrchestratorTool>(),
            Err(OrchestratorError::UnknownTool(_))
        ));
    }
}
