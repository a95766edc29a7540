//! Management-layer capability: the service that builds and runs the
//! cluster once its containers are up.

mod mock;

pub use mock::{ClusterManagerCall, MockClusterManager};

use std::collections::BTreeSet;

use async_trait::async_trait;
use stackflow_events::Status;
use thiserror::Error;

use crate::domain::Stack;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterManagerError {
    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },
}

impl ClusterManagerError {
    pub fn backend(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait ClusterManager: Send + Sync {
    /// Whether the management server at `address` answers.
    async fn is_server_available(&self, address: &str) -> Result<bool, ClusterManagerError>;

    /// Installs and starts the cluster services on every running node.
    async fn build_cluster(&self, stack: &Stack) -> Result<(), ClusterManagerError>;

    /// Drops the installed cluster so it can be built again.
    async fn reset_cluster(&self, stack: &Stack) -> Result<(), ClusterManagerError>;

    async fn start_services(&self, stack: &Stack) -> Result<(), ClusterManagerError>;

    async fn stop_services(&self, stack: &Stack) -> Result<(), ClusterManagerError>;

    /// Registers the hosts with private addresses `hosts` in `group`.
    async fn add_hosts(
        &self,
        stack: &Stack,
        group: &str,
        hosts: &BTreeSet<String>,
    ) -> Result<(), ClusterManagerError>;

    /// Decommissions `count` hosts of `group` and returns their private
    /// addresses.
    async fn decommission_hosts(
        &self,
        stack: &Stack,
        group: &str,
        count: usize,
    ) -> Result<BTreeSet<String>, ClusterManagerError>;

    async fn enable_security(&self, stack: &Stack) -> Result<(), ClusterManagerError>;

    async fn change_credential(
        &self,
        stack: &Stack,
        user_name: &str,
        password: &str,
    ) -> Result<(), ClusterManagerError>;

    /// Health of the running cluster, expressed as a lifecycle status.
    async fn cluster_health(&self, stack: &Stack) -> Result<Status, ClusterManagerError>;
}
