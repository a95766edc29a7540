//! Recording cluster manager used in dev mode and tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use stackflow_events::Status;
use tracing::debug;

use super::{ClusterManager, ClusterManagerError};
use crate::domain::Stack;
use crate::locked;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterManagerCall {
    ServerCheck { address: String },
    Build,
    Reset,
    StartServices,
    StopServices,
    AddHosts { group: String, hosts: BTreeSet<String> },
    DecommissionHosts { group: String, count: usize },
    EnableSecurity,
    ChangeCredential { user_name: String },
    Health,
}

impl ClusterManagerCall {
    pub fn operation(&self) -> &'static str {
        match self {
            ClusterManagerCall::ServerCheck { .. } => "server_check",
            ClusterManagerCall::Build => "build_cluster",
            ClusterManagerCall::Reset => "reset_cluster",
            ClusterManagerCall::StartServices => "start_services",
            ClusterManagerCall::StopServices => "stop_services",
            ClusterManagerCall::AddHosts { .. } => "add_hosts",
            ClusterManagerCall::DecommissionHosts { .. } => "decommission_hosts",
            ClusterManagerCall::EnableSecurity => "enable_security",
            ClusterManagerCall::ChangeCredential { .. } => "change_credential",
            ClusterManagerCall::Health => "cluster_health",
        }
    }
}

/// Mock cluster manager.
///
/// Decommissioning picks the running instances of the group with the highest
/// private ids.
#[derive(Debug)]
pub struct MockClusterManager {
    calls: Mutex<Vec<ClusterManagerCall>>,
    failures: Mutex<HashMap<&'static str, String>>,
    server_unavailable: AtomicU32,
    health: Mutex<Status>,
}

impl Default for MockClusterManager {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            server_unavailable: AtomicU32::new(0),
            health: Mutex::new(Status::Available),
        }
    }
}

impl MockClusterManager {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing(self, operation: &'static str, message: impl Into<String>) -> Self {
        locked(&self.failures).insert(operation, message.into());
        self
    }

    /// Answers "not available" `times` times before the server comes up.
    #[must_use]
    pub fn unavailable_for(self, times: u32) -> Self {
        self.server_unavailable.store(times, Ordering::SeqCst);
        self
    }

    pub fn set_health(&self, status: Status) {
        *locked(&self.health) = status;
    }

    pub fn calls(&self) -> Vec<ClusterManagerCall> {
        locked(&self.calls).clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        locked(&self.calls)
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    fn record(&self, call: ClusterManagerCall) -> Result<(), ClusterManagerError> {
        let operation = call.operation();
        debug!(operation, "[MOCK] cluster manager call");
        locked(&self.calls).push(call);

        match locked(&self.failures).get(operation) {
            Some(message) => Err(ClusterManagerError::backend(operation, message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ClusterManager for MockClusterManager {
    async fn is_server_available(&self, address: &str) -> Result<bool, ClusterManagerError> {
        self.record(ClusterManagerCall::ServerCheck {
            address: address.to_string(),
        })?;
        Ok(self
            .server_unavailable
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err())
    }

    async fn build_cluster(&self, _stack: &Stack) -> Result<(), ClusterManagerError> {
        self.record(ClusterManagerCall::Build)
    }

    async fn reset_cluster(&self, _stack: &Stack) -> Result<(), ClusterManagerError> {
        self.record(ClusterManagerCall::Reset)
    }

    async fn start_services(&self, _stack: &Stack) -> Result<(), ClusterManagerError> {
        self.record(ClusterManagerCall::StartServices)
    }

    async fn stop_services(&self, _stack: &Stack) -> Result<(), ClusterManagerError> {
        self.record(ClusterManagerCall::StopServices)
    }

    async fn add_hosts(
        &self,
        _stack: &Stack,
        group: &str,
        hosts: &BTreeSet<String>,
    ) -> Result<(), ClusterManagerError> {
        self.record(ClusterManagerCall::AddHosts {
            group: group.to_string(),
            hosts: hosts.clone(),
        })
    }

    async fn decommission_hosts(
        &self,
        stack: &Stack,
        group: &str,
        count: usize,
    ) -> Result<BTreeSet<String>, ClusterManagerError> {
        self.record(ClusterManagerCall::DecommissionHosts {
            group: group.to_string(),
            count,
        })?;

        let mut running: Vec<_> = stack
            .group(group)
            .map(|g| g.running_instances().collect())
            .unwrap_or_default();
        running.sort_by_key(|i| std::cmp::Reverse(i.private_id));

        Ok(running
            .into_iter()
            .filter_map(|i| i.private_ip.clone())
            .take(count)
            .collect())
    }

    async fn enable_security(&self, _stack: &Stack) -> Result<(), ClusterManagerError> {
        self.record(ClusterManagerCall::EnableSecurity)
    }

    async fn change_credential(
        &self,
        _stack: &Stack,
        user_name: &str,
        _password: &str,
    ) -> Result<(), ClusterManagerError> {
        self.record(ClusterManagerCall::ChangeCredential {
            user_name: user_name.to_string(),
        })
    }

    async fn cluster_health(&self, _stack: &Stack) -> Result<Status, ClusterManagerError> {
        self.record(ClusterManagerCall::Health)?;
        Ok(*locked(&self.health))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InstanceGroup, InstanceMetaData, Template};
    use stackflow_events::CloudPlatform;
    use stackflow_id::PrivateId;

    #[tokio::test]
    async fn test_decommission_picks_highest_private_ids() {
        let stack = Stack::builder("s", CloudPlatform::Aws)
            .group(
                InstanceGroup::core("slave_1", 3, Template::new("m5.large", 1)).with_instances(
                    (1..=3)
                        .map(|i| {
                            InstanceMetaData::running(
                                PrivateId::new(i),
                                "slave_1",
                                format!("10.0.0.{i}"),
                                format!("52.0.0.{i}"),
                                format!("host-{i}.local"),
                            )
                        })
                        .collect(),
                ),
            )
            .build();

        let manager = MockClusterManager::new();
        let removed = manager.decommission_hosts(&stack, "slave_1", 2).await.unwrap();
        assert_eq!(
            removed,
            ["10.0.0.2", "10.0.0.3"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[tokio::test]
    async fn test_server_becomes_available() {
        let manager = MockClusterManager::new().unavailable_for(1);
        assert!(!manager.is_server_available("10.0.0.1").await.unwrap());
        assert!(manager.is_server_available("10.0.0.1").await.unwrap());
    }
}
