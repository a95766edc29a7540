//! Stack, instance group and cluster entities.
//!
//! A `Stack` exclusively owns its instance groups and their instance
//! metadata. Values are loaded from a `StackStore` and written back through
//! its narrow update operations; nothing mutates a stored stack in place.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use stackflow_events::{CloudPlatform, EventError, NotificationSubject, PollGroup, Status};
use stackflow_id::{ClusterId, PrivateId, StackId};

// =============================================================================
// Policies and small enums
// =============================================================================

/// What to do with already-created infrastructure after a creation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnFailureAction {
    #[default]
    Nothing,
    Rollback,
}

impl OnFailureAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnFailureAction::Nothing => "NOTHING",
            OnFailureAction::Rollback => "ROLLBACK",
        }
    }
}

impl std::str::FromStr for OnFailureAction {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOTHING" => Ok(OnFailureAction::Nothing),
            "ROLLBACK" => Ok(OnFailureAction::Rollback),
            other => Err(EventError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceGroupType {
    /// Hosts the control endpoint of the cluster.
    Gateway,
    Core,
}

impl InstanceGroupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceGroupType::Gateway => "GATEWAY",
            InstanceGroupType::Core => "CORE",
        }
    }
}

impl std::str::FromStr for InstanceGroupType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GATEWAY" => Ok(InstanceGroupType::Gateway),
            "CORE" => Ok(InstanceGroupType::Core),
            other => Err(EventError::UnknownStatus(other.to_string())),
        }
    }
}

/// Lifecycle of a single instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Creation was requested; the cloud has not confirmed it yet.
    Requested,
    Created,
    Unregistered,
    Registered,
    Decommissioned,
    Terminated,
    Failed,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Requested => "REQUESTED",
            InstanceStatus::Created => "CREATED",
            InstanceStatus::Unregistered => "UNREGISTERED",
            InstanceStatus::Registered => "REGISTERED",
            InstanceStatus::Decommissioned => "DECOMMISSIONED",
            InstanceStatus::Terminated => "TERMINATED",
            InstanceStatus::Failed => "FAILED",
        }
    }

    /// Running instances take part in bootstrap.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Created | InstanceStatus::Unregistered | InstanceStatus::Registered
        )
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUESTED" => Ok(InstanceStatus::Requested),
            "CREATED" => Ok(InstanceStatus::Created),
            "UNREGISTERED" => Ok(InstanceStatus::Unregistered),
            "REGISTERED" => Ok(InstanceStatus::Registered),
            "DECOMMISSIONED" => Ok(InstanceStatus::Decommissioned),
            "TERMINATED" => Ok(InstanceStatus::Terminated),
            "FAILED" => Ok(InstanceStatus::Failed),
            other => Err(EventError::UnknownStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Instances and groups
// =============================================================================

/// Hardware template shared by every instance of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub instance_type: String,
    pub volume_count: u32,
    pub volume_size_gb: u32,
}

impl Template {
    pub fn new(instance_type: impl Into<String>, volume_count: u32) -> Self {
        Self {
            instance_type: instance_type.into(),
            volume_count,
            volume_size_gb: 100,
        }
    }
}

/// One machine of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceMetaData {
    pub private_id: PrivateId,
    pub group_name: String,
    /// Cloud-side instance identifier, known once the instance exists.
    pub instance_id: Option<String>,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    /// Fully qualified host name, e.g. `host-1.example.internal`.
    pub long_hostname: Option<String>,
    pub status: InstanceStatus,
}

impl InstanceMetaData {
    /// A pending creation request.
    pub fn requested(private_id: PrivateId, group_name: impl Into<String>) -> Self {
        Self {
            private_id,
            group_name: group_name.into(),
            instance_id: None,
            private_ip: None,
            public_ip: None,
            long_hostname: None,
            status: InstanceStatus::Requested,
        }
    }

    /// A created instance with known addresses.
    pub fn running(
        private_id: PrivateId,
        group_name: impl Into<String>,
        private_ip: impl Into<String>,
        public_ip: impl Into<String>,
        long_hostname: impl Into<String>,
    ) -> Self {
        Self {
            private_id,
            group_name: group_name.into(),
            instance_id: Some(format!("i-{:08x}", private_id.value())),
            private_ip: Some(private_ip.into()),
            public_ip: Some(public_ip.into()),
            long_hostname: Some(long_hostname.into()),
            status: InstanceStatus::Created,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Host name up to the first dot.
    pub fn short_hostname(&self) -> Option<&str> {
        self.long_hostname
            .as_deref()
            .map(|name| name.split('.').next().unwrap_or(name))
    }
}

/// A named, homogeneous pool of instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceGroup {
    pub name: String,
    pub group_type: InstanceGroupType,
    pub node_count: u32,
    pub template: Template,
    pub instances: Vec<InstanceMetaData>,
}

impl InstanceGroup {
    pub fn gateway(name: impl Into<String>, node_count: u32, template: Template) -> Self {
        Self::new(name, InstanceGroupType::Gateway, node_count, template)
    }

    pub fn core(name: impl Into<String>, node_count: u32, template: Template) -> Self {
        Self::new(name, InstanceGroupType::Core, node_count, template)
    }

    fn new(
        name: impl Into<String>,
        group_type: InstanceGroupType,
        node_count: u32,
        template: Template,
    ) -> Self {
        Self {
            name: name.into(),
            group_type,
            node_count,
            template,
            instances: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_instances(mut self, instances: Vec<InstanceMetaData>) -> Self {
        self.instances = instances;
        self
    }

    pub fn is_gateway(&self) -> bool {
        self.group_type == InstanceGroupType::Gateway
    }

    pub fn running_instances(&self) -> impl Iterator<Item = &InstanceMetaData> {
        self.instances.iter().filter(|i| i.is_running())
    }

    pub fn requested_instances(&self) -> impl Iterator<Item = &InstanceMetaData> {
        self.instances
            .iter()
            .filter(|i| i.status == InstanceStatus::Requested)
    }
}

/// Infrastructure object created on behalf of a stack (network, instance,
/// security group, ...). Tracked so that rollback can remove it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudResource {
    pub resource_type: String,
    pub name: String,
}

impl CloudResource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

// =============================================================================
// Cluster
// =============================================================================

/// The management layer running on top of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    pub status: Status,
    pub status_reason: Option<String>,
    /// Address of the management server, set once it is reachable.
    pub management_ip: Option<String>,
    pub user_name: String,
}

impl Cluster {
    pub fn new(name: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            id: ClusterId::new(),
            name: name.into(),
            status: Status::Requested,
            status_reason: None,
            management_ip: None,
            user_name: user_name.into(),
        }
    }
}

// =============================================================================
// Stack
// =============================================================================

/// A provisioned set of machine instances on one cloud platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub id: StackId,
    pub name: String,
    pub owner: String,
    pub account: String,
    pub platform: CloudPlatform,
    pub region: String,
    pub image: String,
    pub status: Status,
    pub status_reason: Option<String>,
    pub on_failure_action: OnFailureAction,
    /// Number of consensus servers the orchestrator bootstraps.
    pub consul_servers: u32,
    pub instance_groups: Vec<InstanceGroup>,
    pub resources: Vec<CloudResource>,
    pub cluster: Option<Cluster>,
}

impl Stack {
    pub fn builder(name: impl Into<String>, platform: CloudPlatform) -> StackBuilder {
        StackBuilder::new(name, platform)
    }

    /// True while the stack is being deleted or already gone.
    pub fn is_in_deletion_phase(&self) -> bool {
        self.status.is_deletion()
    }

    pub fn poll_group(&self) -> PollGroup {
        self.status.poll_group()
    }

    pub fn gateway_group(&self) -> Option<&InstanceGroup> {
        self.instance_groups.iter().find(|g| g.is_gateway())
    }

    pub fn group(&self, name: &str) -> Option<&InstanceGroup> {
        self.instance_groups.iter().find(|g| g.name == name)
    }

    pub fn instances(&self) -> impl Iterator<Item = &InstanceMetaData> {
        self.instance_groups.iter().flat_map(|g| g.instances.iter())
    }

    pub fn running_instances(&self) -> impl Iterator<Item = &InstanceMetaData> {
        self.instances().filter(|i| i.is_running())
    }

    pub fn instance(&self, private_id: PrivateId) -> Option<&InstanceMetaData> {
        self.instances().find(|i| i.private_id == private_id)
    }

    /// Sum of the node counts of every group.
    pub fn full_node_count(&self) -> u32 {
        self.instance_groups.iter().map(|g| g.node_count).sum()
    }

    /// Checks that exactly one group is the gateway group.
    pub fn validate_topology(&self) -> Result<(), String> {
        let gateways = self.instance_groups.iter().filter(|g| g.is_gateway()).count();
        if gateways != 1 {
            return Err(format!(
                "stack {} must have exactly one gateway group, found {gateways}",
                self.id
            ));
        }

        let mut names = BTreeSet::new();
        for group in &self.instance_groups {
            if !names.insert(group.name.as_str()) {
                return Err(format!("duplicate instance group name: {}", group.name));
            }
        }
        Ok(())
    }

    pub fn notification_subject(&self) -> NotificationSubject<'_> {
        NotificationSubject {
            owner: &self.owner,
            account: &self.account,
            cloud: self.platform,
            region: &self.region,
            stack_id: self.id,
            stack_name: &self.name,
            stack_status: self.status,
        }
    }
}

/// Consensus server count for a stack of `node_count` nodes.
pub fn default_consul_servers(node_count: u32) -> u32 {
    match node_count {
        0..=2 => 1,
        3..=999 => 3,
        _ => 5,
    }
}

/// Builder for new stacks.
#[derive(Debug, Clone)]
pub struct StackBuilder {
    stack: Stack,
    consul_servers: Option<u32>,
}

impl StackBuilder {
    fn new(name: impl Into<String>, platform: CloudPlatform) -> Self {
        Self {
            stack: Stack {
                id: StackId::new(),
                name: name.into(),
                owner: String::new(),
                account: String::new(),
                platform,
                region: String::new(),
                image: String::new(),
                status: Status::Requested,
                status_reason: None,
                on_failure_action: OnFailureAction::Nothing,
                consul_servers: 0,
                instance_groups: Vec::new(),
                resources: Vec::new(),
                cluster: None,
            },
            consul_servers: None,
        }
    }

    pub fn owner(mut self, owner: impl Into<String>, account: impl Into<String>) -> Self {
        self.stack.owner = owner.into();
        self.stack.account = account.into();
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.stack.region = region.into();
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.stack.image = image.into();
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.stack.status = status;
        self
    }

    pub fn on_failure(mut self, action: OnFailureAction) -> Self {
        self.stack.on_failure_action = action;
        self
    }

    pub fn consul_servers(mut self, count: u32) -> Self {
        self.consul_servers = Some(count);
        self
    }

    pub fn group(mut self, group: InstanceGroup) -> Self {
        self.stack.instance_groups.push(group);
        self
    }

    pub fn resource(mut self, resource: CloudResource) -> Self {
        self.stack.resources.push(resource);
        self
    }

    pub fn cluster(mut self, cluster: Cluster) -> Self {
        self.stack.cluster = Some(cluster);
        self
    }

    pub fn build(self) -> Stack {
        let mut stack = self.stack;
        stack.consul_servers = self
            .consul_servers
            .unwrap_or_else(|| default_consul_servers(stack.full_node_count()));
        stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn template() -> Template {
        Template::new("m5.xlarge", 2)
    }

    #[test]
    fn test_short_hostname() {
        let instance = InstanceMetaData::running(
            PrivateId::new(1),
            "slave_1",
            "10.0.0.1",
            "52.0.0.1",
            "host-1.eu-west-1.compute.internal",
        );
        assert_eq!(instance.short_hostname(), Some("host-1"));

        let mut bare = instance.clone();
        bare.long_hostname = Some("plainhost".to_string());
        assert_eq!(bare.short_hostname(), Some("plainhost"));
    }

    #[rstest]
    #[case(InstanceStatus::Created, true)]
    #[case(InstanceStatus::Unregistered, true)]
    #[case(InstanceStatus::Registered, true)]
    #[case(InstanceStatus::Requested, false)]
    #[case(InstanceStatus::Decommissioned, false)]
    #[case(InstanceStatus::Terminated, false)]
    #[case(InstanceStatus::Failed, false)]
    fn test_running_statuses(#[case] status: InstanceStatus, #[case] running: bool) {
        assert_eq!(status.is_running(), running);
        assert_eq!(status.as_str().parse::<InstanceStatus>().unwrap(), status);
    }

    #[test]
    fn test_topology_requires_single_gateway() {
        let ok = Stack::builder("s", CloudPlatform::Aws)
            .group(InstanceGroup::gateway("cbgateway", 1, template()))
            .group(InstanceGroup::core("slave_1", 3, template()))
            .build();
        assert!(ok.validate_topology().is_ok());
        assert_eq!(ok.gateway_group().map(|g| g.name.as_str()), Some("cbgateway"));

        let none = Stack::builder("s", CloudPlatform::Aws)
            .group(InstanceGroup::core("slave_1", 3, template()))
            .build();
        assert!(none.validate_topology().is_err());

        let two = Stack::builder("s", CloudPlatform::Aws)
            .group(InstanceGroup::gateway("a", 1, template()))
            .group(InstanceGroup::gateway("b", 1, template()))
            .build();
        assert!(two.validate_topology().is_err());
    }

    #[rstest]
    #[case(1, 1)]
    #[case(2, 1)]
    #[case(3, 3)]
    #[case(999, 3)]
    #[case(1000, 5)]
    fn test_default_consul_servers(#[case] nodes: u32, #[case] expected: u32) {
        assert_eq!(default_consul_servers(nodes), expected);
    }

    #[test]
    fn test_deletion_phase() {
        let stack = Stack::builder("s", CloudPlatform::Gcp)
            .status(Status::DeleteInProgress)
            .build();
        assert!(stack.is_in_deletion_phase());
        assert_eq!(stack.poll_group(), PollGroup::Cancelled);
    }
}
