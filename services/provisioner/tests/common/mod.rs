//! Shared fixtures for the flow integration tests.
//!
//! Wires the real facades, dispatcher and flow manager to the in-memory
//! store and the mock backends, with fast polling.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stackflow_events::{CloudPlatform, Status};
use stackflow_id::StackId;
use stackflow_provisioner::cloud::MockCloudConnector;
use stackflow_provisioner::cluster_manager::MockClusterManager;
use stackflow_provisioner::context::{FlowContext, ProvisioningContext};
use stackflow_provisioner::domain::{
    Cluster, InstanceGroup, InstanceStatus, OnFailureAction, Stack, Template,
};
use stackflow_provisioner::events::{EventService, InMemoryEventSink};
use stackflow_provisioner::facade::FacadeServices;
use stackflow_provisioner::flow::{
    ExecutorConfig, Flow, FlowDispatcher, FlowExecutor, FlowManager, FlowOutcome,
};
use stackflow_provisioner::orchestrator::{ContainerImages, MockOrchestrator};
use stackflow_provisioner::polling::PollSettings;
use stackflow_provisioner::store::{InMemoryStackStore, StackStore};

pub const GATEWAY: &str = "cbgateway";
pub const CORE: &str = "slave_1";

pub fn fast_polling() -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(1),
        max_attempts: 5,
    }
}

/// Backends a harness is built from.
pub struct Backends {
    pub connector: MockCloudConnector,
    pub orchestrator: MockOrchestrator,
    pub cluster_manager: MockClusterManager,
    pub events: InMemoryEventSink,
    pub polling: PollSettings,
    pub executor: ExecutorConfig,
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            connector: MockCloudConnector::new(),
            orchestrator: MockOrchestrator::new(),
            cluster_manager: MockClusterManager::new(),
            events: InMemoryEventSink::new(),
            polling: fast_polling(),
            executor: ExecutorConfig {
                workers: 4,
                queue_capacity: 16,
            },
        }
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStackStore>,
    pub connector: Arc<MockCloudConnector>,
    pub orchestrator: Arc<MockOrchestrator>,
    pub cluster_manager: Arc<MockClusterManager>,
    pub events: Arc<InMemoryEventSink>,
    pub dispatcher: Arc<FlowDispatcher>,
    pub flows: Arc<FlowManager>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(Backends::default())
    }

    pub fn with(backends: Backends) -> Self {
        let store = Arc::new(InMemoryStackStore::new());
        let connector = Arc::new(backends.connector);
        let orchestrator = Arc::new(backends.orchestrator);
        let cluster_manager = Arc::new(backends.cluster_manager);
        let events = Arc::new(backends.events);

        let services = FacadeServices {
            store: store.clone(),
            connector: connector.clone(),
            orchestrator: orchestrator.clone(),
            cluster_manager: cluster_manager.clone(),
            events: EventService::with_default_messages(events.clone()),
            images: ContainerImages::default(),
            polling: backends.polling,
            request_timeout: Duration::from_secs(2),
        };
        let dispatcher = Arc::new(FlowDispatcher::from_services(&services));
        let executor = Arc::new(FlowExecutor::start(backends.executor));
        let flows = Arc::new(FlowManager::new(dispatcher.clone(), executor));

        Self {
            store,
            connector,
            orchestrator,
            cluster_manager,
            events,
            dispatcher,
            flows,
        }
    }

    /// Stores a new stack: one gateway node and `core_nodes` core nodes with
    /// two data volumes each, and a requested cluster.
    pub async fn stack(&self, core_nodes: u32, on_failure: OnFailureAction) -> Stack {
        let stack = Stack::builder("analytics", CloudPlatform::Aws)
            .owner("owner-1", "account-1")
            .region("eu-west-1")
            .image("ami-1234")
            .on_failure(on_failure)
            .group(InstanceGroup::gateway(GATEWAY, 1, Template::new("m5.xlarge", 1)))
            .group(InstanceGroup::core(CORE, core_nodes, Template::new("m5.xlarge", 2)))
            .cluster(Cluster::new("analytics", "admin"))
            .build();
        self.store.insert_stack(&stack).await.unwrap();
        stack
    }

    pub async fn run(&self, flow: Flow, context: impl Into<FlowContext>) -> FlowOutcome {
        let handle = self.flows.trigger(flow, context.into()).unwrap();
        tokio::time::timeout(Duration::from_secs(10), handle.outcome())
            .await
            .expect("flow did not finish")
    }

    /// Runs the provision flow and expects it to succeed.
    pub async fn provision(&self, stack: &Stack) -> Stack {
        self.run(Flow::Provision, provisioning(stack))
            .await
            .expect("provision flow failed");
        self.reload(stack.id).await
    }

    pub async fn reload(&self, stack_id: StackId) -> Stack {
        self.store.get_stack(stack_id).await.unwrap()
    }

    pub fn has_event(&self, event_type: &str, message_part: &str) -> bool {
        self.events
            .event_pairs()
            .iter()
            .any(|(t, m)| t == event_type && m.contains(message_part))
    }
}

pub fn provisioning(stack: &Stack) -> ProvisioningContext {
    ProvisioningContext::new(stack.id, stack.platform)
}

pub fn statuses(stack: &Stack, group: &str) -> Vec<InstanceStatus> {
    stack
        .group(group)
        .map(|g| g.instances.iter().map(|i| i.status).collect())
        .unwrap_or_default()
}

pub fn cluster_status(stack: &Stack) -> Status {
    stack.cluster.as_ref().map(|c| c.status).expect("stack has a cluster")
}
