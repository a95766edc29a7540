//! Integration tests for the flows run on a provisioned stack: start and
//! stop, scaling, sync, credentials and security.

mod common;

use common::{cluster_status, provisioning, statuses, Backends, Harness, CORE};
use stackflow_events::Status;
use stackflow_id::PrivateId;
use stackflow_provisioner::cloud::{CloudCall, InstanceState, MockCloudConnector};
use stackflow_provisioner::cluster_manager::{ClusterManagerCall, MockClusterManager};
use stackflow_provisioner::context::{
    ClusterCredentialContext, ClusterScalingContext, StackScalingContext, StackStatusUpdateContext,
};
use stackflow_provisioner::domain::{InstanceStatus, OnFailureAction, Stack};
use stackflow_provisioner::error::FlowErrorKind;
use stackflow_provisioner::flow::Flow;
use stackflow_provisioner::orchestrator::OrchestratorCall;
use stackflow_provisioner::store::StackStore;

fn status_update(stack: &Stack, start: bool) -> StackStatusUpdateContext {
    StackStatusUpdateContext {
        stack_id: stack.id,
        platform: stack.platform,
        start,
    }
}

async fn provisioned(harness: &Harness) -> Stack {
    let stack = harness.stack(3, OnFailureAction::Nothing).await;
    harness.provision(&stack).await
}

// =============================================================================
// Start and stop
// =============================================================================

#[tokio::test]
async fn test_stop_then_start() {
    let harness = Harness::new();
    let stack = provisioned(&harness).await;

    harness
        .run(Flow::Stop, status_update(&stack, false))
        .await
        .unwrap();
    let stopped = harness.reload(stack.id).await;
    assert_eq!(stopped.status, Status::Stopped);
    assert_eq!(cluster_status(&stopped), Status::Stopped);
    assert_eq!(harness.cluster_manager.count("stop_services"), 1);
    assert!(harness.connector.calls().contains(&CloudCall::StopInstances));

    harness
        .run(Flow::Start, status_update(&stack, true))
        .await
        .unwrap();
    let started = harness.reload(stack.id).await;
    assert_eq!(started.status, Status::Available);
    assert_eq!(cluster_status(&started), Status::Available);
    assert_eq!(harness.cluster_manager.count("start_services"), 1);
    assert!(harness.has_event("START_REQUESTED", "Cluster start requested"));
    assert!(harness.has_event("AVAILABLE", "Infrastructure started"));
}

#[tokio::test]
async fn test_stop_failure_marks_stack() {
    let harness = Harness::with(Backends {
        connector: MockCloudConnector::new().failing_stop("instance locked"),
        ..Backends::default()
    });
    let stack = provisioned(&harness).await;

    let err = harness
        .run(Flow::Stop, status_update(&stack, false))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FlowErrorKind::Operation);

    let stack = harness.reload(stack.id).await;
    assert_eq!(stack.status, Status::StopFailed);
    assert!(stack
        .status_reason
        .as_deref()
        .is_some_and(|r| r.contains("instance locked")));
    assert!(harness.has_event("STOP_FAILED", "instance locked"));
}

#[tokio::test]
async fn test_cluster_start_failure_keeps_stack_available() {
    let harness = Harness::with(Backends {
        cluster_manager: MockClusterManager::new().failing("start_services", "service refused"),
        ..Backends::default()
    });
    let stack = provisioned(&harness).await;

    harness
        .run(Flow::Start, status_update(&stack, true))
        .await
        .unwrap_err();

    let stack = harness.reload(stack.id).await;
    assert_eq!(stack.status, Status::Available);
    assert_eq!(cluster_status(&stack), Status::StartFailed);
}

// =============================================================================
// Scaling
// =============================================================================

#[tokio::test]
async fn test_upscale_adds_registered_nodes() {
    let harness = Harness::new();
    let stack = provisioned(&harness).await;

    let scaling = StackScalingContext::new(stack.id, stack.platform, CORE, 2);
    harness.run(Flow::UpscaleStack, scaling).await.unwrap();

    let stack = harness.reload(stack.id).await;
    let core = stack.group(CORE).unwrap();
    assert_eq!(core.node_count, 5);
    assert_eq!(statuses(&stack, CORE), vec![InstanceStatus::Registered; 5]);
    assert_eq!(stack.status, Status::Available);
    assert_eq!(cluster_status(&stack), Status::Available);

    assert!(harness
        .orchestrator
        .calls()
        .contains(&OrchestratorCall::BootstrapNewNodes { nodes: 2 }));
    let added = harness
        .cluster_manager
        .calls()
        .into_iter()
        .find_map(|c| match c {
            ClusterManagerCall::AddHosts { hosts, .. } => Some(hosts),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        added,
        ["10.0.0.4", "10.0.0.5"].iter().map(|s| s.to_string()).collect()
    );
}

#[tokio::test]
async fn test_upscale_with_failed_instance_keeps_the_rest() {
    let harness = Harness::with(Backends {
        connector: MockCloudConnector::new().failing_instance(PrivateId::new(5), "no capacity"),
        ..Backends::default()
    });
    let stack = provisioned(&harness).await;

    let scaling = StackScalingContext::new(stack.id, stack.platform, CORE, 2);
    harness.run(Flow::UpscaleStack, scaling).await.unwrap();

    let stack = harness.reload(stack.id).await;
    let core = stack.group(CORE).unwrap();
    assert_eq!(core.node_count, 4);
    assert!(stack.instance(PrivateId::new(5)).is_none());
    assert_eq!(
        stack.instance(PrivateId::new(4)).map(|i| i.status),
        Some(InstanceStatus::Registered)
    );
}

#[tokio::test]
async fn test_upscale_rejects_non_positive_adjustment() {
    let harness = Harness::new();
    let stack = provisioned(&harness).await;

    let scaling = StackScalingContext::new(stack.id, stack.platform, CORE, 0);
    harness.run(Flow::UpscaleStack, scaling).await.unwrap_err();

    let stack = harness.reload(stack.id).await;
    assert_eq!(stack.group(CORE).unwrap().node_count, 3);
    assert_eq!(stack.status, Status::Available);
    assert!(harness.has_event("UPDATE_FAILED", "positive adjustment"));
}

#[tokio::test]
async fn test_scaling_failure_drops_pending_requests() {
    let harness = Harness::new();
    let stack = provisioned(&harness).await;
    let pending = harness
        .store
        .save_instance_requests(stack.id, CORE, 1)
        .await
        .unwrap();
    assert_eq!(pending, vec![PrivateId::new(4)]);

    let scaling = StackScalingContext::new(stack.id, stack.platform, CORE, 0);
    harness.run(Flow::UpscaleStack, scaling).await.unwrap_err();

    let stack = harness.reload(stack.id).await;
    assert!(stack.instance(PrivateId::new(4)).is_none());
    assert_eq!(stack.group(CORE).unwrap().instances.len(), 3);
}

#[tokio::test]
async fn test_downscale_removes_decommissioned_hosts() {
    let harness = Harness::new();
    let stack = provisioned(&harness).await;

    let scaling = ClusterScalingContext::new(stack.id, stack.platform, CORE, -1);
    harness.run(Flow::DownscaleStack, scaling).await.unwrap();

    let stack = harness.reload(stack.id).await;
    let core = stack.group(CORE).unwrap();
    assert_eq!(core.node_count, 2);
    assert!(stack.instance(PrivateId::new(3)).is_none());
    assert!(harness.connector.calls().contains(&CloudCall::RemoveInstances {
        instance_ids: vec!["i-00000003".to_string()],
    }));
    assert_eq!(stack.status, Status::Available);
}

#[tokio::test]
async fn test_remove_single_instance() {
    let harness = Harness::new();
    let stack = provisioned(&harness).await;

    let scaling = StackScalingContext::remove_instance(stack.id, stack.platform, CORE, "i-00000001");
    harness.run(Flow::RemoveInstance, scaling).await.unwrap();

    let stack = harness.reload(stack.id).await;
    assert_eq!(stack.group(CORE).unwrap().node_count, 2);
    assert!(stack.instance(PrivateId::new(1)).is_none());
    assert!(harness.has_event("AVAILABLE", "Removed 1 instance(s) from group slave_1"));
}

// =============================================================================
// Reset, sync, credentials, security
// =============================================================================

#[tokio::test]
async fn test_reset_cluster_rebuilds() {
    let harness = Harness::new();
    let stack = provisioned(&harness).await;

    harness.run(Flow::ResetCluster, provisioning(&stack)).await.unwrap();

    assert_eq!(harness.cluster_manager.count("reset_cluster"), 1);
    assert_eq!(harness.cluster_manager.count("build_cluster"), 2);
    let stack = harness.reload(stack.id).await;
    assert!(stack
        .instances()
        .all(|i| i.status == InstanceStatus::Registered));
    assert_eq!(cluster_status(&stack), Status::Available);
}

#[tokio::test]
async fn test_sync_marks_terminated_instances() {
    let harness = Harness::new();
    let stack = provisioned(&harness).await;
    harness
        .connector
        .set_instance_state(PrivateId::new(3), InstanceState::Terminated);
    harness.cluster_manager.set_health(Status::UpdateFailed);

    harness.run(Flow::Sync, provisioning(&stack)).await.unwrap();

    let stack = harness.reload(stack.id).await;
    assert_eq!(
        stack.instance(PrivateId::new(3)).map(|i| i.status),
        Some(InstanceStatus::Terminated)
    );
    assert_eq!(stack.status, Status::Available);
    assert_eq!(cluster_status(&stack), Status::UpdateFailed);
    assert!(harness.has_event("AVAILABLE", "3 instance(s) running"));
}

#[tokio::test]
async fn test_sync_of_stopped_stack_skips_health_check() {
    let harness = Harness::new();
    let stack = provisioned(&harness).await;
    harness
        .run(Flow::Stop, status_update(&stack, false))
        .await
        .unwrap();

    harness.run(Flow::Sync, provisioning(&stack)).await.unwrap();

    let stack = harness.reload(stack.id).await;
    assert_eq!(stack.status, Status::Stopped);
    assert_eq!(cluster_status(&stack), Status::Stopped);
    assert_eq!(harness.cluster_manager.count("cluster_health"), 0);
}

#[tokio::test]
async fn test_credential_change_updates_cluster_user() {
    let harness = Harness::new();
    let stack = provisioned(&harness).await;

    let credential = ClusterCredentialContext {
        stack_id: stack.id,
        platform: stack.platform,
        user_name: "operator".to_string(),
        password: "s3cret".to_string(),
    };
    harness.run(Flow::CredentialChange, credential).await.unwrap();

    let stack = harness.reload(stack.id).await;
    assert_eq!(stack.cluster.as_ref().unwrap().user_name, "operator");
    assert!(harness
        .cluster_manager
        .calls()
        .contains(&ClusterManagerCall::ChangeCredential {
            user_name: "operator".to_string(),
        }));
}

#[tokio::test]
async fn test_security_failure_marks_cluster() {
    let harness = Harness::with(Backends {
        cluster_manager: MockClusterManager::new().failing("enable_security", "kdc unreachable"),
        ..Backends::default()
    });
    let stack = provisioned(&harness).await;

    harness
        .run(Flow::EnableSecurity, provisioning(&stack))
        .await
        .unwrap_err();

    let stack = harness.reload(stack.id).await;
    assert_eq!(stack.status, Status::Available);
    assert_eq!(cluster_status(&stack), Status::EnableSecurityFailed);
    assert!(harness.has_event("ENABLE_SECURITY_FAILED", "kdc unreachable"));
}
