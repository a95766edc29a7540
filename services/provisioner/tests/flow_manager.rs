//! Integration tests for flow scheduling: one flow per stack, bounded
//! executor, named locks and the periodic sync worker.
//!
//! Tests run on the default current-thread runtime, so nothing queued runs
//! before the test yields.

mod common;

use std::time::Duration;

use common::{provisioning, Backends, Harness};
use stackflow_events::Status;
use stackflow_provisioner::context::StackStatusUpdateContext;
use stackflow_provisioner::domain::OnFailureAction;
use stackflow_provisioner::flow::{
    ExecutorConfig, ExecutorError, Flow, FlowManagerError, STOP_STACK_LOCK,
};
use stackflow_provisioner::worker::{StackSyncWorker, SyncStats};

async fn wait_idle(harness: &Harness) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.flows.running_count() > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("flows did not finish");
}

#[tokio::test]
async fn test_second_flow_for_same_stack_is_rejected() {
    let harness = Harness::new();
    let stack = harness.stack(3, OnFailureAction::Nothing).await;

    let first = harness
        .flows
        .trigger(Flow::Provision, provisioning(&stack).into())
        .unwrap();
    assert!(harness.flows.is_running(stack.id));

    let second = harness
        .flows
        .trigger(Flow::Sync, provisioning(&stack).into());
    assert!(matches!(
        second,
        Err(FlowManagerError::FlowAlreadyRunning(id)) if id == stack.id
    ));

    first.outcome().await.unwrap();
    assert!(!harness.flows.is_running(stack.id));

    // Free again once the first flow is done.
    harness.run(Flow::Sync, provisioning(&stack)).await.unwrap();
}

#[tokio::test]
async fn test_flows_for_different_stacks_run_side_by_side() {
    let harness = Harness::new();
    let a = harness.stack(1, OnFailureAction::Nothing).await;
    let b = harness.stack(2, OnFailureAction::Nothing).await;

    let first = harness
        .flows
        .trigger(Flow::Provision, provisioning(&a).into())
        .unwrap();
    let second = harness
        .flows
        .trigger(Flow::Provision, provisioning(&b).into())
        .unwrap();
    assert_eq!(harness.flows.running_count(), 2);

    first.outcome().await.unwrap();
    second.outcome().await.unwrap();
    assert_eq!(harness.reload(a.id).await.status, Status::Available);
    assert_eq!(harness.reload(b.id).await.status, Status::Available);
}

#[tokio::test]
async fn test_saturated_executor_rejects_and_frees_stack() {
    let harness = Harness::with(Backends {
        executor: ExecutorConfig {
            workers: 1,
            queue_capacity: 1,
        },
        ..Backends::default()
    });
    let a = harness.stack(1, OnFailureAction::Nothing).await;
    let b = harness.stack(1, OnFailureAction::Nothing).await;

    let first = harness
        .flows
        .trigger(Flow::Provision, provisioning(&a).into())
        .unwrap();
    let rejected = harness
        .flows
        .trigger(Flow::Provision, provisioning(&b).into());

    assert!(matches!(
        rejected,
        Err(FlowManagerError::Executor(ExecutorError::Saturated))
    ));
    assert!(!harness.flows.is_running(b.id));
    assert_eq!(harness.reload(b.id).await.status, Status::Requested);

    first.outcome().await.unwrap();
    harness.run(Flow::Provision, provisioning(&b)).await.unwrap();
}

#[tokio::test]
async fn test_stop_waits_for_the_stop_lock() {
    let harness = Harness::new();
    let stack = harness.stack(3, OnFailureAction::Nothing).await;
    let stack = harness.provision(&stack).await;

    let guard = harness
        .dispatcher
        .locks()
        .acquire(STOP_STACK_LOCK, stack.id)
        .await;

    let context = StackStatusUpdateContext {
        stack_id: stack.id,
        platform: stack.platform,
        start: false,
    };
    let handle = harness.flows.trigger(Flow::Stop, context.into()).unwrap();
    let mut outcome = Box::pin(handle.outcome());

    let blocked = tokio::time::timeout(Duration::from_millis(50), &mut outcome).await;
    assert!(blocked.is_err());
    // The cluster side already stopped; the stack step waits.
    assert_eq!(harness.reload(stack.id).await.status, Status::StopRequested);

    drop(guard);
    outcome.await.unwrap();
    assert_eq!(harness.reload(stack.id).await.status, Status::Stopped);
    assert!(harness.dispatcher.locks().is_empty());
}

#[tokio::test]
async fn test_sync_pass_triggers_settled_stacks_only() {
    let harness = Harness::new();
    let provisioned = harness.stack(3, OnFailureAction::Nothing).await;
    harness.provision(&provisioned).await;
    let _requested = harness.stack(1, OnFailureAction::Nothing).await;

    let worker = StackSyncWorker::new(
        harness.store.clone(),
        harness.flows.clone(),
        Duration::from_secs(60),
    );
    let stats = worker.sync_once().await.unwrap();
    assert_eq!(
        stats,
        SyncStats {
            stacks_seen: 2,
            flows_triggered: 1,
            skipped_busy: 0,
        }
    );

    wait_idle(&harness).await;
    assert!(harness.has_event("AVAILABLE", "4 instance(s) running"));
}

#[tokio::test]
async fn test_sync_pass_skips_busy_stacks() {
    let harness = Harness::new();
    let stack = harness.stack(3, OnFailureAction::Nothing).await;
    harness.provision(&stack).await;

    let running = harness
        .flows
        .trigger(Flow::Sync, provisioning(&stack).into())
        .unwrap();

    let worker = StackSyncWorker::new(
        harness.store.clone(),
        harness.flows.clone(),
        Duration::from_secs(60),
    );
    let stats = worker.sync_once().await.unwrap();
    assert_eq!(stats.skipped_busy, 1);
    assert_eq!(stats.flows_triggered, 0);

    running.outcome().await.unwrap();
}

#[tokio::test]
async fn test_sync_worker_stops_on_shutdown() {
    let harness = Harness::new();
    let worker = StackSyncWorker::new(
        harness.store.clone(),
        harness.flows.clone(),
        Duration::from_millis(10),
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let task = tokio::spawn(async move { worker.run(shutdown_rx).await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}
