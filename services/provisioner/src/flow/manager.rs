//! Flow manager: runs predefined flows on the executor, one per stack.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use stackflow_id::{FlowId, StackId};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info, info_span, warn, Instrument};

use super::{ExecutorError, Flow, FlowDispatcher, FlowExecutor};
use crate::context::{FailureContext, FlowContext};
use crate::error::FlowError;
use crate::locked;

/// Final result of a flow: the last context, or the error of the failed
/// transition after its handler ran.
pub type FlowOutcome = Result<FlowContext, Arc<FlowError>>;

#[derive(Debug, Error)]
pub enum FlowManagerError {
    #[error("a flow is already running for stack {0}")]
    FlowAlreadyRunning(StackId),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Handle to a triggered flow.
#[derive(Debug)]
pub struct FlowHandle {
    id: FlowId,
    flow: Flow,
    stack_id: StackId,
    rx: oneshot::Receiver<FlowOutcome>,
}

impl FlowHandle {
    pub fn id(&self) -> FlowId {
        self.id
    }

    pub fn flow(&self) -> Flow {
        self.flow
    }

    pub fn stack_id(&self) -> StackId {
        self.stack_id
    }

    /// Waits for the flow to finish.
    pub async fn outcome(self) -> FlowOutcome {
        self.rx
            .await
            .unwrap_or_else(|_| Err(Arc::new(FlowError::internal("flow ended without an outcome"))))
    }
}

/// Removes the stack from the running set however the flow ends.
struct RunningGuard {
    running: Arc<Mutex<HashSet<StackId>>>,
    stack_id: StackId,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        locked(&self.running).remove(&self.stack_id);
    }
}

pub struct FlowManager {
    dispatcher: Arc<FlowDispatcher>,
    executor: Arc<FlowExecutor>,
    running: Arc<Mutex<HashSet<StackId>>>,
}

impl FlowManager {
    pub fn new(dispatcher: Arc<FlowDispatcher>, executor: Arc<FlowExecutor>) -> Self {
        Self {
            dispatcher,
            executor,
            running: Arc::default(),
        }
    }

    pub fn is_running(&self, stack_id: StackId) -> bool {
        locked(&self.running).contains(&stack_id)
    }

    pub fn running_count(&self) -> usize {
        locked(&self.running).len()
    }

    pub fn executor(&self) -> &FlowExecutor {
        &self.executor
    }

    /// Queues `flow` for the stack of `context`.
    pub fn trigger(
        &self,
        flow: Flow,
        context: FlowContext,
    ) -> Result<FlowHandle, FlowManagerError> {
        let stack_id = context.stack_id();
        if !locked(&self.running).insert(stack_id) {
            return Err(FlowManagerError::FlowAlreadyRunning(stack_id));
        }
        let guard = RunningGuard {
            running: self.running.clone(),
            stack_id,
        };

        let id = FlowId::new();
        let (tx, rx) = oneshot::channel();
        let dispatcher = self.dispatcher.clone();
        let span = info_span!("flow", flow = flow.name(), flow_id = %id, %stack_id);

        let job = async move {
            let outcome = run_flow(&dispatcher, flow, context).await;
            // The stack is free again before anyone can observe the outcome.
            drop(guard);
            let _ = tx.send(outcome);
        }
        .instrument(span);

        // On rejection the job is dropped and the guard with it.
        self.executor.submit(Box::pin(job))?;
        info!(flow = flow.name(), flow_id = %id, %stack_id, "flow queued");

        Ok(FlowHandle {
            id,
            flow,
            stack_id,
            rx,
        })
    }
}

impl std::fmt::Debug for FlowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowManager")
            .field("running", &self.running_count())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// Runs the transitions of `flow` in order. On the first failure the failing
/// transition's handler runs with a `Failure` context and the flow stops.
async fn run_flow(dispatcher: &FlowDispatcher, flow: Flow, context: FlowContext) -> FlowOutcome {
    let mut context = context;
    for &transition in flow.transitions() {
        let stack_id = context.stack_id();
        let platform = context.platform();

        match dispatcher.dispatch(transition, context).await {
            Ok(next) => context = next,
            Err(err) => {
                let err = Arc::new(err);
                if let Some(handler) = transition.failure_handler() {
                    let failure = FailureContext {
                        stack_id,
                        platform,
                        transition,
                        error: err.clone(),
                    };
                    if let Err(handler_err) = dispatcher.dispatch(handler, failure.into()).await {
                        error!(
                            handler = handler.name(),
                            error = %handler_err,
                            "failure handler failed"
                        );
                    }
                }
                if err.is_cancellation() {
                    warn!(transition = transition.name(), "flow cancelled");
                } else {
                    warn!(transition = transition.name(), error = %err, "flow failed");
                }
                return Err(err);
            }
        }
    }

    info!("flow finished");
    Ok(context)
}
