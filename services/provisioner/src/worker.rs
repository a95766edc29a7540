//! Stack sync background worker.
//!
//! Periodically triggers the sync flow for every stack that is settled
//! (available or stopped), so instance and cluster state drifting outside of
//! a flow is picked up.

use std::sync::Arc;
use std::time::Duration;

use stackflow_events::Status;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::context::ProvisioningContext;
use crate::flow::{Flow, FlowManager, FlowManagerError};
use crate::store::{StackStore, StoreError};

/// Counters of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub stacks_seen: usize,
    pub flows_triggered: usize,
    pub skipped_busy: usize,
}

pub struct StackSyncWorker {
    store: Arc<dyn StackStore>,
    flows: Arc<FlowManager>,
    interval: Duration,
}

impl StackSyncWorker {
    pub fn new(store: Arc<dyn StackStore>, flows: Arc<FlowManager>, interval: Duration) -> Self {
        Self {
            store,
            flows,
            interval,
        }
    }

    /// Run the sync worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting stack sync worker");

        let mut interval = tokio::time::interval(self.interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sync_once().await {
                        Ok(stats) if stats.flows_triggered > 0 => {
                            info!(
                                stacks_seen = stats.stacks_seen,
                                flows_triggered = stats.flows_triggered,
                                skipped_busy = stats.skipped_busy,
                                "Stack sync pass complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Stack sync pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Stack sync worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Triggers one sync flow per settled stack. Stacks with a flow already
    /// running are skipped; a saturated executor ends the pass early.
    pub async fn sync_once(&self) -> Result<SyncStats, StoreError> {
        let mut stats = SyncStats::default();

        for stack_id in self.store.list_stack_ids().await? {
            let stack = match self.store.get_stack(stack_id).await {
                Ok(stack) => stack,
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            stats.stacks_seen += 1;

            if !matches!(stack.status, Status::Available | Status::Stopped) {
                continue;
            }

            let context = ProvisioningContext::new(stack.id, stack.platform);
            match self.flows.trigger(Flow::Sync, context.into()) {
                Ok(_) => stats.flows_triggered += 1,
                Err(FlowManagerError::FlowAlreadyRunning(_)) => {
                    debug!(%stack_id, "flow running, sync skipped");
                    stats.skipped_busy += 1;
                }
                Err(FlowManagerError::Executor(e)) => {
                    warn!(error = %e, "executor rejected sync flow, ending pass");
                    break;
                }
            }
        }
        Ok(stats)
    }
}
