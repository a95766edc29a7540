//! Transition dispatcher.
//!
//! Routes each named transition to its facade operation, holds the named lock
//! where the transition requires one, and normalises every failure into a
//! `FlowError` exactly once.

use std::sync::Arc;

use tracing::{debug, error, info_span, warn, Instrument};

use super::{FlowLocks, Transition};
use crate::context::FlowContext;
use crate::error::FlowError;
use crate::facade::{
    ClusterFacade, DefaultClusterFacade, DefaultStackFacade, FacadeServices, StackFacade,
};

pub struct FlowDispatcher {
    stack: Arc<dyn StackFacade>,
    cluster: Arc<dyn ClusterFacade>,
    locks: FlowLocks,
}

macro_rules! transitions {
    ($($method:ident => $transition:ident),+ $(,)?) => {
        $(
            pub async fn $method(&self, context: FlowContext) -> Result<FlowContext, FlowError> {
                self.dispatch(Transition::$transition, context).await
            }
        )+
    };
}

impl FlowDispatcher {
    pub fn new(
        stack: Arc<dyn StackFacade>,
        cluster: Arc<dyn ClusterFacade>,
        locks: FlowLocks,
    ) -> Self {
        Self {
            stack,
            cluster,
            locks,
        }
    }

    /// Dispatcher over the default facades built from `services`.
    pub fn from_services(services: &FacadeServices) -> Self {
        Self::new(
            Arc::new(DefaultStackFacade::new(services)),
            Arc::new(DefaultClusterFacade::new(services)),
            FlowLocks::new(),
        )
    }

    pub fn locks(&self) -> &FlowLocks {
        &self.locks
    }

    /// Runs one transition.
    pub async fn dispatch(
        &self,
        transition: Transition,
        context: FlowContext,
    ) -> Result<FlowContext, FlowError> {
        let stack_id = context.stack_id();
        let span = info_span!("transition", transition = transition.name(), %stack_id);

        async move {
            debug!(?context, "transition started");

            let _lock = match transition.lock_name() {
                Some(operation) => Some(self.locks.acquire(operation, stack_id).await),
                None => None,
            };

            match self.route(transition, context).await {
                Ok(next) => {
                    debug!(context = ?next, "transition finished");
                    Ok(next)
                }
                Err(err) => {
                    let err = FlowError::normalize(err);
                    if err.is_cancellation() {
                        warn!(error = %err, "transition cancelled");
                    } else {
                        error!(kind = %err.kind(), error = ?err, "transition failed");
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn route(&self, transition: Transition, context: FlowContext) -> anyhow::Result<FlowContext> {
        use Transition::*;

        let stack = self.stack.as_ref();
        let cluster = self.cluster.as_ref();
        match transition {
            ProvisionStack => stack.provision(context).await,
            SetupMetadata => stack.setup_metadata(context).await,
            CollectMetadata => stack.collect_metadata(context).await,
            SetupTls => stack.setup_tls(context).await,
            BootstrapCluster => stack.bootstrap_cluster(context).await,
            StartStack => stack.start(context).await,
            StopStackRequested => stack.stop_requested(context).await,
            StopStack => stack.stop(context).await,
            UpscaleStack => stack.upscale(context).await,
            ExtendMetadata => stack.extend_metadata(context).await,
            BootstrapNewNodes => stack.bootstrap_new_nodes(context).await,
            DownscaleStack => stack.downscale(context).await,
            RemoveInstance => stack.remove_instance(context).await,
            SyncStack => stack.sync(context).await,

            RunClusterContainers => cluster.run_cluster_containers(context).await,
            StartManagementServer => cluster.start_management_server(context).await,
            BuildCluster => cluster.build_cluster(context).await,
            ResetCluster => cluster.reset_cluster(context).await,
            StartClusterRequested => cluster.start_requested(context).await,
            StartCluster => cluster.start(context).await,
            StopCluster => cluster.stop(context).await,
            AddClusterContainers => cluster.add_cluster_containers(context).await,
            UpscaleCluster => cluster.upscale(context).await,
            DownscaleCluster => cluster.downscale(context).await,
            EnableSecurity => cluster.enable_security(context).await,
            ChangeCredential => cluster.change_credential(context).await,
            SyncCluster => cluster.sync(context).await,

            HandleStackCreationFailure => stack.handle_creation_failure(context).await,
            HandleStackStatusUpdateFailure => stack.handle_status_update_failure(context).await,
            HandleStackScalingFailure => stack.handle_scaling_failure(context).await,
            HandleClusterCreationFailure => cluster.handle_creation_failure(context).await,
            HandleClusterStartFailure => cluster.handle_start_failure(context).await,
            HandleClusterStopFailure => cluster.handle_stop_failure(context).await,
            HandleClusterScalingFailure => cluster.handle_scaling_failure(context).await,
            HandleSecurityEnableFailure => cluster.handle_security_enable_failure(context).await,
        }
    }

    transitions! {
        provision_stack => ProvisionStack,
        setup_metadata => SetupMetadata,
        collect_metadata => CollectMetadata,
        setup_tls => SetupTls,
        bootstrap_cluster => BootstrapCluster,
        start_stack => StartStack,
        stop_stack_requested => StopStackRequested,
        stop_stack => StopStack,
        upscale_stack => UpscaleStack,
        extend_metadata => ExtendMetadata,
        bootstrap_new_nodes => BootstrapNewNodes,
        downscale_stack => DownscaleStack,
        remove_instance => RemoveInstance,
        sync_stack => SyncStack,
        run_cluster_containers => RunClusterContainers,
        start_management_server => StartManagementServer,
        build_cluster => BuildCluster,
        reset_cluster => ResetCluster,
        start_cluster_requested => StartClusterRequested,
        start_cluster => StartCluster,
        stop_cluster => StopCluster,
        add_cluster_containers => AddClusterContainers,
        upscale_cluster => UpscaleCluster,
        downscale_cluster => DownscaleCluster,
        enable_security => EnableSecurity,
        change_credential => ChangeCredential,
        sync_cluster => SyncCluster,
        handle_stack_creation_failure => HandleStackCreationFailure,
        handle_cluster_creation_failure => HandleClusterCreationFailure,
        handle_stack_status_update_failure => HandleStackStatusUpdateFailure,
        handle_cluster_start_failure => HandleClusterStartFailure,
        handle_cluster_stop_failure => HandleClusterStopFailure,
        handle_stack_scaling_failure => HandleStackScalingFailure,
        handle_cluster_scaling_failure => HandleClusterScalingFailure,
        handle_security_enable_failure => HandleSecurityEnableFailure,
    }
}

impl std::fmt::Debug for FlowDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowDispatcher")
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}
