//! Scripted cloud connector used in dev mode and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use stackflow_id::PrivateId;
use tracing::{debug, info};

use super::{
    CheckImageResult, CloudConnector, CloudError, CloudInstanceState, CloudResourceStatus,
    CloudStack, CloudVmMetaData, ConnectorRequest, ImageStatus, InstanceState, LaunchStackResult,
    UpscaleStackResult,
};
use crate::domain::{CloudResource, Stack};
use crate::locked;

/// One recorded call against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCall {
    Notify { selector: &'static str },
    Rollback { resources: usize },
    StartInstances,
    StopInstances,
    CollectMetadata { private_ids: Vec<PrivateId> },
    RemoveInstances { instance_ids: Vec<String> },
    InstanceStates,
}

#[derive(Debug, Default)]
struct Script {
    failed_instances: HashMap<PrivateId, String>,
    launch_error: Option<CloudError>,
    image: Option<CheckImageResult>,
    interrupt_requests: bool,
    rollback_error: Option<String>,
    stop_error: Option<String>,
    metadata_error: Option<String>,
    instance_states: HashMap<PrivateId, InstanceState>,
}

/// Mock connector.
///
/// Asynchronous requests are answered immediately from the script; every
/// instance not scripted to fail is created. Instance metadata is derived
/// from the private id.
#[derive(Debug, Default)]
pub struct MockCloudConnector {
    script: Mutex<Script>,
    calls: Mutex<Vec<CloudCall>>,
}

impl MockCloudConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports the instance `private_id` as failed on launch and upscale.
    #[must_use]
    pub fn failing_instance(self, private_id: PrivateId, reason: impl Into<String>) -> Self {
        locked(&self.script)
            .failed_instances
            .insert(private_id, reason.into());
        self
    }

    /// Reports `error` as the outcome of launch and upscale requests.
    #[must_use]
    pub fn with_launch_error(self, error: CloudError) -> Self {
        locked(&self.script).launch_error = Some(error);
        self
    }

    #[must_use]
    pub fn with_image(self, status: ImageStatus, progress: u8) -> Self {
        locked(&self.script).image = Some(CheckImageResult { status, progress });
        self
    }

    /// Drops every asynchronous request without answering it.
    #[must_use]
    pub fn interrupting(self) -> Self {
        locked(&self.script).interrupt_requests = true;
        self
    }

    #[must_use]
    pub fn failing_rollback(self, message: impl Into<String>) -> Self {
        locked(&self.script).rollback_error = Some(message.into());
        self
    }

    #[must_use]
    pub fn failing_stop(self, message: impl Into<String>) -> Self {
        locked(&self.script).stop_error = Some(message.into());
        self
    }

    #[must_use]
    pub fn failing_metadata(self, message: impl Into<String>) -> Self {
        locked(&self.script).metadata_error = Some(message.into());
        self
    }

    /// Overrides the state reported for one instance.
    pub fn set_instance_state(&self, private_id: PrivateId, state: InstanceState) {
        locked(&self.script)
            .instance_states
            .insert(private_id, state);
    }

    pub fn calls(&self) -> Vec<CloudCall> {
        locked(&self.calls).clone()
    }

    pub fn rollback_count(&self) -> usize {
        locked(&self.calls)
            .iter()
            .filter(|c| matches!(c, CloudCall::Rollback { .. }))
            .count()
    }

    fn record(&self, call: CloudCall) {
        debug!(?call, "[MOCK] cloud call");
        locked(&self.calls).push(call);
    }

    fn launch(&self, stack: &CloudStack) -> (Vec<CloudResourceStatus>, Vec<CloudResource>, Option<CloudError>) {
        let script = locked(&self.script);
        if let Some(error) = &script.launch_error {
            return (Vec::new(), Vec::new(), Some(error.clone()));
        }

        let mut results = Vec::new();
        let mut resources = vec![CloudResource::new("NETWORK", "stackflow-network")];
        for instance in stack.groups.iter().flat_map(|g| g.instances.iter()) {
            match script.failed_instances.get(&instance.private_id) {
                Some(reason) => {
                    results.push(CloudResourceStatus::failed(instance.private_id, reason.clone()))
                }
                None => {
                    results.push(CloudResourceStatus::created(instance.private_id));
                    resources.push(CloudResource::new(
                        "INSTANCE",
                        instance_id(instance.private_id),
                    ));
                }
            }
        }
        (results, resources, None)
    }
}

fn instance_id(private_id: PrivateId) -> String {
    format!("i-{:08x}", private_id.value())
}

/// Metadata the mock reports for `private_id`.
pub(crate) fn mock_metadata(private_id: PrivateId) -> CloudVmMetaData {
    let id = private_id.value();
    let (hi, lo) = ((id / 256) % 256, id % 256);
    CloudVmMetaData {
        private_id,
        instance_id: instance_id(private_id),
        private_ip: format!("10.0.{hi}.{lo}"),
        public_ip: format!("52.0.{hi}.{lo}"),
        long_hostname: format!("host-{id}.stackflow.internal"),
    }
}

#[async_trait]
impl CloudConnector for MockCloudConnector {
    fn notify(&self, request: ConnectorRequest) -> Result<(), CloudError> {
        self.record(CloudCall::Notify {
            selector: request.selector(),
        });

        if locked(&self.script).interrupt_requests {
            info!(selector = request.selector(), "[MOCK] dropping request");
            return Ok(());
        }

        match request {
            ConnectorRequest::Launch(request) => {
                let (results, resources, error) = self.launch(&request.payload.stack);
                request.complete(LaunchStackResult {
                    results,
                    resources,
                    error,
                });
            }
            ConnectorRequest::Upscale(request) => {
                let (results, resources, error) = self.launch(&request.payload.stack);
                request.complete(UpscaleStackResult {
                    results,
                    resources,
                    error,
                });
            }
            ConnectorRequest::CheckImage(request) => {
                let image = locked(&self.script).image.unwrap_or(CheckImageResult {
                    status: ImageStatus::CreateFinished,
                    progress: 100,
                });
                request.complete(image);
            }
        }
        Ok(())
    }

    async fn rollback(&self, _stack: &Stack, resources: &[CloudResource]) -> Result<(), CloudError> {
        self.record(CloudCall::Rollback {
            resources: resources.len(),
        });
        match &locked(&self.script).rollback_error {
            Some(message) => Err(CloudError::Provider(message.clone())),
            None => Ok(()),
        }
    }

    async fn start_instances(&self, stack: &Stack) -> Result<(), CloudError> {
        self.record(CloudCall::StartInstances);
        let mut script = locked(&self.script);
        for instance in stack.instances() {
            script
                .instance_states
                .insert(instance.private_id, InstanceState::Running);
        }
        Ok(())
    }

    async fn stop_instances(&self, stack: &Stack) -> Result<(), CloudError> {
        self.record(CloudCall::StopInstances);
        let mut script = locked(&self.script);
        if let Some(message) = &script.stop_error {
            return Err(CloudError::Provider(message.clone()));
        }
        for instance in stack.instances() {
            script
                .instance_states
                .insert(instance.private_id, InstanceState::Stopped);
        }
        Ok(())
    }

    async fn collect_metadata(
        &self,
        _stack: &Stack,
        private_ids: &[PrivateId],
    ) -> Result<Vec<CloudVmMetaData>, CloudError> {
        self.record(CloudCall::CollectMetadata {
            private_ids: private_ids.to_vec(),
        });
        if let Some(message) = &locked(&self.script).metadata_error {
            return Err(CloudError::Provider(message.clone()));
        }
        Ok(private_ids.iter().copied().map(mock_metadata).collect())
    }

    async fn remove_instances(
        &self,
        _stack: &Stack,
        instance_ids: &[String],
    ) -> Result<(), CloudError> {
        self.record(CloudCall::RemoveInstances {
            instance_ids: instance_ids.to_vec(),
        });
        Ok(())
    }

    async fn instance_states(&self, stack: &Stack) -> Result<Vec<CloudInstanceState>, CloudError> {
        self.record(CloudCall::InstanceStates);
        let script = locked(&self.script);
        Ok(stack
            .instances()
            .filter(|i| i.instance_id.is_some())
            .map(|i| CloudInstanceState {
                private_id: i.private_id,
                state: script
                    .instance_states
                    .get(&i.private_id)
                    .copied()
                    .unwrap_or(InstanceState::Running),
            })
            .collect())
    }
}
