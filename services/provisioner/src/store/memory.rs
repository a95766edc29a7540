//! In-memory stack store for dev mode and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use stackflow_events::Status;
use stackflow_id::{PrivateId, StackId};

use super::{apply, StackStore, StoreError};
use crate::cloud::CloudVmMetaData;
use crate::domain::{CloudResource, Cluster, InstanceStatus, Stack};
use crate::locked;

#[derive(Debug, Default)]
pub struct InMemoryStackStore {
    stacks: Mutex<HashMap<StackId, Stack>>,
}

impl InMemoryStackStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_stack<T>(
        &self,
        stack_id: StackId,
        f: impl FnOnce(&mut Stack) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut stacks = locked(&self.stacks);
        let stack = stacks
            .get_mut(&stack_id)
            .ok_or(StoreError::NotFound(stack_id))?;
        f(stack)
    }
}

#[async_trait]
impl StackStore for InMemoryStackStore {
    async fn insert_stack(&self, stack: &Stack) -> Result<(), StoreError> {
        stack
            .validate_topology()
            .map_err(StoreError::InvalidTopology)?;
        locked(&self.stacks).insert(stack.id, stack.clone());
        Ok(())
    }

    async fn get_stack(&self, stack_id: StackId) -> Result<Stack, StoreError> {
        locked(&self.stacks)
            .get(&stack_id)
            .cloned()
            .ok_or(StoreError::NotFound(stack_id))
    }

    async fn list_stack_ids(&self) -> Result<Vec<StackId>, StoreError> {
        let mut ids: Vec<_> = locked(&self.stacks).keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn update_stack_status(
        &self,
        stack_id: StackId,
        status: Status,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_stack(stack_id, |stack| {
            stack.status = status;
            stack.status_reason = reason.map(str::to_string);
            Ok(())
        })
    }

    async fn update_cluster_status(
        &self,
        stack_id: StackId,
        status: Status,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_stack(stack_id, |stack| {
            let cluster = stack
                .cluster
                .as_mut()
                .ok_or(StoreError::ClusterNotFound(stack_id))?;
            cluster.status = status;
            cluster.status_reason = reason.map(str::to_string);
            Ok(())
        })
    }

    async fn save_cluster(&self, stack_id: StackId, cluster: &Cluster) -> Result<(), StoreError> {
        self.with_stack(stack_id, |stack| {
            stack.cluster = Some(cluster.clone());
            Ok(())
        })
    }

    async fn save_instance_requests(
        &self,
        stack_id: StackId,
        group: &str,
        count: u32,
    ) -> Result<Vec<PrivateId>, StoreError> {
        self.with_stack(stack_id, |stack| apply::add_requests(stack, group, count))
    }

    async fn delete_instance_request(
        &self,
        stack_id: StackId,
        private_id: PrivateId,
    ) -> Result<bool, StoreError> {
        self.with_stack(stack_id, |stack| Ok(apply::delete_request(stack, private_id)))
    }

    async fn set_node_count(
        &self,
        stack_id: StackId,
        group: &str,
        node_count: u32,
    ) -> Result<(), StoreError> {
        self.with_stack(stack_id, |stack| {
            apply::group_mut(stack, group)?.node_count = node_count;
            Ok(())
        })
    }

    async fn update_instance_metadata(
        &self,
        stack_id: StackId,
        metadata: &[CloudVmMetaData],
    ) -> Result<(), StoreError> {
        self.with_stack(stack_id, |stack| apply::apply_metadata(stack, metadata))
    }

    async fn update_instance_status(
        &self,
        stack_id: StackId,
        private_id: PrivateId,
        status: InstanceStatus,
    ) -> Result<(), StoreError> {
        self.with_stack(stack_id, |stack| {
            apply::instance_mut(stack, private_id)?.status = status;
            Ok(())
        })
    }

    async fn remove_instances(
        &self,
        stack_id: StackId,
        private_ids: &[PrivateId],
    ) -> Result<(), StoreError> {
        self.with_stack(stack_id, |stack| {
            apply::remove_instances(stack, private_ids);
            Ok(())
        })
    }

    async fn save_resources(
        &self,
        stack_id: StackId,
        resources: &[CloudResource],
    ) -> Result<(), StoreError> {
        self.with_stack(stack_id, |stack| {
            stack.resources.extend_from_slice(resources);
            Ok(())
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
