//! Persistence of stacks, instance metadata and clusters.
//!
//! Flows never hold on to a loaded `Stack`: they re-read it through
//! `StackStore::get_stack` and write changes back with the narrow update
//! operations below.

pub(crate) mod apply;
mod memory;

pub use memory::InMemoryStackStore;

use async_trait::async_trait;
use stackflow_events::Status;
use stackflow_id::{PrivateId, StackId};
use thiserror::Error;

use crate::cloud::CloudVmMetaData;
use crate::db::DbError;
use crate::domain::{CloudResource, Cluster, InstanceStatus, Stack};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("stack not found: {0}")]
    NotFound(StackId),

    #[error("instance group '{group}' not found on stack {stack_id}")]
    GroupNotFound { stack_id: StackId, group: String },

    #[error("instance {private_id} not found on stack {stack_id}")]
    InstanceNotFound {
        stack_id: StackId,
        private_id: PrivateId,
    },

    #[error("stack {0} has no cluster")]
    ClusterNotFound(StackId),

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// A persisted row could not be mapped back to a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] DbError),
}

#[async_trait]
pub trait StackStore: Send + Sync {
    /// Persists a new stack. The topology must contain exactly one gateway group.
    async fn insert_stack(&self, stack: &Stack) -> Result<(), StoreError>;

    async fn get_stack(&self, stack_id: StackId) -> Result<Stack, StoreError>;

    async fn list_stack_ids(&self) -> Result<Vec<StackId>, StoreError>;

    async fn update_stack_status(
        &self,
        stack_id: StackId,
        status: Status,
        reason: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn update_cluster_status(
        &self,
        stack_id: StackId,
        status: Status,
        reason: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn save_cluster(&self, stack_id: StackId, cluster: &Cluster) -> Result<(), StoreError>;

    /// Records `count` pending instance requests in `group` and returns the
    /// private ids assigned to them. Ids continue after the highest id in use
    /// on the stack, starting at 0.
    async fn save_instance_requests(
        &self,
        stack_id: StackId,
        group: &str,
        count: u32,
    ) -> Result<Vec<PrivateId>, StoreError>;

    /// Drops the record of `private_id`. Returns false when there was none.
    async fn delete_instance_request(
        &self,
        stack_id: StackId,
        private_id: PrivateId,
    ) -> Result<bool, StoreError>;

    async fn set_node_count(
        &self,
        stack_id: StackId,
        group: &str,
        node_count: u32,
    ) -> Result<(), StoreError>;

    /// Stores addresses reported by the cloud. Requested instances become
    /// created; other instances keep their status.
    async fn update_instance_metadata(
        &self,
        stack_id: StackId,
        metadata: &[CloudVmMetaData],
    ) -> Result<(), StoreError>;

    async fn update_instance_status(
        &self,
        stack_id: StackId,
        private_id: PrivateId,
        status: InstanceStatus,
    ) -> Result<(), StoreError>;

    async fn remove_instances(
        &self,
        stack_id: StackId,
        private_ids: &[PrivateId],
    ) -> Result<(), StoreError>;

    /// Appends resources created for the stack.
    async fn save_resources(
        &self,
        stack_id: StackId,
        resources: &[CloudResource],
    ) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
