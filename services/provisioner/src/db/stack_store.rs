//! Postgres-backed `StackStore`.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{PgConnection, Row};
use stackflow_events::Status;
use stackflow_id::{PrivateId, StackId};
use tracing::debug;

use super::DbError;
use crate::cloud::CloudVmMetaData;
use crate::domain::{CloudResource, Cluster, InstanceStatus, Stack};
use crate::store::{apply, StackStore, StoreError};

#[derive(Clone)]
pub struct PgStackStore {
    pool: PgPool,
}

impl PgStackStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads the stack under a row lock, applies `f` and writes it back in
    /// the same transaction. Nothing is written when `f` fails.
    async fn modify<T, F>(&self, stack_id: StackId, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnOnce(&mut Stack) -> Result<T, StoreError> + Send,
    {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        let row = sqlx::query("SELECT document FROM stacks WHERE id = $1 FOR UPDATE")
            .bind(stack_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(DbError::Query)?
            .ok_or(StoreError::NotFound(stack_id))?;

        let mut stack = decode_stack(stack_id, &row)?;
        let out = f(&mut stack)?;
        write_stack(&mut *tx, &stack).await?;

        tx.commit().await.map_err(DbError::Query)?;
        Ok(out)
    }
}

impl std::fmt::Debug for PgStackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStackStore").finish_non_exhaustive()
    }
}

fn decode_stack(stack_id: StackId, row: &PgRow) -> Result<Stack, StoreError> {
    let document: serde_json::Value = row.try_get("document").map_err(DbError::Query)?;
    serde_json::from_value(document)
        .map_err(|e| StoreError::Corrupt(format!("stack {stack_id}: {e}")))
}

async fn write_stack(conn: &mut PgConnection, stack: &Stack) -> Result<(), StoreError> {
    let document = serde_json::to_value(stack).map_err(DbError::from)?;
    sqlx::query(
        r#"
        UPDATE stacks
        SET name = $2,
            status = $3,
            status_reason = $4,
            cluster_status = $5,
            document = $6,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(stack.id.to_string())
    .bind(&stack.name)
    .bind(stack.status.as_str())
    .bind(stack.status_reason.as_deref())
    .bind(stack.cluster.as_ref().map(|c| c.status.as_str()))
    .bind(document)
    .execute(conn)
    .await
    .map_err(DbError::Query)?;
    Ok(())
}

#[async_trait]
impl StackStore for PgStackStore {
    async fn insert_stack(&self, stack: &Stack) -> Result<(), StoreError> {
        stack
            .validate_topology()
            .map_err(StoreError::InvalidTopology)?;
        let document = serde_json::to_value(stack).map_err(DbError::from)?;

        sqlx::query(
            r#"
            INSERT INTO stacks (id, name, platform, status, status_reason, cluster_status, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                platform = EXCLUDED.platform,
                status = EXCLUDED.status,
                status_reason = EXCLUDED.status_reason,
                cluster_status = EXCLUDED.cluster_status,
                document = EXCLUDED.document,
                updated_at = now()
            "#,
        )
        .bind(stack.id.to_string())
        .bind(&stack.name)
        .bind(stack.platform.as_str())
        .bind(stack.status.as_str())
        .bind(stack.status_reason.as_deref())
        .bind(stack.cluster.as_ref().map(|c| c.status.as_str()))
        .bind(document)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        debug!(stack_id = %stack.id, "stack stored");
        Ok(())
    }

    async fn get_stack(&self, stack_id: StackId) -> Result<Stack, StoreError> {
        let row = sqlx::query("SELECT document FROM stacks WHERE id = $1")
            .bind(stack_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Query)?
            .ok_or(StoreError::NotFound(stack_id))?;
        decode_stack(stack_id, &row)
    }

    async fn list_stack_ids(&self) -> Result<Vec<StackId>, StoreError> {
        let rows = sqlx::query("SELECT id FROM stacks ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Query)?;

        rows.iter()
            .map(|row| {
                let raw: String = row.try_get("id").map_err(DbError::Query)?;
                StackId::parse(&raw).map_err(|e| StoreError::Corrupt(format!("stack id {raw}: {e}")))
            })
            .collect()
    }

    async fn update_stack_status(
        &self,
        stack_id: StackId,
        status: Status,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        self.modify(stack_id, |stack| {
            stack.status = status;
            stack.status_reason = reason.map(str::to_string);
            Ok(())
        })
        .await
    }

    async fn update_cluster_status(
        &self,
        stack_id: StackId,
        status: Status,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        self.modify(stack_id, |stack| {
            let cluster = stack
                .cluster
                .as_mut()
                .ok_or(StoreError::ClusterNotFound(stack_id))?;
            cluster.status = status;
            cluster.status_reason = reason.map(str::to_string);
            Ok(())
        })
        .await
    }

    async fn save_cluster(&self, stack_id: StackId, cluster: &Cluster) -> Result<(), StoreError> {
        self.modify(stack_id, |stack| {
            stack.cluster = Some(cluster.clone());
            Ok(())
        })
        .await
    }

    async fn save_instance_requests(
        &self,
        stack_id: StackId,
        group: &str,
        count: u32,
    ) -> Result<Vec<PrivateId>, StoreError> {
        self.modify(stack_id, |stack| apply::add_requests(stack, group, count))
            .await
    }

    async fn delete_instance_request(
        &self,
        stack_id: StackId,
        private_id: PrivateId,
    ) -> Result<bool, StoreError> {
        self.modify(stack_id, |stack| Ok(apply::delete_request(stack, private_id)))
            .await
    }

    async fn set_node_count(
        &self,
        stack_id: StackId,
        group: &str,
        node_count: u32,
    ) -> Result<(), StoreError> {
        self.modify(stack_id, |stack| {
            apply::group_mut(stack, group)?.node_count = node_count;
            Ok(())
        })
        .await
    }

    async fn update_instance_metadata(
        &self,
        stack_id: StackId,
        metadata: &[CloudVmMetaData],
    ) -> Result<(), StoreError> {
        self.modify(stack_id, |stack| apply::apply_metadata(stack, metadata))
            .await
    }

    async fn update_instance_status(
        &self,
        stack_id: StackId,
        private_id: PrivateId,
        status: InstanceStatus,
    ) -> Result<(), StoreError> {
        self.modify(stack_id, |stack| {
            apply::instance_mut(stack, private_id)?.status = status;
            Ok(())
        })
        .await
    }

    async fn remove_instances(
        &self,
        stack_id: StackId,
        private_ids: &[PrivateId],
    ) -> Result<(), StoreError> {
        self.modify(stack_id, |stack| {
            apply::remove_instances(stack, private_ids);
            Ok(())
        })
        .await
    }

    async fn save_resources(
        &self,
        stack_id: StackId,
        resources: &[CloudResource],
    ) -> Result<(), StoreError> {
        self.modify(stack_id, |stack| {
            stack.resources.extend_from_slice(resources);
            Ok(())
        })
        .await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }
}
