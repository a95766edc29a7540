//! Postgres-backed event sink.
//!
//! Lifecycle events land in the append-only `stack_events` table and client
//! notifications in `stack_notifications`, where downstream consumers pick
//! them up in insertion order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPool, Row};
use stackflow_events::{LifecycleEvent, Notification};
use stackflow_id::StackId;

use super::DbError;
use crate::events::EventSink;
use crate::store::StoreError;

#[derive(Clone)]
pub struct PgEventSink {
    pool: PgPool,
}

impl PgEventSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Events of one stack, oldest first.
    pub async fn events_for(&self, stack_id: StackId) -> Result<Vec<LifecycleEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_type, message, occurred_at
            FROM stack_events
            WHERE stack_id = $1
            ORDER BY event_id
            "#,
        )
        .bind(stack_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        rows.iter()
            .map(|row| {
                let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(DbError::Query)?;
                Ok(LifecycleEvent {
                    stack_id,
                    event_type: row.try_get("event_type").map_err(DbError::Query)?,
                    message: row.try_get("message").map_err(DbError::Query)?,
                    occurred_at,
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for PgEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgEventSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl EventSink for PgEventSink {
    async fn fire_event(&self, event: LifecycleEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stack_events (stack_id, event_type, message, occurred_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(event.stack_id.to_string())
        .bind(&event.event_type)
        .bind(&event.message)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;
        Ok(())
    }

    async fn send_notification(&self, notification: Notification) -> Result<(), StoreError> {
        let payload = serde_json::to_value(&notification).map_err(DbError::from)?;
        sqlx::query(
            r#"
            INSERT INTO stack_notifications (stack_id, event_type, payload, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(notification.stack_id.to_string())
        .bind(&notification.event_type)
        .bind(payload)
        .bind(notification.event_timestamp)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;
        Ok(())
    }
}
