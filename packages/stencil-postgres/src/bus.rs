//! PostgreSQL-backed event bus.
//!
//! One row per `(topic, execution_id)`; publish is an upsert, lookup is a
//! direct select. Metadata and body are stored as JSONB.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use stencil::{BusError, Event, EventBus, JsonMap};

/// Durable [`EventBus`] over a `event_model` table.
#[derive(Debug, Clone)]
pub struct PgEventBus {
    pool: PgPool,
}

impl PgEventBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `event_model` table if it does not exist. Safe to re-run.
    pub async fn ensure_schema(&self) -> Result<(), BusError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_model (
                topic TEXT NOT NULL,
                execution_id TEXT NOT NULL,
                metadata JSONB NOT NULL,
                body JSONB NOT NULL,
                published_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (topic, execution_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    /// Drop the `event_model` table. Used by integration test teardown.
    pub async fn drop_storage(&self) -> Result<(), BusError> {
        sqlx::query("DROP TABLE IF EXISTS event_model")
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl EventBus for PgEventBus {
    async fn publish(&self, event: &Event) -> Result<(), BusError> {
        sqlx::query(
            r#"
            INSERT INTO event_model (topic, execution_id, metadata, body)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (topic, execution_id)
            DO UPDATE SET metadata = EXCLUDED.metadata,
                          body = EXCLUDED.body,
                          published_at = NOW()
            "#,
        )
        .bind(&event.topic)
        .bind(event.routing_key())
        .bind(serde_json::Value::Object(event.metadata.clone()))
        .bind(serde_json::Value::Object(event.body.clone()))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        tracing::debug!(topic = %event.topic, execution_id = %event.routing_key(), "published event");
        Ok(())
    }

    async fn get(&self, topic: &str, execution_id: &str) -> Result<Option<Event>, BusError> {
        let row = sqlx::query(
            r#"
            SELECT topic, metadata, body
            FROM event_model
            WHERE topic = $1 AND execution_id = $2
            "#,
        )
        .bind(topic)
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(|row| {
            Ok(Event {
                topic: row.try_get("topic").map_err(backend)?,
                metadata: json_object(row.try_get("metadata").map_err(backend)?),
                body: json_object(row.try_get("body").map_err(backend)?),
            })
        })
        .transpose()
    }
}

fn backend(error: sqlx::Error) -> BusError {
    BusError::Backend(error.into())
}

fn json_object(value: serde_json::Value) -> JsonMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn bus() -> PgEventBus {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for pg tests");
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .expect("connect to postgres");
        let bus = PgEventBus::new(pool);
        bus.ensure_schema().await.expect("ensure schema");
        bus
    }

    fn stamped(topic: &str, execution_id: &str) -> Event {
        let mut event = Event::new(topic);
        event.stamp_execution_id(execution_id);
        event
    }

    #[tokio::test]
    #[ignore = "requires postgres via DATABASE_URL"]
    async fn test_publish_get_round_trips() {
        let bus = bus().await;
        let execution_id = uuid::Uuid::new_v4().to_string();
        let event = stamped("new_order", &execution_id).with_body_entry("order_id", "ABC");

        bus.publish(&event).await.unwrap();

        let found = bus.get("new_order", &execution_id).await.unwrap().unwrap();
        assert_eq!(found, event);
        assert!(bus.get("new_order", "unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires postgres via DATABASE_URL"]
    async fn test_republish_upserts() {
        let bus = bus().await;
        let execution_id = uuid::Uuid::new_v4().to_string();

        bus.publish(&stamped("new_order", &execution_id).with_body_entry("v", 1))
            .await
            .unwrap();
        bus.publish(&stamped("new_order", &execution_id).with_body_entry("v", 2))
            .await
            .unwrap();

        let found = bus.get("new_order", &execution_id).await.unwrap().unwrap();
        assert_eq!(found.body["v"], serde_json::json!(2));
    }
}
