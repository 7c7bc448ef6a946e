//! PostgreSQL store backend: durable execution/state rows plus a dispatch
//! queue table.
//!
//! # The queue
//!
//! The queue is a table named `<prefix>BlueprintInstructionExecutionStore`,
//! created on first use. Messages are claimed with `FOR UPDATE SKIP LOCKED`;
//! claiming pushes `visible_at` forward by the lease duration, which is the
//! visibility timeout: a claimed message is invisible to other workers until
//! it is deleted (ack) or the lease expires (crash/requeue redelivery).
//! With N concurrent receives on one visible message, exactly one caller
//! gets it.
//!
//! # Crash authority
//!
//! The state row is authoritative; queue redelivery is advisory. A
//! redelivered message whose row is already terminal is deleted and skipped
//! without being handed to a worker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use stencil::wire;
use stencil::{
    BlueprintExecution, BlueprintInstructionState, BlueprintManager, InstructionStatus, JsonMap,
    StoreBackend, StoreError,
};

use crate::config::{validate_queue_name, StoreConfig};

const DEFAULT_LEASE: Duration = Duration::from_secs(60);

/// Durable [`StoreBackend`] over two row tables and a queue table.
pub struct PgBackend {
    pool: PgPool,
    manager: Arc<BlueprintManager>,
    queue_table: String,
    lease_ms: i64,
}

impl PgBackend {
    /// Build a backend for the configured queue.
    ///
    /// The blueprint manager is used to re-validate component names when
    /// rehydrating queue payloads, exactly as it validated them at
    /// registration time.
    pub fn new(
        pool: PgPool,
        manager: Arc<BlueprintManager>,
        config: &StoreConfig,
    ) -> anyhow::Result<Self> {
        let queue_table = config.queue_name();
        validate_queue_name(&queue_table)?;
        Ok(Self {
            pool,
            manager,
            queue_table,
            lease_ms: DEFAULT_LEASE.as_millis() as i64,
        })
    }

    /// Override the lease duration (visibility timeout).
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_ms = lease.as_millis() as i64;
        self
    }

    /// The queue table name in use.
    pub fn queue_table(&self) -> &str {
        &self.queue_table
    }

    /// Create the row tables and the queue table if absent. Safe to re-run.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blueprint_execution_model (
                execution_id TEXT PRIMARY KEY,
                execution_context JSONB NOT NULL,
                blueprint JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blueprint_instruction_state_model (
                instruction_state_id TEXT PRIMARY KEY,
                blueprint_execution_id TEXT NOT NULL,
                instruction JSONB NOT NULL,
                status TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {queue} (
                message_id UUID PRIMARY KEY,
                state_id TEXT NOT NULL,
                payload JSONB NOT NULL,
                enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                visible_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                worker_id TEXT
            )
            "#,
            queue = self.queue_ident()
        ))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(&format!(
            r#"CREATE INDEX IF NOT EXISTS "{table}_visible_idx" ON {queue} (visible_at, enqueued_at)"#,
            table = self.queue_table,
            queue = self.queue_ident()
        ))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        tracing::info!(queue = %self.queue_table, "execution store schema ready");
        Ok(())
    }

    /// Drop the row tables and the queue table. Used by integration test
    /// teardown.
    pub async fn drop_storage(&self) -> Result<(), StoreError> {
        for statement in [
            format!("DROP TABLE IF EXISTS {}", self.queue_ident()),
            "DROP TABLE IF EXISTS blueprint_instruction_state_model".to_string(),
            "DROP TABLE IF EXISTS blueprint_execution_model".to_string(),
        ] {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        }
        Ok(())
    }

    fn queue_ident(&self) -> String {
        format!("\"{}\"", self.queue_table)
    }

    /// Claim the next visible message, pushing its `visible_at` out by the
    /// lease duration. Returns the raw payload.
    async fn claim_message(&self, worker_id: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let sql = format!(
            r#"
            WITH next_message AS (
                SELECT message_id
                FROM {queue}
                WHERE visible_at <= NOW()
                ORDER BY enqueued_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE {queue} q
            SET visible_at = NOW() + ($1 || ' milliseconds')::INTERVAL,
                worker_id = $2
            WHERE q.message_id IN (SELECT message_id FROM next_message)
            RETURNING q.payload
            "#,
            queue = self.queue_ident()
        );

        let row = sqlx::query(&sql)
            .bind(self.lease_ms.to_string())
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(|row| row.try_get("payload").map_err(backend)).transpose()
    }

    async fn delete_message(&self, state_id: &str) -> Result<(), StoreError> {
        let sql = format!(
            "DELETE FROM {queue} WHERE state_id = $1",
            queue = self.queue_ident()
        );
        sqlx::query(&sql)
            .bind(state_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn row_status(&self, state_id: &str) -> Result<Option<InstructionStatus>, StoreError> {
        let row = sqlx::query(
            "SELECT status FROM blueprint_instruction_state_model WHERE instruction_state_id = $1",
        )
        .bind(state_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(|row| {
            let status: String = row.try_get("status").map_err(backend)?;
            status
                .parse::<InstructionStatus>()
                .map_err(|message| StoreError::Backend(anyhow::anyhow!(message)))
        })
        .transpose()
    }

    fn rehydrate(&self, payload: serde_json::Value) -> Result<BlueprintInstructionState, StoreError> {
        let state = wire::state_from_value(payload.clone())?;
        // Re-check that the component names still resolve before handing the
        // state to a worker.
        let raw_instruction = payload
            .get("instruction")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        self.manager
            .objectify_instruction(&raw_instruction)
            .map_err(|error| {
                StoreError::Backend(
                    anyhow::Error::new(error).context("queue payload no longer resolves in namespace"),
                )
            })?;
        Ok(state)
    }
}

#[async_trait]
impl StoreBackend for PgBackend {
    async fn insert_execution(&self, execution: &BlueprintExecution) -> Result<(), StoreError> {
        let blueprint = serde_json::to_value(&execution.blueprint)?;
        let result = sqlx::query(
            r#"
            INSERT INTO blueprint_execution_model (execution_id, execution_context, blueprint)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&execution.execution_id)
        .bind(serde_json::Value::Object(execution.execution_context.clone()))
        .bind(blueprint)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                StoreError::DuplicateExecution(execution.execution_id.clone()),
            ),
            Err(error) => Err(backend(error)),
        }
    }

    async fn insert_instruction_state(
        &self,
        state: &BlueprintInstructionState,
    ) -> Result<(), StoreError> {
        let payload = wire::state_to_value(state)?;

        sqlx::query(
            r#"
            INSERT INTO blueprint_instruction_state_model
                (instruction_state_id, blueprint_execution_id, instruction, status)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(state.id.to_string())
        .bind(&state.blueprint_execution_id)
        .bind(serde_json::to_value(&state.instruction)?)
        .bind(state.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        let sql = format!(
            "INSERT INTO {queue} (message_id, state_id, payload) VALUES ($1, $2, $3)",
            queue = self.queue_ident()
        );
        sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(state.id.to_string())
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn receive(
        &self,
        worker_id: &str,
    ) -> Result<Option<BlueprintInstructionState>, StoreError> {
        loop {
            let Some(payload) = self.claim_message(worker_id).await? else {
                return Ok(None);
            };
            let state = self.rehydrate(payload)?;

            // The row is authoritative after a crash: drop redelivered
            // messages whose state already went terminal.
            match self.row_status(&state.id.to_string()).await? {
                Some(status) if status.is_terminal() => {
                    tracing::warn!(
                        state_id = %state.id,
                        %status,
                        "dropping redelivered message for terminal state"
                    );
                    self.delete_message(&state.id.to_string()).await?;
                    continue;
                }
                Some(_) => return Ok(Some(state)),
                None => {
                    return Err(StoreError::Backend(anyhow::anyhow!(
                        "queued state {} has no row",
                        state.id
                    )))
                }
            }
        }
    }

    async fn set_status(
        &self,
        state: &BlueprintInstructionState,
        status: InstructionStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE blueprint_instruction_state_model SET status = $1 WHERE instruction_state_id = $2",
        )
        .bind(status.as_str())
        .bind(state.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StateNotFound(state.id));
        }
        Ok(())
    }

    async fn remove_from_queue(
        &self,
        state: &BlueprintInstructionState,
    ) -> Result<(), StoreError> {
        self.delete_message(&state.id.to_string()).await
    }

    async fn execution_context(&self, execution_id: &str) -> Result<JsonMap, StoreError> {
        let row = sqlx::query(
            "SELECT execution_context FROM blueprint_execution_model WHERE execution_id = $1",
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else {
            return Err(StoreError::ExecutionNotFound(execution_id.to_string()));
        };
        let context: serde_json::Value = row.try_get("execution_context").map_err(backend)?;
        serde_json::from_value(context)
            .context("execution_context column is not a JSON object")
            .map_err(StoreError::Backend)
    }
}

impl std::fmt::Debug for PgBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgBackend")
            .field("queue_table", &self.queue_table)
            .field("lease_ms", &self.lease_ms)
            .finish_non_exhaustive()
    }
}

fn backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.into())
}
