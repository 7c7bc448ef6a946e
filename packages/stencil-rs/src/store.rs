//! The execution store: durable record of executions and instruction states,
//! plus the dispatch queue that hands ready states to workers.
//!
//! # Split of responsibilities
//!
//! [`ExecutionStore`] owns the status transitions and the queue-lifecycle
//! rules; backends implement a small [`StoreBackend`] interface (row inserts,
//! queue receive/delete, status column updates, context reads). The invariants
//! live here, once, regardless of backend:
//!
//! - `store` persists the execution row first, then each instruction state.
//! - `lease` transitions the returned state to `PROCESSING` before handing it
//!   back.
//! - Terminal statuses delete the queue message; `requeue` leaves it so the
//!   queue's visibility timeout redelivers.
//! - Terminal statuses are sticky: acking or requeueing an already-terminal
//!   state is a no-op.
//!
//! # The queue is the lock
//!
//! At most one worker holds a lease on a given state at a time; the lease
//! duration is the queue's visibility timeout. Expired leases become
//! re-acquirable, which is also the crash-recovery path: a worker that dies
//! mid-process simply lets the message resurface.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{BlueprintExecution, BlueprintInstructionState, InstructionStatus, JsonMap};

/// Backend hooks consumed by [`ExecutionStore`].
///
/// Implementations: [`InMemoryBackend`](crate::InMemoryBackend) (test double)
/// and the Postgres backend in `stencil-postgres`.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Insert the execution row. Duplicate execution ids must fail with
    /// [`StoreError::DuplicateExecution`].
    async fn insert_execution(&self, execution: &BlueprintExecution) -> Result<(), StoreError>;

    /// Insert the state row and enqueue its wire JSON on the dispatch queue.
    async fn insert_instruction_state(
        &self,
        state: &BlueprintInstructionState,
    ) -> Result<(), StoreError>;

    /// Receive up to one message from the queue and rehydrate it.
    ///
    /// Receiving starts the lease: the message must be invisible to other
    /// callers until it is deleted or the visibility timeout expires. Returns
    /// `None` when the queue is empty.
    async fn receive(
        &self,
        worker_id: &str,
    ) -> Result<Option<BlueprintInstructionState>, StoreError>;

    /// Update the status column of the state row. Row only; queue lifecycle
    /// is the caller's business.
    async fn set_status(
        &self,
        state: &BlueprintInstructionState,
        status: InstructionStatus,
    ) -> Result<(), StoreError>;

    /// Delete the leased message for this state so it is never redelivered.
    async fn remove_from_queue(
        &self,
        state: &BlueprintInstructionState,
    ) -> Result<(), StoreError>;

    /// Read the execution row and return its context.
    async fn execution_context(&self, execution_id: &str) -> Result<JsonMap, StoreError>;
}

/// Store operations shared by every backend.
#[derive(Debug)]
pub struct ExecutionStore<B> {
    backend: B,
}

impl<B: StoreBackend> ExecutionStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Access the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Persist an execution and enqueue all of its instruction states.
    ///
    /// Execution row first, then states, so a leased state always finds its
    /// execution. Not atomic across steps: on failure the caller retries the
    /// whole call, and the duplicate-id check makes the retry loud rather
    /// than silently forked.
    pub async fn store(&self, execution: &BlueprintExecution) -> Result<(), StoreError> {
        self.backend.insert_execution(execution).await?;
        for state in &execution.instructions_states {
            self.backend.insert_instruction_state(state).await?;
        }
        tracing::debug!(
            execution_id = %execution.execution_id,
            states = execution.instructions_states.len(),
            "stored blueprint execution"
        );
        Ok(())
    }

    /// Lease the next ready instruction state, transitioning it to
    /// `PROCESSING`. Returns `None` when nothing is queued.
    pub async fn lease(
        &self,
        worker_id: &str,
    ) -> Result<Option<BlueprintInstructionState>, StoreError> {
        let Some(mut state) = self.backend.receive(worker_id).await? else {
            return Ok(None);
        };
        state.status = InstructionStatus::Processing;
        self.backend
            .set_status(&state, InstructionStatus::Processing)
            .await?;
        tracing::debug!(
            state_id = %state.id,
            execution_id = %state.blueprint_execution_id,
            worker_id,
            "leased instruction state"
        );
        Ok(Some(state))
    }

    /// Mark the state `COMPLETE` and delete its queue message.
    pub async fn ack_success(
        &self,
        state: &mut BlueprintInstructionState,
    ) -> Result<(), StoreError> {
        self.finish(state, InstructionStatus::Complete).await
    }

    /// Mark the state `FAILED` and delete its queue message. Terminal; there
    /// is no automatic retry past this point.
    pub async fn ack_failure(
        &self,
        state: &mut BlueprintInstructionState,
    ) -> Result<(), StoreError> {
        self.finish(state, InstructionStatus::Failed).await
    }

    /// Retire a state whose termination conditions were met. Identical to
    /// [`ack_success`](Self::ack_success) in effect; the distinction is
    /// semantic and shows up in logs and rundata.
    pub async fn end(&self, state: &mut BlueprintInstructionState) -> Result<(), StoreError> {
        self.finish(state, InstructionStatus::Complete).await
    }

    /// Put the state back to `IDLE` without touching the queue message; the
    /// visibility timeout expires and the queue redelivers naturally.
    pub async fn requeue(&self, state: &mut BlueprintInstructionState) -> Result<(), StoreError> {
        if state.status.is_terminal() {
            return Ok(());
        }
        state.status = InstructionStatus::Idle;
        self.backend
            .set_status(state, InstructionStatus::Idle)
            .await
    }

    /// Read-only lookup of an execution's context.
    pub async fn get_execution_context(&self, execution_id: &str) -> Result<JsonMap, StoreError> {
        self.backend.execution_context(execution_id).await
    }

    async fn finish(
        &self,
        state: &mut BlueprintInstructionState,
        status: InstructionStatus,
    ) -> Result<(), StoreError> {
        if state.status.is_terminal() {
            return Ok(());
        }
        state.status = status;
        self.backend.set_status(state, status).await?;
        self.backend.remove_from_queue(state).await?;
        tracing::debug!(state_id = %state.id, %status, "retired instruction state");
        Ok(())
    }
}
