//! In-memory store backend.
//!
//! Two maps plus a ready-queue of state ids behind one mutex. The queue pop
//! in `receive` is atomic under the lock, so the at-most-one-lease property
//! holds in-process; `requeue` re-enqueues immediately, standing in for the
//! durable queue's visibility timeout. Test double and embedded
//! single-process use only; nothing survives a restart.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{BlueprintExecution, BlueprintInstructionState, InstructionStatus, JsonMap};
use crate::store::StoreBackend;

#[derive(Debug, Default)]
struct Inner {
    executions: HashMap<String, BlueprintExecution>,
    states: HashMap<Uuid, BlueprintInstructionState>,
    ready: VecDeque<Uuid>,
}

/// In-memory [`StoreBackend`].
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    inner: Mutex<Inner>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a stored instruction state, by id.
    pub fn state(&self, id: Uuid) -> Option<BlueprintInstructionState> {
        self.lock().states.get(&id).cloned()
    }

    /// Number of messages currently waiting on the ready-queue.
    pub fn queued(&self) -> usize {
        self.lock().ready.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Recover the guard even if a prior panic poisoned the lock.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StoreBackend for InMemoryBackend {
    async fn insert_execution(&self, execution: &BlueprintExecution) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.executions.contains_key(&execution.execution_id) {
            return Err(StoreError::DuplicateExecution(
                execution.execution_id.clone(),
            ));
        }
        inner
            .executions
            .insert(execution.execution_id.clone(), execution.clone());
        Ok(())
    }

    async fn insert_instruction_state(
        &self,
        state: &BlueprintInstructionState,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.states.insert(state.id, state.clone());
        inner.ready.push_back(state.id);
        Ok(())
    }

    async fn receive(
        &self,
        _worker_id: &str,
    ) -> Result<Option<BlueprintInstructionState>, StoreError> {
        let mut inner = self.lock();
        while let Some(id) = inner.ready.pop_front() {
            match inner.states.get(&id) {
                // The row is authoritative: a queued id whose state already
                // went terminal is dropped without redelivery.
                Some(state) if !state.status.is_terminal() => return Ok(Some(state.clone())),
                _ => continue,
            }
        }
        Ok(None)
    }

    async fn set_status(
        &self,
        state: &BlueprintInstructionState,
        status: InstructionStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let stored = inner
            .states
            .get_mut(&state.id)
            .ok_or(StoreError::StateNotFound(state.id))?;
        stored.status = status;
        if status == InstructionStatus::Idle {
            // Immediate redelivery in place of a visibility timeout.
            inner.ready.push_back(state.id);
        }
        Ok(())
    }

    async fn remove_from_queue(
        &self,
        state: &BlueprintInstructionState,
    ) -> Result<(), StoreError> {
        self.lock().ready.retain(|id| *id != state.id);
        Ok(())
    }

    async fn execution_context(&self, execution_id: &str) -> Result<JsonMap, StoreError> {
        self.lock()
            .executions
            .get(execution_id)
            .map(|execution| execution.execution_context.clone())
            .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.to_string()))
    }
}
