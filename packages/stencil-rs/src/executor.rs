//! The executor loop: poll the store, match events to conditions, invoke the
//! outcome, report back.
//!
//! # Architecture
//!
//! ```text
//! BlueprintExecutor
//!     │
//!     ├─► store.lease(worker_id)
//!     ├─► bus.get(topic, execution_id) per condition
//!     ├─► adapter.adapt(context, events) ─► Proceed | Reject
//!     ├─► action.act(adapter_result)
//!     └─► store.ack_success | requeue | ack_failure | end
//! ```
//!
//! Each iteration is a step of a finite state machine over the leased state:
//! `IDLE → PROCESSING → { COMPLETE, FAILED, IDLE }`. Parallelism is across
//! workers, never within one: a worker runs one `process` at a time, and the
//! store's lease keeps two workers off the same state.
//!
//! # Failure policy
//!
//! No individual instruction ever kills the loop. Adapter/action errors and
//! store errors inside `process` mark the instruction `FAILED` (best-effort)
//! and the worker keeps polling. A store error on `lease` itself aborts the
//! loop and surfaces to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::component::{ActionMetadata, AdapterOutcome, Namespace};
use crate::error::StoreError;
use crate::model::{BlueprintInstructionState, Event};
use crate::store::{ExecutionStore, StoreBackend};

/// What one executor iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IterationStatus {
    /// The lease returned nothing.
    NoInstruction,
    /// Every termination topic had an event; the state was retired unrun.
    TerminationConditionsMet,
    /// Not every condition topic had an event; the state was requeued.
    ConditionsNotMet,
    /// The adapter declined this run; the state was requeued.
    OutcomeAdapterReject,
    /// Adapt or act failed; the state is terminally `FAILED`.
    OutcomeActionFailed,
    /// The outcome ran; the state is `COMPLETE`.
    OutcomeActionSuccess,
}

/// Observability record emitted after every iteration.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    /// Wall-clock time the iteration finished; serialized as ISO-8601 under
    /// `iso_time`.
    #[serde(rename = "iso_time")]
    pub at: DateTime<Utc>,
    pub worker_id: String,
    /// 1-based iteration counter.
    pub iteration: u64,
    /// The leased state, if any, as of the end of the iteration.
    pub state: Option<BlueprintInstructionState>,
    pub status: IterationStatus,
}

/// Callback receiving each [`IterationRecord`]; used by test harnesses and
/// metrics exporters.
pub type RundataCallback = Arc<dyn Fn(IterationRecord) + Send + Sync>;

/// Executor tuning.
#[derive(Clone)]
pub struct ExecutorConfig {
    /// Identifier recorded on leases and rundata.
    pub worker_id: String,
    /// Stop after this many iterations; `None` runs unbounded.
    pub max_iterations: Option<u64>,
    /// Sleep between iterations. `Duration::ZERO` polls hot (tests).
    pub poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            max_iterations: None,
            poll_interval: Duration::from_secs(10),
        }
    }
}

impl ExecutorConfig {
    /// Config with a specific worker id.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }

    /// Bound the loop to `n` iterations.
    pub fn bounded(mut self, n: u64) -> Self {
        self.max_iterations = Some(n);
        self
    }

    /// Set the inter-iteration sleep.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// A worker draining ready instruction states.
pub struct BlueprintExecutor<B> {
    store: Arc<ExecutionStore<B>>,
    bus: Arc<dyn EventBus>,
    namespace: Arc<Namespace>,
    config: ExecutorConfig,
    rundata: Option<RundataCallback>,
}

impl<B: StoreBackend> BlueprintExecutor<B> {
    pub fn new(
        store: Arc<ExecutionStore<B>>,
        bus: Arc<dyn EventBus>,
        namespace: Arc<Namespace>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            bus,
            namespace,
            config,
            rundata: None,
        }
    }

    /// Attach an observability callback.
    pub fn with_rundata(mut self, callback: RundataCallback) -> Self {
        self.rundata = Some(callback);
        self
    }

    /// Run the poll-and-process loop.
    ///
    /// Returns when `max_iterations` is reached, or with the store error if
    /// a lease fails. Cancellation is cooperative: the loop only ever stops
    /// between iterations.
    pub async fn run(&self) -> Result<(), StoreError> {
        tracing::info!(worker_id = %self.config.worker_id, "blueprint executor starting");
        let mut iteration: u64 = 0;

        loop {
            iteration += 1;

            let leased = self.store.lease(&self.config.worker_id).await?;
            let (status, state) = match leased {
                None => {
                    tracing::debug!(worker_id = %self.config.worker_id, "no instruction state ready");
                    (IterationStatus::NoInstruction, None)
                }
                Some(mut state) => {
                    let status = self.process(&mut state).await;
                    (status, Some(state))
                }
            };

            if let Some(callback) = &self.rundata {
                callback(IterationRecord {
                    at: Utc::now(),
                    worker_id: self.config.worker_id.clone(),
                    iteration,
                    state,
                    status,
                });
            }

            if let Some(max) = self.config.max_iterations {
                if iteration >= max {
                    tracing::info!(worker_id = %self.config.worker_id, iteration, "max iterations reached, exiting");
                    return Ok(());
                }
            }

            if !self.config.poll_interval.is_zero() {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
    }

    /// Process one leased state through the instruction state machine.
    async fn process(&self, state: &mut BlueprintInstructionState) -> IterationStatus {
        let execution_id = state.blueprint_execution_id.clone();

        // Termination first: a satisfied termination set retires the
        // instruction without running the outcome. The match is counted
        // against the termination set itself, not the conditions list.
        if let Some(termination_conditions) = state.instruction.termination_conditions.clone() {
            if !termination_conditions.is_empty() {
                match self.find_events(&termination_conditions, &execution_id).await {
                    Ok(events) if events.len() == termination_conditions.len() => {
                        if let Err(error) = self.store.end(state).await {
                            return self.fail(state, error.into()).await;
                        }
                        tracing::info!(state_id = %state.id, "termination conditions met");
                        return IterationStatus::TerminationConditionsMet;
                    }
                    Ok(_) => {}
                    Err(error) => return self.fail(state, error.into()).await,
                }
            }
        }

        let conditions = state.instruction.conditions.clone();
        let events = match self.find_events(&conditions, &execution_id).await {
            Ok(events) => events,
            Err(error) => return self.fail(state, error.into()).await,
        };
        if events.len() != conditions.len() {
            tracing::debug!(
                state_id = %state.id,
                found = events.len(),
                required = conditions.len(),
                "conditions not met, requeueing"
            );
            if let Err(error) = self.store.requeue(state).await {
                return self.fail(state, error.into()).await;
            }
            return IterationStatus::ConditionsNotMet;
        }

        match self.execute_outcome(state, &events).await {
            Ok(AdapterOutcome::Reject) => {
                tracing::info!(state_id = %state.id, "adapter rejected, requeueing");
                if let Err(error) = self.store.requeue(state).await {
                    return self.fail(state, error.into()).await;
                }
                IterationStatus::OutcomeAdapterReject
            }
            Ok(AdapterOutcome::Proceed(_)) => {
                if let Err(error) = self.store.ack_success(state).await {
                    return self.fail(state, error.into()).await;
                }
                IterationStatus::OutcomeActionSuccess
            }
            Err(error) => self.fail(state, error).await,
        }
    }

    /// Instantiate adapter and action and run them. On `Proceed`, the action
    /// has already run by the time this returns.
    async fn execute_outcome(
        &self,
        state: &BlueprintInstructionState,
        events: &[Event],
    ) -> anyhow::Result<AdapterOutcome> {
        let outcome = &state.instruction.outcome;
        let context = self
            .store
            .get_execution_context(&state.blueprint_execution_id)
            .await?;

        tracing::info!(
            state_id = %state.id,
            action = %outcome.action,
            adapter = %outcome.adapter,
            events = events.len(),
            "executing outcome"
        );

        let adapter = self
            .namespace
            .make_adapter(&outcome.adapter)
            .ok_or_else(|| anyhow::anyhow!("adapter '{}' is not registered", outcome.adapter))?;
        let verdict = adapter.adapt(&context, events).await?;

        let AdapterOutcome::Proceed(input) = verdict else {
            return Ok(AdapterOutcome::Reject);
        };

        let metadata = ActionMetadata {
            blueprint_execution_id: state.blueprint_execution_id.clone(),
            instruction_state_id: state.id,
        };
        let action = self
            .namespace
            .make_action(&outcome.action, self.bus.clone(), metadata)
            .ok_or_else(|| anyhow::anyhow!("action '{}' is not registered", outcome.action))?;
        action.act(input.clone()).await?;

        Ok(AdapterOutcome::Proceed(input))
    }

    /// Look up one event per topic for this execution; topics without an
    /// event are simply absent from the result.
    async fn find_events(
        &self,
        topics: &[String],
        execution_id: &str,
    ) -> Result<Vec<Event>, crate::error::BusError> {
        let mut events = Vec::with_capacity(topics.len());
        for topic in topics {
            if let Some(event) = self.bus.get(topic, execution_id).await? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Mark the state failed and report the error. The status write is
    /// best-effort: if the store is down too, there is nothing left to do
    /// for this iteration but log it.
    async fn fail(
        &self,
        state: &mut BlueprintInstructionState,
        error: anyhow::Error,
    ) -> IterationStatus {
        tracing::error!(
            state_id = %state.id,
            execution_id = %state.blueprint_execution_id,
            error = ?error,
            "instruction processing failed"
        );
        if let Err(ack_error) = self.store.ack_failure(state).await {
            tracing::error!(state_id = %state.id, error = ?ack_error, "failed to mark instruction state as failed");
        }
        IterationStatus::OutcomeActionFailed
    }
}

impl<B> std::fmt::Debug for BlueprintExecutor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlueprintExecutor")
            .field("worker_id", &self.config.worker_id)
            .field("max_iterations", &self.config.max_iterations)
            .field("poll_interval", &self.config.poll_interval)
            .finish_non_exhaustive()
    }
}
