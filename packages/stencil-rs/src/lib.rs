//! # Stencil
//!
//! A blueprint execution engine: a *blueprint* is a declarative, ordered list
//! of *instructions*; each instruction fires its *outcome* (an adapter+action
//! pair) once every one of its condition *topics* has an event on the bus for
//! that *execution*. Pools of workers drain ready instructions with
//! at-most-one-worker-at-a-time semantics.
//!
//! ## Architecture
//!
//! ```text
//! BlueprintExecutionManager.start_execution()
//!     │
//!     ├─► ExecutionStore.store()        (rows + dispatch queue)
//!     └─► EventBus.publish(boot event)
//!
//! BlueprintExecutor.run() loop
//!     │
//!     ├─► ExecutionStore.lease(worker)  ─► state is PROCESSING
//!     ├─► EventBus.get(topic, execution) per condition
//!     ├─► Adapter.adapt(context, events) ─► Proceed | Reject
//!     ├─► Action.act(input)              (may publish downstream events)
//!     └─► ack_success | requeue | ack_failure | end
//! ```
//!
//! ## Key invariants
//!
//! 1. Every instruction state belongs to exactly one execution.
//! 2. The bus holds at most one event per `(topic, execution)`; republish
//!    replaces it.
//! 3. At most one worker holds a lease on a state; expired leases become
//!    re-acquirable.
//! 4. Terminal statuses (`COMPLETE`, `FAILED`) are sticky and leave the
//!    dispatch queue.
//!
//! ## Guarantees
//!
//! Delivery to actions is at-least-once, never exactly-once: requeues and
//! lease expiry both cause redelivery. Adapters and actions must be
//! idempotent with respect to `(execution_id, instruction_state_id)`.
//!
//! The in-memory bus and store backend in this crate are single-process test
//! doubles; the durable implementations live in `stencil-postgres`.

mod blueprint;
mod bus;
mod component;
mod error;
mod executor;
mod inmemory;
mod manager;
mod model;
mod store;

// Serialization helpers (queue payloads, durable rows)
pub mod wire;


// Re-export model types
pub use model::{
    Blueprint, BlueprintExecution, BlueprintInstruction, BlueprintInstructionOutcome,
    BlueprintInstructionState, Event, InstructionStatus, JsonMap, EXECUTION_ID_KEY, UNROUTED_KEY,
};

// Re-export components
pub use component::{
    Action, ActionMetadata, Adapter, AdapterOutcome, Namespace, NamespaceBuilder,
};

// Re-export blueprint management
pub use blueprint::BlueprintManager;

// Re-export bus types
pub use bus::{EventBus, InMemoryEventBus};

// Re-export store types
pub use inmemory::InMemoryBackend;
pub use store::{ExecutionStore, StoreBackend};

// Re-export execution manager and executor
pub use executor::{
    BlueprintExecutor, ExecutorConfig, IterationRecord, IterationStatus, RundataCallback,
};
pub use manager::BlueprintExecutionManager;

// Re-export error types
pub use error::{BusError, EngineError, InvalidBlueprintDefinition, StoreError};

// Re-export commonly used external types
pub use async_trait::async_trait;
