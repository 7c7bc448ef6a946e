//! Core value types for the blueprint engine.
//!
//! Everything here is plain data with structural equality. The JSON shape of
//! these types is load-bearing: it is the message format on the dispatch
//! queue and the column format in durable storage, so field names are pinned
//! (`id_` on instruction states, statuses serialized by name).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque JSON object used for event metadata, event bodies, and execution
/// contexts. The engine never imposes a schema on these.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Metadata key carrying the execution an event belongs to.
///
/// Every event that must be consumed by an instruction carries this key;
/// events without it are still publishable but land under [`UNROUTED_KEY`].
pub const EXECUTION_ID_KEY: &str = "blueprint_execution_id";

/// Sentinel bus key for events published without an execution id.
/// Reachable only by explicit lookup.
pub const UNROUTED_KEY: &str = "notfound";

/// An event on the bus: a topic plus opaque metadata and body maps.
///
/// # Example
///
/// ```
/// use stencil::Event;
///
/// let event = Event::new("new_order")
///     .with_body_entry("order_id", "ABC-123");
/// assert_eq!(event.topic, "new_order");
/// assert!(event.execution_id().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    #[serde(default)]
    pub metadata: JsonMap,
    #[serde(default)]
    pub body: JsonMap,
}

impl Event {
    /// Create an event with empty metadata and body.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            metadata: JsonMap::new(),
            body: JsonMap::new(),
        }
    }

    /// Replace the body wholesale.
    pub fn with_body(mut self, body: JsonMap) -> Self {
        self.body = body;
        self
    }

    /// Replace the metadata wholesale.
    pub fn with_metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Insert a single body entry.
    pub fn with_body_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    /// The execution this event is routed to, if it has been stamped.
    pub fn execution_id(&self) -> Option<&str> {
        self.metadata.get(EXECUTION_ID_KEY).and_then(|v| v.as_str())
    }

    /// Stamp the execution id into the metadata, replacing any existing one.
    pub fn stamp_execution_id(&mut self, execution_id: &str) {
        self.metadata
            .insert(EXECUTION_ID_KEY.to_string(), execution_id.into());
    }

    /// The bus routing key: the stamped execution id, or [`UNROUTED_KEY`].
    pub fn routing_key(&self) -> &str {
        self.execution_id().unwrap_or(UNROUTED_KEY)
    }
}

/// Lifecycle of an instruction state.
///
/// `Complete` and `Failed` are terminal: once reached the state never
/// transitions again and its message leaves the dispatch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstructionStatus {
    #[default]
    Idle,
    Processing,
    Complete,
    Failed,
}

impl InstructionStatus {
    /// Returns true for `Complete` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstructionStatus::Complete | InstructionStatus::Failed)
    }

    /// The wire name of this status (`"IDLE"`, `"PROCESSING"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            InstructionStatus::Idle => "IDLE",
            InstructionStatus::Processing => "PROCESSING",
            InstructionStatus::Complete => "COMPLETE",
            InstructionStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for InstructionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstructionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(InstructionStatus::Idle),
            "PROCESSING" => Ok(InstructionStatus::Processing),
            "COMPLETE" => Ok(InstructionStatus::Complete),
            "FAILED" => Ok(InstructionStatus::Failed),
            other => Err(format!("unknown instruction status: {other}")),
        }
    }
}

/// The outcome of an instruction: names of a registered action and adapter.
///
/// Outcomes carry component *names*, not instances. The executor resolves
/// names against the [`Namespace`](crate::Namespace) and instantiates fresh
/// components per invocation, so serialized instructions round-trip through
/// queues and rows carrying only strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueprintInstructionOutcome {
    pub action: String,
    pub adapter: String,
}

/// One instruction in a blueprint: condition topics plus an outcome, with an
/// optional termination set that retires the instruction without running it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintInstruction {
    pub conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_conditions: Option<Vec<String>>,
    pub outcome: BlueprintInstructionOutcome,
}

/// A named, ordered list of instructions. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    pub instructions: Vec<BlueprintInstruction>,
}

/// Per-(execution, instruction) state tracked by the store.
///
/// Identity is `id`, not position. `status` is the only mutable field once
/// the state has been stored. The wire name of `id` is `id_`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintInstructionState {
    #[serde(rename = "id_")]
    pub id: Uuid,
    pub blueprint_execution_id: String,
    pub instruction: BlueprintInstruction,
    #[serde(default)]
    pub status: InstructionStatus,
}

impl BlueprintInstructionState {
    /// Fresh `Idle` state with a random id.
    pub fn new(instruction: BlueprintInstruction, blueprint_execution_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            blueprint_execution_id: blueprint_execution_id.into(),
            instruction,
            status: InstructionStatus::Idle,
        }
    }
}

/// One live run of a blueprint.
///
/// Created by the execution manager, then owned by the store. After creation
/// the engine never mutates the execution or its blueprint; only the statuses
/// of its instruction states change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintExecution {
    pub execution_id: String,
    pub execution_context: JsonMap,
    pub blueprint: Blueprint,
    pub instructions_states: Vec<BlueprintInstructionState>,
}
