//! Actions, adapters, and the namespace that names them.
//!
//! An instruction's outcome is an adapter+action pair. The adapter normalises
//! the execution context and matched events into the action's input; the
//! action performs the work and publishes downstream events.
//!
//! Components are registered in a [`Namespace`] as *named factories*, so
//! blueprints, queue messages, and durable rows carry only names. The
//! executor resolves a name to its factory and instantiates a fresh component
//! per invocation: adapters with no arguments, actions with the event bus and
//! an [`ActionMetadata`] record.
//!
//! # Idempotency
//!
//! Redelivery means an outcome can run more than once for the same state.
//! Adapters and actions must be idempotent with respect to
//! `(blueprint_execution_id, instruction_state_id)`.
//!
//! # Example
//!
//! ```ignore
//! let namespace = Namespace::builder()
//!     .adapter("basic_adapter", || Box::new(BasicAdapter))
//!     .action("check_deposit", |bus, meta| Box::new(CheckForDeposit { bus, meta }))
//!     .build();
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::model::{Event, JsonMap};

/// What an adapter decided about the current invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterOutcome {
    /// Run the action with this input.
    Proceed(serde_json::Value),

    /// Conditions matched but this run should be skipped; the executor
    /// requeues the instruction for a later attempt.
    Reject,
}

impl AdapterOutcome {
    /// Returns true for `Reject`.
    pub fn is_reject(&self) -> bool {
        matches!(self, AdapterOutcome::Reject)
    }
}

/// Normalises context and events into an action's input.
///
/// Instantiated fresh for every invocation, with no arguments.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Inspect the execution context and the matched events and decide
    /// whether (and with what input) the action should run.
    ///
    /// Errors are treated as unexpected failures: the executor marks the
    /// instruction `FAILED`.
    async fn adapt(&self, context: &JsonMap, events: &[Event]) -> anyhow::Result<AdapterOutcome>;
}

/// Performs an instruction's work.
///
/// Instantiated fresh for every invocation with the event bus (for
/// publishing downstream events) and an [`ActionMetadata`] record.
#[async_trait]
pub trait Action: Send + Sync {
    /// Run the action against the adapter's output.
    async fn act(&self, input: serde_json::Value) -> anyhow::Result<()>;
}

/// Per-invocation metadata handed to action factories.
#[derive(Debug, Clone)]
pub struct ActionMetadata {
    /// The execution this invocation belongs to.
    pub blueprint_execution_id: String,
    /// The instruction state being processed.
    pub instruction_state_id: Uuid,
}

type ActionFactory = Box<dyn Fn(Arc<dyn EventBus>, ActionMetadata) -> Box<dyn Action> + Send + Sync>;
type AdapterFactory = Box<dyn Fn() -> Box<dyn Adapter> + Send + Sync>;

/// Registry mapping component names to factories.
///
/// Built once at wiring time and shared (`Arc`) between the blueprint
/// manager (validation) and the executor (instantiation).
#[derive(Default)]
pub struct Namespace {
    actions: HashMap<String, ActionFactory>,
    adapters: HashMap<String, AdapterFactory>,
}

impl Namespace {
    /// Start building a namespace.
    pub fn builder() -> NamespaceBuilder {
        NamespaceBuilder {
            namespace: Namespace::default(),
        }
    }

    /// Check whether an action name is registered.
    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Check whether an adapter name is registered.
    pub fn has_adapter(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    /// Instantiate the named action, or `None` if unregistered.
    pub fn make_action(
        &self,
        name: &str,
        bus: Arc<dyn EventBus>,
        metadata: ActionMetadata,
    ) -> Option<Box<dyn Action>> {
        self.actions.get(name).map(|factory| factory(bus, metadata))
    }

    /// Instantiate the named adapter, or `None` if unregistered.
    pub fn make_adapter(&self, name: &str) -> Option<Box<dyn Adapter>> {
        self.adapters.get(name).map(|factory| factory())
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`Namespace`].
pub struct NamespaceBuilder {
    namespace: Namespace,
}

impl NamespaceBuilder {
    /// Register an action factory under a name.
    ///
    /// # Panics
    ///
    /// Panics if the name is already registered. Duplicate registration is a
    /// wiring bug, caught at startup.
    pub fn action<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Arc<dyn EventBus>, ActionMetadata) -> Box<dyn Action> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.namespace.actions.contains_key(&name) {
            panic!("action already registered: {name}");
        }
        self.namespace.actions.insert(name, Box::new(factory));
        self
    }

    /// Register an adapter factory under a name.
    ///
    /// # Panics
    ///
    /// Panics if the name is already registered.
    pub fn adapter<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Adapter> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.namespace.adapters.contains_key(&name) {
            panic!("adapter already registered: {name}");
        }
        self.namespace.adapters.insert(name, Box::new(factory));
        self
    }

    /// Finish building.
    pub fn build(self) -> Namespace {
        self.namespace
    }
}
