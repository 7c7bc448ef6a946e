//! Structured error types for the engine.
//!
//! The boundary rule: adapters and actions return `anyhow::Error` internally
//! (ergonomic transport), while everything that crosses a public seam is a
//! pattern-matchable `thiserror` enum.

use thiserror::Error;
use uuid::Uuid;

/// Validation failure raised by the blueprint manager.
///
/// Fatal to `add_blueprint`: invalid definitions fail loudly at registration
/// time and nothing is registered.
#[derive(Debug, Error)]
pub enum InvalidBlueprintDefinition {
    /// The definition document is empty or not a JSON object.
    #[error("blueprint definition is empty")]
    EmptyDefinition,

    /// The definition has no `name` key.
    #[error("blueprint definition must have a 'name'")]
    MissingName,

    /// The definition has no `instructions`, or the list is empty.
    #[error("blueprint definition must have non-empty 'instructions'")]
    MissingInstructions,

    /// An instruction is missing its `conditions` list.
    #[error("instruction {index} is missing 'conditions'")]
    MissingConditions {
        /// Position of the offending instruction.
        index: usize,
    },

    /// An instruction is missing its `outcome`.
    #[error("instruction {index} is missing 'outcome'")]
    MissingOutcome {
        /// Position of the offending instruction.
        index: usize,
    },

    /// An outcome is missing one of its component attributes.
    #[error("instruction {index} outcome is missing '{attribute}'")]
    MissingOutcomeAttribute {
        /// Position of the offending instruction.
        index: usize,
        /// The absent attribute (`action` or `adapter`).
        attribute: &'static str,
    },

    /// An outcome references a component name absent from the namespace.
    #[error("no {kind} named '{name}' in the configured namespace")]
    UnknownComponent {
        /// Which registry was consulted (`action` or `adapter`).
        kind: &'static str,
        /// The unresolvable name.
        name: String,
    },

    /// A blueprint with this name is already registered.
    #[error("blueprint '{0}' is already registered")]
    DuplicateName(String),
}

/// Errors from the execution store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `store` was called with an execution id that already exists.
    #[error("execution '{0}' is already stored")]
    DuplicateExecution(String),

    /// A read referenced an execution id with no row.
    #[error("execution '{0}' not found")]
    ExecutionNotFound(String),

    /// A state update referenced an instruction state with no row.
    #[error("instruction state '{0}' not found")]
    StateNotFound(Uuid),

    /// A queue message could not be decoded back into an instruction state.
    #[error("malformed queue payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// Storage backend failed (connection, timeout, SQL).
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Errors from the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Bus backend failed (connection, timeout, SQL).
    #[error("event bus backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Umbrella error for the execution manager and executor.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_definition_is_pattern_matchable() {
        let err = InvalidBlueprintDefinition::UnknownComponent {
            kind: "action",
            name: "missing_action".to_string(),
        };
        match &err {
            InvalidBlueprintDefinition::UnknownComponent { kind, name } => {
                assert_eq!(*kind, "action");
                assert_eq!(name, "missing_action");
            }
            _ => panic!("expected UnknownComponent"),
        }
        assert!(err.to_string().contains("missing_action"));
    }

    #[test]
    fn test_store_error_from_anyhow() {
        let err: StoreError = anyhow::anyhow!("connection refused").into();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_engine_error_is_transparent() {
        let err: EngineError = StoreError::DuplicateExecution("exec-1".to_string()).into();
        assert_eq!(err.to_string(), "execution 'exec-1' is already stored");
    }
}
