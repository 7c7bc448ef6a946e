//! Starting executions: mint an id, stamp the boot event, materialise and
//! persist instruction states, then publish.

use std::sync::Arc;

use uuid::Uuid;

use crate::bus::EventBus;
use crate::error::EngineError;
use crate::model::{Blueprint, BlueprintExecution, BlueprintInstructionState, Event, JsonMap};
use crate::store::{ExecutionStore, StoreBackend};

/// Creates executions against a store and a bus.
pub struct BlueprintExecutionManager<B> {
    bus: Arc<dyn EventBus>,
    store: Arc<ExecutionStore<B>>,
}

impl<B: StoreBackend> BlueprintExecutionManager<B> {
    pub fn new(bus: Arc<dyn EventBus>, store: Arc<ExecutionStore<B>>) -> Self {
        Self { bus, store }
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<ExecutionStore<B>> {
        &self.store
    }

    /// Start one execution of a blueprint.
    ///
    /// The boot event is stamped with the fresh execution id and published
    /// only after the execution and all of its instruction states are
    /// persisted; a worker can therefore never lease a state whose rows do
    /// not exist yet.
    pub async fn start_execution(
        &self,
        blueprint: &Blueprint,
        mut boot_event: Event,
        execution_context: JsonMap,
    ) -> Result<BlueprintExecution, EngineError> {
        let execution_id = Uuid::new_v4().to_string();
        boot_event.stamp_execution_id(&execution_id);

        let instructions_states = blueprint
            .instructions
            .iter()
            .map(|instruction| {
                BlueprintInstructionState::new(instruction.clone(), execution_id.clone())
            })
            .collect();

        let execution = BlueprintExecution {
            execution_id: execution_id.clone(),
            execution_context,
            blueprint: blueprint.clone(),
            instructions_states,
        };

        self.store.store(&execution).await?;
        self.bus.publish(&boot_event).await?;

        tracing::info!(
            blueprint = %blueprint.name,
            execution_id = %execution_id,
            boot_topic = %boot_event.topic,
            "started blueprint execution"
        );
        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryEventBus;
    use crate::inmemory::InMemoryBackend;
    use crate::model::{BlueprintInstruction, BlueprintInstructionOutcome, InstructionStatus};

    fn sample_blueprint() -> Blueprint {
        Blueprint {
            name: "sample".to_string(),
            instructions: vec![BlueprintInstruction {
                conditions: vec!["new_order".to_string()],
                termination_conditions: None,
                outcome: BlueprintInstructionOutcome {
                    action: "check_deposit".to_string(),
                    adapter: "basic_adapter".to_string(),
                },
            }],
        }
    }

    #[tokio::test]
    async fn test_start_execution_persists_and_publishes() {
        let bus = Arc::new(InMemoryEventBus::new());
        let store = Arc::new(ExecutionStore::new(InMemoryBackend::new()));
        let manager = BlueprintExecutionManager::new(bus.clone(), store.clone());

        let execution = manager
            .start_execution(&sample_blueprint(), Event::new("new_order"), JsonMap::new())
            .await
            .unwrap();

        // One idle state per instruction, all bound to this execution.
        assert_eq!(execution.instructions_states.len(), 1);
        let state = &execution.instructions_states[0];
        assert_eq!(state.status, InstructionStatus::Idle);
        assert_eq!(state.blueprint_execution_id, execution.execution_id);

        // Boot event landed on the bus, stamped with the execution id.
        let boot = bus
            .get("new_order", &execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(boot.execution_id(), Some(execution.execution_id.as_str()));

        // The store can serve the context back.
        let context = store
            .get_execution_context(&execution.execution_id)
            .await
            .unwrap();
        assert_eq!(context, execution.execution_context);
    }

    #[tokio::test]
    async fn test_each_start_gets_a_fresh_execution_id() {
        let bus = Arc::new(InMemoryEventBus::new());
        let store = Arc::new(ExecutionStore::new(InMemoryBackend::new()));
        let manager = BlueprintExecutionManager::new(bus, store);

        let first = manager
            .start_execution(&sample_blueprint(), Event::new("new_order"), JsonMap::new())
            .await
            .unwrap();
        let second = manager
            .start_execution(&sample_blueprint(), Event::new("new_order"), JsonMap::new())
            .await
            .unwrap();
        assert_ne!(first.execution_id, second.execution_id);
    }
}
