//! Blueprint definitions: validation, registration, rehydration.
//!
//! A definition is a JSON document:
//!
//! ```json
//! {
//!   "name": "fixed_rate_order",
//!   "instructions": [
//!     { "conditions": ["new_order"],
//!       "outcome": { "action": "check_deposit", "adapter": "basic_adapter" },
//!       "termination_conditions": ["order_cancelled"] }
//!   ]
//! }
//! ```
//!
//! The manager validates every component name against its [`Namespace`]
//! before anything is registered, so an accepted blueprint is guaranteed to
//! resolve at execution time. Registered blueprints are immutable.

use std::collections::HashMap;
use std::sync::Arc;

use crate::component::Namespace;
use crate::error::InvalidBlueprintDefinition;
use crate::model::{Blueprint, BlueprintInstruction, BlueprintInstructionOutcome};

/// Registry of live blueprints, keyed by name.
#[derive(Debug)]
pub struct BlueprintManager {
    namespace: Arc<Namespace>,
    blueprints_by_name: HashMap<String, Blueprint>,
}

impl BlueprintManager {
    pub fn new(namespace: Arc<Namespace>) -> Self {
        Self {
            namespace,
            blueprints_by_name: HashMap::new(),
        }
    }

    /// Validate a definition, materialise it, and register it.
    ///
    /// Nothing is registered on failure. Fails if the definition is empty,
    /// lacks a name or instructions, any instruction lacks conditions or an
    /// outcome, any outcome lacks an action or adapter, any component name is
    /// absent from the namespace, or a blueprint with this name already
    /// exists.
    pub fn add_blueprint(
        &mut self,
        definition: &serde_json::Value,
    ) -> Result<&Blueprint, InvalidBlueprintDefinition> {
        let blueprint = self.materialise(definition)?;

        if self.blueprints_by_name.contains_key(&blueprint.name) {
            return Err(InvalidBlueprintDefinition::DuplicateName(blueprint.name));
        }

        tracing::info!(
            blueprint = %blueprint.name,
            instructions = blueprint.instructions.len(),
            "registered blueprint"
        );
        let name = blueprint.name.clone();
        self.blueprints_by_name.insert(name.clone(), blueprint);
        Ok(&self.blueprints_by_name[&name])
    }

    /// Look up a registered blueprint.
    pub fn get(&self, name: &str) -> Option<&Blueprint> {
        self.blueprints_by_name.get(name)
    }

    /// Rebuild a [`BlueprintInstruction`] from its JSON form, re-checking
    /// that its component names resolve in the namespace.
    ///
    /// Used when rehydrating instruction states from the dispatch queue.
    pub fn objectify_instruction(
        &self,
        raw: &serde_json::Value,
    ) -> Result<BlueprintInstruction, InvalidBlueprintDefinition> {
        self.parse_instruction(0, raw)
    }

    fn materialise(
        &self,
        definition: &serde_json::Value,
    ) -> Result<Blueprint, InvalidBlueprintDefinition> {
        let object = definition
            .as_object()
            .filter(|o| !o.is_empty())
            .ok_or(InvalidBlueprintDefinition::EmptyDefinition)?;

        let name = object
            .get("name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(InvalidBlueprintDefinition::MissingName)?;

        let raw_instructions = object
            .get("instructions")
            .and_then(|v| v.as_array())
            .filter(|a| !a.is_empty())
            .ok_or(InvalidBlueprintDefinition::MissingInstructions)?;

        let mut instructions = Vec::with_capacity(raw_instructions.len());
        for (index, raw) in raw_instructions.iter().enumerate() {
            instructions.push(self.parse_instruction(index, raw)?);
        }

        Ok(Blueprint {
            name: name.to_string(),
            instructions,
        })
    }

    fn parse_instruction(
        &self,
        index: usize,
        raw: &serde_json::Value,
    ) -> Result<BlueprintInstruction, InvalidBlueprintDefinition> {
        let conditions = string_list(raw.get("conditions"))
            .filter(|c| !c.is_empty())
            .ok_or(InvalidBlueprintDefinition::MissingConditions { index })?;

        let termination_conditions = match raw.get("termination_conditions") {
            None | Some(serde_json::Value::Null) => None,
            some => Some(
                string_list(some)
                    .ok_or(InvalidBlueprintDefinition::MissingConditions { index })?,
            ),
        };

        let outcome = raw
            .get("outcome")
            .and_then(|v| v.as_object())
            .ok_or(InvalidBlueprintDefinition::MissingOutcome { index })?;

        let action = outcome_attribute(outcome, "action", index)?;
        let adapter = outcome_attribute(outcome, "adapter", index)?;

        if !self.namespace.has_action(&action) {
            return Err(InvalidBlueprintDefinition::UnknownComponent {
                kind: "action",
                name: action,
            });
        }
        if !self.namespace.has_adapter(&adapter) {
            return Err(InvalidBlueprintDefinition::UnknownComponent {
                kind: "adapter",
                name: adapter,
            });
        }

        Ok(BlueprintInstruction {
            conditions,
            termination_conditions,
            outcome: BlueprintInstructionOutcome { action, adapter },
        })
    }
}

fn string_list(value: Option<&serde_json::Value>) -> Option<Vec<String>> {
    value.and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect()
    })
}

fn outcome_attribute(
    outcome: &serde_json::Map<String, serde_json::Value>,
    attribute: &'static str,
    index: usize,
) -> Result<String, InvalidBlueprintDefinition> {
    outcome
        .get(attribute)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(InvalidBlueprintDefinition::MissingOutcomeAttribute { index, attribute })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Action, Adapter, AdapterOutcome};
    use crate::model::{Event, JsonMap};
    use async_trait::async_trait;
    use serde_json::json;

    struct NoopAction;

    #[async_trait]
    impl Action for NoopAction {
        async fn act(&self, _input: serde_json::Value) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NoopAdapter;

    #[async_trait]
    impl Adapter for NoopAdapter {
        async fn adapt(
            &self,
            _context: &JsonMap,
            _events: &[Event],
        ) -> anyhow::Result<AdapterOutcome> {
            Ok(AdapterOutcome::Proceed(json!({})))
        }
    }

    fn sample_namespace() -> Arc<Namespace> {
        Arc::new(
            Namespace::builder()
                .action("check_deposit", |_bus, _meta| Box::new(NoopAction))
                .action("transfer_to_exchange", |_bus, _meta| Box::new(NoopAction))
                .adapter("basic_adapter", || Box::new(NoopAdapter))
                .build(),
        )
    }

    fn sample_definition() -> serde_json::Value {
        json!({
            "name": "test_blueprint_1",
            "instructions": [
                {
                    "conditions": ["new_order"],
                    "outcome": { "action": "check_deposit", "adapter": "basic_adapter" }
                },
                {
                    "conditions": ["deposit_status"],
                    "outcome": { "action": "transfer_to_exchange", "adapter": "basic_adapter" }
                }
            ]
        })
    }

    fn manager() -> BlueprintManager {
        BlueprintManager::new(sample_namespace())
    }

    #[test]
    fn test_add_blueprint_registers_by_name() {
        let mut manager = manager();
        manager.add_blueprint(&sample_definition()).unwrap();

        let blueprint = manager.get("test_blueprint_1").unwrap();
        assert_eq!(blueprint.instructions.len(), 2);
        assert_eq!(blueprint.instructions[0].conditions, vec!["new_order"]);
        assert_eq!(blueprint.instructions[0].outcome.action, "check_deposit");
    }

    #[test]
    fn test_every_accepted_instruction_resolves_in_namespace() {
        let mut manager = manager();
        let blueprint = manager.add_blueprint(&sample_definition()).unwrap().clone();
        let namespace = sample_namespace();

        for instruction in &blueprint.instructions {
            assert!(namespace.has_action(&instruction.outcome.action));
            assert!(namespace.has_adapter(&instruction.outcome.adapter));
        }
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut manager = manager();
        manager.add_blueprint(&sample_definition()).unwrap();

        let err = manager.add_blueprint(&sample_definition()).unwrap_err();
        assert!(matches!(err, InvalidBlueprintDefinition::DuplicateName(name) if name == "test_blueprint_1"));
    }

    #[test]
    fn test_empty_definition_is_rejected() {
        let mut manager = manager();
        assert!(matches!(
            manager.add_blueprint(&json!({})).unwrap_err(),
            InvalidBlueprintDefinition::EmptyDefinition
        ));
        assert!(matches!(
            manager.add_blueprint(&json!(null)).unwrap_err(),
            InvalidBlueprintDefinition::EmptyDefinition
        ));
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let mut manager = manager();
        let err = manager
            .add_blueprint(&json!({ "instructions": [] }))
            .unwrap_err();
        assert!(matches!(err, InvalidBlueprintDefinition::MissingName));
    }

    #[test]
    fn test_missing_or_empty_instructions_are_rejected() {
        let mut manager = manager();
        for definition in [
            json!({ "name": "bp" }),
            json!({ "name": "bp", "instructions": [] }),
        ] {
            let err = manager.add_blueprint(&definition).unwrap_err();
            assert!(matches!(err, InvalidBlueprintDefinition::MissingInstructions));
        }
    }

    #[test]
    fn test_instruction_without_conditions_is_rejected() {
        let mut manager = manager();
        let err = manager
            .add_blueprint(&json!({
                "name": "bp",
                "instructions": [
                    { "outcome": { "action": "check_deposit", "adapter": "basic_adapter" } }
                ]
            }))
            .unwrap_err();
        assert!(matches!(
            err,
            InvalidBlueprintDefinition::MissingConditions { index: 0 }
        ));
    }

    #[test]
    fn test_instruction_without_outcome_is_rejected() {
        let mut manager = manager();
        let err = manager
            .add_blueprint(&json!({
                "name": "bp",
                "instructions": [{ "conditions": ["new_order"] }]
            }))
            .unwrap_err();
        assert!(matches!(
            err,
            InvalidBlueprintDefinition::MissingOutcome { index: 0 }
        ));
    }

    #[test]
    fn test_outcome_missing_attribute_is_rejected() {
        let mut manager = manager();
        let err = manager
            .add_blueprint(&json!({
                "name": "bp",
                "instructions": [
                    { "conditions": ["new_order"], "outcome": { "action": "check_deposit" } }
                ]
            }))
            .unwrap_err();
        assert!(matches!(
            err,
            InvalidBlueprintDefinition::MissingOutcomeAttribute {
                index: 0,
                attribute: "adapter"
            }
        ));
    }

    #[test]
    fn test_unknown_component_is_rejected() {
        let mut manager = manager();
        let err = manager
            .add_blueprint(&json!({
                "name": "bp",
                "instructions": [
                    { "conditions": ["new_order"],
                      "outcome": { "action": "no_such_action", "adapter": "basic_adapter" } }
                ]
            }))
            .unwrap_err();
        assert!(
            matches!(err, InvalidBlueprintDefinition::UnknownComponent { kind: "action", ref name } if name == "no_such_action")
        );
    }

    #[test]
    fn test_termination_conditions_are_parsed() {
        let mut manager = manager();
        let blueprint = manager
            .add_blueprint(&json!({
                "name": "bp",
                "instructions": [
                    { "conditions": ["new_order"],
                      "termination_conditions": ["order_cancelled"],
                      "outcome": { "action": "check_deposit", "adapter": "basic_adapter" } }
                ]
            }))
            .unwrap();
        assert_eq!(
            blueprint.instructions[0].termination_conditions,
            Some(vec!["order_cancelled".to_string()])
        );
    }

    #[test]
    fn test_objectify_instruction_round_trips() {
        let mut manager = manager();
        let blueprint = manager.add_blueprint(&sample_definition()).unwrap().clone();
        let raw = serde_json::to_value(&blueprint.instructions[0]).unwrap();

        let rebuilt = manager.objectify_instruction(&raw).unwrap();
        assert_eq!(rebuilt, blueprint.instructions[0]);
    }

    #[test]
    fn test_objectify_rejects_unresolvable_names() {
        let manager = manager();
        let raw = json!({
            "conditions": ["new_order"],
            "outcome": { "action": "ghost", "adapter": "basic_adapter" }
        });
        assert!(matches!(
            manager.objectify_instruction(&raw).unwrap_err(),
            InvalidBlueprintDefinition::UnknownComponent { kind: "action", .. }
        ));
    }
}
