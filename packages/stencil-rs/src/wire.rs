//! Stable JSON encoding for queue payloads and durable rows.
//!
//! Thin wrappers over serde_json that pin the wire shape in one place. The
//! format is the serde shape of the model types: instruction states as
//! `{"id_", "blueprint_execution_id", "instruction", "status"}` with
//! component names as plain strings.

use crate::model::{BlueprintInstructionState, Event};

/// Encode an instruction state for the dispatch queue.
pub fn encode_state(state: &BlueprintInstructionState) -> Result<String, serde_json::Error> {
    serde_json::to_string(state)
}

/// Decode a queue message back into an instruction state.
pub fn decode_state(payload: &str) -> Result<BlueprintInstructionState, serde_json::Error> {
    serde_json::from_str(payload)
}

/// Encode an instruction state as a JSON value (JSONB column form).
pub fn state_to_value(state: &BlueprintInstructionState) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(state)
}

/// Decode an instruction state from its JSON value form.
pub fn state_from_value(value: serde_json::Value) -> Result<BlueprintInstructionState, serde_json::Error> {
    serde_json::from_value(value)
}

/// Encode an event.
pub fn encode_event(event: &Event) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

/// Decode an event.
pub fn decode_event(payload: &str) -> Result<Event, serde_json::Error> {
    serde_json::from_str(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BlueprintInstruction, BlueprintInstructionOutcome, InstructionStatus,
    };

    fn sample_state() -> BlueprintInstructionState {
        BlueprintInstructionState::new(
            BlueprintInstruction {
                conditions: vec!["new_order".to_string()],
                termination_conditions: Some(vec!["order_cancelled".to_string()]),
                outcome: BlueprintInstructionOutcome {
                    action: "check_deposit".to_string(),
                    adapter: "basic_adapter".to_string(),
                },
            },
            "exec-1",
        )
    }

    #[test]
    fn test_state_round_trip() {
        let state = sample_state();
        let decoded = decode_state(&encode_state(&state).unwrap()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_state_wire_fields_are_pinned() {
        let value = state_to_value(&sample_state()).unwrap();
        let object = value.as_object().unwrap();
        let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec!["blueprint_execution_id", "id_", "instruction", "status"]
        );
        assert_eq!(object["status"], "IDLE");
    }

    #[test]
    fn test_decode_state_from_external_payload() {
        // Payload shape as another producer would write it.
        let payload = r#"{
            "id_": "7f2f4b6e-58a1-4f9a-8a44-0d2a8a6a3c11",
            "blueprint_execution_id": "exec-9",
            "instruction": {
                "conditions": ["deposit_status"],
                "outcome": { "action": "transfer_to_exchange", "adapter": "basic_adapter" }
            },
            "status": "IDLE"
        }"#;
        let state = decode_state(payload).unwrap();
        assert_eq!(state.blueprint_execution_id, "exec-9");
        assert_eq!(state.status, InstructionStatus::Idle);
        assert_eq!(state.instruction.outcome.adapter, "basic_adapter");
        assert!(state.instruction.termination_conditions.is_none());
    }

    #[test]
    fn test_event_round_trip() {
        let mut event = Event::new("new_order").with_body_entry("order_id", "ABC");
        event.stamp_execution_id("exec-1");
        let decoded = decode_event(&encode_event(&event).unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_state("not json").is_err());
        assert!(decode_state(r#"{"id_": "not-a-uuid"}"#).is_err());
    }
}
