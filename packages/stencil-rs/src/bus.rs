//! Per-execution event bus: a single-value store keyed by
//! `(topic, execution_id)` with upsert semantics.
//!
//! # Guarantees
//!
//! - **At most one event per key**: a later publish with the same key
//!   replaces body and metadata. There is no history.
//! - **Unrouted events are kept**: an event without a stamped execution id is
//!   stored under the `"notfound"` sentinel, reachable only by explicit
//!   lookup.
//!
//! The bus is the only shared channel between actions (which publish
//! downstream events) and subsequent instructions (whose conditions look
//! those events up).

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::BusError;
use crate::model::Event;

/// Publish/lookup contract shared by the in-memory and durable buses.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Store the event under `(event.topic, event.routing_key())`,
    /// replacing any previous event for that key.
    async fn publish(&self, event: &Event) -> Result<(), BusError>;

    /// The latest event for `(topic, execution_id)`, or `None`.
    async fn get(&self, topic: &str, execution_id: &str) -> Result<Option<Event>, BusError>;
}

/// In-memory bus: a two-level map `topic -> execution_id -> Event`.
///
/// Single-process only; contents are lost on restart. Suitable for tests and
/// embedded single-worker deployments.
#[derive(Default)]
pub struct InMemoryEventBus {
    events_by_topic: DashMap<String, HashMap<String, Event>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct `(topic, execution)` keys currently stored.
    pub fn len(&self) -> usize {
        self.events_by_topic
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: &Event) -> Result<(), BusError> {
        self.events_by_topic
            .entry(event.topic.clone())
            .or_default()
            .insert(event.routing_key().to_string(), event.clone());
        Ok(())
    }

    async fn get(&self, topic: &str, execution_id: &str) -> Result<Option<Event>, BusError> {
        Ok(self
            .events_by_topic
            .get(topic)
            .and_then(|by_execution| by_execution.get(execution_id).cloned()))
    }
}

impl std::fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("event_count", &self.len())
            .finish()
    }
}
