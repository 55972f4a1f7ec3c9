//! Core data model.
//!
//! A task container is a unit of queued work: an opaque encoded payload plus
//! the identity and routing metadata the engine needs to batch and persist
//! it. Identity is the container id alone; payload content never
//! participates in equality.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::registry::BatchableTask;

// ---------------------------------------------------------------------------
// Task Id
// ---------------------------------------------------------------------------

/// Newtype for task container identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Task Container
// ---------------------------------------------------------------------------

/// A queued task wrapped with identity and routing metadata.
///
/// The payload is opaque to the engine; it is decoded back into its concrete
/// task type only at dispatch time, by the capability registered for
/// `task_type`.
#[derive(Debug, Clone)]
pub struct TaskContainer {
    /// Unique identifier. The unit of equality, removal, and dedup.
    pub id: TaskId,

    /// Stable type key routing this container to its registered capability.
    pub task_type: String,

    /// Partition key under which this task is batched.
    pub group: String,

    /// Encoded task payload. The engine doesn't interpret this.
    pub payload: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

impl TaskContainer {
    /// Wrap a task in a fresh container: new id, payload encoded via serde.
    pub fn new<T: BatchableTask>(task: &T) -> Result<Self> {
        Ok(Self {
            id: TaskId::new(),
            task_type: T::TASK_TYPE.to_string(),
            group: task.group(),
            payload: serde_json::to_value(task)?,
            created_at: Utc::now(),
        })
    }

    /// Rebuild a container from its persisted record, preserving identity.
    pub fn from_record(group: &str, record: ContainerRecord) -> Self {
        Self {
            id: record.identifier,
            task_type: record.task_type,
            group: group.to_string(),
            payload: record.task,
            created_at: record.created_at,
        }
    }

    /// The persisted form of this container.
    pub fn to_record(&self) -> ContainerRecord {
        ContainerRecord {
            identifier: self.id,
            task_type: self.task_type.clone(),
            task: self.payload.clone(),
            created_at: self.created_at,
        }
    }
}

/// Two containers with identical payloads but different ids are distinct.
impl PartialEq for TaskContainer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TaskContainer {}

impl std::hash::Hash for TaskContainer {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// The persisted form of a task container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub identifier: TaskId,
    pub task_type: String,
    /// Encoded task payload, opaque to the persistence layer.
    pub task: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A full store snapshot as handed to persistence: group key to its ordered
/// container records.
pub type SerializedGroups = HashMap<String, Vec<ContainerRecord>>;

// ---------------------------------------------------------------------------
// Process Outcome
// ---------------------------------------------------------------------------

/// Completion signal a processor reports for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The chunk was handled; its containers can be removed.
    Done,
    /// Re-dispatch the same chunk after `delay`. No retry cap is enforced.
    Retry { delay: Duration },
}

// ---------------------------------------------------------------------------
// Engine State
// ---------------------------------------------------------------------------

/// Observable engine state snapshot.
///
/// `active_chunk` non-None means a dispatch cycle is in flight; ticks no-op
/// until it clears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineState {
    pub running: bool,
    /// Group and container count of the chunk currently being dispatched.
    pub active_chunk: Option<(String, usize)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        target: String,
    }

    #[async_trait::async_trait]
    impl BatchableTask for Ping {
        const TASK_TYPE: &'static str = "Ping";

        fn group(&self) -> String {
            "ping group".to_string()
        }

        async fn process_group(_tasks: Vec<Self>) -> ProcessOutcome {
            ProcessOutcome::Done
        }
    }

    #[test]
    fn identical_payloads_are_distinct_containers() {
        let task = Ping {
            target: "a".to_string(),
        };
        let first = TaskContainer::new(&task).unwrap();
        let second = TaskContainer::new(&task).unwrap();

        assert_eq!(first.payload, second.payload);
        assert_ne!(first, second);
    }

    #[test]
    fn record_round_trip_preserves_identity_and_payload() {
        let task = Ping {
            target: "b".to_string(),
        };
        let container = TaskContainer::new(&task).unwrap();

        let record = container.to_record();
        let restored = TaskContainer::from_record(&container.group, record);

        assert_eq!(container, restored);
        assert_eq!(container.payload, restored.payload);
        assert_eq!(container.task_type, restored.task_type);
        assert_eq!(container.group, restored.group);
    }
}
