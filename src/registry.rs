//! Task capabilities and their registry.
//!
//! Each task type registers one capability bundle: how to decode its
//! persisted payloads and how to process a batch of its tasks. Registration
//! is explicit and happens before the engine starts; routing is a plain
//! map lookup on the stable type key, never runtime type inspection.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{ContainerRecord, ProcessOutcome, TaskContainer};

// ---------------------------------------------------------------------------
// Batchable Task
// ---------------------------------------------------------------------------

/// A task type the engine can batch.
///
/// Encoding rides on the serde impls: payloads are stored as
/// `serde_json::Value` from ingest onward and decoded back to `Self` at
/// dispatch time. `process_group` receives one chunk's tasks and reports
/// `Done` or `Retry` for the whole chunk.
#[async_trait]
pub trait BatchableTask:
    Serialize + DeserializeOwned + Send + Sync + Sized + 'static
{
    /// Stable type key routing records and chunks to this capability.
    const TASK_TYPE: &'static str;

    /// Partition key under which this task is batched.
    fn group(&self) -> String;

    /// Process one chunk of tasks. Runs on the engine's dispatch worker.
    async fn process_group(tasks: Vec<Self>) -> ProcessOutcome;
}

// ---------------------------------------------------------------------------
// Erased handler
// ---------------------------------------------------------------------------

/// Object-safe face of a registered task capability.
#[async_trait]
pub(crate) trait TaskHandler: Send + Sync {
    fn task_type(&self) -> &'static str;

    /// Check that a persisted payload still decodes to the concrete type.
    fn validate(&self, payload: &serde_json::Value) -> Result<()>;

    /// Decode a chunk's payloads and run the type's batch processor.
    async fn process(&self, payloads: Vec<serde_json::Value>) -> ProcessOutcome;
}

struct TypedHandler<T> {
    _marker: PhantomData<T>,
}

#[async_trait]
impl<T: BatchableTask> TaskHandler for TypedHandler<T> {
    fn task_type(&self) -> &'static str {
        T::TASK_TYPE
    }

    fn validate(&self, payload: &serde_json::Value) -> Result<()> {
        serde_json::from_value::<T>(payload.clone())
            .map(drop)
            .map_err(Error::from)
    }

    async fn process(&self, payloads: Vec<serde_json::Value>) -> ProcessOutcome {
        let mut tasks = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match serde_json::from_value::<T>(payload) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    warn!(task_type = T::TASK_TYPE, error = %e, "dropping undecodable payload from chunk");
                }
            }
        }

        // A chunk with nothing decodable must not spin the retry loop.
        if tasks.is_empty() {
            return ProcessOutcome::Done;
        }

        T::process_group(tasks).await
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Registry of task capabilities, indexed by type key.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    /// Create an empty registry with no capabilities.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register the capability bundle for a task type.
    ///
    /// Registering the same type twice replaces the earlier entry.
    pub fn register<T: BatchableTask>(&mut self) {
        let handler: Arc<dyn TaskHandler> = Arc::new(TypedHandler::<T> {
            _marker: PhantomData,
        });
        self.handlers.insert(handler.task_type(), handler);
    }

    /// Look up the handler for a type key.
    pub(crate) fn handler(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    /// Rebuild a container from a persisted record.
    ///
    /// Fails when the record's type key has no registered capability or its
    /// payload no longer decodes.
    pub(crate) fn decode_record(
        &self,
        group: &str,
        record: ContainerRecord,
    ) -> Result<TaskContainer> {
        let handler = self
            .handlers
            .get(record.task_type.as_str())
            .ok_or_else(|| Error::UnknownTaskType(record.task_type.clone()))?;
        handler.validate(&record.task)?;
        Ok(TaskContainer::from_record(group, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskId;
    use chrono::Utc;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Upload {
        path: String,
    }

    #[async_trait]
    impl BatchableTask for Upload {
        const TASK_TYPE: &'static str = "Upload";

        fn group(&self) -> String {
            "uploads".to_string()
        }

        async fn process_group(_tasks: Vec<Self>) -> ProcessOutcome {
            ProcessOutcome::Done
        }
    }

    fn record(task_type: &str, task: serde_json::Value) -> ContainerRecord {
        ContainerRecord {
            identifier: TaskId::new(),
            task_type: task_type.to_string(),
            task,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn registered_type_decodes() {
        let mut registry = TaskRegistry::new();
        registry.register::<Upload>();

        let restored = registry
            .decode_record("uploads", record("Upload", json!({"path": "/tmp/a"})))
            .unwrap();
        assert_eq!(restored.task_type, "Upload");
        assert_eq!(restored.group, "uploads");
    }

    #[test]
    fn unknown_type_key_is_rejected() {
        let registry = TaskRegistry::new();
        let result = registry.decode_record("uploads", record("Upload", json!({})));
        assert!(matches!(result, Err(Error::UnknownTaskType(_))));
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let mut registry = TaskRegistry::new();
        registry.register::<Upload>();

        let result =
            registry.decode_record("uploads", record("Upload", json!({"path": 42})));
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
