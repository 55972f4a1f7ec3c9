//! # batchq
//!
//! Embedded task batching engine. Applications `gulp` units of work, the
//! engine batches them by a caller-supplied group key in a concurrency-safe
//! in-memory store, and a periodic tick dispatches each group's pending work
//! to its registered processor in size-bounded chunks, retrying a chunk until
//! it succeeds. Queued state survives application suspend/resume through a
//! one-shot handoff to pluggable persistence.
//!
//! ```no_run
//! use batchq::{BatchEngine, BatchableTask, FileStorage, ProcessOutcome};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct LogEvent {
//!     message: String,
//! }
//!
//! #[async_trait::async_trait]
//! impl BatchableTask for LogEvent {
//!     const TASK_TYPE: &'static str = "LogEvent";
//!
//!     fn group(&self) -> String {
//!         "log events".to_string()
//!     }
//!
//!     async fn process_group(tasks: Vec<Self>) -> ProcessOutcome {
//!         tracing::info!(count = tasks.len(), "shipping log batch");
//!         ProcessOutcome::Done
//!     }
//! }
//!
//! # async fn demo() {
//! let engine = BatchEngine::builder()
//!     .register::<LogEvent>()
//!     .storage(FileStorage::new("queued-tasks.json"))
//!     .build();
//! engine.start();
//! engine.gulp(LogEvent { message: "hello".to_string() });
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod model;
pub mod registry;
pub mod storage;
pub mod store;

pub use engine::{BatchEngine, BatchEngineBuilder, EngineConfig};
pub use error::{Error, Result};
pub use model::{ContainerRecord, EngineState, ProcessOutcome, SerializedGroups, TaskContainer, TaskId};
pub use registry::{BatchableTask, TaskRegistry};
pub use storage::{FileStorage, InMemoryStorage, Storage};
pub use store::{GroupAndContainers, GroupedStore};
