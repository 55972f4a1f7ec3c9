//! Batch engine: periodic chunked dispatch, retry, and the suspend/resume
//! persistence handoff.
//!
//! Producers `gulp` tasks at any time; a periodic tick snapshots the store
//! into size-bounded chunks and a worker task dispatches them strictly one
//! at a time to the capability registered for each chunk's task type. A
//! chunk that reports `Retry` is re-dispatched after the requested delay
//! with no attempt cap, so a misbehaving processor starves every later
//! chunk indefinitely. `stop()` archives and clears the store without
//! waiting for an in-flight dispatch cycle; containers mid-dispatch can
//! therefore also land in the archive.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::model::{EngineState, ProcessOutcome, SerializedGroups, TaskContainer};
use crate::registry::{BatchableTask, TaskRegistry};
use crate::storage::{InMemoryStorage, Storage};
use crate::store::{GroupAndContainers, GroupedStore};

/// Configuration for the batch engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between dispatch ticks.
    pub tick_interval: Duration,
    /// Maximum containers per dispatched chunk.
    pub chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            chunk_size: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`BatchEngine`]. Register every task capability here;
/// the registry is immutable once the engine is built.
pub struct BatchEngineBuilder {
    registry: TaskRegistry,
    storage: Option<Arc<dyn Storage>>,
    config: EngineConfig,
}

impl BatchEngineBuilder {
    pub fn register<T: BatchableTask>(mut self) -> Self {
        self.registry.register::<T>();
        self
    }

    pub fn storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    pub fn shared_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    /// Build the engine. Falls back to [`InMemoryStorage`] when no backend
    /// was supplied; pass one explicitly for durability across restarts.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> BatchEngine {
        BatchEngine {
            inner: Arc::new(EngineInner {
                store: GroupedStore::new(),
                registry: self.registry,
                storage: self
                    .storage
                    .unwrap_or_else(|| Arc::new(InMemoryStorage::new())),
                config: self.config,
                running: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                dispatch_active: AtomicBool::new(false),
                active_chunk: Mutex::new(None),
                shutdown: Notify::new(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The batch engine. Cheap to clone; all clones drive the same state.
#[derive(Clone)]
pub struct BatchEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: GroupedStore,
    registry: TaskRegistry,
    storage: Arc<dyn Storage>,
    config: EngineConfig,
    running: AtomicBool,
    /// Bumped on every start/stop so a superseded tick loop can tell it
    /// should exit even if `running` flipped back to true in the meantime.
    epoch: AtomicU64,
    /// Held for a whole dispatch cycle: two chunks are never in flight
    /// concurrently, even across ticks.
    dispatch_active: AtomicBool,
    active_chunk: Mutex<Option<(String, usize)>>,
    shutdown: Notify,
}

impl BatchEngine {
    pub fn builder() -> BatchEngineBuilder {
        BatchEngineBuilder {
            registry: TaskRegistry::new(),
            storage: None,
            config: EngineConfig::default(),
        }
    }

    /// Start the engine: restore persisted tasks, then tick periodically.
    /// No-op if already running.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let my_epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.unarchive_groups().await;
            info!("batch engine started");

            loop {
                tokio::select! {
                    _ = inner.shutdown.notified() => {}
                    _ = tokio::time::sleep(inner.config.tick_interval) => {
                        if inner.epoch.load(Ordering::SeqCst) != my_epoch {
                            break;
                        }
                        Arc::clone(&inner).tick().await;
                    }
                }
                if inner.epoch.load(Ordering::SeqCst) != my_epoch {
                    break;
                }
            }
            debug!("tick loop exited");
        });
    }

    /// Stop the engine: cancel the tick loop, archive the store, clear it.
    /// No-op if already stopped.
    ///
    /// Does NOT wait for or cancel an in-flight dispatch cycle; a chunk
    /// being processed right now is archived along with everything else and
    /// its eventual removal lands on the already-cleared store.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.shutdown.notify_one();

        self.inner.archive_groups().await;
        self.inner.store.remove_all_tasks().await;
        info!("batch engine stopped");
    }

    /// Swallow a task: wrap it in a fresh container and queue it under its
    /// group. Never fails from the caller's perspective.
    pub fn gulp<T: BatchableTask>(&self, task: T) {
        match TaskContainer::new(&task) {
            Ok(container) => {
                debug!(id = %container.id, group = %container.group, "task gulped");
                self.inner.store.insert(container);
            }
            Err(e) => {
                warn!(task_type = T::TASK_TYPE, error = %e, "failed to encode task, dropping");
            }
        }
    }

    /// Hand the store's full contents to persistence (the suspend handoff).
    /// An empty store deletes the persisted snapshot instead of writing one.
    pub async fn archive_groups(&self) {
        self.inner.archive_groups().await;
    }

    /// Drain persistence back into the store (the resume handoff): load,
    /// merge with dedup by id, then delete the persisted copy.
    pub async fn unarchive_groups(&self) {
        self.inner.unarchive_groups().await;
    }

    // -- Host lifecycle hooks. Wiring them to a real event source is the
    //    host's responsibility.

    /// Host signal: application entering the background.
    pub async fn on_background(&self) {
        self.stop().await;
    }

    /// Host signal: application returning to the foreground.
    pub fn on_foreground(&self) {
        self.start();
    }

    /// Host signal: application terminating.
    pub async fn on_terminate(&self) {
        self.stop().await;
    }

    /// Snapshot of the engine's run state.
    pub fn state(&self) -> EngineState {
        EngineState {
            running: self.inner.running.load(Ordering::SeqCst),
            active_chunk: self
                .inner
                .active_chunk
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }

    /// The grouped store this engine owns.
    pub fn store(&self) -> &GroupedStore {
        &self.inner.store
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

impl EngineInner {
    /// One timer firing: no-op unless running and no dispatch cycle is in
    /// flight, otherwise snapshot chunks and hand them to a worker task.
    async fn tick(self: Arc<Self>) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if self
            .dispatch_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let chunks = self.store.chunked_tasks(self.config.chunk_size).await;
        if chunks.is_empty() {
            self.dispatch_active.store(false, Ordering::SeqCst);
            return;
        }

        tokio::spawn(async move {
            self.run_dispatch_cycle(chunks).await;
            self.dispatch_active.store(false, Ordering::SeqCst);
        });
    }

    /// Process the snapshot's chunks strictly one at a time, in order.
    async fn run_dispatch_cycle(&self, chunks: Vec<GroupAndContainers>) {
        for (group, containers) in chunks {
            self.set_active_chunk(Some((group.clone(), containers.len())));

            // A group should never snapshot empty; clear it if one does.
            if containers.is_empty() {
                self.store.remove_all_tasks_for(&group).await;
                self.set_active_chunk(None);
                continue;
            }

            let task_type = containers[0].task_type.clone();
            let Some(handler) = self.registry.handler(&task_type) else {
                warn!(%group, %task_type, "no processor registered, chunk stays queued");
                self.set_active_chunk(None);
                continue;
            };

            loop {
                let payloads = containers.iter().map(|c| c.payload.clone()).collect();
                match handler.process(payloads).await {
                    ProcessOutcome::Done => {
                        self.store.remove(&containers, &group).await;
                        debug!(%group, count = containers.len(), "chunk done");
                        break;
                    }
                    ProcessOutcome::Retry { delay } => {
                        debug!(%group, delay_ms = delay.as_millis() as u64, "chunk retry");
                        tokio::time::sleep(delay).await;
                    }
                }
            }

            self.set_active_chunk(None);
        }
    }

    fn set_active_chunk(&self, chunk: Option<(String, usize)>) {
        *self.active_chunk.lock().unwrap_or_else(|e| e.into_inner()) = chunk;
    }

    // -----------------------------------------------------------------------
    // Persistence handoff
    // -----------------------------------------------------------------------

    async fn archive_groups(&self) {
        let snapshot = self.store.all_tasks().await;
        if snapshot.is_empty() {
            if let Err(e) = self.storage.delete_all().await {
                warn!(error = %e, "failed to clear persisted tasks");
            }
            return;
        }

        let mut task_count = 0;
        let mut groups = SerializedGroups::new();
        for (group, containers) in snapshot {
            task_count += containers.len();
            groups.insert(group, containers.iter().map(|c| c.to_record()).collect());
        }

        match self.storage.overwrite(groups).await {
            Ok(()) => info!(tasks = task_count, "archived queued tasks"),
            Err(e) => warn!(error = %e, "archive failed, queued tasks not persisted"),
        }
    }

    async fn unarchive_groups(&self) {
        let loaded = match self.storage.load().await {
            Ok(Some(groups)) => groups,
            Ok(None) => SerializedGroups::new(),
            Err(e) => {
                warn!(error = %e, "failed to load persisted tasks, treating as empty");
                SerializedGroups::new()
            }
        };

        let mut restored: Vec<GroupAndContainers> = Vec::new();
        for (group, records) in loaded {
            let mut containers = Vec::with_capacity(records.len());
            for record in records {
                match self.registry.decode_record(&group, record) {
                    Ok(container) => containers.push(container),
                    Err(e) => warn!(%group, error = %e, "dropping persisted record"),
                }
            }
            if !containers.is_empty() {
                restored.push((group, containers));
            }
        }

        if !restored.is_empty() {
            self.store.merge(restored).await;
        }
        if let Err(e) = self.storage.delete_all().await {
            warn!(error = %e, "failed to clear persisted tasks after restore");
        }
    }
}
