//! Concurrency-safe grouped container store.
//!
//! A single spawned task owns the group map; handles talk to it over an
//! ordered command channel. Every operation except `insert` sends a command
//! and awaits its reply, so callers observe a consistent, linearizable view.
//! `insert` is fire-and-forget so producers never stall, and its effect is
//! guaranteed visible only after a subsequently issued awaited operation
//! completes, because commands are applied strictly in channel order.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, oneshot};

use crate::model::{TaskContainer, TaskId};

/// A group key paired with an ordered run of its containers. Used both for
/// full snapshots and for dispatch chunks.
pub type GroupAndContainers = (String, Vec<TaskContainer>);

enum Command {
    Insert {
        container: TaskContainer,
    },
    Merge {
        groups: Vec<GroupAndContainers>,
        reply: oneshot::Sender<()>,
    },
    Remove {
        group: String,
        ids: Vec<TaskId>,
        reply: oneshot::Sender<()>,
    },
    RemoveGroup {
        group: String,
        reply: oneshot::Sender<()>,
    },
    RemoveAll {
        reply: oneshot::Sender<()>,
    },
    AllTasks {
        reply: oneshot::Sender<Vec<GroupAndContainers>>,
    },
    ChunkedTasks {
        chunk_size: usize,
        reply: oneshot::Sender<Vec<GroupAndContainers>>,
    },
}

/// Handle to the grouped store. Cheap to clone; all clones address the same
/// underlying map. The owner task exits when every handle is dropped.
#[derive(Clone)]
pub struct GroupedStore {
    tx: mpsc::UnboundedSender<Command>,
}

impl GroupedStore {
    /// Create an empty store and spawn its owner task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_store(rx));
        Self { tx }
    }

    /// Schedule an append of `container` under its group.
    ///
    /// Non-blocking and never deduplicates. There is no immediate-read
    /// guarantee; await any other store operation to synchronize.
    pub fn insert(&self, container: TaskContainer) {
        let _ = self.tx.send(Command::Insert { container });
    }

    /// Merge grouped containers into the store.
    ///
    /// Per group, containers whose id already exists are dropped; the rest
    /// are appended preserving relative order. Idempotent.
    pub async fn merge(&self, groups: Vec<GroupAndContainers>) {
        let (reply, done) = oneshot::channel();
        if self.tx.send(Command::Merge { groups, reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Remove the given containers (matched by id) from a group. Deletes the
    /// group key entirely if it becomes empty.
    pub async fn remove(&self, containers: &[TaskContainer], group: &str) {
        let (reply, done) = oneshot::channel();
        let cmd = Command::Remove {
            group: group.to_string(),
            ids: containers.iter().map(|c| c.id).collect(),
            reply,
        };
        if self.tx.send(cmd).is_ok() {
            let _ = done.await;
        }
    }

    /// Remove every container in one group.
    pub async fn remove_all_tasks_for(&self, group: &str) {
        let (reply, done) = oneshot::channel();
        let cmd = Command::RemoveGroup {
            group: group.to_string(),
            reply,
        };
        if self.tx.send(cmd).is_ok() {
            let _ = done.await;
        }
    }

    /// Clear the whole store.
    pub async fn remove_all_tasks(&self) {
        let (reply, done) = oneshot::channel();
        if self.tx.send(Command::RemoveAll { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Snapshot of all groups and their containers. Container order within a
    /// group is preserved; group order is unspecified.
    pub async fn all_tasks(&self) -> Vec<GroupAndContainers> {
        let (reply, snapshot) = oneshot::channel();
        if self.tx.send(Command::AllTasks { reply }).is_err() {
            return Vec::new();
        }
        snapshot.await.unwrap_or_default()
    }

    /// Snapshot with each group's containers split into consecutive chunks of
    /// at most `chunk_size`, last chunk possibly smaller, order preserved.
    pub async fn chunked_tasks(&self, chunk_size: usize) -> Vec<GroupAndContainers> {
        let (reply, snapshot) = oneshot::channel();
        let cmd = Command::ChunkedTasks { chunk_size, reply };
        if self.tx.send(cmd).is_err() {
            return Vec::new();
        }
        snapshot.await.unwrap_or_default()
    }
}

impl Default for GroupedStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Owner task
// ---------------------------------------------------------------------------

async fn run_store(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut containers_by_group: HashMap<String, Vec<TaskContainer>> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Insert { container } => {
                containers_by_group
                    .entry(container.group.clone())
                    .or_default()
                    .push(container);
            }
            Command::Merge { groups, reply } => {
                for (group, containers) in groups {
                    // Never materialize an empty group.
                    if containers.is_empty() {
                        continue;
                    }
                    let existing = containers_by_group.entry(group).or_default();
                    let known: HashSet<TaskId> = existing.iter().map(|c| c.id).collect();
                    existing
                        .extend(containers.into_iter().filter(|c| !known.contains(&c.id)));
                }
                let _ = reply.send(());
            }
            Command::Remove { group, ids, reply } => {
                let ids: HashSet<TaskId> = ids.into_iter().collect();
                if let Some(containers) = containers_by_group.get_mut(&group) {
                    containers.retain(|c| !ids.contains(&c.id));
                    if containers.is_empty() {
                        containers_by_group.remove(&group);
                    }
                }
                let _ = reply.send(());
            }
            Command::RemoveGroup { group, reply } => {
                containers_by_group.remove(&group);
                let _ = reply.send(());
            }
            Command::RemoveAll { reply } => {
                containers_by_group.clear();
                let _ = reply.send(());
            }
            Command::AllTasks { reply } => {
                let snapshot = containers_by_group
                    .iter()
                    .map(|(group, containers)| (group.clone(), containers.clone()))
                    .collect();
                let _ = reply.send(snapshot);
            }
            Command::ChunkedTasks { chunk_size, reply } => {
                let chunk_size = chunk_size.max(1);
                let mut chunks = Vec::new();
                for (group, containers) in &containers_by_group {
                    for chunk in containers.chunks(chunk_size) {
                        chunks.push((group.clone(), chunk.to_vec()));
                    }
                }
                let _ = reply.send(chunks);
            }
        }
    }
}
