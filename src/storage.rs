//! Persistence backends for the suspend/resume handoff.
//!
//! Storage holds at most one full snapshot of the grouped containers. The
//! engine overwrites it on suspend and drains it (load then delete) on
//! resume. It is a one-shot handoff, never a durable cache.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::SerializedGroups;

/// External persistence collaborator.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Load the persisted snapshot. `None` means nothing was stored.
    async fn load(&self) -> Result<Option<SerializedGroups>>;

    /// Replace whatever is stored with `groups`.
    async fn overwrite(&self, groups: SerializedGroups) -> Result<()>;

    /// Delete the stored snapshot, if any.
    async fn delete_all(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// File storage
// ---------------------------------------------------------------------------

/// JSON snapshot in a single file.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn load(&self) -> Result<Option<SerializedGroups>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn overwrite(&self, groups: SerializedGroups) -> Result<()> {
        let bytes = serde_json::to_vec(&groups)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory storage
// ---------------------------------------------------------------------------

/// Mutex-held snapshot, for tests and hosts that opt out of durability.
#[derive(Default)]
pub struct InMemoryStorage {
    groups: Mutex<Option<SerializedGroups>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn load(&self) -> Result<Option<SerializedGroups>> {
        Ok(self.groups.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn overwrite(&self, groups: SerializedGroups) -> Result<()> {
        *self.groups.lock().unwrap_or_else(|e| e.into_inner()) = Some(groups);
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        *self.groups.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
