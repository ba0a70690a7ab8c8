// SPDX-License-Identifier: MIT

//! Run persistence
//!
//! A run is always stored whole, keyed by run id, so a reload reproduces the
//! exact step, context, wait condition and history it was saved with.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::run::WorkflowRun;
use crate::kit::error::StoreError;

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or replace
    async fn save(&self, run: &WorkflowRun) -> Result<(), StoreError>;

    async fn load(&self, id: &str) -> Result<Option<WorkflowRun>, StoreError>;

    async fn list(&self) -> Result<Vec<WorkflowRun>, StoreError>;

    /// Returns whether a record was removed
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

fn decode(id: &str, text: &str) -> Result<WorkflowRun, StoreError> {
    serde_json::from_str(text).map_err(|source| StoreError::Corrupt {
        id: id.to_string(),
        source,
    })
}

/// Keeps serialised records in memory. Serialising on every save keeps it
/// honest about what survives a reload.
#[derive(Clone, Default)]
pub struct MemoryRunStore {
    records: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let text = serde_json::to_string(run)?;
        self.records.write().await.insert(run.id.clone(), text);
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<WorkflowRun>, StoreError> {
        match self.records.read().await.get(id) {
            Some(text) => decode(id, text).map(Some),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<WorkflowRun>, StoreError> {
        let records = self.records.read().await;
        records.iter().map(|(id, text)| decode(id, text)).collect()
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(id).is_some())
    }
}

/// One JSON file per run under a directory. Writes go to a temporary file
/// that is renamed over the record.
#[derive(Debug, Clone)]
pub struct FileRunStore {
    dir: PathBuf,
}

impl FileRunStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `None` for ids that could escape the directory
    fn path_for(&self, id: &str) -> Option<PathBuf> {
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        safe.then(|| self.dir.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let path = self.path_for(&run.id).ok_or_else(|| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unsafe run id '{}'", run.id),
            ))
        })?;
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_vec_pretty(run)?;
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<WorkflowRun>, StoreError> {
        let Some(path) = self.path_for(id) else {
            return Ok(None);
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => decode(id, &text).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<WorkflowRun>, StoreError> {
        let mut runs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let text = tokio::fs::read_to_string(&path).await?;
            runs.push(decode(&id, &text)?);
        }
        Ok(runs)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let Some(path) = self.path_for(id) else {
            return Ok(false);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
