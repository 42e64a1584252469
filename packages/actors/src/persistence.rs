//! File-based snapshot persistence for queues.

use std::path::{Path, PathBuf};

use queue_core::Snapshot;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Stores queue snapshots as one JSON file per queue name.
pub struct StatePersistence {
    /// Base directory for snapshot files.
    base_dir: PathBuf,
}

impl StatePersistence {
    /// Create a new persistence instance.
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Ensure the base directory exists.
    pub async fn init(&self) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, PersistenceError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(PersistenceError::InvalidName(name.to_string()));
        }
        Ok(self.base_dir.join(format!("{}.json", name)))
    }

    /// Write a snapshot under `name`, replacing any previous one.
    pub async fn save_snapshot(
        &self,
        name: &str,
        snapshot: &Snapshot,
    ) -> Result<(), PersistenceError> {
        let path = self.path_for(name)?;
        let json = serde_json::to_string_pretty(snapshot)?;

        // Write to temp file first, then rename for atomicity
        let temp_path = self.base_dir.join(format!("{}.json.tmp", name));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &path).await?;

        tracing::debug!("Saved snapshot ({} jobs) to {:?}", snapshot.len(), path);
        Ok(())
    }

    /// Read the snapshot stored under `name`, if any.
    pub async fn load_snapshot(&self, name: &str) -> Result<Option<Snapshot>, PersistenceError> {
        let path = self.path_for(name)?;

        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let mut file = fs::File::open(&path).await?;
        let mut json = String::new();
        file.read_to_string(&mut json).await?;

        let snapshot: Snapshot = serde_json::from_str(&json)?;
        tracing::debug!("Loaded snapshot ({} jobs) from {:?}", snapshot.len(), path);

        Ok(Some(snapshot))
    }

    /// Delete a snapshot file.
    pub async fn delete(&self, name: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(name)?;

        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
            tracing::debug!("Deleted snapshot file {:?}", path);
        }

        Ok(())
    }

    /// List all saved snapshot names, sorted.
    pub async fn list(&self) -> Result<Vec<String>, PersistenceError> {
        let mut names = Vec::new();

        if !fs::try_exists(&self.base_dir).await? {
            return Ok(names);
        }

        let mut entries = fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem() {
                    names.push(stem.to_string_lossy().to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid snapshot name: {0:?}")]
    InvalidName(String),
}
