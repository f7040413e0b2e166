use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const CURRENT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt checkpoint {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Durable ingestion progress for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub source_id: String,
    /// Offset to resume reading from
    pub committed_offset: u64,
    /// Sequence number of the last delivered event
    pub committed_sequence: u64,
    pub inode: u64,
    pub updated_at: DateTime<Utc>,
}

/// Position covered by an acknowledged (or quarantined) batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPosition {
    pub offset: u64,
    pub sequence: u64,
    pub inode: u64,
}

/// One small JSON file per source, replaced atomically on every commit.
pub struct CheckpointStore {
    dir: PathBuf,
    committed: Mutex<HashMap<String, Checkpoint>>,
}

impl CheckpointStore {
    /// Open the store, creating its directory. Fails if the directory
    /// cannot be created or written, since progress could not be saved.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|source| CheckpointError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let marker = dir.join(".write-check");
        File::create(&marker)
            .and_then(|_| fs::remove_file(&marker))
            .map_err(|source| CheckpointError::Io {
                path: marker.clone(),
                source,
            })?;

        Ok(Self {
            dir: dir.to_path_buf(),
            committed: Mutex::new(HashMap::new()),
        })
    }

    /// File holding a source's checkpoint
    pub fn path_for(&self, source_id: &str) -> PathBuf {
        let digest = Sha256::digest(source_id.as_bytes());
        let name: String = digest.iter().take(16).map(|b| format!("{:02x}", b)).collect();
        self.dir.join(format!("{}.json", name))
    }

    /// Load the committed checkpoint for a source, if one exists.
    pub fn load(&self, source_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(source_id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(source_id, "No checkpoint found");
                return Ok(None);
            }
            Err(source) => return Err(CheckpointError::Io { path, source }),
        };

        let checkpoint: Checkpoint =
            serde_json::from_str(&contents).map_err(|e| CheckpointError::Corrupt {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if checkpoint.version != CURRENT_VERSION {
            tracing::warn!(
                source_id,
                version = checkpoint.version,
                expected = CURRENT_VERSION,
                "Checkpoint version mismatch, ignoring checkpoint"
            );
            return Ok(None);
        }
        if checkpoint.source_id != source_id {
            return Err(CheckpointError::Corrupt {
                path,
                message: format!("belongs to source '{}'", checkpoint.source_id),
            });
        }

        tracing::info!(
            source_id,
            offset = checkpoint.committed_offset,
            sequence = checkpoint.committed_sequence,
            "Loaded checkpoint"
        );
        self.lock().insert(source_id.to_string(), checkpoint.clone());
        Ok(Some(checkpoint))
    }

    /// Durably record progress. Returns `false` when the commit is not ahead
    /// of what is already stored and was skipped.
    pub fn commit(&self, source_id: &str, position: CommitPosition) -> Result<bool> {
        if let Some(existing) = self.lock().get(source_id) {
            if position.sequence <= existing.committed_sequence {
                return Ok(false);
            }
        }

        let checkpoint = Checkpoint {
            version: CURRENT_VERSION,
            source_id: source_id.to_string(),
            committed_offset: position.offset,
            committed_sequence: position.sequence,
            inode: position.inode,
            updated_at: Utc::now(),
        };

        self.write_durably(&checkpoint)?;
        tracing::debug!(
            source_id,
            offset = position.offset,
            sequence = position.sequence,
            "Checkpoint committed"
        );
        self.lock().insert(source_id.to_string(), checkpoint);
        Ok(true)
    }

    /// Last committed checkpoint per source, as seen by this process
    pub fn snapshot(&self) -> Vec<Checkpoint> {
        let mut checkpoints: Vec<Checkpoint> = self.lock().values().cloned().collect();
        checkpoints.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        checkpoints
    }

    fn write_durably(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path_for(&checkpoint.source_id);
        let tmp = path.with_extension("json.tmp");
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| CheckpointError::Io { path, source }
        };

        let body = serde_json::to_vec_pretty(checkpoint).map_err(|e| CheckpointError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let mut file = File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(&body).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
        drop(file);

        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        sync_dir(&self.dir).map_err(io_err(&self.dir))?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Checkpoint>> {
        self.committed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(offset: u64, sequence: u64) -> CommitPosition {
        CommitPosition {
            offset,
            sequence,
            inode: 42,
        }
    }

    #[test]
    fn test_commit_then_load_in_new_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path()).unwrap();
        assert!(store.commit("app", position(1200, 39)).unwrap());

        let reopened = CheckpointStore::open(dir.path()).unwrap();
        let loaded = reopened.load("app").unwrap().unwrap();
        assert_eq!(loaded.committed_offset, 1200);
        assert_eq!(loaded.committed_sequence, 39);
        assert_eq!(loaded.inode, 42);
        assert!(reopened.load("other").unwrap().is_none());
    }

    #[test]
    fn test_commit_never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path()).unwrap();
        assert!(store.commit("app", position(500, 10)).unwrap());
        assert!(!store.commit("app", position(300, 7)).unwrap());
        assert!(!store.commit("app", position(500, 10)).unwrap());

        let reopened = CheckpointStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load("app").unwrap().unwrap().committed_offset, 500);
    }

    #[test]
    fn test_guard_applies_after_load() {
        let dir = tempfile::tempdir().unwrap();
        CheckpointStore::open(dir.path())
            .unwrap()
            .commit("app", position(500, 10))
            .unwrap();

        let store = CheckpointStore::open(dir.path()).unwrap();
        store.load("app").unwrap();
        assert!(!store.commit("app", position(100, 2)).unwrap());
    }

    #[test]
    fn test_version_mismatch_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path()).unwrap();
        store.commit("app", position(10, 1)).unwrap();

        let path = store.path_for("app");
        let mut checkpoint: Checkpoint =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        checkpoint.version = 999;
        fs::write(&path, serde_json::to_string(&checkpoint).unwrap()).unwrap();

        let reopened = CheckpointStore::open(dir.path()).unwrap();
        assert!(reopened.load("app").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path()).unwrap();
        fs::write(store.path_for("app"), "{ not json").unwrap();
        assert!(matches!(
            store.load("app"),
            Err(CheckpointError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_snapshot_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path()).unwrap();
        store.commit("b", position(1, 0)).unwrap();
        store.commit("a", position(2, 0)).unwrap();
        let ids: Vec<String> = store.snapshot().into_iter().map(|c| c.source_id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_unwritable_dir_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain-file");
        fs::write(&file, "").unwrap();
        assert!(CheckpointStore::open(&file.join("sub")).is_err());
    }
}
